//! File transfer: fragmentation for the downlink, reassembly on the ground.

use anyhow::{Context, Result};
use bytes::Bytes;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;

use gondola_core::wire::{FilePacket, PacketError};

/// Default fragment payload size on the hirate links.
pub const DEFAULT_PACKET_SIZE: usize = 1000;

/// Split `payload` into `ceil(len / packet_size)` fragments of one file.
///
/// An empty payload still produces one (empty) fragment so the ground sees
/// the file id.
pub fn fragment_payload(file_id: u32, payload: &[u8], packet_size: usize) -> Result<Vec<FilePacket>, PacketError> {
    if packet_size == 0 {
        return Err(PacketError::Validity { field: "packet size", value: 0 });
    }
    let count = payload.len().div_ceil(packet_size).max(1);
    let count = u8::try_from(count).map_err(|_| PacketError::Validity {
        field: "fragment count",
        value: count,
    })?;

    if payload.is_empty() {
        return Ok(vec![FilePacket::new(file_id, 0, 1, Bytes::new())?]);
    }
    payload
        .chunks(packet_size)
        .enumerate()
        .map(|(index, chunk)| FilePacket::new(file_id, index as u8, count, Bytes::copy_from_slice(chunk)))
        .collect()
}

/// A file whose every fragment has arrived.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedFile {
    pub file_id: u32,
    pub fragment_count: u8,
    pub data: Bytes,
}

struct FileAssembly {
    fragment_count: u8,
    fragments: BTreeMap<u8, Bytes>,
}

impl FileAssembly {
    fn new(fragment_count: u8) -> Self {
        Self {
            fragment_count,
            fragments: BTreeMap::new(),
        }
    }

    fn is_complete(&self) -> bool {
        // Keys are unique and always < fragment_count.
        self.fragments.len() == self.fragment_count as usize
    }

    fn missing(&self) -> Vec<u8> {
        (0..self.fragment_count).filter(|i| !self.fragments.contains_key(i)).collect()
    }
}

/// Groups fragments by file id and emits each file once all are present.
///
/// Partial assemblies are kept until they complete; nothing evicts them.
#[derive(Clone, Default)]
pub struct FileReassembler {
    active: Arc<Mutex<HashMap<u32, FileAssembly>>>,
}

impl FileReassembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one fragment. Returns the file when this fragment completes it.
    ///
    /// A repeated index overwrites the earlier payload. A fragment whose count
    /// disagrees with the assembly in progress restarts that assembly, since
    /// file ids wrap and the older file can no longer complete.
    pub async fn add_fragment(&self, packet: FilePacket) -> Option<CompletedFile> {
        if packet.fragment_index >= packet.fragment_count {
            tracing::warn!(
                file_id = packet.file_id,
                index = packet.fragment_index,
                count = packet.fragment_count,
                "fragment index out of range, ignoring"
            );
            return None;
        }

        let mut active = self.active.lock().await;
        let assembly = active
            .entry(packet.file_id)
            .or_insert_with(|| FileAssembly::new(packet.fragment_count));
        if assembly.fragment_count != packet.fragment_count {
            tracing::warn!(
                file_id = packet.file_id,
                was = assembly.fragment_count,
                now = packet.fragment_count,
                "fragment count changed, restarting assembly"
            );
            *assembly = FileAssembly::new(packet.fragment_count);
        }
        assembly.fragments.insert(packet.fragment_index, packet.payload);

        if !assembly.is_complete() {
            return None;
        }
        let assembly = active.remove(&packet.file_id)?;
        let mut data = Vec::with_capacity(assembly.fragments.values().map(Bytes::len).sum());
        for fragment in assembly.fragments.values() {
            data.extend_from_slice(fragment);
        }
        tracing::info!(
            file_id = packet.file_id,
            fragments = assembly.fragment_count,
            bytes = data.len(),
            "file reassembled"
        );
        Some(CompletedFile {
            file_id: packet.file_id,
            fragment_count: assembly.fragment_count,
            data: Bytes::from(data),
        })
    }

    /// File ids with at least one fragment but not yet complete.
    pub async fn in_progress(&self) -> Vec<u32> {
        let mut ids: Vec<u32> = self.active.lock().await.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub async fn missing_fragments(&self, file_id: u32) -> Option<Vec<u8>> {
        self.active.lock().await.get(&file_id).map(FileAssembly::missing)
    }
}

/// Write a completed file under `dir` as `file_<id>.bin`.
pub fn store_completed(dir: &Path, file: &CompletedFile) -> Result<PathBuf> {
    std::fs::create_dir_all(dir).with_context(|| format!("failed to create {}", dir.display()))?;
    let path = dir.join(format!("file_{:010}.bin", file.file_id));
    std::fs::write(&path, &file.data).with_context(|| format!("failed to write {}", path.display()))?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    #[test]
    fn fragment_counts() {
        assert_eq!(fragment_payload(1, &payload(2500), 1000).unwrap().len(), 3);
        assert_eq!(fragment_payload(1, &payload(2000), 1000).unwrap().len(), 2);
        let empty = fragment_payload(1, &[], 1000).unwrap();
        assert_eq!(empty.len(), 1);
        assert_eq!(empty[0].fragment_count, 1);
        assert!(fragment_payload(1, &payload(256 * 10), 10).is_err());
    }

    /// Every ordering of `0..n`.
    fn permutations(n: usize) -> Vec<Vec<usize>> {
        if n == 0 {
            return vec![Vec::new()];
        }
        let mut out = Vec::new();
        for shorter in permutations(n - 1) {
            for slot in 0..=shorter.len() {
                let mut order = shorter.clone();
                order.insert(slot, n - 1);
                out.push(order);
            }
        }
        out
    }

    #[tokio::test]
    async fn any_arrival_order_reassembles() {
        let data = payload(3500);
        let fragments = fragment_payload(7, &data, 1000).unwrap();
        assert_eq!(fragments.len(), 4);

        let orders = permutations(fragments.len());
        assert_eq!(orders.len(), 24);
        for order in orders {
            let reassembler = FileReassembler::new();
            let mut completed = None;
            for (n, &i) in order.iter().enumerate() {
                let result = reassembler.add_fragment(fragments[i].clone()).await;
                if n + 1 < order.len() {
                    assert!(result.is_none(), "order {order:?}");
                } else {
                    completed = result;
                }
            }
            let file = completed.expect("file should complete");
            assert_eq!(file.file_id, 7);
            assert_eq!(&file.data[..], &data[..], "order {order:?}");
            assert!(reassembler.in_progress().await.is_empty());
        }
    }

    #[tokio::test]
    async fn any_single_loss_yields_no_file() {
        let fragments = fragment_payload(8, &payload(3500), 1000).unwrap();
        for dropped in 0..fragments.len() {
            for order in permutations(fragments.len()) {
                let reassembler = FileReassembler::new();
                for &i in order.iter().filter(|&&i| i != dropped) {
                    assert!(reassembler.add_fragment(fragments[i].clone()).await.is_none());
                }
                assert_eq!(reassembler.missing_fragments(8).await, Some(vec![dropped as u8]));
            }
        }
    }

    #[tokio::test]
    async fn missing_fragment_blocks_completion() {
        let fragments = fragment_payload(3, &payload(3000), 1000).unwrap();
        let reassembler = FileReassembler::new();
        assert!(reassembler.add_fragment(fragments[0].clone()).await.is_none());
        assert!(reassembler.add_fragment(fragments[2].clone()).await.is_none());
        assert_eq!(reassembler.in_progress().await, vec![3]);
        assert_eq!(reassembler.missing_fragments(3).await, Some(vec![1]));
    }

    #[tokio::test]
    async fn duplicates_do_not_change_the_result() {
        let data = payload(2100);
        let fragments = fragment_payload(9, &data, 1000).unwrap();
        let reassembler = FileReassembler::new();
        reassembler.add_fragment(fragments[1].clone()).await;
        reassembler.add_fragment(fragments[1].clone()).await;
        reassembler.add_fragment(fragments[0].clone()).await;
        let file = reassembler.add_fragment(fragments[2].clone()).await.unwrap();
        assert_eq!(&file.data[..], &data[..]);
    }

    #[tokio::test]
    async fn files_interleave_independently() {
        let a = fragment_payload(1, &payload(1500), 1000).unwrap();
        let b = fragment_payload(2, &payload(900), 500).unwrap();
        let reassembler = FileReassembler::new();
        assert!(reassembler.add_fragment(a[0].clone()).await.is_none());
        assert!(reassembler.add_fragment(b[1].clone()).await.is_none());
        assert_eq!(reassembler.add_fragment(b[0].clone()).await.unwrap().file_id, 2);
        assert_eq!(reassembler.add_fragment(a[1].clone()).await.unwrap().file_id, 1);
    }

    #[test]
    fn store_completed_writes_file() {
        let dir = std::env::temp_dir().join(format!("gondola-files-test-{}", std::process::id()));
        let file = CompletedFile {
            file_id: 42,
            fragment_count: 1,
            data: Bytes::from_static(b"hello"),
        };
        let path = store_completed(&dir, &file).unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"hello");
        let _ = std::fs::remove_dir_all(&dir);
    }
}
