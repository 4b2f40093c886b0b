//! Packet recovery from an arbitrarily fragmented byte stream.
//!
//! The scanner walks an immutable buffer with a cursor. At each step it looks
//! for the next start byte and tries to decode a frame there:
//!
//!   Length error           → the frame is not complete yet; keep everything
//!                            from the start byte as the remainder and stop.
//!   Integrity / validity   → the start byte was a false positive or the frame
//!                            is damaged; step one byte past it and rescan.
//!   Success                → emit the frame and continue after it.
//!
//! When no start byte is left the rest of the buffer is the remainder. The
//! remainder must be prepended to the next read so frames split across reads
//! are still recovered; `StreamScanner` does that bookkeeping.

use crate::wire::Packet;

/// Counters surfaced for ground diagnosis.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ScanStats {
    pub packets: u64,
    /// Start bytes that did not begin a valid frame.
    pub rejected: u64,
}

/// Extract every complete frame from `buf`.
///
/// Returns the frames in stream order and the unconsumed remainder.
pub fn scan<P: Packet>(buf: &[u8]) -> (Vec<P>, &[u8]) {
    let mut stats = ScanStats::default();
    scan_counted(buf, &mut stats)
}

/// Like [`scan`], accumulating counters into `stats`.
pub fn scan_counted<'a, P: Packet>(buf: &'a [u8], stats: &mut ScanStats) -> (Vec<P>, &'a [u8]) {
    let mut packets = Vec::new();
    let mut cursor = 0;

    while cursor < buf.len() {
        let Some(offset) = buf[cursor..].iter().position(|b| *b == P::START_BYTE) else {
            break;
        };
        cursor += offset;

        match P::decode_prefix(&buf[cursor..]) {
            Ok((packet, used)) => {
                packets.push(packet);
                stats.packets += 1;
                cursor += used;
            }
            Err(e) if e.is_incomplete() => break,
            Err(e) => {
                tracing::debug!(offset = cursor, error = %e, "discarding false start byte");
                stats.rejected += 1;
                cursor += 1;
            }
        }
    }

    (packets, &buf[cursor..])
}

/// Holds the remainder between reads of one stream.
#[derive(Debug)]
pub struct StreamScanner<P> {
    remainder: Vec<u8>,
    stats: ScanStats,
    _packet: std::marker::PhantomData<P>,
}

impl<P: Packet> StreamScanner<P> {
    pub fn new() -> Self {
        Self {
            remainder: Vec::new(),
            stats: ScanStats::default(),
            _packet: std::marker::PhantomData,
        }
    }

    /// Feed newly read bytes, returning every frame they complete.
    pub fn push(&mut self, data: &[u8]) -> Vec<P> {
        self.remainder.extend_from_slice(data);
        let (packets, rest) = scan_counted::<P>(&self.remainder, &mut self.stats);
        let consumed = self.remainder.len() - rest.len();
        self.remainder.drain(..consumed);
        packets
    }

    /// Bytes held back waiting for the rest of a frame.
    pub fn pending(&self) -> &[u8] {
        &self.remainder
    }

    pub fn stats(&self) -> ScanStats {
        self.stats
    }

    pub fn clear(&mut self) {
        self.remainder.clear();
    }
}

impl<P: Packet> Default for StreamScanner<P> {
    fn default() -> Self {
        Self::new()
    }
}
