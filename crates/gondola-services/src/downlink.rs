//! Downlink scheduling.
//!
//! Each hirate link owns a FIFO of encoded file packets and releases at most
//! one per tick, no sooner than `last_sent_size / bytes_per_second` after the
//! previous one. A bandwidth of 0 disables the link; queued packets stay put.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::{BufMut, Bytes, BytesMut};
use dashmap::DashMap;

use gondola_core::config::DownlinkConfig;
use gondola_core::stuffing::{max_unstuffed_len, stuff, ESCAPE_BYTE};
use gondola_core::wire::{
    FilePacket, Packet, PacketError, FILE_MAX_PAYLOAD, LOWRATE_DOWNLINK_ID, SIP_END_BYTE, SIP_START_BYTE,
};

use crate::file_transfer::fragment_payload;

#[derive(Debug)]
pub struct HirateDownlink {
    name: String,
    queue: VecDeque<Bytes>,
    bytes_per_second: u32,
    packet_size: usize,
    byte_stuffing: bool,
    last_sent_size: usize,
    last_sent_at: Option<Instant>,
    total_bytes_sent: u64,
}

impl HirateDownlink {
    pub fn new(name: impl Into<String>, bytes_per_second: u32, packet_size: usize) -> Self {
        Self {
            name: name.into(),
            queue: VecDeque::new(),
            bytes_per_second,
            packet_size,
            byte_stuffing: false,
            last_sent_size: 0,
            last_sent_at: None,
            total_bytes_sent: 0,
        }
    }

    pub fn from_config(name: &str, config: &DownlinkConfig) -> Self {
        let mut link = Self::new(name, config.bytes_per_second, config.packet_size);
        link.byte_stuffing = config.byte_stuffing;
        link
    }

    /// Stuff every fragment payload so 0xFA never appears inside it.
    pub fn with_byte_stuffing(mut self, enabled: bool) -> Self {
        self.byte_stuffing = enabled;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Payload bytes per fragment. With byte stuffing the stuffed fragment
    /// still fits `packet_size`.
    pub fn fragment_size(&self) -> usize {
        let size = self.packet_size.min(FILE_MAX_PAYLOAD);
        if self.byte_stuffing {
            max_unstuffed_len(size)
        } else {
            size
        }
    }

    /// Largest payload one file id can carry on this link.
    pub fn max_payload(&self) -> usize {
        self.fragment_size() * usize::from(u8::MAX)
    }

    /// Fragment `payload` as file `file_id` and queue the packets.
    ///
    /// With `preempt` the packets go ahead of everything already queued, in
    /// their own order. Returns the number of packets queued.
    pub fn enqueue(&mut self, payload: &[u8], file_id: u32, preempt: bool) -> Result<usize, PacketError> {
        let mut packets = fragment_payload(file_id, payload, self.fragment_size())?;
        if self.byte_stuffing {
            packets = packets
                .into_iter()
                .map(|p| {
                    let stuffed = stuff(&p.payload, ESCAPE_BYTE);
                    FilePacket::new(p.file_id, p.fragment_index, p.fragment_count, stuffed)
                })
                .collect::<Result<_, _>>()?;
        }
        let encoded: Vec<Bytes> = packets.iter().map(Packet::encode).collect();
        let count = encoded.len();
        if preempt {
            for packet in encoded.into_iter().rev() {
                self.queue.push_front(packet);
            }
        } else {
            self.queue.extend(encoded);
        }
        tracing::debug!(link = %self.name, file_id, packets = count, preempt, "queued for downlink");
        Ok(count)
    }

    pub fn is_enabled(&self) -> bool {
        self.bytes_per_second > 0
    }

    /// True when the queue is empty and the link enabled: time to pull more data.
    pub fn has_capacity(&self) -> bool {
        self.queue.is_empty() && self.is_enabled()
    }

    pub fn bytes_per_second(&self) -> u32 {
        self.bytes_per_second
    }

    pub fn set_bandwidth(&mut self, bytes_per_second: u32) {
        tracing::info!(link = %self.name, bytes_per_second, "downlink bandwidth set");
        self.bytes_per_second = bytes_per_second;
    }

    /// Drop everything queued. Returns how many packets were dropped.
    pub fn flush(&mut self) -> usize {
        let dropped = self.queue.len();
        self.queue.clear();
        if dropped > 0 {
            tracing::info!(link = %self.name, dropped, "downlink queue flushed");
        }
        dropped
    }

    pub fn queued_packets(&self) -> usize {
        self.queue.len()
    }

    pub fn total_bytes_sent(&self) -> u64 {
        self.total_bytes_sent
    }

    /// Minimum spacing after the last packet released.
    pub fn current_wait(&self) -> Duration {
        if self.bytes_per_second == 0 {
            return Duration::MAX;
        }
        Duration::from_secs_f64(self.last_sent_size as f64 / self.bytes_per_second as f64)
    }

    /// Release the head packet if the link is enabled and the previous packet
    /// has had time to drain. The caller writes the returned bytes.
    pub fn tick(&mut self, now: Instant) -> Option<Bytes> {
        if !self.is_enabled() || self.queue.is_empty() {
            return None;
        }
        if let Some(last) = self.last_sent_at {
            if now.saturating_duration_since(last) < self.current_wait() {
                return None;
            }
        }
        let packet = self.queue.pop_front()?;
        self.last_sent_size = packet.len();
        self.last_sent_at = Some(now);
        self.total_bytes_sent += packet.len() as u64;
        Some(packet)
    }
}

/// The unit's hirate links by name.
pub type DownlinkSet = Arc<DashMap<String, HirateDownlink>>;

pub fn new_downlink_set() -> DownlinkSet {
    Arc::new(DashMap::new())
}

/// Largest lowrate payload; the length field is one byte.
pub const LOWRATE_MAX_PAYLOAD: usize = 255;

/// Frame a status payload for the lowrate link: `0x10 0x53 len payload 0x03`.
pub fn frame_lowrate(payload: &[u8]) -> Result<Bytes, PacketError> {
    if payload.len() > LOWRATE_MAX_PAYLOAD {
        return Err(PacketError::PayloadTooLarge {
            len: payload.len(),
            max: LOWRATE_MAX_PAYLOAD,
        });
    }
    let mut out = BytesMut::with_capacity(payload.len() + 4);
    out.put_u8(SIP_START_BYTE);
    out.put_u8(LOWRATE_DOWNLINK_ID);
    out.put_u8(payload.len() as u8);
    out.put_slice(payload);
    out.put_u8(SIP_END_BYTE);
    Ok(out.freeze())
}

/// Inverse of [`frame_lowrate`], used by ground tools and tests.
pub fn unframe_lowrate(frame: &[u8]) -> Result<&[u8], PacketError> {
    if frame.len() < 4 {
        return Err(PacketError::Length { needed: 4, available: frame.len() });
    }
    if frame[0] != SIP_START_BYTE || frame[1] != LOWRATE_DOWNLINK_ID {
        return Err(PacketError::Validity { field: "lowrate header", value: frame[1] as usize });
    }
    let len = frame[2] as usize;
    if frame.len() < len + 4 {
        return Err(PacketError::Length { needed: len + 4, available: frame.len() });
    }
    if frame[3 + len] != SIP_END_BYTE {
        return Err(PacketError::Validity { field: "end byte", value: frame[3 + len] as usize });
    }
    Ok(&frame[3..3 + len])
}

#[cfg(test)]
mod tests {
    use super::*;
    use gondola_core::stuffing::unstuff;

    #[test]
    fn throttles_to_bandwidth() {
        let mut link = HirateDownlink::new("highrate", 1000, 489);
        link.enqueue(&[7u8; 489 * 3], 1, false).unwrap();
        // Each packet is 489 + 11 bytes, so half a second apart at 1000 B/s.
        let t0 = Instant::now();
        let first = link.tick(t0).unwrap();
        assert_eq!(first.len(), 500);
        assert!(link.tick(t0 + Duration::from_millis(499)).is_none());
        assert!(link.tick(t0 + Duration::from_millis(500)).is_some());
        assert!(link.tick(t0 + Duration::from_millis(700)).is_none());
        assert!(link.tick(t0 + Duration::from_millis(1000)).is_some());
        assert!(link.tick(t0 + Duration::from_secs(5)).is_none());
        assert_eq!(link.total_bytes_sent(), 1500);
    }

    #[test]
    fn send_times_respect_spacing() {
        let mut link = HirateDownlink::new("openport", 250, 100);
        link.enqueue(&[1u8; 1000], 5, false).unwrap();
        let t0 = Instant::now();
        let mut sent_at = Vec::new();
        for ms in (0..10_000).step_by(7) {
            let now = t0 + Duration::from_millis(ms);
            if let Some(packet) = link.tick(now) {
                sent_at.push((now, packet.len()));
            }
        }
        assert_eq!(sent_at.len(), 10);
        for pair in sent_at.windows(2) {
            let spacing = pair[1].0 - pair[0].0;
            assert!(spacing.as_secs_f64() >= pair[0].1 as f64 / 250.0);
        }
    }

    #[test]
    fn disabled_link_holds_packets() {
        let mut link = HirateDownlink::new("los", 0, 1000);
        assert!(!link.has_capacity());
        link.enqueue(b"data", 1, false).unwrap();
        assert!(link.tick(Instant::now()).is_none());
        link.set_bandwidth(100);
        assert!(link.tick(Instant::now()).is_some());
        assert!(link.has_capacity());
    }

    #[test]
    fn preempt_goes_first_in_order() {
        let mut link = HirateDownlink::new("highrate", 1_000_000, 2);
        link.enqueue(b"aaaa", 1, false).unwrap();
        link.enqueue(b"bbbb", 2, true).unwrap();
        let t0 = Instant::now();
        let ids: Vec<(u32, u8)> = (0..4)
            .map(|i| {
                let bytes = link.tick(t0 + Duration::from_secs(i)).unwrap();
                let packet = FilePacket::decode(&bytes).unwrap();
                (packet.file_id, packet.fragment_index)
            })
            .collect();
        assert_eq!(ids, vec![(2, 0), (2, 1), (1, 0), (1, 1)]);
    }

    #[test]
    fn flush_reports_dropped() {
        let mut link = HirateDownlink::new("highrate", 100, 10);
        link.enqueue(&[0u8; 35], 1, false).unwrap();
        assert_eq!(link.queued_packets(), 4);
        assert_eq!(link.flush(), 4);
        assert!(link.has_capacity());
    }

    #[test]
    fn stuffed_fragments_hide_start_byte() {
        let mut link = HirateDownlink::new("highrate", 1_000_000, 100).with_byte_stuffing(true);
        let data = vec![0xFAu8; 98];
        link.enqueue(&data, 3, false).unwrap();
        let bytes = link.tick(Instant::now()).unwrap();
        let packet = FilePacket::decode(&bytes).unwrap();
        assert!(!packet.payload.contains(&ESCAPE_BYTE));
        assert_eq!(unstuff(&packet.payload, ESCAPE_BYTE).unwrap(), data);
    }

    #[test]
    fn full_size_stuffed_fragments_still_decode() {
        let mut link = HirateDownlink::new("highrate", 1_000_000, FILE_MAX_PAYLOAD).with_byte_stuffing(true);
        let data = vec![0xFAu8; FILE_MAX_PAYLOAD];
        assert_eq!(link.enqueue(&data, 1, false).unwrap(), 2);

        let t0 = Instant::now();
        let mut restored = Vec::new();
        for i in 0..2 {
            let bytes = link.tick(t0 + Duration::from_secs(i)).unwrap();
            let packet = FilePacket::decode(&bytes).unwrap();
            assert!(packet.payload.len() <= FILE_MAX_PAYLOAD);
            restored.extend(unstuff(&packet.payload, ESCAPE_BYTE).unwrap());
        }
        assert_eq!(restored, data);
    }

    #[test]
    fn fragment_size_is_capped() {
        let link = HirateDownlink::new("openport", 100, 5000);
        assert_eq!(link.fragment_size(), FILE_MAX_PAYLOAD);
        assert_eq!(link.max_payload(), FILE_MAX_PAYLOAD * 255);
        let stuffed = HirateDownlink::new("openport", 100, 1000).with_byte_stuffing(true);
        assert_eq!(stuffed.fragment_size(), 995);
    }

    #[test]
    fn lowrate_framing() {
        let frame = frame_lowrate(b"status").unwrap();
        assert_eq!(&frame[..3], &[0x10, 0x53, 6]);
        assert_eq!(frame[frame.len() - 1], 0x03);
        assert_eq!(unframe_lowrate(&frame).unwrap(), b"status");
        assert!(frame_lowrate(&[0u8; 256]).is_err());
    }
}
