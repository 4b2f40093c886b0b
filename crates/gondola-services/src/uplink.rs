//! SIP uplink parsing.
//!
//! The SIP forwards two frame kinds on the uplink UDP port:
//!
//!   science data request   0x10 0x13 0x03
//!   science command        0x10 0x14 len body[len] 0x03
//!
//! Datagrams can split or merge frames and carry line noise, so parsing is a
//! resynchronising scan like the downlink packet scanner. Command frames are
//! handed on whole; their CRC is checked when the command packet is decoded.

use bytes::Bytes;

use gondola_core::wire::{SCIENCE_COMMAND_ID, SCIENCE_DATA_REQUEST_ID, SIP_END_BYTE, SIP_START_BYTE};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UplinkPacket {
    ScienceDataRequest,
    /// The complete frame, start and end bytes included.
    ScienceCommand(Bytes),
}

/// Extract every complete frame from `buf`, returning them and the remainder.
///
/// With no start byte left the remainder is empty: bytes before a start byte
/// can never become part of a frame.
pub fn parse_uplink(buf: &[u8]) -> (Vec<UplinkPacket>, &[u8]) {
    let mut packets = Vec::new();
    let mut cursor = 0;

    loop {
        let Some(offset) = buf[cursor..].iter().position(|b| *b == SIP_START_BYTE) else {
            if cursor < buf.len() {
                tracing::debug!(discarded = buf.len() - cursor, "no SIP start byte, dropping bytes");
            }
            return (packets, &[]);
        };
        let start = cursor + offset;
        let frame = &buf[start..];
        if frame.len() < 2 {
            return (packets, frame);
        }

        match frame[1] {
            SCIENCE_DATA_REQUEST_ID => {
                if frame.len() < 3 {
                    return (packets, frame);
                }
                if frame[2] == SIP_END_BYTE {
                    packets.push(UplinkPacket::ScienceDataRequest);
                    cursor = start + 3;
                } else {
                    tracing::debug!(offset = start, "science data request without end byte");
                    cursor = start + 2;
                }
            }
            SCIENCE_COMMAND_ID => {
                if frame.len() < 3 {
                    return (packets, frame);
                }
                let total = 3 + frame[2] as usize + 1;
                if frame.len() < total {
                    return (packets, frame);
                }
                if frame[total - 1] == SIP_END_BYTE {
                    packets.push(UplinkPacket::ScienceCommand(Bytes::copy_from_slice(&frame[..total])));
                    cursor = start + total;
                } else {
                    tracing::debug!(offset = start, "science command without end byte");
                    cursor = start + 3;
                }
            }
            other => {
                tracing::debug!(offset = start, id = other, "unknown SIP message id");
                cursor = start + 2;
            }
        }
    }
}

/// Holds the unparsed tail between uplink datagrams.
#[derive(Debug, Default)]
pub struct UplinkScanner {
    leftover: Vec<u8>,
}

impl UplinkScanner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, data: &[u8]) -> Vec<UplinkPacket> {
        self.leftover.extend_from_slice(data);
        let (packets, rest) = parse_uplink(&self.leftover);
        let consumed = self.leftover.len() - rest.len();
        self.leftover.drain(..consumed);
        packets
    }

    pub fn pending(&self) -> &[u8] {
        &self.leftover
    }
}
