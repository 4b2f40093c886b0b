//! Gondola wire format — every frame that crosses the SIP, GSE and downlink links.
//!
//! These types ARE the protocol. Ground software decodes the same bytes, so a
//! change to any header, constant or trailer here is a flag-day change for the
//! ground station as well.
//!
//! All multi-byte integers are big-endian. Fixed headers are zerocopy structs
//! with compile-time size guards; payloads and trailers are appended by hand.
//! Decoding returns the packet together with the number of bytes it occupied
//! so the stream scanner can walk a buffer without copying it.

use bytes::{BufMut, Bytes, BytesMut};
use static_assertions::assert_eq_size;
use zerocopy::byteorder::{BigEndian, U16, U32};
use zerocopy::{AsBytes, FromBytes, FromZeroes};

// ── Constants ─────────────────────────────────────────────────────────────────

/// First byte of every ground-link packet.
pub const GROUND_START_BYTE: u8 = 0xFA;

/// Accepted values of the ground-link discriminator byte.
pub const VALID_LINK_IDS: [u8; 5] = [0xFA, 0xFB, 0xFC, 0xFD, 0xFF];

/// Largest payload a ground-link packet may carry.
pub const GROUND_MAX_PAYLOAD: usize = 4096;

/// Ground-link origin carrying lowrate status payloads.
pub const ORIGIN_LOWRATE: u8 = 1;

/// Ground-link origin carrying hirate file fragments.
pub const ORIGIN_HIRATE: u8 = 2;

/// Origins occupy the low nibble only.
const ORIGIN_LIMIT: u8 = 16;

/// First byte of every file-fragment packet.
pub const FILE_START_BYTE: u8 = 0xFA;

/// Largest payload a single file fragment may carry.
pub const FILE_MAX_PAYLOAD: usize = 1500;

pub const SIP_START_BYTE: u8 = 0x10;
pub const SIP_END_BYTE: u8 = 0x03;
pub const SCIENCE_DATA_REQUEST_ID: u8 = 0x13;
pub const SCIENCE_COMMAND_ID: u8 = 0x14;
pub const LOWRATE_DOWNLINK_ID: u8 = 0x53;

/// Filler appended to short GSE command payloads. Never a valid command number.
pub const COMMAND_PAD_BYTE: u8 = 0xFF;

/// GSE command payloads are padded up to this length (a 22-byte frame).
pub const GSE_COMMAND_MIN_PAYLOAD: usize = 12;

/// The length byte covers subheader + payload + CRC and must fit in a u8.
pub const COMMAND_MAX_PAYLOAD: usize = 255 - COMMAND_SUBHEADER_LEN - 2;

// ── Errors ────────────────────────────────────────────────────────────────────

/// Errors raised while encoding or decoding a frame.
///
/// The decode variants map onto scanner recovery:
/// `Length` means wait for more bytes, `Integrity` and `Validity` mean
/// discard one byte and resynchronise.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PacketError {
    #[error("need {needed} bytes, only {available} available")]
    Length { needed: usize, available: usize },

    #[error("integrity check failed: computed 0x{computed:04x}, trailer 0x{received:04x}")]
    Integrity { computed: u16, received: u16 },

    #[error("invalid {field}: 0x{value:02x}")]
    Validity { field: &'static str, value: usize },

    #[error("payload length {len} exceeds maximum {max}")]
    PayloadTooLarge { len: usize, max: usize },

    #[error("origin {0} does not fit in four bits")]
    InvalidOrigin(u8),

    #[error("link id 0x{0:02x} is not a recognised ground link")]
    InvalidLinkId(u8),

    #[error("fragment index {index} outside fragment count {count}")]
    FragmentOutOfRange { index: u8, count: u8 },
}

impl PacketError {
    /// True when the bytes seen so far may still become a valid frame.
    pub fn is_incomplete(&self) -> bool {
        matches!(self, PacketError::Length { .. })
    }
}

fn need(needed: usize, buf: &[u8]) -> Result<(), PacketError> {
    if buf.len() < needed {
        Err(PacketError::Length { needed, available: buf.len() })
    } else {
        Ok(())
    }
}

// ── Packet trait ──────────────────────────────────────────────────────────────

/// A frame kind that can be located in a byte stream by its start byte.
pub trait Packet: Sized {
    /// First byte of every encoded frame of this kind.
    const START_BYTE: u8;

    fn encode(&self) -> Bytes;

    /// Decode one frame from the front of `buf`, returning it and the number
    /// of bytes it occupied. Trailing bytes are ignored.
    fn decode_prefix(buf: &[u8]) -> Result<(Self, usize), PacketError>;

    fn decode(buf: &[u8]) -> Result<Self, PacketError> {
        Self::decode_prefix(buf).map(|(packet, _)| packet)
    }
}

// ── CRC ───────────────────────────────────────────────────────────────────────

const CRC_CCITT: crc::Crc<u16> = crc::Crc::<u16>::new(&crc::CRC_16_XMODEM);

/// CRC-CCITT (polynomial 0x1021, initial value 0) as used by every CRC trailer.
pub fn crc_ccitt(data: &[u8]) -> u16 {
    CRC_CCITT.checksum(data)
}

// ── Ground-link packet ────────────────────────────────────────────────────────

/// Header of a packet arriving from the GSE on the ground.
///
/// Wire size: 6 bytes, followed by the payload and a one-byte checksum.
#[derive(Debug, Clone, AsBytes, FromBytes, FromZeroes)]
#[repr(C, packed)]
pub struct GroundHeader {
    /// Always GROUND_START_BYTE.
    pub start: u8,
    /// Which physical link delivered the packet. One of VALID_LINK_IDS.
    pub link_id: u8,
    /// Source of the payload on the balloon. Low nibble only.
    pub origin: u8,
    /// Must be zero.
    pub reserved: u8,
    pub payload_length: U16<BigEndian>,
}

assert_eq_size!(GroundHeader, [u8; 6]);

pub const GROUND_HEADER_LEN: usize = std::mem::size_of::<GroundHeader>();

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroundPacket {
    pub link_id: u8,
    pub origin: u8,
    pub payload: Bytes,
}

impl GroundPacket {
    pub fn new(link_id: u8, origin: u8, payload: impl Into<Bytes>) -> Result<Self, PacketError> {
        if !VALID_LINK_IDS.contains(&link_id) {
            return Err(PacketError::InvalidLinkId(link_id));
        }
        if origin >= ORIGIN_LIMIT {
            return Err(PacketError::InvalidOrigin(origin));
        }
        let payload = payload.into();
        if payload.len() > GROUND_MAX_PAYLOAD {
            return Err(PacketError::PayloadTooLarge {
                len: payload.len(),
                max: GROUND_MAX_PAYLOAD,
            });
        }
        Ok(Self { link_id, origin, payload })
    }

    fn header(&self) -> GroundHeader {
        GroundHeader {
            start: GROUND_START_BYTE,
            link_id: self.link_id,
            origin: self.origin,
            reserved: 0,
            payload_length: U16::new(self.payload.len() as u16),
        }
    }

    /// Sum of origin, reserved, length and payload bytes, modulo 256.
    pub fn checksum(&self) -> u8 {
        ground_checksum(&self.header(), &self.payload)
    }

    pub fn is_hirate(&self) -> bool {
        self.origin == ORIGIN_HIRATE
    }

    pub fn is_lowrate(&self) -> bool {
        self.origin == ORIGIN_LOWRATE
    }
}

fn ground_checksum(header: &GroundHeader, payload: &[u8]) -> u8 {
    header.as_bytes()[2..]
        .iter()
        .chain(payload)
        .fold(0u8, |acc, b| acc.wrapping_add(*b))
}

impl Packet for GroundPacket {
    const START_BYTE: u8 = GROUND_START_BYTE;

    fn encode(&self) -> Bytes {
        let header = self.header();
        let mut out = BytesMut::with_capacity(GROUND_HEADER_LEN + self.payload.len() + 1);
        out.put_slice(header.as_bytes());
        out.put_slice(&self.payload);
        out.put_u8(ground_checksum(&header, &self.payload));
        out.freeze()
    }

    fn decode_prefix(buf: &[u8]) -> Result<(Self, usize), PacketError> {
        need(GROUND_HEADER_LEN + 1, buf)?;
        let header = GroundHeader::read_from_prefix(buf).ok_or(PacketError::Length {
            needed: GROUND_HEADER_LEN,
            available: buf.len(),
        })?;
        if header.start != GROUND_START_BYTE {
            return Err(PacketError::Validity { field: "start byte", value: header.start as usize });
        }
        let len = header.payload_length.get() as usize;
        if len > GROUND_MAX_PAYLOAD {
            return Err(PacketError::Validity { field: "payload length", value: len });
        }
        let total = GROUND_HEADER_LEN + len + 1;
        need(total, buf)?;

        let payload = &buf[GROUND_HEADER_LEN..GROUND_HEADER_LEN + len];
        let computed = ground_checksum(&header, payload);
        let received = buf[total - 1];
        if computed != received {
            return Err(PacketError::Integrity {
                computed: computed as u16,
                received: received as u16,
            });
        }
        // The link byte is outside the checksum, so it is checked last.
        if !VALID_LINK_IDS.contains(&header.link_id) {
            return Err(PacketError::Validity { field: "link id", value: header.link_id as usize });
        }

        let packet = GroundPacket {
            link_id: header.link_id,
            origin: header.origin,
            payload: Bytes::copy_from_slice(payload),
        };
        Ok((packet, total))
    }
}

// ── File-fragment packet ──────────────────────────────────────────────────────

/// Header of one fragment of a downlinked file.
///
/// Wire size: 9 bytes, followed by the payload and a CRC-CCITT over the
/// payload only.
#[derive(Debug, Clone, AsBytes, FromBytes, FromZeroes)]
#[repr(C, packed)]
pub struct FileHeader {
    pub start: u8,
    pub file_id: U32<BigEndian>,
    pub fragment_index: u8,
    pub fragment_count: u8,
    pub payload_length: U16<BigEndian>,
}

assert_eq_size!(FileHeader, [u8; 9]);

pub const FILE_HEADER_LEN: usize = std::mem::size_of::<FileHeader>();

/// Header plus CRC: the per-fragment cost on the downlink.
pub const FILE_OVERHEAD: usize = FILE_HEADER_LEN + 2;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilePacket {
    pub file_id: u32,
    pub fragment_index: u8,
    pub fragment_count: u8,
    pub payload: Bytes,
}

impl FilePacket {
    pub fn new(
        file_id: u32,
        fragment_index: u8,
        fragment_count: u8,
        payload: impl Into<Bytes>,
    ) -> Result<Self, PacketError> {
        if fragment_index >= fragment_count {
            return Err(PacketError::FragmentOutOfRange {
                index: fragment_index,
                count: fragment_count,
            });
        }
        let payload = payload.into();
        if payload.len() > FILE_MAX_PAYLOAD {
            return Err(PacketError::PayloadTooLarge {
                len: payload.len(),
                max: FILE_MAX_PAYLOAD,
            });
        }
        Ok(Self { file_id, fragment_index, fragment_count, payload })
    }

    pub fn crc(&self) -> u16 {
        crc_ccitt(&self.payload)
    }

    pub fn encoded_len(&self) -> usize {
        FILE_OVERHEAD + self.payload.len()
    }
}

impl Packet for FilePacket {
    const START_BYTE: u8 = FILE_START_BYTE;

    fn encode(&self) -> Bytes {
        let header = FileHeader {
            start: FILE_START_BYTE,
            file_id: U32::new(self.file_id),
            fragment_index: self.fragment_index,
            fragment_count: self.fragment_count,
            payload_length: U16::new(self.payload.len() as u16),
        };
        let mut out = BytesMut::with_capacity(self.encoded_len());
        out.put_slice(header.as_bytes());
        out.put_slice(&self.payload);
        out.put_u16(self.crc());
        out.freeze()
    }

    fn decode_prefix(buf: &[u8]) -> Result<(Self, usize), PacketError> {
        need(FILE_OVERHEAD, buf)?;
        let header = FileHeader::read_from_prefix(buf).ok_or(PacketError::Length {
            needed: FILE_HEADER_LEN,
            available: buf.len(),
        })?;
        if header.start != FILE_START_BYTE {
            return Err(PacketError::Validity { field: "start byte", value: header.start as usize });
        }
        let len = header.payload_length.get() as usize;
        if len > FILE_MAX_PAYLOAD {
            return Err(PacketError::Validity { field: "payload length", value: len });
        }
        let total = FILE_OVERHEAD + len;
        need(total, buf)?;

        let payload = &buf[FILE_HEADER_LEN..FILE_HEADER_LEN + len];
        let received = u16::from_be_bytes([buf[total - 2], buf[total - 1]]);
        let computed = crc_ccitt(payload);
        if computed != received {
            return Err(PacketError::Integrity { computed, received });
        }

        let packet = FilePacket {
            file_id: header.file_id.get(),
            fragment_index: header.fragment_index,
            fragment_count: header.fragment_count,
            payload: Bytes::copy_from_slice(payload),
        };
        Ok((packet, total))
    }
}

// ── Command frames ────────────────────────────────────────────────────────────

/// Shared by science and GSE command frames, directly after the header.
#[derive(Debug, Clone, AsBytes, FromBytes, FromZeroes)]
#[repr(C, packed)]
pub struct CommandSubheader {
    pub sequence_number: U16<BigEndian>,
    /// Destination code, see `command_table`.
    pub destination: u8,
}

assert_eq_size!(CommandSubheader, [u8; 3]);

pub const COMMAND_SUBHEADER_LEN: usize = std::mem::size_of::<CommandSubheader>();

/// CRC (2) + end byte (1).
const COMMAND_FOOTER_LEN: usize = 3;

fn command_crc(subheader: &CommandSubheader, payload: &[u8]) -> u16 {
    let mut digest = CRC_CCITT.digest();
    digest.update(subheader.as_bytes());
    digest.update(payload);
    digest.finalize()
}

fn check_command_payload(payload: &[u8]) -> Result<(), PacketError> {
    if payload.len() > COMMAND_MAX_PAYLOAD {
        return Err(PacketError::PayloadTooLarge {
            len: payload.len(),
            max: COMMAND_MAX_PAYLOAD,
        });
    }
    Ok(())
}

/// Append `subheader | payload | crc | end` after an already-written header.
fn put_command_body(out: &mut BytesMut, sequence_number: u16, destination: u8, payload: &[u8]) {
    let subheader = CommandSubheader {
        sequence_number: U16::new(sequence_number),
        destination,
    };
    out.put_slice(subheader.as_bytes());
    out.put_slice(payload);
    out.put_u16(command_crc(&subheader, payload));
    out.put_u8(SIP_END_BYTE);
}

fn command_length_byte(payload: &[u8]) -> u8 {
    (COMMAND_SUBHEADER_LEN + payload.len() + 2) as u8
}

struct CommandBody {
    sequence_number: u16,
    destination: u8,
    payload: Bytes,
    total: usize,
}

fn decode_command_body(buf: &[u8], header_len: usize, length: u8) -> Result<CommandBody, PacketError> {
    let length = length as usize;
    if length < COMMAND_SUBHEADER_LEN + 2 {
        return Err(PacketError::Validity { field: "length", value: length });
    }
    let total = header_len + length + 1;
    need(total, buf)?;

    let end = buf[total - 1];
    if end != SIP_END_BYTE {
        return Err(PacketError::Validity { field: "end byte", value: end as usize });
    }
    let body = &buf[header_len..header_len + length - 2];
    let received = u16::from_be_bytes([buf[total - 3], buf[total - 2]]);
    let computed = crc_ccitt(body);
    if computed != received {
        return Err(PacketError::Integrity { computed, received });
    }
    let subheader = CommandSubheader::read_from_prefix(body).ok_or(PacketError::Length {
        needed: COMMAND_SUBHEADER_LEN,
        available: body.len(),
    })?;

    Ok(CommandBody {
        sequence_number: subheader.sequence_number.get(),
        destination: subheader.destination,
        payload: Bytes::copy_from_slice(&body[COMMAND_SUBHEADER_LEN..]),
        total,
    })
}

/// A science command as delivered by the SIP: `0x10 0x14 len | body | 0x03`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandPacket {
    pub sequence_number: u16,
    pub destination: u8,
    /// Concatenated encoded commands.
    pub payload: Bytes,
}

pub const COMMAND_HEADER_LEN: usize = 3;

impl CommandPacket {
    pub fn new(sequence_number: u16, destination: u8, payload: impl Into<Bytes>) -> Result<Self, PacketError> {
        let payload = payload.into();
        check_command_payload(&payload)?;
        Ok(Self { sequence_number, destination, payload })
    }
}

impl Packet for CommandPacket {
    const START_BYTE: u8 = SIP_START_BYTE;

    fn encode(&self) -> Bytes {
        let mut out = BytesMut::with_capacity(
            COMMAND_HEADER_LEN + COMMAND_SUBHEADER_LEN + self.payload.len() + COMMAND_FOOTER_LEN,
        );
        out.put_u8(SIP_START_BYTE);
        out.put_u8(SCIENCE_COMMAND_ID);
        out.put_u8(command_length_byte(&self.payload));
        put_command_body(&mut out, self.sequence_number, self.destination, &self.payload);
        out.freeze()
    }

    fn decode_prefix(buf: &[u8]) -> Result<(Self, usize), PacketError> {
        need(COMMAND_HEADER_LEN, buf)?;
        if buf[0] != SIP_START_BYTE {
            return Err(PacketError::Validity { field: "start byte", value: buf[0] as usize });
        }
        if buf[1] != SCIENCE_COMMAND_ID {
            return Err(PacketError::Validity { field: "identifier", value: buf[1] as usize });
        }
        let body = decode_command_body(buf, COMMAND_HEADER_LEN, buf[2])?;
        let packet = CommandPacket {
            sequence_number: body.sequence_number,
            destination: body.destination,
            payload: body.payload,
        };
        Ok((packet, body.total))
    }
}

/// Link and routing byte pair that selects how the GSE forwards a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkTuple {
    Los1,
    Los2,
    Tdrss,
    Iridium,
}

impl LinkTuple {
    pub const ALL: [LinkTuple; 4] = [LinkTuple::Los1, LinkTuple::Los2, LinkTuple::Tdrss, LinkTuple::Iridium];

    /// `(link, routing)`: link 0 LOS, 1 TDRSS, 2 Iridium; routing 0x09 COMM1, 0x0C COMM2.
    pub fn bytes(self) -> (u8, u8) {
        match self {
            LinkTuple::Los1 => (0x00, 0x09),
            LinkTuple::Los2 => (0x00, 0x0C),
            LinkTuple::Tdrss => (0x01, 0x09),
            LinkTuple::Iridium => (0x02, 0x0C),
        }
    }

    pub fn from_bytes(link: u8, routing: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.bytes() == (link, routing))
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "los1" => Some(LinkTuple::Los1),
            "los2" => Some(LinkTuple::Los2),
            "tdrss" => Some(LinkTuple::Tdrss),
            "iridium" => Some(LinkTuple::Iridium),
            _ => None,
        }
    }
}

/// A command as sent from the ground to the GSE: `0x10 link routing len | body | 0x03`.
///
/// Payloads shorter than GSE_COMMAND_MIN_PAYLOAD are padded with
/// COMMAND_PAD_BYTE at construction, so decoded payloads include the padding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GseCommandPacket {
    pub link: LinkTuple,
    pub sequence_number: u16,
    pub destination: u8,
    pub payload: Bytes,
}

pub const GSE_COMMAND_HEADER_LEN: usize = 4;

impl GseCommandPacket {
    pub fn new(
        link: LinkTuple,
        sequence_number: u16,
        destination: u8,
        payload: &[u8],
    ) -> Result<Self, PacketError> {
        check_command_payload(payload)?;
        let mut padded = BytesMut::from(payload);
        if padded.len() < GSE_COMMAND_MIN_PAYLOAD {
            padded.resize(GSE_COMMAND_MIN_PAYLOAD, COMMAND_PAD_BYTE);
        }
        Ok(Self {
            link,
            sequence_number,
            destination,
            payload: padded.freeze(),
        })
    }
}

impl Packet for GseCommandPacket {
    const START_BYTE: u8 = SIP_START_BYTE;

    fn encode(&self) -> Bytes {
        let (link, routing) = self.link.bytes();
        let mut out = BytesMut::with_capacity(
            GSE_COMMAND_HEADER_LEN + COMMAND_SUBHEADER_LEN + self.payload.len() + COMMAND_FOOTER_LEN,
        );
        out.put_u8(SIP_START_BYTE);
        out.put_u8(link);
        out.put_u8(routing);
        out.put_u8(command_length_byte(&self.payload));
        put_command_body(&mut out, self.sequence_number, self.destination, &self.payload);
        out.freeze()
    }

    fn decode_prefix(buf: &[u8]) -> Result<(Self, usize), PacketError> {
        need(GSE_COMMAND_HEADER_LEN, buf)?;
        if buf[0] != SIP_START_BYTE {
            return Err(PacketError::Validity { field: "start byte", value: buf[0] as usize });
        }
        let link = LinkTuple::from_bytes(buf[1], buf[2]).ok_or(PacketError::Validity {
            field: "link tuple",
            value: u16::from_be_bytes([buf[1], buf[2]]) as usize,
        })?;
        let body = decode_command_body(buf, GSE_COMMAND_HEADER_LEN, buf[3])?;
        let packet = GseCommandPacket {
            link,
            sequence_number: body.sequence_number,
            destination: body.destination,
            payload: body.payload,
        };
        Ok((packet, body.total))
    }
}

// ── GSE acknowledgement ───────────────────────────────────────────────────────

const GSE_ACK_SYNC: [u8; 2] = [0xFA, 0xF3];
pub const GSE_ACK_LEN: usize = 3;

/// Reply code the GSE returns for every command frame it receives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum GseAck {
    Transmitted = 0x00,
    OperatorDisabled = 0x0A,
    RoutingMismatch = 0x0B,
    LinkNotEnabled = 0x0C,
    Other = 0x0D,
}

impl TryFrom<u8> for GseAck {
    type Error = PacketError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x00 => Ok(GseAck::Transmitted),
            0x0A => Ok(GseAck::OperatorDisabled),
            0x0B => Ok(GseAck::RoutingMismatch),
            0x0C => Ok(GseAck::LinkNotEnabled),
            0x0D => Ok(GseAck::Other),
            other => Err(PacketError::Validity { field: "ack code", value: other as usize }),
        }
    }
}

impl GseAck {
    pub fn encode(self) -> [u8; GSE_ACK_LEN] {
        [GSE_ACK_SYNC[0], GSE_ACK_SYNC[1], self as u8]
    }

    /// Decode an acknowledgement from the front of `buf`, returning the rest.
    pub fn decode(buf: &[u8]) -> Result<(Self, &[u8]), PacketError> {
        need(GSE_ACK_LEN, buf)?;
        if buf[0] != GSE_ACK_SYNC[0] {
            return Err(PacketError::Validity { field: "ack sync 1", value: buf[0] as usize });
        }
        if buf[1] != GSE_ACK_SYNC[1] {
            return Err(PacketError::Validity { field: "ack sync 2", value: buf[1] as usize });
        }
        Ok((GseAck::try_from(buf[2])?, &buf[GSE_ACK_LEN..]))
    }

    pub fn description(self) -> &'static str {
        match self {
            GseAck::Transmitted => "command transmitted successfully",
            GseAck::OperatorDisabled => "GSE operator disabled science from sending commands",
            GseAck::RoutingMismatch => "routing address does not match the selected link",
            GseAck::LinkNotEnabled => "the link selected was not enabled",
            GseAck::Other => "some other error",
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ground_packet_round_trip() {
        let packet = GroundPacket::new(0xFA, 1, &b"hi there!"[..]).unwrap();
        let encoded = packet.encode();
        assert_eq!(encoded.len(), GROUND_HEADER_LEN + 9 + 1);
        let (decoded, used) = GroundPacket::decode_prefix(&encoded).unwrap();
        assert_eq!(decoded, packet);
        assert_eq!(used, encoded.len());
        assert_eq!(decoded.checksum(), packet.checksum());
    }

    #[test]
    fn ground_packet_long_payload_round_trip() {
        let payload = b"hi there!".repeat(300);
        let packet = GroundPacket::new(0xFB, 2, payload.clone()).unwrap();
        let decoded = GroundPacket::decode(&packet.encode()).unwrap();
        assert_eq!(&decoded.payload[..], &payload[..]);
        assert!(decoded.is_hirate());
    }

    #[test]
    fn ground_checksum_sums_origin_length_and_payload() {
        let packet = GroundPacket::new(0xFA, 3, vec![0x80, 0x90]).unwrap();
        // origin + reserved + length (0x00, 0x02) + payload
        let expected = (3u32 + 0 + 0 + 2 + 0x80 + 0x90) % 256;
        assert_eq!(packet.checksum() as u32, expected);
    }

    #[test]
    fn ground_packet_rejects_bad_fields_at_encode() {
        assert_eq!(
            GroundPacket::new(12, 1, &b"hi"[..]),
            Err(PacketError::InvalidLinkId(12))
        );
        assert_eq!(
            GroundPacket::new(0xFA, 16, &b"hi"[..]),
            Err(PacketError::InvalidOrigin(16))
        );
        assert!(matches!(
            GroundPacket::new(0xFA, 1, vec![0u8; GROUND_MAX_PAYLOAD + 1]),
            Err(PacketError::PayloadTooLarge { .. })
        ));
    }

    #[test]
    fn ground_decode_errors_are_classified() {
        let encoded = GroundPacket::new(0xFA, 1, &b"hi there!"[..]).unwrap().encode();

        let short = GroundPacket::decode(&encoded[..encoded.len() - 1]).unwrap_err();
        assert!(short.is_incomplete());

        let mut corrupt = encoded.to_vec();
        let last = corrupt.len() - 1;
        corrupt[last] ^= 0x01;
        assert!(matches!(
            GroundPacket::decode(&corrupt),
            Err(PacketError::Integrity { .. })
        ));

        // The link byte is not covered by the checksum.
        let mut bad_link = encoded.to_vec();
        bad_link[1] = 0x12;
        assert!(matches!(
            GroundPacket::decode(&bad_link),
            Err(PacketError::Validity { field: "link id", .. })
        ));

        let mut bad_start = encoded.to_vec();
        bad_start[0] = 0x00;
        assert!(matches!(
            GroundPacket::decode(&bad_start),
            Err(PacketError::Validity { field: "start byte", .. })
        ));
    }

    #[test]
    fn file_packet_round_trip() {
        let packet = FilePacket::new(99, 1, 10, &b"the payload is long"[..]).unwrap();
        let encoded = packet.encode();
        let (decoded, used) = FilePacket::decode_prefix(&encoded).unwrap();
        assert_eq!(used, encoded.len());
        assert_eq!(decoded.file_id, 99);
        assert_eq!(decoded.fragment_index, 1);
        assert_eq!(decoded.fragment_count, 10);
        assert_eq!(&decoded.payload[..], b"the payload is long");
        assert_eq!(decoded.crc(), packet.crc());
        let trailer = u16::from_be_bytes([encoded[used - 2], encoded[used - 1]]);
        assert_eq!(trailer, packet.crc());
    }

    #[test]
    fn crc_matches_xmodem_check_value() {
        assert_eq!(crc_ccitt(b"123456789"), 0x31C3);
    }

    #[test]
    fn file_packet_encode_limits() {
        assert_eq!(
            FilePacket::new(1, 10, 10, &b"x"[..]),
            Err(PacketError::FragmentOutOfRange { index: 10, count: 10 })
        );
        assert!(FilePacket::new(1, 0, 1, vec![0u8; FILE_MAX_PAYLOAD]).is_ok());
        assert!(matches!(
            FilePacket::new(1, 0, 1, vec![0u8; FILE_MAX_PAYLOAD + 1]),
            Err(PacketError::PayloadTooLarge { .. })
        ));
    }

    #[test]
    fn file_packet_absurd_length_is_validity_error() {
        let mut encoded = FilePacket::new(7, 0, 1, &b"abc"[..]).unwrap().encode().to_vec();
        encoded[7] = 0xFF;
        encoded[8] = 0xFF;
        assert!(matches!(
            FilePacket::decode(&encoded),
            Err(PacketError::Validity { field: "payload length", .. })
        ));
    }

    #[test]
    fn file_packet_crc_flip_is_integrity_error() {
        let mut encoded = FilePacket::new(7, 0, 1, &b"abc"[..]).unwrap().encode().to_vec();
        let last = encoded.len() - 1;
        encoded[last] ^= 0xFF;
        assert!(matches!(
            FilePacket::decode(&encoded),
            Err(PacketError::Integrity { .. })
        ));
    }

    #[test]
    fn command_packet_round_trip() {
        let packet = CommandPacket::new(513, 255, vec![0x00, 0x03, 0xE8]).unwrap();
        let encoded = packet.encode();
        assert_eq!(encoded[0], SIP_START_BYTE);
        assert_eq!(encoded[1], SCIENCE_COMMAND_ID);
        assert_eq!(encoded[2] as usize, 3 + 3 + 2);
        assert_eq!(*encoded.last().unwrap(), SIP_END_BYTE);
        let (decoded, used) = CommandPacket::decode_prefix(&encoded).unwrap();
        assert_eq!(decoded, packet);
        assert_eq!(used, encoded.len());
    }

    #[test]
    fn command_packet_decode_errors() {
        let encoded = CommandPacket::new(1, 0, vec![1, 2, 3]).unwrap().encode().to_vec();

        let mut bad_end = encoded.clone();
        let last = bad_end.len() - 1;
        bad_end[last] = 0x04;
        assert!(matches!(
            CommandPacket::decode(&bad_end),
            Err(PacketError::Validity { field: "end byte", .. })
        ));

        let mut bad_crc = encoded.clone();
        bad_crc[last - 1] ^= 0x10;
        assert!(matches!(
            CommandPacket::decode(&bad_crc),
            Err(PacketError::Integrity { .. })
        ));

        assert!(CommandPacket::decode(&encoded[..5]).unwrap_err().is_incomplete());
    }

    #[test]
    fn gse_command_packet_is_padded_to_twenty_two_bytes() {
        let packet = GseCommandPacket::new(LinkTuple::Tdrss, 1, 255, &[0x00, 0x03, 0xE8]).unwrap();
        assert_eq!(packet.payload.len(), GSE_COMMAND_MIN_PAYLOAD);
        assert!(packet.payload[3..].iter().all(|b| *b == COMMAND_PAD_BYTE));

        let encoded = packet.encode();
        assert_eq!(encoded.len(), 22);
        assert_eq!(&encoded[..3], &[0x10, 0x01, 0x09]);
        assert_eq!(encoded[21], SIP_END_BYTE);

        let decoded = GseCommandPacket::decode(&encoded).unwrap();
        assert_eq!(decoded, packet);
    }

    #[test]
    fn gse_command_packet_payload_limit() {
        assert!(matches!(
            GseCommandPacket::new(LinkTuple::Los1, 0, 0, &[0u8; 255]),
            Err(PacketError::PayloadTooLarge { .. })
        ));
        let packet = GseCommandPacket::new(LinkTuple::Iridium, 0, 0, &[7u8; COMMAND_MAX_PAYLOAD]).unwrap();
        assert_eq!(packet.encode()[3], 255);
    }

    #[test]
    fn gse_command_packet_rejects_unknown_link_tuple() {
        let mut encoded = GseCommandPacket::new(LinkTuple::Los2, 0, 0, &[1]).unwrap().encode().to_vec();
        encoded[2] = 0x0A;
        assert!(matches!(
            GseCommandPacket::decode(&encoded),
            Err(PacketError::Validity { field: "link tuple", .. })
        ));
    }

    #[test]
    fn gse_ack_round_trip() {
        for ack in [
            GseAck::Transmitted,
            GseAck::OperatorDisabled,
            GseAck::RoutingMismatch,
            GseAck::LinkNotEnabled,
            GseAck::Other,
        ] {
            let mut buf = ack.encode().to_vec();
            buf.extend_from_slice(b"rest");
            let (decoded, rest) = GseAck::decode(&buf).unwrap();
            assert_eq!(decoded, ack);
            assert_eq!(rest, b"rest");
        }
    }

    #[test]
    fn gse_ack_rejects_malformed_input() {
        assert!(GseAck::decode(&[0xFA, 0xF3]).unwrap_err().is_incomplete());
        assert!(matches!(
            GseAck::decode(&[0xFA, 0xF3, 0x05]),
            Err(PacketError::Validity { field: "ack code", .. })
        ));
        assert!(matches!(
            GseAck::decode(&[0xFB, 0xF3, 0x00]),
            Err(PacketError::Validity { field: "ack sync 1", .. })
        ));
    }
}
