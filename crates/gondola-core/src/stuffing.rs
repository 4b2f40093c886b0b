//! Byte stuffing for payloads crossing a byte-oriented link.
//!
//! A payload is COBS-encoded, which removes every 0x00, and each output byte is
//! then XORed with the link's escape value. The escape value can therefore
//! never appear in a stuffed payload, so a start marker equal to it is
//! unambiguous in the stream.

/// Escape value for links framed by the 0xFA start byte.
pub const ESCAPE_BYTE: u8 = 0xFA;

/// Longest run a single COBS code byte can describe.
const MAX_BLOCK: u8 = 0xFF;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StuffingError {
    #[error("zero byte at offset {0} in COBS data")]
    ZeroByte(usize),

    #[error("COBS block at offset {offset} claims {claimed} bytes, only {available} remain")]
    Truncated {
        offset: usize,
        claimed: usize,
        available: usize,
    },
}

/// Consistent Overhead Byte Stuffing without a trailing delimiter.
pub struct Cobs;

impl Cobs {
    pub fn encode(data: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(data.len() + data.len() / 254 + 1);
        let mut code_at = 0;
        let mut code: u8 = 1;
        out.push(0);

        for &byte in data {
            if byte == 0 {
                out[code_at] = code;
                code_at = out.len();
                out.push(0);
                code = 1;
                continue;
            }
            out.push(byte);
            code += 1;
            if code == MAX_BLOCK {
                out[code_at] = code;
                code_at = out.len();
                out.push(0);
                code = 1;
            }
        }
        out[code_at] = code;
        out
    }

    pub fn decode(data: &[u8]) -> Result<Vec<u8>, StuffingError> {
        let mut out = Vec::with_capacity(data.len());
        let mut i = 0;

        while i < data.len() {
            let code = data[i];
            if code == 0 {
                return Err(StuffingError::ZeroByte(i));
            }
            let end = i + code as usize;
            if end > data.len() {
                return Err(StuffingError::Truncated {
                    offset: i,
                    claimed: code as usize - 1,
                    available: data.len() - i - 1,
                });
            }
            for (offset, &byte) in data[i + 1..end].iter().enumerate() {
                if byte == 0 {
                    return Err(StuffingError::ZeroByte(i + 1 + offset));
                }
                out.push(byte);
            }
            i = end;
            if code != MAX_BLOCK && i < data.len() {
                out.push(0);
            }
        }
        Ok(out)
    }
}

/// COBS-encode `payload`, then XOR every byte with `escape`.
pub fn stuff(payload: &[u8], escape: u8) -> Vec<u8> {
    let mut encoded = Cobs::encode(payload);
    for byte in &mut encoded {
        *byte ^= escape;
    }
    encoded
}

/// Upper bound on the stuffed length of `len` input bytes: one code byte per
/// 254-byte run plus the leading one.
pub const fn max_stuffed_len(len: usize) -> usize {
    len + len / 254 + 1
}

/// Longest input that still fits in `limit` bytes once stuffed.
pub const fn max_unstuffed_len(limit: usize) -> usize {
    limit.saturating_sub(limit.div_ceil(254) + 1)
}

/// Inverse of [`stuff`].
pub fn unstuff(data: &[u8], escape: u8) -> Result<Vec<u8>, StuffingError> {
    let unmasked: Vec<u8> = data.iter().map(|b| b ^ escape).collect();
    Cobs::decode(&unmasked)
}
