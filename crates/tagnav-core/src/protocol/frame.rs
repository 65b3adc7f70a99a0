//! PN532 normal information frames.
//!
//! ```text
//! 00 00 FF LEN LCS TFI <data> DCS 00
//! ```
//!
//! `LEN` counts the TFI (direction) byte plus the data, `LCS` makes
//! `LEN + LCS == 0 (mod 256)` and `DCS` makes `TFI + sum(data) + DCS == 0`.
//! Extended frames (LEN > 255) are not supported.

use std::fmt;
use thiserror::Error;

use super::constants::*;

/// Largest data section of a normal frame (LEN itself is a byte and includes TFI).
pub const MAX_DATA_LEN: usize = 254;

/// Bytes surrounding the data: preamble, 2 start codes, LEN, LCS, TFI, DCS, postamble.
pub const FRAME_OVERHEAD: usize = 8;

/// Which checksum failed to verify.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChecksumField {
    Length,
    Data,
}

impl fmt::Display for ChecksumField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChecksumField::Length => write!(f, "LCS"),
            ChecksumField::Data => write!(f, "DCS"),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("Payload too large: {len} bytes (max {MAX_DATA_LEN})")]
    PayloadTooLarge { len: usize },

    #[error("Frame header mismatch: {found:02X?}")]
    HeaderMismatch { found: Vec<u8> },

    #[error("Frame truncated: expected {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },

    #[error("Zero-length frame (ACK or extended)")]
    ZeroLength,

    #[error("Extended frames are not supported")]
    Extended,

    #[error("{field} mismatch: sum 0x{sum:02X} (expected 0x00)")]
    ChecksumMismatch { field: ChecksumField, sum: u8 },

    #[error("Bad postamble: 0x{0:02X}")]
    BadPostamble(u8),

    #[error("Unexpected direction byte 0x{0:02X}")]
    UnexpectedDirection(u8),
}

/// Two's complement checksum: the byte that brings `sum` back to zero.
pub fn checksum(sum: u8) -> u8 {
    (!sum).wrapping_add(1)
}

fn sum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |acc, &b| acc.wrapping_add(b))
}

/// Build a frame with an explicit direction byte.
pub fn encode_frame(direction: u8, data: &[u8]) -> Result<Vec<u8>, FrameError> {
    if data.len() > MAX_DATA_LEN {
        return Err(FrameError::PayloadTooLarge { len: data.len() });
    }

    let len = (data.len() + 1) as u8;
    let mut frame = Vec::with_capacity(data.len() + FRAME_OVERHEAD);
    frame.extend_from_slice(&FRAME_START);
    frame.push(len);
    frame.push(checksum(len));
    frame.push(direction);
    frame.extend_from_slice(data);
    frame.push(checksum(direction.wrapping_add(sum(data))));
    frame.push(POSTAMBLE);
    Ok(frame)
}

/// Build a host-to-PN532 command frame.
pub fn encode(command: u8, params: &[u8]) -> Result<Vec<u8>, FrameError> {
    let mut data = Vec::with_capacity(params.len() + 1);
    data.push(command);
    data.extend_from_slice(params);
    encode_frame(HOST_TO_PN532, &data)
}

/// Verify a complete frame and return its data with the direction byte stripped.
pub fn decode(bytes: &[u8]) -> Result<Vec<u8>, FrameError> {
    if bytes.len() < 5 {
        return Err(FrameError::Truncated {
            expected: 5,
            actual: bytes.len(),
        });
    }
    if bytes[..3] != FRAME_START {
        return Err(FrameError::HeaderMismatch {
            found: bytes[..3].to_vec(),
        });
    }

    let len = bytes[3];
    let lcs = bytes[4];
    if len == 0 {
        return Err(FrameError::ZeroLength);
    }
    if len == 0xFF && lcs == 0xFF {
        return Err(FrameError::Extended);
    }
    if len.wrapping_add(lcs) != 0 {
        return Err(FrameError::ChecksumMismatch {
            field: ChecksumField::Length,
            sum: len.wrapping_add(lcs),
        });
    }

    let total = len as usize + 7;
    if bytes.len() < total {
        return Err(FrameError::Truncated {
            expected: total,
            actual: bytes.len(),
        });
    }

    let body = &bytes[5..5 + len as usize];
    let dcs = bytes[5 + len as usize];
    let data_sum = sum(body).wrapping_add(dcs);
    if data_sum != 0 {
        return Err(FrameError::ChecksumMismatch {
            field: ChecksumField::Data,
            sum: data_sum,
        });
    }

    let postamble = bytes[total - 1];
    if postamble != POSTAMBLE {
        return Err(FrameError::BadPostamble(postamble));
    }

    Ok(body[1..].to_vec())
}

/// Decode a frame sent by the PN532, rejecting anything else (such as an
/// echoed host frame).
pub fn decode_response(bytes: &[u8]) -> Result<Vec<u8>, FrameError> {
    let data = decode(bytes)?;
    match bytes[5] {
        PN532_TO_HOST => Ok(data),
        other => Err(FrameError::UnexpectedDirection(other)),
    }
}

/// Classification of the head of a receive buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scan {
    /// Not enough bytes to decide.
    Incomplete,
    /// Leading bytes that cannot start a frame.
    Skip(usize),
    /// ACK frame of the given length.
    Ack(usize),
    /// NACK frame of the given length.
    Nack(usize),
    /// Candidate information frame of the given length; pass to [`decode`].
    Frame(usize),
}

/// Find the next frame boundary in `buf`.
pub fn scan(buf: &[u8]) -> Scan {
    let Some(start) = buf.windows(3).position(|w| w == FRAME_START) else {
        // Keep a possible partial start sequence at the tail.
        let keep = buf.len().min(2);
        return match buf.len() - keep {
            0 => Scan::Incomplete,
            n => Scan::Skip(n),
        };
    };
    if start > 0 {
        return Scan::Skip(start);
    }
    if buf.len() < 5 {
        return Scan::Incomplete;
    }

    let (len, lcs) = (buf[3], buf[4]);
    let short = match (len, lcs) {
        (0x00, 0xFF) => Some(Scan::Ack(ACK_FRAME.len())),
        (0xFF, 0x00) => Some(Scan::Nack(NACK_FRAME.len())),
        _ => None,
    };
    if let Some(kind) = short {
        return if buf.len() >= 6 { kind } else { Scan::Incomplete };
    }
    if len.wrapping_add(lcs) != 0 {
        // Corrupt header: drop the start sequence and resynchronise.
        return Scan::Skip(3);
    }

    let total = len as usize + 7;
    if buf.len() >= total {
        Scan::Frame(total)
    } else {
        Scan::Incomplete
    }
}
