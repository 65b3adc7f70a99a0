//! Protocol module - PN532 frame and command definitions.

pub mod constants;
pub mod frame;
pub mod status;

pub use constants::*;
pub use frame::{
    ChecksumField, FrameError, Scan, decode, decode_response, encode, encode_frame, scan,
};
pub use status::ProtocolError;
