//! Status byte returned by InDataExchange.

use std::fmt;
use thiserror::Error;

/// The low six bits carry the error code; bit 6 flags NAD presence and
/// bit 7 flags more information (chaining).
const ERROR_MASK: u8 = 0x3F;

/// The PN532 reported a nonzero status for a tag operation.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("Tag operation failed: {}", describe_status(.status))]
pub struct ProtocolError {
    pub status: u8,
}

impl ProtocolError {
    /// Check a status byte, returning an error unless it reports success.
    pub fn check(status: u8) -> Result<(), ProtocolError> {
        if status & ERROR_MASK == 0 {
            Ok(())
        } else {
            Err(ProtocolError { status })
        }
    }

    pub fn code(&self) -> u8 {
        self.status & ERROR_MASK
    }
}

fn describe_status(status: &u8) -> StatusCode {
    StatusCode(status & ERROR_MASK)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusCode(pub u8);

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self.0 {
            0x01 => "target did not answer (timeout)",
            0x02 => "CRC error",
            0x03 => "parity error",
            0x04 => "erroneous bit count during anticollision",
            0x05 => "framing error",
            0x06 => "abnormal bit collision",
            0x07 => "communication buffer too small",
            0x09 => "RF buffer overflow",
            0x0A => "RF field not switched on in time",
            0x0B => "RF protocol error",
            0x0D => "overheating",
            0x0E => "internal buffer overflow",
            0x10 => "invalid parameter",
            0x13 => "data format mismatch",
            0x14 => "authentication error",
            0x23 => "wrong UID check byte",
            0x25 => "invalid device state",
            0x26 => "operation not allowed in this configuration",
            0x27 => "command not acceptable in this context",
            0x29 => "target released by initiator",
            0x2A => "card ID mismatch",
            0x2B => "card disappeared",
            _ => return write!(f, "error code 0x{:02X}", self.0),
        };
        write!(f, "{} (0x{:02X})", text, self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_status() {
        assert!(ProtocolError::check(0x00).is_ok());
        // NAD / MI flags alone are not errors.
        assert!(ProtocolError::check(0x40).is_ok());
    }

    #[test]
    fn test_error_status() {
        let err = ProtocolError::check(0x14).unwrap_err();
        assert_eq!(err.code(), 0x14);
        assert_eq!(
            err.to_string(),
            "Tag operation failed: authentication error (0x14)"
        );

        let err = ProtocolError::check(0x81).unwrap_err();
        assert_eq!(err.code(), 0x01);
        assert_eq!(
            ProtocolError { status: 0x3F }.to_string(),
            "Tag operation failed: error code 0x3F"
        );
    }
}
