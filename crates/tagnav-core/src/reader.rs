//! PN532 command/response session over a [`Transport`].

use std::fmt;
use std::thread;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::protocol::constants::*;
use crate::protocol::{FrameError, ProtocolError, Scan, decode_response, encode, scan};
use crate::transport::{Transport, TransportError};

/// Per-exchange response timeout.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(1);
/// Delay between opening the port and the first command.
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_secs(1);

const READ_CHUNK: usize = 64;

#[derive(Error, Debug)]
pub enum ExchangeError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Frame(#[from] FrameError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("No response within {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Device rejected the frame (NACK)")]
    Nack,

    #[error("Response too short: {len} bytes (need {min})")]
    ShortResponse { len: usize, min: usize },
}

impl ExchangeError {
    /// Whether the channel is gone. Everything else means "no usable data
    /// this cycle".
    pub fn is_fatal(&self) -> bool {
        matches!(self, ExchangeError::Transport(e) if e.is_fatal())
    }
}

/// GetFirmwareVersion response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FirmwareVersion {
    pub ic: u8,
    pub version: u8,
    pub revision: u8,
    pub support: u8,
}

impl FirmwareVersion {
    pub const SIZE: usize = 4;

    pub fn from_bytes(data: &[u8]) -> Option<Self> {
        match *data {
            [ic, version, revision, support, ..] => Some(Self {
                ic,
                version,
                revision,
                support,
            }),
            _ => None,
        }
    }
}

impl fmt::Display for FirmwareVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "PN5{:02X} v{}.{} (support 0x{:02X})",
            self.ic, self.version, self.revision, self.support
        )
    }
}

/// A PN532 reached through some transport.
pub struct Pn532<T: Transport> {
    transport: T,
    read_timeout: Duration,
    /// Received bytes not yet consumed. Outlives a single exchange so a
    /// frame that arrives in the same chunk as an earlier one is kept.
    rx: Vec<u8>,
}

impl<T: Transport> Pn532<T> {
    pub fn new(transport: T) -> Self {
        Self::with_timeout(transport, DEFAULT_READ_TIMEOUT)
    }

    pub fn with_timeout(transport: T, read_timeout: Duration) -> Self {
        Self {
            transport,
            read_timeout,
            rx: Vec::with_capacity(READ_CHUNK),
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Bring the chip into normal operating mode.
    ///
    /// Fails if either the firmware query or the SAM configuration gets no
    /// response. Limiting passive activation retries is best-effort.
    #[instrument(skip(self), fields(port = %self.transport.port_name()))]
    pub fn initialize(&mut self, settle: Duration) -> Result<FirmwareVersion, ExchangeError> {
        if !settle.is_zero() {
            thread::sleep(settle);
        }

        let firmware = self.firmware_version()?;
        info!(firmware = %firmware, "PN532 firmware");

        self.exchange(
            CMD_SAM_CONFIGURATION,
            &[SAM_MODE_NORMAL, SAM_TIMEOUT_1S, SAM_USE_IRQ],
        )?;
        debug!("SAM configured (normal mode)");

        let mut params = vec![RF_CFG_MAX_RETRIES];
        params.extend_from_slice(&RF_MAX_RETRIES_POLLING);
        if let Err(e) = self.exchange(CMD_RF_CONFIGURATION, &params) {
            if e.is_fatal() {
                return Err(e);
            }
            warn!(error = %e, "Could not limit passive activation retries");
        }

        Ok(firmware)
    }

    /// Query the firmware version.
    pub fn firmware_version(&mut self) -> Result<FirmwareVersion, ExchangeError> {
        let data = self.exchange(CMD_GET_FIRMWARE_VERSION, &[])?;
        FirmwareVersion::from_bytes(&data).ok_or(ExchangeError::ShortResponse {
            len: data.len(),
            min: FirmwareVersion::SIZE,
        })
    }

    /// Send one command and return the response data (response code stripped).
    ///
    /// Frames answering some other command (late responses to an exchange
    /// that already timed out) are dropped.
    #[instrument(
        level = "debug",
        skip(self, params),
        fields(command = %format!("0x{:02X}", command), len = params.len())
    )]
    pub fn exchange(&mut self, command: u8, params: &[u8]) -> Result<Vec<u8>, ExchangeError> {
        if !self.transport.is_connected() {
            return Err(TransportError::Disconnected.into());
        }
        let frame = encode(command, params)?;
        self.transport.write(&frame)?;

        let expected = command.wrapping_add(1);
        let deadline = Instant::now() + self.read_timeout;
        loop {
            let payload = self.read_response(deadline)?;
            match payload.split_first() {
                Some((&code, data)) if code == expected => return Ok(data.to_vec()),
                Some((&code, _)) => {
                    debug!(code = %format!("0x{:02X}", code), "Dropping stale response")
                }
                None => return Err(ExchangeError::ShortResponse { len: 0, min: 1 }),
            }
        }
    }

    /// Read until an information frame arrives, skipping ACK frames.
    fn read_response(&mut self, deadline: Instant) -> Result<Vec<u8>, ExchangeError> {
        let timeout_ms = self.read_timeout.as_millis() as u64;

        loop {
            loop {
                match scan(&self.rx) {
                    Scan::Incomplete => break,
                    Scan::Skip(n) => {
                        debug!(skipped = n, "Discarding stray bytes");
                        self.rx.drain(..n);
                    }
                    Scan::Ack(n) => {
                        self.rx.drain(..n);
                    }
                    Scan::Nack(n) => {
                        self.rx.drain(..n);
                        return Err(ExchangeError::Nack);
                    }
                    Scan::Frame(n) => {
                        let frame: Vec<u8> = self.rx.drain(..n).collect();
                        return Ok(decode_response(&frame)?);
                    }
                }
            }

            if Instant::now() >= deadline {
                return Err(ExchangeError::Timeout { timeout_ms });
            }

            match self.transport.read(READ_CHUNK) {
                Ok(chunk) => self.rx.extend_from_slice(&chunk),
                Err(TransportError::Timeout { .. }) => {
                    return Err(ExchangeError::Timeout { timeout_ms });
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}
