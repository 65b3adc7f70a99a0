//! Serial transport abstraction.
//!
//! Defines the `Transport` trait for byte-level device I/O,
//! allowing different implementations (serialport, mock, etc.).

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Serial port not found: {0}")]
    PortNotFound(String),

    #[error("Failed to open {port}: {message}")]
    OpenFailed { port: String, message: String },

    #[error("Write failed: {0}")]
    WriteFailed(String),

    #[error("Read failed: {0}")]
    ReadFailed(String),

    #[error("Device disconnected")]
    Disconnected,

    #[error("Timeout after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl TransportError {
    /// Whether the channel is unusable. Timeouts only mean nothing arrived.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, TransportError::Timeout { .. })
    }
}

/// Abstract serial transport interface.
///
/// Exactly one execution context may drive a transport at a time; the
/// `&mut self` receivers make that explicit.
pub trait Transport: Send {
    /// Write raw bytes to the device.
    fn write(&mut self, data: &[u8]) -> Result<usize, TransportError>;

    /// Read up to `max_len` bytes. Returns `TransportError::Timeout` when
    /// nothing arrives within the port's read timeout.
    fn read(&mut self, max_len: usize) -> Result<Vec<u8>, TransportError>;

    /// Check if the device is still connected.
    fn is_connected(&self) -> bool;

    /// Name of the underlying port (e.g. `/dev/ttyUSB0`, `COM3`).
    fn port_name(&self) -> &str;
}
