//! serialport-based transport implementation.

use serialport::{DataBits, FlowControl, Parity, SerialPort, StopBits};
use std::io::{ErrorKind, Read, Write};
use std::time::Duration;
use tracing::{debug, info, instrument};

use super::traits::{Transport, TransportError};

/// UART transport over a USB-to-serial bridge.
pub struct SerialTransport {
    port: Box<dyn SerialPort>,
    name: String,
    timeout: Duration,
    connected: bool,
}

impl SerialTransport {
    /// Open a serial port at 8N1 without flow control.
    ///
    /// `timeout` bounds every individual read.
    #[instrument(level = "info", fields(timeout_ms = timeout.as_millis() as u64))]
    pub fn open(path: &str, baud_rate: u32, timeout: Duration) -> Result<Self, TransportError> {
        let port = serialport::new(path, baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(timeout)
            .open()
            .map_err(|e| match e.kind() {
                serialport::ErrorKind::NoDevice => TransportError::PortNotFound(path.to_string()),
                _ => TransportError::OpenFailed {
                    port: path.to_string(),
                    message: e.to_string(),
                },
            })?;

        info!(port = %path, baud = baud_rate, "Serial port opened");

        Ok(Self {
            port,
            name: path.to_string(),
            timeout,
            connected: true,
        })
    }

    fn classify(&mut self, e: std::io::Error, write: bool) -> TransportError {
        match e.kind() {
            ErrorKind::TimedOut | ErrorKind::WouldBlock => TransportError::Timeout {
                timeout_ms: self.timeout.as_millis() as u64,
            },
            ErrorKind::BrokenPipe
            | ErrorKind::NotConnected
            | ErrorKind::NotFound
            | ErrorKind::PermissionDenied
            | ErrorKind::UnexpectedEof => {
                self.connected = false;
                TransportError::Disconnected
            }
            _ if write => TransportError::WriteFailed(e.to_string()),
            _ => TransportError::ReadFailed(e.to_string()),
        }
    }
}

impl Transport for SerialTransport {
    #[instrument(skip(self, data), fields(len = data.len()))]
    fn write(&mut self, data: &[u8]) -> Result<usize, TransportError> {
        if let Err(e) = self.port.write_all(data).and_then(|_| self.port.flush()) {
            return Err(self.classify(e, true));
        }
        debug!(bytes_written = data.len(), "Write complete");
        Ok(data.len())
    }

    fn read(&mut self, max_len: usize) -> Result<Vec<u8>, TransportError> {
        let mut buf = vec![0u8; max_len];
        match self.port.read(&mut buf) {
            Ok(0) => Err(TransportError::Timeout {
                timeout_ms: self.timeout.as_millis() as u64,
            }),
            Ok(n) => {
                buf.truncate(n);
                debug!(bytes_read = n, "Read complete");
                Ok(buf)
            }
            Err(e) => Err(self.classify(e, false)),
        }
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn port_name(&self) -> &str {
        &self.name
    }
}
