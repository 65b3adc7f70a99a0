//! Mock serial transport for testing.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use crate::protocol::{ACK_FRAME, PN532_TO_HOST, encode_frame};
use super::traits::{Transport, TransportError};

/// Mock transport for unit testing reader and detector logic.
///
/// Clones share state, so a test can keep a handle while the reader owns
/// the transport.
#[derive(Clone)]
pub struct MockTransport {
    /// Bytes waiting to be read.
    rx: Arc<Mutex<VecDeque<u8>>>,
    /// Captured writes.
    write_log: Arc<Mutex<Vec<Vec<u8>>>>,
    /// Whether device is "connected".
    connected: Arc<Mutex<bool>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            rx: Arc::new(Mutex::new(VecDeque::new())),
            write_log: Arc::new(Mutex::new(Vec::new())),
            connected: Arc::new(Mutex::new(true)),
        }
    }

    /// Queue raw bytes to be returned by subsequent reads.
    pub fn queue_bytes(&self, bytes: &[u8]) {
        self.rx.lock().unwrap().extend(bytes.iter().copied());
    }

    /// Queue an ACK frame followed by a response frame for `command`.
    pub fn queue_response(&self, command: u8, data: &[u8]) {
        let mut body = vec![command.wrapping_add(1)];
        body.extend_from_slice(data);
        let frame = encode_frame(PN532_TO_HOST, &body).expect("response fits a normal frame");
        self.queue_bytes(&ACK_FRAME);
        self.queue_bytes(&frame);
    }

    /// Get all captured writes.
    pub fn get_writes(&self) -> Vec<Vec<u8>> {
        self.write_log.lock().unwrap().clone()
    }

    /// Clear captured writes.
    pub fn clear_writes(&self) {
        self.write_log.lock().unwrap().clear();
    }

    /// Simulate device disconnect.
    pub fn disconnect(&self) {
        *self.connected.lock().unwrap() = false;
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for MockTransport {
    fn write(&mut self, data: &[u8]) -> Result<usize, TransportError> {
        if !*self.connected.lock().unwrap() {
            return Err(TransportError::Disconnected);
        }
        self.write_log.lock().unwrap().push(data.to_vec());
        Ok(data.len())
    }

    fn read(&mut self, max_len: usize) -> Result<Vec<u8>, TransportError> {
        if !*self.connected.lock().unwrap() {
            return Err(TransportError::Disconnected);
        }
        let mut rx = self.rx.lock().unwrap();
        if rx.is_empty() {
            return Err(TransportError::Timeout { timeout_ms: 0 });
        }
        let n = rx.len().min(max_len);
        Ok(rx.drain(..n).collect())
    }

    fn is_connected(&self) -> bool {
        *self.connected.lock().unwrap()
    }

    fn port_name(&self) -> &str {
        "mock"
    }
}
