//! Navigation events for the downstream viewer.
//!
//! Each event is one UTF-8 JSON datagram:
//!
//! ```json
//! {
//!   "timestamp": "2024-05-01T10:15:00.123+08:00",
//!   "command": "goto_page",
//!   "page_number": 3,
//!   "total_pages": 10,
//!   "source": "pn532_navigation",
//!   "tag_data": { "uid": "04a21b22", "sens_res": 68, "sel_res": 0 }
//! }
//! ```

use std::io;
use std::net::UdpSocket;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, instrument};

use crate::arbitration::Strategy;
use crate::tag::{SignalStrength, TagRecord};

pub const DEFAULT_UDP_TARGET: &str = "127.0.0.1:8890";
pub const DEFAULT_SOURCE: &str = "pn532_navigation";
pub const GOTO_PAGE: &str = "goto_page";

#[derive(Error, Debug)]
pub enum EmitError {
    #[error("Failed to encode event: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Failed to send event to {target}: {source}")]
    Send { target: String, source: io::Error },
}

/// How the tag's page was determined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Recognition {
    /// Page decoded from the tag's user memory.
    Content,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TagData {
    pub uid: String,
    pub sens_res: u16,
    pub sel_res: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signal_strength: Option<SignalStrength>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_tags_detected: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selection_method: Option<Strategy>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recognition_method: Option<Recognition>,
}

impl TagData {
    pub fn from_tag(tag: &TagRecord) -> Self {
        Self {
            uid: tag.uid_hex.clone(),
            sens_res: tag.sens_res,
            sel_res: tag.sel_res,
            signal_strength: None,
            total_tags_detected: None,
            selection_method: None,
            recognition_method: None,
        }
    }

    /// Record how the tag won arbitration among `total` detected tags.
    pub fn selected(mut self, tag: &TagRecord, total: usize, strategy: Strategy) -> Self {
        self.signal_strength = Some(tag.signal);
        self.total_tags_detected = Some(total);
        self.selection_method = Some(strategy);
        self
    }

    pub fn recognized_by(mut self, method: Recognition) -> Self {
        self.recognition_method = Some(method);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NavigationEvent {
    pub timestamp: String,
    pub command: &'static str,
    pub page_number: u32,
    pub total_pages: u32,
    pub source: String,
    pub tag_data: TagData,
}

impl NavigationEvent {
    pub fn goto_page(page_number: u32, total_pages: u32, source: &str, tag_data: TagData) -> Self {
        Self {
            timestamp: chrono::Local::now().to_rfc3339(),
            command: GOTO_PAGE,
            page_number,
            total_pages,
            source: source.to_string(),
            tag_data,
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Destination for navigation events.
pub trait NavigationSink {
    fn send(&mut self, event: &NavigationEvent) -> Result<(), EmitError>;
}

/// Sends events as UDP datagrams from an ephemeral local port.
pub struct UdpEmitter {
    socket: UdpSocket,
    target: String,
}

impl UdpEmitter {
    /// Bind a local socket for sending to `target` (`host:port`).
    pub fn bind(target: impl Into<String>) -> io::Result<Self> {
        let socket = UdpSocket::bind("0.0.0.0:0")?;
        Ok(Self {
            socket,
            target: target.into(),
        })
    }

    pub fn target(&self) -> &str {
        &self.target
    }
}

impl NavigationSink for UdpEmitter {
    #[instrument(
        level = "debug",
        skip(self, event),
        fields(udp_target = %self.target, page = event.page_number)
    )]
    fn send(&mut self, event: &NavigationEvent) -> Result<(), EmitError> {
        let json = event.to_json()?;
        self.socket
            .send_to(json.as_bytes(), self.target.as_str())
            .map_err(|source| EmitError::Send {
                target: self.target.clone(),
                source,
            })?;
        debug!(bytes = json.len(), "Navigation event sent");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    fn sample_tag() -> TagRecord {
        TagRecord::new(1, 0x0044, 0x00, &[0x04, 0xA2, 0x1B, 0x22], Instant::now())
    }

    #[test]
    fn test_event_json_shape() {
        let tag = sample_tag();
        let event = NavigationEvent::goto_page(3, 10, DEFAULT_SOURCE, TagData::from_tag(&tag));
        let value: serde_json::Value = serde_json::from_str(&event.to_json().unwrap()).unwrap();

        assert_eq!(value["command"], "goto_page");
        assert_eq!(value["page_number"], 3);
        assert_eq!(value["total_pages"], 10);
        assert_eq!(value["source"], "pn532_navigation");
        assert_eq!(value["tag_data"]["uid"], "04a21b22");
        assert_eq!(value["tag_data"]["sens_res"], 0x44);
        assert_eq!(value["tag_data"]["sel_res"], 0);
        assert!(value["tag_data"].get("signal_strength").is_none());
        assert!(chrono::DateTime::parse_from_rfc3339(value["timestamp"].as_str().unwrap()).is_ok());
    }

    #[test]
    fn test_selected_tag_data() {
        let tag = sample_tag();
        let data = TagData::from_tag(&tag).selected(&tag, 2, Strategy::Closest);
        let value = serde_json::to_value(&data).unwrap();
        assert_eq!(value["signal_strength"], "strong");
        assert_eq!(value["total_tags_detected"], 2);
        assert_eq!(value["selection_method"], "closest");
        assert!(value.get("recognition_method").is_none());

        let data = TagData::from_tag(&tag).recognized_by(Recognition::Content);
        let value = serde_json::to_value(data).unwrap();
        assert_eq!(value["recognition_method"], "content");
    }

    #[test]
    fn test_udp_delivery_over_loopback() {
        let receiver = UdpSocket::bind("127.0.0.1:0").unwrap();
        receiver.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
        let target = receiver.local_addr().unwrap().to_string();

        let mut emitter = UdpEmitter::bind(target).unwrap();
        let tag = sample_tag();
        emitter
            .send(&NavigationEvent::goto_page(7, 10, DEFAULT_SOURCE, TagData::from_tag(&tag)))
            .unwrap();

        let mut buf = [0u8; 2048];
        let n = receiver.recv(&mut buf).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&buf[..n]).unwrap();
        assert_eq!(value["page_number"], 7);
        assert_eq!(value["tag_data"]["uid"], "04a21b22");
    }

    #[test]
    fn test_unresolvable_target_is_an_error() {
        let mut emitter = UdpEmitter::bind("not a host").unwrap();
        let tag = sample_tag();
        let event = NavigationEvent::goto_page(1, 1, DEFAULT_SOURCE, TagData::from_tag(&tag));
        let result = emitter.send(&event);
        assert!(matches!(result, Err(EmitError::Send { .. })));
    }
}
