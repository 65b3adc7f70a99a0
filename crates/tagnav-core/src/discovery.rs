//! Finding the reader among serial ports.

use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serialport::{SerialPortInfo, SerialPortType};
use tracing::{debug, info, instrument};

use crate::protocol::constants::{BRIDGE_CHIPS, BRIDGE_VENDOR_IDS};
use crate::reader::{DEFAULT_SETTLE_DELAY, FirmwareVersion, Pn532};
use crate::transport::SerialTransport;

/// Read timeout while probing a candidate port.
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(2);
/// Settle delay while probing a candidate port.
pub const PROBE_SETTLE: Duration = Duration::from_millis(500);

/// A serial endpoint and whether it looks like a USB-to-serial bridge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortCandidate {
    pub name: String,
    pub description: String,
    pub is_bridge: bool,
}

/// Whether a USB port's vendor id or descriptor strings name a bridge chip.
pub fn is_bridge(vid: u16, descriptors: &[Option<&str>]) -> bool {
    if BRIDGE_VENDOR_IDS.contains(&vid) {
        return true;
    }
    descriptors.iter().flatten().any(|text| {
        let upper = text.to_ascii_uppercase();
        BRIDGE_CHIPS.iter().any(|chip| upper.contains(chip))
    })
}

fn candidate(info: &SerialPortInfo) -> PortCandidate {
    match &info.port_type {
        SerialPortType::UsbPort(usb) => {
            let descriptors = [usb.product.as_deref(), usb.manufacturer.as_deref()];
            let label = descriptors.iter().flatten().copied().collect::<Vec<_>>().join(" ");
            PortCandidate {
                name: info.port_name.clone(),
                description: format!("USB {:04X}:{:04X} {}", usb.vid, usb.pid, label)
                    .trim_end()
                    .to_string(),
                is_bridge: is_bridge(usb.vid, &descriptors),
            }
        }
        SerialPortType::PciPort => PortCandidate {
            name: info.port_name.clone(),
            description: "PCI".to_string(),
            is_bridge: false,
        },
        SerialPortType::BluetoothPort => PortCandidate {
            name: info.port_name.clone(),
            description: "Bluetooth".to_string(),
            is_bridge: false,
        },
        SerialPortType::Unknown => PortCandidate {
            name: info.port_name.clone(),
            description: "unknown".to_string(),
            is_bridge: false,
        },
    }
}

/// Every serial endpoint the OS reports.
pub fn list_ports() -> Result<Vec<PortCandidate>> {
    let ports = serialport::available_ports().context("Failed to enumerate serial ports")?;
    Ok(ports.iter().map(candidate).collect())
}

/// Query the firmware version on `port`. Any failure means "not a reader".
#[instrument(level = "debug")]
pub fn probe(port: &str, baud_rate: u32) -> bool {
    let transport = match SerialTransport::open(port, baud_rate, PROBE_TIMEOUT) {
        Ok(t) => t,
        Err(e) => {
            debug!(error = %e, "Probe open failed");
            return false;
        }
    };
    let mut pn532 = Pn532::with_timeout(transport, PROBE_TIMEOUT);
    std::thread::sleep(PROBE_SETTLE);
    match pn532.firmware_version() {
        Ok(firmware) => {
            info!(port, firmware = %firmware, "Reader found");
            true
        }
        Err(e) => {
            debug!(error = %e, "Probe failed");
            false
        }
    }
}

/// First bridge-like port that answers a firmware query.
pub fn discover(baud_rate: u32) -> Result<Option<String>> {
    let candidates = list_ports()?;
    debug!(count = candidates.len(), "Serial ports");
    Ok(candidates
        .into_iter()
        .filter(|c| c.is_bridge)
        .find(|c| probe(&c.name, baud_rate))
        .map(|c| c.name))
}

/// Open the reader on `port` (or the discovered one) and initialise it.
pub fn connect(
    port: Option<&str>,
    baud_rate: u32,
    read_timeout: Duration,
) -> Result<(Pn532<SerialTransport>, FirmwareVersion)> {
    let port = match port {
        Some(p) => p.to_string(),
        None => discover(baud_rate)?
            .ok_or_else(|| anyhow!("No PN532 reader found on any serial port"))?,
    };

    let transport = SerialTransport::open(&port, baud_rate, read_timeout)
        .with_context(|| format!("Failed to open {}", port))?;
    let mut pn532 = Pn532::with_timeout(transport, read_timeout);
    let firmware = pn532
        .initialize(DEFAULT_SETTLE_DELAY)
        .with_context(|| format!("Reader on {} did not initialise", port))?;
    Ok((pn532, firmware))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bridge_by_vendor_id() {
        assert!(is_bridge(0x1A86, &[None, None]));
        assert!(is_bridge(0x0403, &[]));
        assert!(!is_bridge(0x2341, &[None, None]));
    }

    #[test]
    fn test_bridge_by_descriptor() {
        assert!(is_bridge(0x9999, &[Some("USB-Serial CH340"), None]));
        assert!(is_bridge(0x9999, &[None, Some("Silicon Labs CP2102 cp210x")]));
        assert!(is_bridge(0x9999, &[Some("ft232r usb uart"), None]));
        assert!(!is_bridge(0x9999, &[Some("Arduino Uno"), Some("Arduino LLC")]));
    }

    #[test]
    fn test_candidate_description() {
        let info = SerialPortInfo {
            port_name: "/dev/ttyUSB0".into(),
            port_type: SerialPortType::UsbPort(serialport::UsbPortInfo {
                vid: 0x1A86,
                pid: 0x7523,
                serial_number: None,
                manufacturer: Some("QinHeng".into()),
                product: Some("USB Serial".into()),
            }),
        };
        let c = candidate(&info);
        assert!(c.is_bridge);
        assert_eq!(c.description, "USB 1A86:7523 USB Serial QinHeng");

        let pci = SerialPortInfo {
            port_name: "/dev/ttyS0".into(),
            port_type: SerialPortType::PciPort,
        };
        assert!(!candidate(&pci).is_bridge);
    }
}
