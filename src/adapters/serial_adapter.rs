//! Serial backend for RS-232/USB-Serial microcontrollers
//!
//! Wraps the serialport crate. Enumeration, opening and writing are all
//! blocking calls, so each runs on Tokio's blocking task executor.

use super::{PortHandle, PortInfo, SerialBackend};
use crate::error::{TurretError, TurretResult};
use async_trait::async_trait;
use std::time::Duration;

#[cfg(feature = "instrument_serial")]
use serialport::SerialPort;
#[cfg(feature = "instrument_serial")]
use std::sync::Arc;
#[cfg(feature = "instrument_serial")]
use tokio::sync::Mutex;
#[cfg(feature = "instrument_serial")]
use tracing::debug;

/// Serial backend over the operating system's ports
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemSerialBackend;

impl SystemSerialBackend {
    /// Create the system backend
    pub fn new() -> Self {
        Self
    }
}

#[cfg(feature = "instrument_serial")]
impl From<serialport::SerialPortInfo> for PortInfo {
    fn from(info: serialport::SerialPortInfo) -> Self {
        let description = match info.port_type {
            serialport::SerialPortType::UsbPort(usb) => {
                let parts: Vec<String> = [usb.manufacturer, usb.product]
                    .into_iter()
                    .flatten()
                    .filter(|s| !s.is_empty())
                    .collect();
                (!parts.is_empty()).then(|| parts.join(" "))
            }
            serialport::SerialPortType::BluetoothPort => Some("Bluetooth".to_string()),
            serialport::SerialPortType::PciPort => Some("PCI".to_string()),
            serialport::SerialPortType::Unknown => None,
        };

        PortInfo {
            name: info.port_name,
            description,
        }
    }
}

#[async_trait]
impl SerialBackend for SystemSerialBackend {
    async fn list_ports(&self) -> TurretResult<Vec<PortInfo>> {
        #[cfg(feature = "instrument_serial")]
        {
            let ports = tokio::task::spawn_blocking(serialport::available_ports)
                .await
                .map_err(|e| TurretError::Enumeration(format!("enumeration task panicked: {e}")))?
                .map_err(|e| TurretError::Enumeration(e.to_string()))?;

            Ok(ports.into_iter().map(PortInfo::from).collect())
        }

        #[cfg(not(feature = "instrument_serial"))]
        {
            Err(TurretError::FeatureNotEnabled("instrument_serial".to_string()))
        }
    }

    async fn open(
        &self,
        port: &str,
        baud_rate: u32,
        timeout: Duration,
    ) -> TurretResult<Box<dyn PortHandle>> {
        #[cfg(feature = "instrument_serial")]
        {
            let port_name = port.to_string();
            let opened = tokio::task::spawn_blocking(move || {
                serialport::new(&port_name, baud_rate)
                    .timeout(timeout)
                    .open()
            })
            .await
            .map_err(|e| TurretError::Connection {
                port: port.to_string(),
                reason: format!("open task panicked: {e}"),
            })?
            .map_err(|e| TurretError::Connection {
                port: port.to_string(),
                reason: e.to_string(),
            })?;

            debug!(port, baud_rate, "Serial port opened");

            Ok(Box::new(SerialPortHandle {
                port_name: port.to_string(),
                port: Arc::new(Mutex::new(opened)),
            }))
        }

        #[cfg(not(feature = "instrument_serial"))]
        {
            let _ = (port, baud_rate, timeout);
            Err(TurretError::FeatureNotEnabled("instrument_serial".to_string()))
        }
    }
}

/// Open port from the serialport crate
#[cfg(feature = "instrument_serial")]
struct SerialPortHandle {
    port_name: String,
    /// Shared with the blocking writer task
    port: Arc<Mutex<Box<dyn SerialPort>>>,
}

#[cfg(feature = "instrument_serial")]
#[async_trait]
impl PortHandle for SerialPortHandle {
    async fn write_line(&mut self, line: Vec<u8>) -> TurretResult<()> {
        let port = Arc::clone(&self.port);

        tokio::task::spawn_blocking(move || {
            use std::io::Write;

            let mut port = port.blocking_lock();
            port.write_all(&line)?;
            port.flush()
        })
        .await
        .map_err(|e| TurretError::Transport(format!("write task panicked: {e}")))?
        .map_err(|e| TurretError::Transport(format!("{}: {}", self.port_name, e)))
    }
}
