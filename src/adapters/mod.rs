//! Serial backend implementations
//!
//! The link manager talks to hardware only through [`SerialBackend`] and the
//! [`PortHandle`] it opens. Two implementations live here:
//!
//! - [`SystemSerialBackend`]: real ports via the `serialport` crate
//!   (requires the `instrument_serial` feature)
//! - [`MockSerialBackend`]: scripted ports with failure injection, used by tests

pub mod mock_adapter;
pub mod serial_adapter;

pub use mock_adapter::MockSerialBackend;
pub use serial_adapter::SystemSerialBackend;

use crate::error::TurretResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// One enumerated serial-capable device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortInfo {
    /// Device path or name (e.g., "/dev/ttyACM0", "COM3")
    pub name: String,
    /// Human-readable description (USB manufacturer/product), if known
    pub description: Option<String>,
}

impl PortInfo {
    /// Port known only by name
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
        }
    }

    /// Port with a description
    pub fn with_description(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: Some(description.into()),
        }
    }

    /// True if the name or description contains `pattern`.
    pub fn matches(&self, pattern: &str) -> bool {
        if pattern.is_empty() {
            return false;
        }
        self.name.contains(pattern)
            || self
                .description
                .as_deref()
                .is_some_and(|d| d.contains(pattern))
    }
}

/// Source of serial ports
#[async_trait]
pub trait SerialBackend: Send + Sync {
    /// Enumerate available serial-capable devices.
    async fn list_ports(&self) -> TurretResult<Vec<PortInfo>>;

    /// Open `port` at `baud_rate`. Writes on the returned handle give up
    /// after `timeout`.
    async fn open(
        &self,
        port: &str,
        baud_rate: u32,
        timeout: Duration,
    ) -> TurretResult<Box<dyn PortHandle>>;
}

/// An open serial connection
#[async_trait]
pub trait PortHandle: Send {
    /// Write one complete, already terminated line.
    async fn write_line(&mut self, line: Vec<u8>) -> TurretResult<()>;
}
