//! Serial link manager
//!
//! Owns the connection to the turret's microcontroller. The link starts
//! `Disconnected` and is (re)established lazily: every [`LinkManager::send`]
//! first checks the state and, if there is no connection, runs discovery and
//! connects before writing. There is no background watchdog.
//!
//! A single async mutex guards the state for the whole of discovery, connect
//! and write, so exactly one writer touches the port at a time and a line is
//! never interleaved with another.
//!
//! Failures never reach the caller of `send`. They are logged and the command
//! is dropped; the next send is the retry.

use crate::adapters::{PortHandle, PortInfo, SerialBackend, SystemSerialBackend};
use crate::command::Command;
use crate::dispatch::DeliveryOutcome;
use crate::error::{TurretError, TurretResult};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Serial link settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// Preferred port; skips pattern matching when set
    pub port: Option<String>,
    /// Baud rate
    pub baud_rate: u32,
    /// Wait after opening; most Arduino boards reset when the port opens
    #[serde(with = "humantime_serde")]
    pub settle_delay: Duration,
    /// Bound on a single write
    #[serde(with = "humantime_serde")]
    pub write_timeout: Duration,
    /// Substrings identifying the controller in a port's name or description
    pub port_patterns: Vec<String>,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            port: None,
            baud_rate: 9600,
            settle_delay: Duration::from_secs(2),
            write_timeout: Duration::from_secs(1),
            port_patterns: vec![
                "Arduino".to_string(),
                "ttyACM".to_string(),
                "ttyUSB".to_string(),
            ],
        }
    }
}

/// Internal connection state. The handle never leaves this module.
enum LinkState {
    Disconnected,
    Connected {
        port: String,
        handle: Box<dyn PortHandle>,
    },
}

/// Observable link state, without the handle
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum LinkStatus {
    /// No open port
    Disconnected,
    /// Open port
    Connected {
        /// Port name
        port: String,
    },
}

/// Manages discovery, connection and writes for the turret's serial link
pub struct LinkManager {
    config: LinkConfig,
    backend: Arc<dyn SerialBackend>,
    state: Mutex<LinkState>,
}

impl LinkManager {
    /// Create a disconnected manager over `backend`.
    pub fn new(config: LinkConfig, backend: Arc<dyn SerialBackend>) -> Self {
        Self {
            config,
            backend,
            state: Mutex::new(LinkState::Disconnected),
        }
    }

    /// Create a disconnected manager over the operating system's serial ports.
    pub fn with_system_backend(config: LinkConfig) -> Self {
        Self::new(config, Arc::new(SystemSerialBackend::new()))
    }

    /// Link configuration
    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    /// Enumerate serial ports.
    pub async fn list_ports(&self) -> TurretResult<Vec<PortInfo>> {
        self.backend.list_ports().await
    }

    /// True if `port` would be picked up by discovery.
    pub fn matches_discovery(&self, port: &PortInfo) -> bool {
        if let Some(preferred) = &self.config.port {
            return &port.name == preferred;
        }
        self.config.port_patterns.iter().any(|p| port.matches(p))
    }

    /// Find the port to connect to.
    ///
    /// A configured preferred port wins, even if enumeration does not list it
    /// (some on-board UARTs are not reported). Otherwise the first enumerated
    /// port matching a discovery pattern is returned.
    pub async fn discover(&self) -> Option<PortInfo> {
        match self.try_discover().await {
            Ok(port) => Some(port),
            Err(e) => {
                warn!(error = %e, "Serial discovery failed");
                None
            }
        }
    }

    async fn try_discover(&self) -> TurretResult<PortInfo> {
        let ports = match self.backend.list_ports().await {
            Ok(ports) => ports,
            Err(e) if self.config.port.is_some() => {
                debug!(error = %e, "Enumeration failed, falling back to preferred port");
                Vec::new()
            }
            Err(e) => return Err(e),
        };

        if let Some(preferred) = &self.config.port {
            let port = ports
                .into_iter()
                .find(|p| &p.name == preferred)
                .unwrap_or_else(|| PortInfo::named(preferred.clone()));
            return Ok(port);
        }

        let port = ports
            .into_iter()
            .find(|p| self.matches_discovery(p))
            .ok_or_else(|| TurretError::Discovery(self.config.port_patterns.join(", ")))?;

        info!(port = %port.name, description = ?port.description, "Found candidate port");
        Ok(port)
    }

    /// Open `port` and wait for the device to settle.
    ///
    /// Replaces any existing connection. On failure the link is left
    /// `Disconnected`.
    pub async fn connect(&self, port: &str) -> TurretResult<()> {
        let mut state = self.state.lock().await;
        self.connect_locked(&mut state, port).await
    }

    async fn connect_locked(&self, state: &mut LinkState, port: &str) -> TurretResult<()> {
        *state = LinkState::Disconnected;

        let handle = self
            .backend
            .open(port, self.config.baud_rate, self.config.write_timeout)
            .await?;

        if !self.config.settle_delay.is_zero() {
            debug!(port, delay = ?self.config.settle_delay, "Waiting for device to settle");
            tokio::time::sleep(self.config.settle_delay).await;
        }

        *state = LinkState::Connected {
            port: port.to_string(),
            handle,
        };
        info!(port, baud_rate = self.config.baud_rate, "Connected to turret controller");
        Ok(())
    }

    /// Close the connection, if any.
    pub async fn disconnect(&self) {
        let mut state = self.state.lock().await;
        if let LinkState::Connected { port, .. } = &*state {
            info!(port = %port, "Disconnected from turret controller");
        }
        *state = LinkState::Disconnected;
    }

    /// Current link state
    pub async fn status(&self) -> LinkStatus {
        match &*self.state.lock().await {
            LinkState::Disconnected => LinkStatus::Disconnected,
            LinkState::Connected { port, .. } => LinkStatus::Connected { port: port.clone() },
        }
    }

    /// True if a port is open
    pub async fn is_connected(&self) -> bool {
        matches!(*self.state.lock().await, LinkState::Connected { .. })
    }

    /// Best-effort delivery of one command.
    ///
    /// Reconnects first if the link is down. A failed reconnect or a failed
    /// write drops the command and returns [`DeliveryOutcome::DroppedNoLink`];
    /// a failed write also demotes the link to `Disconnected`.
    pub async fn send(&self, command: &Command) -> DeliveryOutcome {
        let mut state = self.state.lock().await;

        if matches!(*state, LinkState::Disconnected) {
            debug!(command = %command, "Not connected, attempting reconnect");

            let port = match self.try_discover().await {
                Ok(port) => port,
                Err(e) => {
                    warn!(command = %command, error = %e, "Skipped sending (not connected)");
                    return DeliveryOutcome::DroppedNoLink;
                }
            };

            if let Err(e) = self.connect_locked(&mut state, &port.name).await {
                warn!(command = %command, error = %e, "Skipped sending (connect failed)");
                return DeliveryOutcome::DroppedNoLink;
            }
        }

        let LinkState::Connected { port, handle } = &mut *state else {
            return DeliveryOutcome::DroppedNoLink;
        };

        let written = handle.write_line(command.to_line()).await;
        match written {
            Ok(()) => {
                debug!(port = %port, command = %command, "Sent");
                DeliveryOutcome::Sent
            }
            Err(e) => {
                warn!(port = %port, command = %command, error = %e, "Write failed, link lost");
                *state = LinkState::Disconnected;
                DeliveryOutcome::DroppedNoLink
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::MockSerialBackend;

    fn fast_config() -> LinkConfig {
        LinkConfig {
            settle_delay: Duration::ZERO,
            ..LinkConfig::default()
        }
    }

    fn manager(backend: &MockSerialBackend, config: LinkConfig) -> LinkManager {
        LinkManager::new(config, Arc::new(backend.clone()))
    }

    #[tokio::test]
    async fn test_discover_first_matching_port() {
        let backend = MockSerialBackend::with_ports(vec![
            PortInfo::named("/dev/ttyS0"),
            PortInfo::with_description("/dev/cu.usbmodem1", "Arduino Uno"),
            PortInfo::named("/dev/ttyACM0"),
        ]);
        let link = manager(&backend, fast_config());

        let port = link.discover().await.unwrap();
        assert_eq!(port.name, "/dev/cu.usbmodem1");
    }

    #[tokio::test]
    async fn test_discover_none_without_match() {
        let backend = MockSerialBackend::with_ports(vec![PortInfo::named("/dev/ttyS0")]);
        let link = manager(&backend, fast_config());
        assert!(link.discover().await.is_none());
    }

    #[tokio::test]
    async fn test_preferred_port_survives_enumeration_failure() {
        let backend = MockSerialBackend::new();
        backend.set_enumeration_failure(true);
        let link = manager(
            &backend,
            LinkConfig {
                port: Some("/dev/ttyS0".to_string()),
                ..fast_config()
            },
        );

        assert_eq!(link.discover().await, Some(PortInfo::named("/dev/ttyS0")));
    }

    #[tokio::test]
    async fn test_send_without_device_drops() {
        let backend = MockSerialBackend::new();
        let link = manager(&backend, fast_config());

        assert_eq!(link.send(&Command::Up).await, DeliveryOutcome::DroppedNoLink);
        assert_eq!(link.status().await, LinkStatus::Disconnected);
        assert!(backend.wire_bytes().is_empty());
    }

    #[tokio::test]
    async fn test_send_connects_lazily() {
        let backend = MockSerialBackend::with_ports(vec![PortInfo::named("/dev/ttyACM0")]);
        let link = manager(&backend, fast_config());
        assert!(!link.is_connected().await);

        assert_eq!(link.send(&Command::Left).await, DeliveryOutcome::Sent);
        assert_eq!(
            link.status().await,
            LinkStatus::Connected {
                port: "/dev/ttyACM0".to_string()
            }
        );
        assert_eq!(backend.wire_bytes(), b"LEFT\n");
        assert_eq!(backend.call_log(), vec!["list_ports", "open /dev/ttyACM0 @ 9600"]);
    }

    #[tokio::test]
    async fn test_connected_send_skips_discovery() {
        let backend = MockSerialBackend::with_ports(vec![PortInfo::named("/dev/ttyACM0")]);
        let link = manager(&backend, fast_config());
        link.connect("/dev/ttyACM0").await.unwrap();

        link.send(&Command::Up).await;
        link.send(&Command::Down).await;

        assert_eq!(backend.open_attempts(), 1);
        assert!(!backend.call_log().contains(&"list_ports".to_string()));
    }

    #[tokio::test]
    async fn test_disconnect() {
        let backend = MockSerialBackend::with_ports(vec![PortInfo::named("/dev/ttyUSB0")]);
        let link = manager(&backend, fast_config());
        link.connect("/dev/ttyUSB0").await.unwrap();

        link.disconnect().await;
        assert_eq!(link.status().await, LinkStatus::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_waits_settle_delay() {
        let backend = MockSerialBackend::with_ports(vec![PortInfo::named("/dev/ttyACM0")]);
        let link = manager(&backend, LinkConfig::default());

        let start = tokio::time::Instant::now();
        link.connect("/dev/ttyACM0").await.unwrap();
        assert!(start.elapsed() >= Duration::from_secs(2));
    }
}
