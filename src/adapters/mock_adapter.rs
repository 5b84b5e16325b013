//! Mock serial backend for testing
//!
//! Simulates a serial device without hardware. It provides:
//! - A scripted port list for discovery
//! - Controllable failure injection for enumeration, open and write
//! - A byte-level record of everything written, for wire assertions
//! - Optional per-byte write latency, to widen race windows in concurrency tests

use super::{PortHandle, PortInfo, SerialBackend};
use crate::error::{TurretError, TurretResult};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Mock serial backend
///
/// Clones share state, so a test can keep one clone for inspection and hand
/// another to the link manager.
///
/// # Example
///
/// ```
/// use turret_control::adapters::{MockSerialBackend, PortInfo};
///
/// let backend = MockSerialBackend::with_ports(vec![PortInfo::named("/dev/ttyACM0")]);
/// backend.fail_next_opens(1);
/// assert!(backend.written_lines().is_empty());
/// ```
#[derive(Clone, Default)]
pub struct MockSerialBackend {
    ports: Arc<Mutex<Vec<PortInfo>>>,
    fail_enumeration: Arc<AtomicBool>,
    open_failures: Arc<AtomicUsize>,
    write_failures: Arc<AtomicUsize>,
    byte_latency: Arc<Mutex<Duration>>,
    wire: Arc<Mutex<Vec<u8>>>,
    call_log: Arc<Mutex<Vec<String>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MockSerialBackend {
    /// Backend with no ports
    pub fn new() -> Self {
        Self::default()
    }

    /// Backend exposing `ports`
    pub fn with_ports(ports: Vec<PortInfo>) -> Self {
        let backend = Self::new();
        backend.set_ports(ports);
        backend
    }

    /// Replace the enumerated port list (plug or unplug devices)
    pub fn set_ports(&self, ports: Vec<PortInfo>) {
        *lock(&self.ports) = ports;
    }

    /// Make enumeration fail until cleared
    pub fn set_enumeration_failure(&self, fail: bool) {
        self.fail_enumeration.store(fail, Ordering::SeqCst);
    }

    /// Fail the next `count` open attempts
    pub fn fail_next_opens(&self, count: usize) {
        self.open_failures.store(count, Ordering::SeqCst);
    }

    /// Fail the next `count` writes, on any handle
    pub fn fail_next_writes(&self, count: usize) {
        self.write_failures.store(count, Ordering::SeqCst);
    }

    /// Sleep this long between written bytes
    pub fn with_byte_latency(self, latency: Duration) -> Self {
        *lock(&self.byte_latency) = latency;
        self
    }

    /// Every byte successfully written, in order
    pub fn wire_bytes(&self) -> Vec<u8> {
        lock(&self.wire).clone()
    }

    /// Written bytes split into lines, without terminators
    pub fn written_lines(&self) -> Vec<String> {
        String::from_utf8_lossy(&self.wire_bytes())
            .split_terminator('\n')
            .map(str::to_string)
            .collect()
    }

    /// Get the call log
    pub fn call_log(&self) -> Vec<String> {
        lock(&self.call_log).clone()
    }

    /// Number of open attempts so far, failed ones included
    pub fn open_attempts(&self) -> usize {
        lock(&self.call_log)
            .iter()
            .filter(|c| c.starts_with("open "))
            .count()
    }

    fn log_call(&self, call: String) {
        lock(&self.call_log).push(call);
    }

    /// Consume one injected failure, if any are pending.
    fn take_failure(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl SerialBackend for MockSerialBackend {
    async fn list_ports(&self) -> TurretResult<Vec<PortInfo>> {
        self.log_call("list_ports".to_string());
        if self.fail_enumeration.load(Ordering::SeqCst) {
            return Err(TurretError::Enumeration("Injected failure".to_string()));
        }
        Ok(lock(&self.ports).clone())
    }

    async fn open(
        &self,
        port: &str,
        baud_rate: u32,
        _timeout: Duration,
    ) -> TurretResult<Box<dyn PortHandle>> {
        self.log_call(format!("open {port} @ {baud_rate}"));

        if Self::take_failure(&self.open_failures) {
            return Err(TurretError::Connection {
                port: port.to_string(),
                reason: "Injected failure".to_string(),
            });
        }

        Ok(Box::new(MockPortHandle {
            backend: self.clone(),
        }))
    }
}

/// Handle returned by [`MockSerialBackend::open`]
struct MockPortHandle {
    backend: MockSerialBackend,
}

#[async_trait]
impl PortHandle for MockPortHandle {
    async fn write_line(&mut self, line: Vec<u8>) -> TurretResult<()> {
        if MockSerialBackend::take_failure(&self.backend.write_failures) {
            self.backend.log_call("write failed".to_string());
            return Err(TurretError::Transport("Injected failure".to_string()));
        }

        let latency = *lock(&self.backend.byte_latency);
        for byte in line {
            if !latency.is_zero() {
                tokio::time::sleep(latency).await;
            }
            lock(&self.backend.wire).push(byte);
        }
        Ok(())
    }
}
