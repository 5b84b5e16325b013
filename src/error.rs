//! Custom error types for the turret controller.
//!
//! `TurretError` is the single error type for the library. It mirrors the
//! failure classes the control loop has to tolerate:
//!
//! - **`Discovery`**: no serial device matched the discovery patterns. Non-fatal;
//!   the link manager drops the command and tries again on the next send.
//! - **`Connection`**: a port was found but could not be opened.
//! - **`Transport`**: a write failed on a previously good connection, usually
//!   because the device was unplugged mid-session.
//! - **`Enumeration`**: the operating system could not list serial ports.
//! - **`Configuration`**: a calibration, settings or configuration value is
//!   malformed or out of range. This is the only class surfaced to
//!   control-surface callers.
//! - **`ConfigLoad`**: the configuration file or environment could not be parsed.
//! - **`FrameSource`**: the frame source could not be read, sent a malformed
//!   frame, or sent a frame of the wrong size. Ends the frame loop.
//! - **`FeatureNotEnabled`**: the serial backend was compiled out.
//!
//! Link errors (`Discovery`, `Connection`, `Transport`) never escape
//! [`LinkManager::send`](crate::link::LinkManager::send); they are logged and
//! reported as a [`DeliveryOutcome`](crate::dispatch::DeliveryOutcome).

use thiserror::Error;

/// Convenience alias for results using the library error type.
pub type TurretResult<T> = std::result::Result<T, TurretError>;

/// Errors produced by the turret control core.
#[derive(Error, Debug)]
pub enum TurretError {
    /// No enumerated port matched the configured patterns.
    #[error("No matching serial device found (patterns: {0})")]
    Discovery(String),

    /// The port exists but opening it failed.
    #[error("Failed to open serial port '{port}': {reason}")]
    Connection {
        /// Port that was being opened.
        port: String,
        /// Underlying failure.
        reason: String,
    },

    /// A write on an open connection failed.
    #[error("Serial transport error: {0}")]
    Transport(String),

    /// Listing serial ports failed.
    #[error("Serial port enumeration failed: {0}")]
    Enumeration(String),

    /// A request or configuration value was rejected.
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// The configuration sources could not be extracted.
    #[error("Configuration load error: {0}")]
    ConfigLoad(#[from] Box<figment::Error>),

    /// The frame source failed or produced an unusable frame.
    #[error("Frame source error: {0}")]
    FrameSource(String),

    /// Functionality that was not compiled in.
    #[error("Feature '{0}' is not enabled. Please build with --features {0}")]
    FeatureNotEnabled(String),
}

impl From<figment::Error> for TurretError {
    fn from(err: figment::Error) -> Self {
        TurretError::ConfigLoad(Box::new(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = TurretError::Connection {
            port: "/dev/ttyACM0".to_string(),
            reason: "permission denied".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Failed to open serial port '/dev/ttyACM0': permission denied"
        );
    }

    #[test]
    fn test_frame_source_display() {
        let err = TurretError::FrameSource("frame line 3: negative box size -1x4".into());
        assert_eq!(
            err.to_string(),
            "Frame source error: frame line 3: negative box size -1x4"
        );
    }
}
