//! Turret configuration using Figment
//!
//! Configuration is loaded from (in order of precedence, highest first):
//! 1. Environment variables prefixed with `TURRET_` (nested keys split on `__`)
//! 2. TOML configuration file (default: `config/turret.toml`)
//! 3. Built-in defaults
//!
//! Durations are written in humantime form (`"200ms"`, `"2s"`).
//!
//! ```text
//! TURRET_APPLICATION__LOG_LEVEL=debug
//! TURRET_LINK__PORT=/dev/ttyACM0
//! TURRET_DISPATCH__MIN_INTERVAL=250ms
//! ```
//!
//! # Example
//!
//! ```no_run
//! use turret_control::config::TurretConfig;
//!
//! let config = TurretConfig::load_from("config/turret.toml")?;
//! println!("Dead zone: {} px", config.dispatch.dead_zone);
//! # Ok::<(), turret_control::error::TurretError>(())
//! ```

use crate::dispatch::DispatchConfig;
use crate::error::{TurretError, TurretResult};
use crate::link::LinkConfig;
use crate::tracking::{SelectionPolicy, TargetPoint, TrackingMode};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Default configuration file location, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "config/turret.toml";

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TurretConfig {
    /// Application settings
    pub application: ApplicationConfig,
    /// Serial link settings
    pub link: LinkConfig,
    /// Dead zone and rate limit
    pub dispatch: DispatchConfig,
    /// Frame geometry, pacing and tracking defaults
    pub tracking: TrackingConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationConfig {
    /// Application name
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: "turretd".to_string(),
            log_level: "info".to_string(),
        }
    }
}

/// Frame geometry and loop pacing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackingConfig {
    /// Frame width in pixels
    pub frame_width: u32,
    /// Frame height in pixels
    pub frame_height: u32,
    /// Time budget per frame; the loop sleeps off the remainder
    #[serde(with = "humantime_serde")]
    pub frame_budget: Duration,
    /// Which detection to follow when a frame has several
    pub selection: SelectionPolicy,
    /// Start with automatic tracking enabled
    pub auto_track: bool,
    /// Start with automatic fire enabled (reserved, has no effect)
    pub auto_fire: bool,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            frame_width: 1280,
            frame_height: 720,
            frame_budget: Duration::from_millis(100),
            selection: SelectionPolicy::First,
            auto_track: false,
            auto_fire: false,
        }
    }
}

impl TrackingConfig {
    /// Center of the configured frame, the default aim point.
    pub fn frame_center(&self) -> TargetPoint {
        TargetPoint::new(
            (self.frame_width / 2) as i32,
            (self.frame_height / 2) as i32,
        )
    }

    /// Tracking mode the controller starts in.
    pub fn initial_mode(&self) -> TrackingMode {
        TrackingMode {
            auto_track: self.auto_track,
            auto_fire: self.auto_fire,
        }
    }
}

impl TurretConfig {
    /// Load configuration from `config/turret.toml` and the environment
    pub fn load() -> TurretResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from a specific file path
    ///
    /// A missing file is not an error; defaults and environment variables
    /// still apply. The merged result is validated before it is returned.
    pub fn load_from<P: AsRef<Path>>(path: P) -> TurretResult<Self> {
        let config: Self = Figment::from(Serialized::defaults(Self::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("TURRET_").split("__"))
            .extract()?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration after loading
    ///
    /// Checks:
    /// - Log level is valid (trace, debug, info, warn, error)
    /// - Baud rate is non-zero
    /// - Either a preferred port or at least one discovery pattern is set
    /// - Dead zone is non-negative
    /// - Frame dimensions and frame budget are non-zero
    pub fn validate(&self) -> TurretResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.as_str()) {
            return Err(TurretError::Configuration(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        if self.link.baud_rate == 0 {
            return Err(TurretError::Configuration(
                "Invalid baud_rate 0. Must be > 0".to_string(),
            ));
        }

        if self.link.port.is_none() && self.link.port_patterns.iter().all(|p| p.is_empty()) {
            return Err(TurretError::Configuration(
                "No preferred port and no port_patterns; discovery can never succeed".to_string(),
            ));
        }

        if self.dispatch.dead_zone < 0 {
            return Err(TurretError::Configuration(format!(
                "Invalid dead_zone {}. Must be >= 0",
                self.dispatch.dead_zone
            )));
        }

        if self.tracking.frame_width == 0 || self.tracking.frame_height == 0 {
            return Err(TurretError::Configuration(format!(
                "Invalid frame size {}x{}. Both dimensions must be > 0",
                self.tracking.frame_width, self.tracking.frame_height
            )));
        }

        if self.tracking.frame_budget.is_zero() {
            return Err(TurretError::Configuration(
                "Invalid frame_budget 0s. Must be > 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Render the effective configuration as TOML.
    pub fn to_toml(&self) -> TurretResult<String> {
        toml::to_string_pretty(self)
            .map_err(|e| TurretError::Configuration(format!("Failed to serialize config: {e}")))
    }
}
