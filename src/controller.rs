//! Turret controller
//!
//! The context object shared by the frame loop and every control-surface
//! caller. It owns the aim point, the tracking flags, the rate limiter and the
//! link manager. Aim point and flags are last-writer-wins; a frame evaluated
//! concurrently with a calibration may use the old target once.
//!
//! # Example
//!
//! ```no_run
//! use turret_control::config::TurretConfig;
//! use turret_control::controller::Controller;
//!
//! # async fn example() -> turret_control::error::TurretResult<()> {
//! let controller = Controller::from_config(&TurretConfig::load()?);
//! controller.set_target(640, 360).await?;
//! controller.set_tracking_mode(true, false).await;
//! controller.issue_direct_command("FIRE").await?;
//! # Ok(())
//! # }
//! ```

use crate::adapters::PortInfo;
use crate::command::Command;
use crate::config::{TrackingConfig, TurretConfig};
use crate::dispatch::{maybe_dispatch, DeliveryOutcome, DispatchConfig, DispatchState};
use crate::error::{TurretError, TurretResult};
use crate::link::LinkManager;
use crate::tracking::{compute_offset, DetectionBox, Offset, TargetPoint, TrackingMode};
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

/// Result of evaluating one frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    /// Automatic tracking is off
    TrackingDisabled,
    /// The frame had no detection
    NoDetection,
    /// A detection was evaluated against the target
    Evaluated {
        /// Offset of the tracked detection
        offset: Offset,
        /// What the dispatcher did with it
        outcome: DeliveryOutcome,
    },
}

/// Shared turret state and control surface
pub struct Controller {
    link: Arc<LinkManager>,
    dispatch_config: DispatchConfig,
    tracking: TrackingConfig,
    target: RwLock<TargetPoint>,
    mode: RwLock<TrackingMode>,
    dispatch_state: Mutex<DispatchState>,
}

impl Controller {
    /// Create a controller around an existing link manager.
    pub fn new(config: &TurretConfig, link: Arc<LinkManager>) -> Self {
        Self {
            link,
            dispatch_config: config.dispatch.clone(),
            tracking: config.tracking.clone(),
            target: RwLock::new(config.tracking.frame_center()),
            mode: RwLock::new(config.tracking.initial_mode()),
            dispatch_state: Mutex::new(DispatchState::new()),
        }
    }

    /// Create a controller talking to the operating system's serial ports.
    pub fn from_config(config: &TurretConfig) -> Self {
        let link = Arc::new(LinkManager::with_system_backend(config.link.clone()));
        Self::new(config, link)
    }

    /// The link manager
    pub fn link(&self) -> &Arc<LinkManager> {
        &self.link
    }

    /// Configured frame size as `(width, height)`
    pub fn frame_size(&self) -> (u32, u32) {
        (self.tracking.frame_width, self.tracking.frame_height)
    }

    /// Current aim point
    pub async fn target(&self) -> TargetPoint {
        *self.target.read().await
    }

    /// Current tracking flags
    pub async fn tracking_mode(&self) -> TrackingMode {
        *self.mode.read().await
    }

    /// Snapshot of the rate limiter
    pub async fn dispatch_state(&self) -> DispatchState {
        *self.dispatch_state.lock().await
    }

    /// Send an operator command straight to the device.
    ///
    /// Bypasses the dead zone and the rate limiter and does not start a
    /// cooldown. Only an empty or multi-line token is rejected.
    pub async fn issue_direct_command(&self, token: &str) -> TurretResult<DeliveryOutcome> {
        let command = Command::raw(token)?;
        info!(command = %command, "Direct command");
        Ok(self.link.send(&command).await)
    }

    /// Move the aim point.
    ///
    /// Coordinates must lie inside the configured frame.
    pub async fn set_target(&self, x: i64, y: i64) -> TurretResult<TargetPoint> {
        let target = self.checked_target(x, y)?;
        *self.target.write().await = target;
        info!(x = target.x, y = target.y, "Target set");
        Ok(target)
    }

    fn checked_target(&self, x: i64, y: i64) -> TurretResult<TargetPoint> {
        let width = i64::from(self.tracking.frame_width);
        let height = i64::from(self.tracking.frame_height);

        if !(0..width).contains(&x) || !(0..height).contains(&y) {
            return Err(TurretError::Configuration(format!(
                "Target ({x}, {y}) is outside the {width}x{height} frame"
            )));
        }

        let x = i32::try_from(x)
            .map_err(|_| TurretError::Configuration(format!("Target x {x} out of range")))?;
        let y = i32::try_from(y)
            .map_err(|_| TurretError::Configuration(format!("Target y {y} out of range")))?;
        Ok(TargetPoint::new(x, y))
    }

    /// Replace the tracking flags.
    pub async fn set_tracking_mode(&self, auto_track: bool, auto_fire: bool) -> TrackingMode {
        let mode = TrackingMode {
            auto_track,
            auto_fire,
        };
        *self.mode.write().await = mode;
        info!(track = auto_track, auto_fire, "Settings updated");
        mode
    }

    /// Enumerate serial ports for the operator.
    pub async fn list_available_ports(&self) -> TurretResult<Vec<PortInfo>> {
        self.link.list_ports().await
    }

    /// Apply a calibration request body: `{"x": <int>, "y": <int>}`.
    ///
    /// Missing fields default to the frame center. Numbers may be integers,
    /// floats (truncated) or numeric strings. Anything else is rejected and
    /// the current target is kept.
    pub async fn apply_calibration(&self, body: &Value) -> TurretResult<TargetPoint> {
        let body = as_object(body, "calibration")?;
        let center = self.tracking.frame_center();

        let x = coordinate_field(body.get("x"), "x")?.unwrap_or(i64::from(center.x));
        let y = coordinate_field(body.get("y"), "y")?.unwrap_or(i64::from(center.y));

        self.set_target(x, y).await
    }

    /// Apply a settings request body: `{"track": <bool>, "auto_fire": <bool>}`.
    ///
    /// Missing flags default to `false`. Non-boolean values are rejected and
    /// the current mode is kept.
    pub async fn apply_settings(&self, body: &Value) -> TurretResult<TrackingMode> {
        let body = as_object(body, "settings")?;

        let auto_track = flag_field(body.get("track"), "track")?;
        let auto_fire = flag_field(body.get("auto_fire"), "auto_fire")?;

        Ok(self.set_tracking_mode(auto_track, auto_fire).await)
    }

    /// Evaluate one frame's detections and dispatch if warranted.
    pub async fn evaluate_frame(&self, detections: &[DetectionBox], now: Instant) -> FrameOutcome {
        if !self.tracking_mode().await.auto_track {
            return FrameOutcome::TrackingDisabled;
        }

        let Some(detection) = self.tracking.selection.select(detections) else {
            return FrameOutcome::NoDetection;
        };

        let target = self.target().await;
        let offset = compute_offset(&detection, &target);
        debug!(dx = offset.dx, dy = offset.dy, "Tracking offset");

        let mut state = self.dispatch_state.lock().await;
        let outcome =
            maybe_dispatch(offset, now, &mut state, &self.link, &self.dispatch_config).await;

        FrameOutcome::Evaluated { offset, outcome }
    }
}

fn as_object<'a>(
    body: &'a Value,
    what: &str,
) -> TurretResult<&'a serde_json::Map<String, Value>> {
    body.as_object().ok_or_else(|| {
        TurretError::Configuration(format!("{what} request must be a JSON object"))
    })
}

fn coordinate_field(value: Option<&Value>, name: &str) -> TurretResult<Option<i64>> {
    let parsed = match value {
        None | Some(Value::Null) => return Ok(None),
        Some(Value::Number(n)) => n.as_i64().or_else(|| n.as_f64().map(|f| f.trunc() as i64)),
        Some(Value::String(s)) => s.trim().parse::<i64>().ok(),
        Some(_) => None,
    };

    parsed
        .map(Some)
        .ok_or_else(|| TurretError::Configuration(format!("'{name}' must be an integer")))
}

fn flag_field(value: Option<&Value>, name: &str) -> TurretResult<bool> {
    match value {
        None | Some(Value::Null) => Ok(false),
        Some(Value::Bool(b)) => Ok(*b),
        Some(other) => Err(TurretError::Configuration(format!(
            "'{name}' must be a boolean, got {other}"
        ))),
    }
}
