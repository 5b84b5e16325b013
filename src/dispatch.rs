//! Command dispatch
//!
//! Turns a tracking offset into zero or more direction commands. Two gates
//! apply before anything is sent:
//!
//! 1. **Dead zone**: offsets within `dead_zone` pixels on both axes are ignored.
//! 2. **Rate limit**: nothing is sent until `min_interval` has passed since the
//!    last emission. The cooldown is shared by both axes.
//!
//! Delivery is best-effort. The dispatcher never retries; the next frame is
//! the retry.

use crate::command::Command;
use crate::link::LinkManager;
use crate::tracking::Offset;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::trace;

/// Dead zone and rate limit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Tolerance in pixels on each axis
    pub dead_zone: i32,
    /// Minimum time between command batches
    #[serde(with = "humantime_serde")]
    pub min_interval: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            dead_zone: 15,
            min_interval: Duration::from_millis(200),
        }
    }
}

/// Rate limiter state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchState {
    last_command_time: Option<Instant>,
}

impl DispatchState {
    /// Fresh state; the first qualifying offset is never rate limited.
    pub fn new() -> Self {
        Self::default()
    }

    /// When the last batch was emitted, if ever
    pub fn last_command_time(&self) -> Option<Instant> {
        self.last_command_time
    }

    fn cooling_down(&self, now: Instant, min_interval: Duration) -> bool {
        self.last_command_time
            .is_some_and(|last| now.saturating_duration_since(last) < min_interval)
    }
}

/// What happened to a dispatch or a single send
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryOutcome {
    /// Written to the device
    Sent,
    /// No connection could be made, or the write failed
    DroppedNoLink,
    /// Suppressed by the rate limiter
    DroppedRateLimited,
    /// Offset inside the dead zone
    DroppedDeadZone,
}

impl DeliveryOutcome {
    /// True if a command reached the device
    pub fn is_sent(&self) -> bool {
        matches!(self, DeliveryOutcome::Sent)
    }
}

/// Direction commands for `offset`, horizontal axis first.
///
/// Empty when the offset is inside the dead zone.
pub fn direction_commands(offset: Offset, dead_zone: i32) -> Vec<Command> {
    let mut commands = Vec::with_capacity(2);
    let dead_zone = i64::from(dead_zone);

    if offset.dx > dead_zone {
        commands.push(Command::Right);
    } else if offset.dx < -dead_zone {
        commands.push(Command::Left);
    }

    if offset.dy > dead_zone {
        commands.push(Command::Down);
    } else if offset.dy < -dead_zone {
        commands.push(Command::Up);
    }

    commands
}

/// Send direction commands for `offset` unless a gate suppresses them.
///
/// `state` is updated to `now` whenever commands are emitted, whatever the
/// link does with them. Every axis command is handed to the link even if an
/// earlier one was dropped; the result is `Sent` only if all of them were
/// written, otherwise the first drop.
pub async fn maybe_dispatch(
    offset: Offset,
    now: Instant,
    state: &mut DispatchState,
    link: &LinkManager,
    config: &DispatchConfig,
) -> DeliveryOutcome {
    if offset.within(config.dead_zone) {
        trace!(dx = offset.dx, dy = offset.dy, "Inside dead zone");
        return DeliveryOutcome::DroppedDeadZone;
    }

    if state.cooling_down(now, config.min_interval) {
        trace!(dx = offset.dx, dy = offset.dy, "Rate limited");
        return DeliveryOutcome::DroppedRateLimited;
    }

    state.last_command_time = Some(now);

    let mut result = DeliveryOutcome::Sent;
    for command in direction_commands(offset, config.dead_zone) {
        let outcome = link.send(&command).await;
        if result.is_sent() && !outcome.is_sent() {
            result = outcome;
        }
    }

    result
}
