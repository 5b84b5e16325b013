//! Paced frame loop
//!
//! The single producer of tracking decisions. Each tick pulls one frame from
//! a [`FrameSource`], lets the [`Controller`] evaluate it, then sleeps until
//! the tick's deadline on the monotonic clock. The loop ends when the source
//! is exhausted, the source fails, or the [`StopSignal`] fires; the signal is
//! checked every iteration and also interrupts the pacing sleep.
//!
//! Frames must match the controller's configured frame size, since the aim
//! point is calibrated in those pixel coordinates. A frame of another size
//! ends the loop with [`TurretError::FrameSource`].

use crate::controller::{Controller, FrameOutcome};
use crate::dispatch::DeliveryOutcome;
use crate::error::{TurretError, TurretResult};
use crate::tracking::DetectionBox;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, Lines};
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, error, info};

/// Detections for one video frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Detections in scan order
    pub detections: Vec<DetectionBox>,
    /// Frame width in pixels
    pub width: u32,
    /// Frame height in pixels
    pub height: u32,
}

/// Supplier of frames, typically a camera plus a detector
#[async_trait]
pub trait FrameSource: Send {
    /// Next frame, or `None` once the source is exhausted.
    async fn next_frame(&mut self) -> TurretResult<Option<Frame>>;
}

/// Cooperative stop flag for the frame loop
///
/// Clones share the flag.
#[derive(Clone, Debug)]
pub struct StopSignal {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for StopSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl StopSignal {
    /// Unset signal
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Ask the loop to stop after the current tick
    pub fn stop(&self) {
        self.tx.send_replace(true);
    }

    /// True once `stop` has been called
    pub fn is_stopped(&self) -> bool {
        *self.tx.borrow()
    }

    async fn stopped(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives in self, so the channel cannot close while we wait
        let _ = rx.wait_for(|stopped| *stopped).await;
    }
}

/// Counters reported when the loop ends
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopStats {
    /// Frames evaluated
    pub frames: u64,
    /// Frames with at least one detection while tracking was on
    pub detections: u64,
    /// Dispatches that reached the device
    pub sent: u64,
    /// Dispatches dropped for lack of a link
    pub dropped_no_link: u64,
}

impl LoopStats {
    fn record(&mut self, outcome: &FrameOutcome) {
        self.frames += 1;
        if let FrameOutcome::Evaluated { outcome, .. } = outcome {
            self.detections += 1;
            match outcome {
                DeliveryOutcome::Sent => self.sent += 1,
                DeliveryOutcome::DroppedNoLink => self.dropped_no_link += 1,
                DeliveryOutcome::DroppedRateLimited | DeliveryOutcome::DroppedDeadZone => {}
            }
        }
    }
}

/// Run the tracking loop until the source ends or `stop` fires.
///
/// `frame_budget` is the target tick length (100 ms for ~10 fps). Slow
/// ticks are not made up; the next tick starts immediately.
pub async fn run_frame_loop(
    controller: &Controller,
    source: &mut dyn FrameSource,
    frame_budget: Duration,
    stop: &StopSignal,
) -> TurretResult<LoopStats> {
    let mut stats = LoopStats::default();
    info!(budget = ?frame_budget, "Frame loop started");

    while !stop.is_stopped() {
        let tick_start = Instant::now();

        let frame = tokio::select! {
            frame = source.next_frame() => frame,
            _ = stop.stopped() => break,
        };

        let frame = match frame {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                info!("Frame source exhausted");
                break;
            }
            Err(e) => {
                error!(error = %e, "Frame source failed");
                return Err(e);
            }
        };

        let expected = controller.frame_size();
        if (frame.width, frame.height) != expected {
            let e = TurretError::FrameSource(format!(
                "frame is {}x{}, expected {}x{}",
                frame.width, frame.height, expected.0, expected.1
            ));
            error!(error = %e, "Frame size mismatch");
            return Err(e);
        }

        let outcome = controller
            .evaluate_frame(&frame.detections, tick_start.into_std())
            .await;
        stats.record(&outcome);

        tokio::select! {
            _ = tokio::time::sleep_until(tick_start + frame_budget) => {}
            _ = stop.stopped() => break,
        }
    }

    info!(
        frames = stats.frames,
        sent = stats.sent,
        dropped = stats.dropped_no_link,
        "Frame loop stopped"
    );
    Ok(stats)
}

/// Frames parsed from text lines
///
/// Each line holds zero or more detections as whitespace-separated
/// `x y width height` groups. A blank line is a frame with no detection.
pub struct LineFrameSource<R> {
    lines: Lines<R>,
    width: u32,
    height: u32,
    line_no: usize,
}

impl<R: AsyncBufRead + Unpin> LineFrameSource<R> {
    /// Read frames of the given size from `reader`
    pub fn new(reader: R, width: u32, height: u32) -> Self {
        Self {
            lines: reader.lines(),
            width,
            height,
            line_no: 0,
        }
    }
}

/// Parse one line of `x y width height` groups.
pub fn parse_detections(line: &str) -> TurretResult<Vec<DetectionBox>> {
    let values = line
        .split_whitespace()
        .map(|v| {
            v.parse::<i32>()
                .map_err(|_| TurretError::FrameSource(format!("'{v}' is not an integer")))
        })
        .collect::<TurretResult<Vec<i32>>>()?;

    if values.len() % 4 != 0 {
        return Err(TurretError::FrameSource(format!(
            "expected groups of 4 values, got {}",
            values.len()
        )));
    }

    values
        .chunks_exact(4)
        .map(|c| {
            if c[2] < 0 || c[3] < 0 {
                return Err(TurretError::FrameSource(format!(
                    "negative box size {}x{}",
                    c[2], c[3]
                )));
            }
            Ok(DetectionBox::new(c[0], c[1], c[2], c[3]))
        })
        .collect()
}

#[async_trait]
impl<R: AsyncBufRead + Unpin + Send> FrameSource for LineFrameSource<R> {
    async fn next_frame(&mut self) -> TurretResult<Option<Frame>> {
        let Some(line) = self
            .lines
            .next_line()
            .await
            .map_err(|e| TurretError::FrameSource(format!("failed to read frame: {e}")))?
        else {
            return Ok(None);
        };
        self.line_no += 1;

        let detections = parse_detections(&line).map_err(|e| match e {
            TurretError::FrameSource(reason) => {
                TurretError::FrameSource(format!("frame line {}: {reason}", self.line_no))
            }
            other => other,
        })?;
        debug!(line = self.line_no, count = detections.len(), "Frame read");

        Ok(Some(Frame {
            detections,
            width: self.width,
            height: self.height,
        }))
    }
}
