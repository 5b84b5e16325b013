//! Offset tracking
//!
//! Converts a single detection box and the calibrated aim point into a pixel
//! offset. Everything here is pure; the controller decides when to call it.

use serde::{Deserialize, Serialize};

/// Pixel coordinate the turret tries to center detections on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetPoint {
    /// Horizontal pixel coordinate
    pub x: i32,
    /// Vertical pixel coordinate
    pub y: i32,
}

impl TargetPoint {
    /// Create a target point
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

/// Bounding box reported by the detector for one frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectionBox {
    /// Left edge
    pub x: i32,
    /// Top edge
    pub y: i32,
    /// Box width, never negative
    pub width: i32,
    /// Box height, never negative
    pub height: i32,
}

impl DetectionBox {
    /// Create a detection box
    pub fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Box center using floor division
    ///
    /// Computed in `i64` so boxes at the edge of the `i32` range cannot
    /// overflow.
    pub fn center(&self) -> (i64, i64) {
        (
            i64::from(self.x) + i64::from(self.width).div_euclid(2),
            i64::from(self.y) + i64::from(self.height).div_euclid(2),
        )
    }

    /// Box area in square pixels
    pub fn area(&self) -> i64 {
        i64::from(self.width) * i64::from(self.height)
    }
}

/// Detection center minus target point
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Offset {
    /// Positive means the detection is right of the target
    pub dx: i64,
    /// Positive means the detection is below the target
    pub dy: i64,
}

impl Offset {
    /// Create an offset
    pub fn new(dx: i64, dy: i64) -> Self {
        Self { dx, dy }
    }

    /// True when both axes are within `dead_zone` pixels of the target.
    ///
    /// A negative dead zone contains nothing.
    pub fn within(&self, dead_zone: i32) -> bool {
        let Ok(dead_zone) = u64::try_from(dead_zone) else {
            return false;
        };
        self.dx.unsigned_abs() <= dead_zone && self.dy.unsigned_abs() <= dead_zone
    }
}

/// Process-wide tracking flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TrackingMode {
    /// Follow detections automatically
    pub auto_track: bool,
    /// Reserved. Stored and reported but triggers nothing.
    pub auto_fire: bool,
}

/// Rule for picking one detection out of several in the same frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SelectionPolicy {
    /// First detection in the detector's scan order
    #[default]
    First,
    /// Largest box by area; ties go to scan order
    Largest,
}

impl SelectionPolicy {
    /// Pick the detection to track, if any.
    pub fn select(&self, detections: &[DetectionBox]) -> Option<DetectionBox> {
        match self {
            SelectionPolicy::First => detections.first().copied(),
            SelectionPolicy::Largest => detections
                .iter()
                .copied()
                .enumerate()
                // reversed index: equal areas resolve to the earliest box
                .max_by_key(|(i, d)| (d.area(), std::cmp::Reverse(*i)))
                .map(|(_, d)| d),
        }
    }
}

/// Offset of the detection center from the target point.
pub fn compute_offset(detection: &DetectionBox, target: &TargetPoint) -> Offset {
    let (cx, cy) = detection.center();
    Offset {
        dx: cx - i64::from(target.x),
        dy: cy - i64::from(target.y),
    }
}
