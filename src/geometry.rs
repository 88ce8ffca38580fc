//! Box geometry and zone classification.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Zone boundaries as fractions of frame width.
const ENTRANCE_MAX_FRACTION: f64 = 0.33;
const MIDDLE_MAX_FRACTION: f64 = 0.66;

/// Axis-aligned box in pixel coordinates: (x1, y1) top-left, (x2, y2) bottom-right.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BBox {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
}

impl BBox {
    pub fn new(x1: i32, y1: i32, x2: i32, y2: i32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn width(&self) -> i64 {
        i64::from(self.x2) - i64::from(self.x1)
    }

    pub fn height(&self) -> i64 {
        i64::from(self.y2) - i64::from(self.y1)
    }

    /// Signed area; inverted boxes give zero or negative values.
    pub fn area(&self) -> i128 {
        i128::from(self.width()) * i128::from(self.height())
    }

    pub fn center_x(&self) -> f64 {
        (f64::from(self.x1) + f64::from(self.x2)) / 2.0
    }

    pub fn center_y(&self) -> f64 {
        (f64::from(self.y1) + f64::from(self.y2)) / 2.0
    }

    /// Clamp every corner into `[0, width-1] x [0, height-1]`.
    pub fn clamp_to(&self, width: u32, height: u32) -> Self {
        let max_x = i32::try_from(width.saturating_sub(1)).unwrap_or(i32::MAX);
        let max_y = i32::try_from(height.saturating_sub(1)).unwrap_or(i32::MAX);
        Self {
            x1: self.x1.clamp(0, max_x),
            y1: self.y1.clamp(0, max_y),
            x2: self.x2.clamp(0, max_x),
            y2: self.y2.clamp(0, max_y),
        }
    }

    pub fn is_inverted(&self) -> bool {
        self.x2 < self.x1 || self.y2 < self.y1
    }

    /// Intersection-over-Union. Returns 0 when the union area is not positive.
    pub fn iou(&self, other: &BBox) -> f64 {
        let ix1 = self.x1.max(other.x1);
        let iy1 = self.y1.max(other.y1);
        let ix2 = self.x2.min(other.x2);
        let iy2 = self.y2.min(other.y2);

        let iw = (i128::from(ix2) - i128::from(ix1)).max(0);
        let ih = (i128::from(iy2) - i128::from(iy1)).max(0);
        let intersection = iw * ih;
        let union = self.area() + other.area() - intersection;

        if union > 0 {
            intersection as f64 / union as f64
        } else {
            0.0
        }
    }
}

impl From<[i32; 4]> for BBox {
    fn from(v: [i32; 4]) -> Self {
        Self::new(v[0], v[1], v[2], v[3])
    }
}

/// Coarse horizontal region of the frame.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Zone {
    Entrance,
    Middle,
    Exit,
    #[default]
    Unknown,
}

impl Zone {
    pub fn as_str(&self) -> &'static str {
        match self {
            Zone::Entrance => "entrance",
            Zone::Middle => "middle",
            Zone::Exit => "exit",
            Zone::Unknown => "unknown",
        }
    }

    /// Key used by the zone-transition counters, e.g. `entrance_to_middle`.
    pub fn transition_key(from: Zone, to: Zone) -> String {
        format!("{}_to_{}", from.as_str(), to.as_str())
    }
}

impl fmt::Display for Zone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Map a box to a zone by its horizontal center.
///
/// Total for any frame with a non-zero width; `Unknown` only when the width is zero.
pub fn classify_zone(bbox: &BBox, frame_width: u32) -> Zone {
    if frame_width == 0 {
        return Zone::Unknown;
    }
    let width = f64::from(frame_width);
    let center = bbox.center_x();
    if center < width * ENTRANCE_MAX_FRACTION {
        Zone::Entrance
    } else if center < width * MIDDLE_MAX_FRACTION {
        Zone::Middle
    } else {
        Zone::Exit
    }
}
