use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, PipelineResult};
use crate::geometry::{classify_zone, BBox, Zone};

/// Detector output before normalisation.
#[derive(Clone, Debug, PartialEq)]
pub struct RawDetection {
    pub class_name: String,
    pub confidence: f32,
    pub bbox: BBox,
}

impl RawDetection {
    pub fn new(class_name: impl Into<String>, confidence: f32, bbox: impl Into<BBox>) -> Self {
        Self {
            class_name: class_name.into(),
            confidence,
            bbox: bbox.into(),
        }
    }
}

/// Detection as consumed by the tracker and the aggregator. Immutable once built.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub class_name: String,
    pub confidence: f32,
    pub bbox: BBox,
    pub zone: Zone,
}

impl Detection {
    pub fn new(class_name: impl Into<String>, confidence: f32, bbox: impl Into<BBox>, zone: Zone) -> Self {
        Self {
            class_name: class_name.into(),
            confidence,
            bbox: bbox.into(),
            zone,
        }
    }
}

/// Clamp a raw detection to the frame and assign its zone.
///
/// Rejects non-finite or out-of-range confidences and boxes that end up inverted.
pub fn normalize(raw: RawDetection, frame_width: u32, frame_height: u32) -> PipelineResult<Detection> {
    if raw.class_name.trim().is_empty() {
        return Err(PipelineError::Detection("empty class name".to_string()));
    }
    if !raw.confidence.is_finite() || !(0.0..=1.0).contains(&raw.confidence) {
        return Err(PipelineError::Detection(format!(
            "confidence {} for '{}' is outside 0..=1",
            raw.confidence, raw.class_name
        )));
    }
    let bbox = raw.bbox.clamp_to(frame_width, frame_height);
    if bbox.is_inverted() {
        return Err(PipelineError::Detection(format!(
            "inverted box {:?} for '{}'",
            raw.bbox, raw.class_name
        )));
    }
    let zone = classify_zone(&bbox, frame_width);
    Ok(Detection {
        class_name: raw.class_name,
        confidence: raw.confidence,
        bbox,
        zone,
    })
}
