use anyhow::Result;

use crate::detect::backend::DetectorBackend;
use crate::detect::result::RawDetection;
use crate::frame::Frame;
use crate::geometry::BBox;

/// Number of frames a synthetic walker needs to cross the frame.
const CROSSING_FRAMES: u64 = 150;

/// Deterministic backend for demos on `stub://` sources.
///
/// Emits one `person` walking left to right across the frame (driven by the frame
/// sequence number) and, on every third frame, a `shopping cart` beside it.
#[derive(Default)]
pub struct SyntheticBackend;

impl SyntheticBackend {
    pub fn new() -> Self {
        Self
    }
}

impl DetectorBackend for SyntheticBackend {
    fn name(&self) -> &'static str {
        "synthetic"
    }

    fn detect(&mut self, frame: &Frame, min_confidence: f32) -> Result<Vec<RawDetection>> {
        if !frame.is_valid() {
            return Ok(Vec::new());
        }
        let width = i64::from(frame.width);
        let height = i64::from(frame.height);
        let box_w = (width / 8).max(1);
        let box_h = (height / 3).max(1);
        let step = (frame.sequence % CROSSING_FRAMES) as i64;
        let x1 = (width - box_w) * step / CROSSING_FRAMES as i64;
        let y1 = height / 3;

        let person = BBox::new(
            x1 as i32,
            y1 as i32,
            (x1 + box_w) as i32,
            (y1 + box_h) as i32,
        );
        let mut out = vec![RawDetection::new("person", 0.82, person)];
        if frame.sequence % 3 == 0 {
            let cart = BBox::new(
                person.x1,
                person.y2 - (box_h / 3) as i32,
                person.x2,
                person.y2,
            );
            out.push(RawDetection::new("shopping cart", 0.61, cart));
        }
        out.retain(|d| d.confidence >= min_confidence);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn synthetic_person_walks_right() {
        let mut backend = SyntheticBackend::new();
        let a = backend.detect(&Frame::filled(640, 480, [0, 0, 0], 1), 0.3).unwrap();
        let b = backend.detect(&Frame::filled(640, 480, [0, 0, 0], 100), 0.3).unwrap();
        assert_eq!(a[0].class_name, "person");
        assert!(b[0].bbox.x1 > a[0].bbox.x1);
        assert!(b[0].bbox.x2 <= 640);
    }

    #[test]
    fn synthetic_cart_every_third_frame() {
        let mut backend = SyntheticBackend::new();
        let frame = Frame::filled(640, 480, [0, 0, 0], 3);
        let out = backend.detect(&frame, 0.3).unwrap();
        assert!(out.iter().any(|d| d.class_name == "shopping cart"));
        let out = backend.detect(&frame, 0.7).unwrap();
        assert_eq!(out.len(), 1);
    }
}
