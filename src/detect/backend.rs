use std::sync::{Arc, Mutex};

use anyhow::Result;

use crate::detect::result::RawDetection;
use crate::frame::Frame;

/// Detector adapter.
///
/// # Contract
///
/// Backends wrap an object-detection model and are treated as pure functions of
/// the frame:
/// - No side effects on business state
/// - No retained reference to the frame beyond the `detect` call
/// - Bounded latency; the pipeline calls `detect` at up to ~10 Hz
///
/// A returned `Err` fails the whole call for one frame. The pipeline logs it and
/// carries on with the next frame.
pub trait DetectorBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run detection on a frame, returning boxes with confidence `>= min_confidence`.
    fn detect(&mut self, frame: &Frame, min_confidence: f32) -> Result<Vec<RawDetection>>;

    /// Called once by `StreamController::new`; an error aborts construction.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Backend handle shared between the controller and its worker thread.
pub type SharedDetector = Arc<Mutex<dyn DetectorBackend>>;

/// Wrap a backend for sharing.
pub fn shared<B: DetectorBackend + 'static>(backend: B) -> SharedDetector {
    Arc::new(Mutex::new(backend))
}
