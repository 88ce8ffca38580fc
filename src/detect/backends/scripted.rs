use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, Result};

use crate::detect::backend::DetectorBackend;
use crate::detect::result::RawDetection;
use crate::frame::Frame;

type Scripted = std::result::Result<Vec<RawDetection>, String>;

/// Backend that replays a fixed script of detector responses.
///
/// Each call consumes the next scripted response. Once the script runs out the
/// fallback response is returned on every call (empty unless `repeating`).
pub struct ScriptedBackend {
    script: VecDeque<Scripted>,
    fallback: Vec<RawDetection>,
    calls: Arc<AtomicU64>,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self {
            script: VecDeque::new(),
            fallback: Vec::new(),
            calls: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Return the same detections on every call.
    pub fn repeating(detections: Vec<RawDetection>) -> Self {
        Self {
            fallback: detections,
            ..Self::new()
        }
    }

    pub fn then(mut self, detections: Vec<RawDetection>) -> Self {
        self.script.push_back(Ok(detections));
        self
    }

    pub fn then_fail(mut self, reason: impl Into<String>) -> Self {
        self.script.push_back(Err(reason.into()));
        self
    }

    /// Shared call counter, readable after the backend moved into the pipeline.
    pub fn call_counter(&self) -> Arc<AtomicU64> {
        self.calls.clone()
    }
}

impl Default for ScriptedBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl DetectorBackend for ScriptedBackend {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn detect(&mut self, _frame: &Frame, min_confidence: f32) -> Result<Vec<RawDetection>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let response = match self.script.pop_front() {
            Some(response) => response,
            None => Ok(self.fallback.clone()),
        };
        let detections = response.map_err(|reason| anyhow!("scripted failure: {}", reason))?;
        Ok(detections
            .into_iter()
            .filter(|d| d.confidence >= min_confidence)
            .collect())
    }
}
