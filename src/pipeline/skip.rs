//! Backpressure policies for the processing worker.

use std::time::{Duration, Instant};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SkipDecision {
    Process,
    Skip,
}

/// Adaptive frame skipping.
///
/// Lateness is measured against the previous processed frame:
/// `delay = (now - last_processed) - interval`. When it exceeds the threshold the
/// skipper drops `min(max_skip, floor(delay / interval))` frames in a row, then
/// processes the next frame unconditionally and starts measuring afresh from it.
#[derive(Debug)]
pub struct FrameSkipper {
    interval: Duration,
    threshold: Duration,
    max_skip: u32,
    pending: u32,
    last_processed: Option<Instant>,
}

impl FrameSkipper {
    pub fn new(interval: Duration, threshold: Duration, max_skip: u32) -> Self {
        Self {
            interval,
            threshold,
            max_skip,
            pending: 0,
            last_processed: None,
        }
    }

    pub fn decide(&mut self, now: Instant) -> SkipDecision {
        if self.pending > 0 {
            self.pending -= 1;
            return SkipDecision::Skip;
        }
        let Some(last) = self.last_processed else {
            return SkipDecision::Process;
        };
        if self.interval.is_zero() || self.max_skip == 0 {
            return SkipDecision::Process;
        }
        let delay = now
            .saturating_duration_since(last)
            .saturating_sub(self.interval);
        if delay <= self.threshold {
            return SkipDecision::Process;
        }
        let skips = ((delay.as_secs_f64() / self.interval.as_secs_f64()).floor() as u32).min(self.max_skip);
        if skips == 0 {
            return SkipDecision::Process;
        }
        log::debug!(
            "FrameSkipper: {:.3}s behind, skipping {} frame(s)",
            delay.as_secs_f64(),
            skips
        );
        self.pending = skips - 1;
        self.last_processed = None;
        SkipDecision::Skip
    }

    pub fn mark_processed(&mut self, now: Instant) {
        self.last_processed = Some(now);
    }

    /// Frames still to be skipped from the current burst.
    pub fn pending(&self) -> u32 {
        self.pending
    }
}

/// At most one detection per `interval`, independent of frame rate.
#[derive(Debug)]
pub struct DetectionThrottle {
    interval: Duration,
    last: Option<Instant>,
}

impl DetectionThrottle {
    pub fn new(interval: Duration) -> Self {
        Self { interval, last: None }
    }

    /// True (and the slot is taken) when a detection may run at `now`.
    pub fn try_acquire(&mut self, now: Instant) -> bool {
        let ready = self
            .last
            .map_or(true, |last| now.saturating_duration_since(last) >= self.interval);
        if ready {
            self.last = Some(now);
        }
        ready
    }
}
