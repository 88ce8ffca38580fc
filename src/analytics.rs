//! Business analytics aggregator.
//!
//! Turns accepted detections into per-business-type occupancy metrics over a
//! sliding 5-second window, plus dwell time, peak hours, zone transitions, trends
//! and threshold recommendations.
//!
//! All counters are driven by the active `BusinessProfile`; the engine itself has
//! no per-business-type code.

use chrono::{Local, TimeZone, Timelike};
use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::time::Instant;

use crate::detect::Detection;
use crate::geometry::Zone;
use crate::profile::{BusinessProfile, BusinessType};
use crate::tracker::{ObjectId, ObjectTracker};

/// Sliding window for raw counts and history retention.
pub const WINDOW_S: f64 = 5.0;

/// Per-class trend timestamps kept (oldest dropped first).
pub const TREND_CAPACITY: usize = 100;

/// Per-call processing durations kept for the mean processing time.
pub const PERFORMANCE_CAPACITY: usize = 100;

/// Dwell spans at or above this are treated as stale and ignored.
pub const MAX_STAY_S: f64 = 300.0;

/// A class needs more than this many trend points before a regression runs.
pub const TREND_MIN_POINTS: usize = 10;

/// Absolute slope above which a trend is reported.
pub const TREND_SLOPE_THRESHOLD: f64 = 0.1;

/// Mean processing time above which a performance warning is emitted.
pub const SLOW_PROCESSING_S: f64 = 0.1;

const PEAK_HOURS_REPORTED: usize = 3;

// ----------------------------------------------------------------------------
// Metrics
// ----------------------------------------------------------------------------

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct PerformanceMetrics {
    /// Detections per second over the window.
    pub detection_rate: f64,
    /// Mean seconds spent per `process` call over the recent history.
    pub processing_time: f64,
    /// Mean confidence across the window.
    pub confidence_avg: f64,
}

/// Aggregates for the active business type.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct BusinessMetrics {
    /// Windowed counters named by the profile (`person_count`, `cart_count`, ...).
    #[serde(flatten)]
    pub counts: BTreeMap<String, u64>,
    pub zone_density: BTreeMap<Zone, u64>,
    pub average_stay_time: f64,
    pub peak_hours: BTreeMap<u32, u64>,
    pub object_trends: BTreeMap<String, VecDeque<f64>>,
    pub zone_transitions: BTreeMap<String, u64>,
    pub performance_metrics: PerformanceMetrics,
}

impl BusinessMetrics {
    /// All counters at zero for `profile`.
    pub fn zeroed(profile: &BusinessProfile) -> Self {
        Self {
            counts: profile
                .metrics
                .iter()
                .map(|m| (m.name.to_string(), 0))
                .collect(),
            zone_density: BTreeMap::new(),
            average_stay_time: 0.0,
            peak_hours: BTreeMap::new(),
            object_trends: BTreeMap::new(),
            zone_transitions: BTreeMap::new(),
            performance_metrics: PerformanceMetrics::default(),
        }
    }

    /// Value of a named counter; unknown names read as zero.
    pub fn count(&self, name: &str) -> u64 {
        self.counts.get(name).copied().unwrap_or(0)
    }
}

// ----------------------------------------------------------------------------
// Insights
// ----------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TrendDirection {
    Rising,
    Falling,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Trend {
    pub class_name: String,
    pub direction: TrendDirection,
    pub slope: f64,
    /// Coefficient of determination of the fit, used as a confidence score.
    pub r_squared: f64,
}

impl fmt::Display for Trend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let direction = match self.direction {
            TrendDirection::Rising => "rising",
            TrendDirection::Falling => "falling",
        };
        write!(
            f,
            "{} trend is {} (confidence: {:.2})",
            self.class_name, direction, self.r_squared
        )
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct Insights {
    pub business_type: BusinessType,
    pub metrics: BusinessMetrics,
    pub recommendations: Vec<String>,
    pub trends: Vec<Trend>,
    pub performance: PerformanceMetrics,
}

/// Least-squares fit of `ys` against their index: returns `(slope, r)`.
///
/// `r` is zero when either series has no variance.
pub fn linear_regression(ys: &[f64]) -> Option<(f64, f64)> {
    let n = ys.len();
    if n < 2 {
        return None;
    }
    let nf = n as f64;
    let mean_x = (nf - 1.0) / 2.0;
    let mean_y = ys.iter().sum::<f64>() / nf;

    let mut sxx = 0.0;
    let mut syy = 0.0;
    let mut sxy = 0.0;
    for (i, y) in ys.iter().enumerate() {
        let dx = i as f64 - mean_x;
        let dy = y - mean_y;
        sxx += dx * dx;
        syy += dy * dy;
        sxy += dx * dy;
    }

    let slope = sxy / sxx;
    let r = if syy == 0.0 {
        0.0
    } else {
        (sxy / (sxx * syy).sqrt()).clamp(-1.0, 1.0)
    };
    Some((slope, r))
}

// ----------------------------------------------------------------------------
// Aggregator
// ----------------------------------------------------------------------------

#[derive(Clone, Debug, Serialize)]
pub struct HistoryEntry {
    pub time: f64,
    pub detection: Detection,
    pub object_id: ObjectId,
}

/// Sliding-window aggregator. One instance per stream controller.
pub struct BusinessAnalytics {
    business_type: BusinessType,
    metrics: BusinessMetrics,
    tracker: ObjectTracker,
    history: VecDeque<HistoryEntry>,
    performance_history: VecDeque<f64>,
    last_update: Option<f64>,
}

impl BusinessAnalytics {
    pub fn new(business_type: BusinessType) -> Self {
        Self {
            business_type,
            metrics: BusinessMetrics::zeroed(business_type.profile()),
            tracker: ObjectTracker::new(),
            history: VecDeque::new(),
            performance_history: VecDeque::with_capacity(PERFORMANCE_CAPACITY),
            last_update: None,
        }
    }

    pub fn business_type(&self) -> BusinessType {
        self.business_type
    }

    pub fn profile(&self) -> &'static BusinessProfile {
        self.business_type.profile()
    }

    /// Switch business type. Every counter, the tracker and the history restart from zero.
    pub fn set_business_type(&mut self, business_type: BusinessType) {
        self.business_type = business_type;
        self.reset();
    }

    pub fn reset(&mut self) {
        self.metrics = BusinessMetrics::zeroed(self.business_type.profile());
        self.tracker.clear();
        self.history.clear();
        self.performance_history.clear();
        self.last_update = None;
    }

    /// Process one accepted detection at the current wall-clock time.
    pub fn process(&mut self, detection: &Detection) -> ObjectId {
        self.process_at(detection, crate::now_s())
    }

    /// Process one accepted detection at `now` (epoch seconds).
    pub fn process_at(&mut self, detection: &Detection, now: f64) -> ObjectId {
        let started = Instant::now();

        let outcome = self.tracker.track(detection, now);
        if let Some((from, to)) = outcome.transition {
            *self
                .metrics
                .zone_transitions
                .entry(Zone::transition_key(from, to))
                .or_insert(0) += 1;
        }

        self.history.push_back(HistoryEntry {
            time: now,
            detection: detection.clone(),
            object_id: outcome.id,
        });
        self.prune_history(now);

        self.update_counts(detection, now);
        self.update_zone_density(detection.zone, now);
        self.update_stay_time();

        self.record_processing_time(started.elapsed().as_secs_f64());
        self.update_performance();

        if let Some(hour) = local_hour(now) {
            *self.metrics.peak_hours.entry(hour).or_insert(0) += 1;
        }

        let trend = self
            .metrics
            .object_trends
            .entry(detection.class_name.clone())
            .or_default();
        trend.push_back(now);
        while trend.len() > TREND_CAPACITY {
            trend.pop_front();
        }

        self.last_update = Some(now);
        outcome.id
    }

    fn prune_history(&mut self, now: f64) {
        while let Some(front) = self.history.front() {
            if now - front.time >= WINDOW_S {
                self.history.pop_front();
            } else {
                break;
            }
        }
        // Out-of-order timestamps can leave old entries behind the front.
        self.history.retain(|e| now - e.time < WINDOW_S);
    }

    fn update_counts(&mut self, detection: &Detection, now: f64) {
        for rule in self.business_type.profile().metrics {
            if !rule.counts(&detection.class_name) {
                continue;
            }
            let count = self
                .history
                .iter()
                .filter(|e| now - e.time < WINDOW_S && rule.counts(&e.detection.class_name))
                .count() as u64;
            self.metrics.counts.insert(rule.name.to_string(), count);
        }
    }

    fn update_zone_density(&mut self, zone: Zone, now: f64) {
        let count = self
            .history
            .iter()
            .filter(|e| now - e.time < WINDOW_S && e.detection.zone == zone)
            .count() as u64;
        self.metrics.zone_density.insert(zone, count);
    }

    fn update_stay_time(&mut self) {
        let stays: Vec<f64> = self
            .tracker
            .objects()
            .filter(|o| o.class_name == "person")
            .map(|o| o.dwell_s())
            .filter(|s| *s < MAX_STAY_S)
            .collect();
        // No qualifying person keeps the previous value.
        if !stays.is_empty() {
            self.metrics.average_stay_time = stays.iter().sum::<f64>() / stays.len() as f64;
        }
    }

    fn record_processing_time(&mut self, seconds: f64) {
        self.performance_history.push_back(seconds);
        while self.performance_history.len() > PERFORMANCE_CAPACITY {
            self.performance_history.pop_front();
        }
    }

    fn update_performance(&mut self) {
        let perf = &mut self.metrics.performance_metrics;
        perf.detection_rate = self.history.len() as f64 / WINDOW_S;
        perf.processing_time = mean(self.performance_history.iter().copied());
        perf.confidence_avg = mean(self.history.iter().map(|e| f64::from(e.detection.confidence)));
    }

    pub fn metrics(&self) -> &BusinessMetrics {
        &self.metrics
    }

    pub fn tracker(&self) -> &ObjectTracker {
        &self.tracker
    }

    pub fn history(&self) -> impl Iterator<Item = &HistoryEntry> {
        self.history.iter()
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    pub fn performance_history_len(&self) -> usize {
        self.performance_history.len()
    }

    pub fn last_update(&self) -> Option<f64> {
        self.last_update
    }

    /// Trends, recommendations and a metrics snapshot.
    pub fn insights(&self) -> Insights {
        Insights {
            business_type: self.business_type,
            metrics: self.metrics.clone(),
            recommendations: self.recommendations(),
            trends: self.trends(),
            performance: self.metrics.performance_metrics.clone(),
        }
    }

    fn trends(&self) -> Vec<Trend> {
        let mut trends = Vec::new();
        for (class_name, stamps) in &self.metrics.object_trends {
            if stamps.len() <= TREND_MIN_POINTS {
                continue;
            }
            let ys: Vec<f64> = stamps.iter().copied().collect();
            let Some((slope, r)) = linear_regression(&ys) else {
                continue;
            };
            if slope.abs() > TREND_SLOPE_THRESHOLD {
                trends.push(Trend {
                    class_name: class_name.clone(),
                    direction: if slope > 0.0 {
                        TrendDirection::Rising
                    } else {
                        TrendDirection::Falling
                    },
                    slope,
                    r_squared: r * r,
                });
            }
        }
        trends
    }

    fn recommendations(&self) -> Vec<String> {
        let mut out = Vec::new();

        let mut peaks: Vec<(u32, u64)> = self
            .metrics
            .peak_hours
            .iter()
            .map(|(h, c)| (*h, *c))
            .collect();
        peaks.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        if !peaks.is_empty() {
            let hours: Vec<String> = peaks
                .iter()
                .take(PEAK_HOURS_REPORTED)
                .map(|(h, _)| format!("{:02}:00", h))
                .collect();
            out.push(format!("Peak hours: {}", hours.join(", ")));
        }

        // Strict comparison: ties keep the lexicographically first key.
        let mut most_common: Option<(&String, u64)> = None;
        for (key, count) in &self.metrics.zone_transitions {
            if most_common.map_or(true, |(_, best)| *count > best) {
                most_common = Some((key, *count));
            }
        }
        if let Some((key, _)) = most_common {
            out.push(format!("Most common transition: {}", key));
        }

        if self.metrics.performance_metrics.processing_time > SLOW_PROCESSING_S {
            out.push("System performance can be optimized".to_string());
        }

        for rule in self.business_type.profile().metrics {
            if self.metrics.count(rule.name) > rule.threshold {
                out.push(rule.warning.to_string());
            }
        }

        out
    }
}

impl Default for BusinessAnalytics {
    fn default() -> Self {
        Self::new(BusinessType::default())
    }
}

fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, n) = values.fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    if n == 0 {
        0.0
    } else {
        sum / n as f64
    }
}

fn local_hour(epoch_s: f64) -> Option<u32> {
    if !epoch_s.is_finite() {
        return None;
    }
    let secs = epoch_s.floor() as i64;
    Local.timestamp_opt(secs, 0).earliest().map(|dt| dt.hour())
}
