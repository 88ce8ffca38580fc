//! Stream pipeline controller.
//!
//! One controller owns at most one active stream. A stream runs two threads:
//!
//! - acquisition: reads the frame source at the target frame rate and pushes into
//!   a bounded drop-oldest `FrameQueue`
//! - worker: pops frames, applies the adaptive skip policy and the detection
//!   throttle, runs the detector, feeds accepted detections to the analytics
//!   aggregator and the event log, and publishes every frame to the latest slot
//!
//! Consumers read through `&self` methods only, so a controller can be shared
//! behind an `Arc`. Analytics and the event log sit behind short-lived locks;
//! readers always see a complete update.

mod output;
mod skip;

pub use output::FrameStream;
pub use skip::{DetectionThrottle, FrameSkipper, SkipDecision};

use serde::Serialize;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::analytics::{BusinessAnalytics, BusinessMetrics, Insights};
use crate::detect::{normalize, Detection, SharedDetector};
use crate::encode::DEFAULT_JPEG_QUALITY;
use crate::error::{PipelineError, PipelineResult};
use crate::events::{
    Event, EventLog, EventQuery, EventStats, ExportFormat, EVENT_BUSINESS_TYPE_CHANGED,
    EVENT_DETECTION, EVENT_STREAM_CONNECTED, EVENT_STREAM_DISCONNECTED,
};
use crate::frame::{Frame, FrameQueue, LatestFrame, DEFAULT_QUEUE_CAPACITY};
use crate::ingest::{open_verified, ConnectPolicy, DefaultSourceFactory, FrameSource, SourceFactory};
use crate::profile::BusinessType;
use crate::tracker::ObjectId;

const JOIN_POLL: Duration = Duration::from_millis(10);
const STOP_POLL: Duration = Duration::from_millis(10);

#[derive(Clone, Debug)]
pub struct PipelineSettings {
    /// Target spacing between frames (acquisition pacing and output stream).
    pub frame_interval: Duration,
    /// Minimum spacing between two detector calls.
    pub detection_interval: Duration,
    pub queue_capacity: usize,
    pub max_skip_frames: u32,
    /// Lateness beyond which the worker starts skipping frames.
    pub skip_threshold: Duration,
    pub connect: ConnectPolicy,
    pub read_retry_delay: Duration,
    pub join_timeout: Duration,
    pub idle_poll: Duration,
    /// Global confidence floor passed to the detector.
    pub min_confidence: f32,
    pub jpeg_quality: u8,
    pub events_dir: PathBuf,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            frame_interval: Duration::from_millis(33),
            detection_interval: Duration::from_millis(100),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            max_skip_frames: 3,
            skip_threshold: Duration::from_millis(100),
            connect: ConnectPolicy::default(),
            read_retry_delay: Duration::from_secs(1),
            join_timeout: Duration::from_secs(1),
            idle_poll: Duration::from_millis(1),
            min_confidence: 0.3,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            events_dir: PathBuf::from("events"),
        }
    }
}

/// `Idle -> Connecting -> Running -> Stopping -> Idle`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineState {
    Idle,
    Connecting,
    Running,
    Stopping,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PipelineStatus {
    pub state: PipelineState,
    pub source: Option<String>,
    pub business_type: BusinessType,
    pub frames_read: u64,
    pub frames_processed: u64,
    pub frames_skipped: u64,
    /// Frames evicted from the full queue before the worker reached them.
    pub frames_dropped: u64,
    pub read_errors: u64,
    pub detections: u64,
    pub queued: usize,
}

// ----------------------------------------------------------------------------
// Shared state
// ----------------------------------------------------------------------------

fn lock<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct Shared {
    settings: PipelineSettings,
    detector: SharedDetector,
    analytics: Mutex<BusinessAnalytics>,
    events: Mutex<EventLog>,
    latest: LatestFrame,
    state: Mutex<PipelineState>,
}

impl Shared {
    fn state(&self) -> PipelineState {
        *lock(&self.state)
    }

    fn set_state(&self, state: PipelineState) {
        let mut current = lock(&self.state);
        if *current != state {
            log::debug!("StreamController: {:?} -> {:?}", *current, state);
            *current = state;
        }
    }

    /// Newest frame of the running stream.
    fn current_frame(&self) -> Option<Arc<Frame>> {
        if self.state() == PipelineState::Running {
            self.latest.get()
        } else {
            None
        }
    }

    fn record_event(&self, event_type: &str, data: Value, confidence: Option<f64>) {
        if let Err(e) = lock(&self.events).log(event_type, data, confidence) {
            log::warn!("StreamController: failed to record {} event: {}", event_type, e);
        }
    }

    /// Run the detector on `frame` and feed accepted detections downstream.
    /// Returns the number of detections recorded.
    fn detect_and_record(&self, frame: &Frame) -> usize {
        let raw = {
            let mut detector = lock(self.detector.as_ref());
            match detector.detect(frame, self.settings.min_confidence) {
                Ok(raw) => raw,
                Err(e) => {
                    let err = PipelineError::Detection(format!("{:#}", e));
                    log::warn!("StreamController: {}", err);
                    return 0;
                }
            }
        };

        let mut normalized = Vec::with_capacity(raw.len());
        for r in raw {
            match normalize(r, frame.width, frame.height) {
                Ok(d) => normalized.push(d),
                Err(e) => log::warn!("StreamController: skipping detection: {}", e),
            }
        }

        // Analytics before events, held together so a business-type switch
        // never lands between a detection and its event.
        let mut analytics = lock(&self.analytics);
        let profile = analytics.profile();
        let recorded: Vec<(Detection, ObjectId)> = normalized
            .into_iter()
            .filter(|d| profile.admits(&d.class_name, d.confidence))
            .map(|d| {
                let id = analytics.process(&d);
                (d, id)
            })
            .collect();

        if !recorded.is_empty() {
            let mut events = lock(&self.events);
            for (d, id) in &recorded {
                let data = json!({
                    "class_name": d.class_name,
                    "zone": d.zone.as_str(),
                    "bbox": [d.bbox.x1, d.bbox.y1, d.bbox.x2, d.bbox.y2],
                    "object_id": id.0,
                });
                if let Err(e) = events.log(EVENT_DETECTION, data, Some(f64::from(d.confidence))) {
                    log::warn!("StreamController: failed to record detection: {}", e);
                }
            }
        }
        recorded.len()
    }
}

#[derive(Default)]
struct SessionCounters {
    frames_read: AtomicU64,
    frames_processed: AtomicU64,
    frames_skipped: AtomicU64,
    read_errors: AtomicU64,
    detections: AtomicU64,
}

/// State shared by the two threads of one stream.
struct SessionShared {
    source: String,
    stop: AtomicBool,
    queue: FrameQueue,
    counters: SessionCounters,
}

impl SessionShared {
    fn stopped(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    /// Sleep up to `duration`, returning early once a stop is requested.
    fn sleep(&self, duration: Duration) {
        let deadline = Instant::now() + duration;
        while !self.stopped() {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            thread::sleep(STOP_POLL.min(deadline - now));
        }
    }
}

struct Session {
    shared: Arc<SessionShared>,
    acquisition: Option<JoinHandle<()>>,
    worker: Option<JoinHandle<()>>,
}

// ----------------------------------------------------------------------------
// Controller
// ----------------------------------------------------------------------------

pub struct StreamController {
    shared: Arc<Shared>,
    factory: Arc<dyn SourceFactory>,
    // Serialises connect/disconnect; readers never take it.
    lifecycle: Mutex<()>,
    session: Mutex<Option<Session>>,
}

impl StreamController {
    /// Controller for `business_type`, with its event log under `settings.events_dir`.
    pub fn new(
        settings: PipelineSettings,
        detector: SharedDetector,
        business_type: BusinessType,
    ) -> PipelineResult<Self> {
        let events = EventLog::for_business_type(&settings.events_dir, business_type)?;
        {
            let mut backend = lock(detector.as_ref());
            backend
                .warm_up()
                .map_err(|e| PipelineError::Detection(format!("{} warm-up failed: {:#}", backend.name(), e)))?;
            log::info!(
                "StreamController: ready ({}, detector {})",
                business_type,
                backend.name()
            );
        }
        let factory = DefaultSourceFactory::new(settings.connect.first_frame_timeout);
        Ok(Self {
            shared: Arc::new(Shared {
                settings,
                detector,
                analytics: Mutex::new(BusinessAnalytics::new(business_type)),
                events: Mutex::new(events),
                latest: LatestFrame::new(),
                state: Mutex::new(PipelineState::Idle),
            }),
            factory: Arc::new(factory),
            lifecycle: Mutex::new(()),
            session: Mutex::new(None),
        })
    }

    /// Replace the factory that turns source strings into frame sources.
    pub fn with_source_factory(mut self, factory: Arc<dyn SourceFactory>) -> Self {
        self.factory = factory;
        self
    }

    /// Connect to `source` and start processing.
    ///
    /// The new source is verified before anything else changes: on failure a
    /// running stream keeps running and an idle controller stays idle.
    pub fn connect(&self, source: &str) -> PipelineResult<()> {
        let source = source.trim();
        let _lifecycle = lock(&self.lifecycle);
        if source.is_empty() {
            return Err(PipelineError::Connection {
                source_name: String::new(),
                attempts: 0,
                reason: "empty source".to_string(),
            });
        }

        let was_running = self.shared.state() == PipelineState::Running;
        if !was_running {
            self.shared.set_state(PipelineState::Connecting);
        }

        let (handle, first) =
            match open_verified(self.factory.as_ref(), source, &self.shared.settings.connect) {
                Ok(opened) => opened,
                Err(e) => {
                    if !was_running {
                        self.shared.set_state(PipelineState::Idle);
                    }
                    return Err(e);
                }
            };

        if was_running {
            log::info!("StreamController: switching to {}", source);
            self.stop_session();
            self.shared.set_state(PipelineState::Connecting);
        }

        let session = self.start_session(source, handle, first);
        *lock(&self.session) = Some(session);
        self.shared.set_state(PipelineState::Running);
        self.shared
            .record_event(EVENT_STREAM_CONNECTED, json!({ "source": source }), None);
        log::info!("StreamController: streaming from {}", source);
        Ok(())
    }

    fn start_session(&self, source: &str, handle: Box<dyn FrameSource>, first: Frame) -> Session {
        let session = Arc::new(SessionShared {
            source: source.to_string(),
            stop: AtomicBool::new(false),
            queue: FrameQueue::new(self.shared.settings.queue_capacity),
            counters: SessionCounters::default(),
        });
        session.counters.frames_read.fetch_add(1, Ordering::Relaxed);
        session.queue.push(first);

        let acquisition = {
            let session = session.clone();
            let shared = self.shared.clone();
            thread::spawn(move || run_acquisition(handle, &session, &shared))
        };
        let worker = {
            let session = session.clone();
            let shared = self.shared.clone();
            thread::spawn(move || run_worker(&session, &shared))
        };

        Session {
            shared: session,
            acquisition: Some(acquisition),
            worker: Some(worker),
        }
    }

    /// Stop the active stream, if any. Always safe to call.
    pub fn disconnect(&self) {
        let _lifecycle = lock(&self.lifecycle);
        self.stop_session();
        self.shared.latest.clear();
        self.shared.set_state(PipelineState::Idle);
    }

    fn stop_session(&self) {
        let Some(mut session) = lock(&self.session).take() else {
            return;
        };
        self.shared.set_state(PipelineState::Stopping);
        session.shared.stop.store(true, Ordering::SeqCst);

        let timeout = self.shared.settings.join_timeout;
        join_with_timeout(session.worker.take(), timeout, "worker");
        join_with_timeout(session.acquisition.take(), timeout, "acquisition");

        let discarded = session.shared.queue.drain_newest_first().len();
        self.shared.latest.clear();

        let counters = &session.shared.counters;
        self.shared.record_event(
            EVENT_STREAM_DISCONNECTED,
            json!({
                "source": session.shared.source,
                "frames_read": counters.frames_read.load(Ordering::Relaxed),
                "frames_processed": counters.frames_processed.load(Ordering::Relaxed),
                "detections": counters.detections.load(Ordering::Relaxed),
            }),
            None,
        );
        log::info!(
            "StreamController: stopped {} ({} queued frame(s) discarded)",
            session.shared.source,
            discarded
        );
    }

    /// Switch business type. Analytics restart from zero and events go to the
    /// new type's log file. An unknown name leaves everything unchanged.
    pub fn set_business_type(&self, name: &str) -> PipelineResult<BusinessType> {
        let business_type: BusinessType = name.parse()?;
        let _lifecycle = lock(&self.lifecycle);
        let new_log = EventLog::for_business_type(&self.shared.settings.events_dir, business_type)?;

        let previous = {
            let mut analytics = lock(&self.shared.analytics);
            let previous = analytics.business_type();
            analytics.set_business_type(business_type);

            let mut events = lock(&self.shared.events);
            *events = new_log;
            let data = json!({ "from": previous.as_str(), "to": business_type.as_str() });
            if let Err(e) = events.log(EVENT_BUSINESS_TYPE_CHANGED, data, None) {
                log::warn!("StreamController: failed to record business type change: {}", e);
            }
            previous
        };
        log::info!("StreamController: business type {} -> {}", previous, business_type);
        Ok(business_type)
    }

    pub fn business_type(&self) -> BusinessType {
        lock(&self.shared.analytics).business_type()
    }

    pub fn insights(&self) -> Insights {
        lock(&self.shared.analytics).insights()
    }

    pub fn metrics(&self) -> BusinessMetrics {
        lock(&self.shared.analytics).metrics().clone()
    }

    /// Endless multipart JPEG stream of the newest frames.
    pub fn stream_frames(&self) -> FrameStream {
        FrameStream::new(self.shared.clone())
    }

    pub fn events(&self, query: &EventQuery) -> Vec<Event> {
        lock(&self.shared.events).query(query)
    }

    pub fn recent_events(&self, limit: usize) -> Vec<Event> {
        lock(&self.shared.events).recent(limit)
    }

    pub fn event_stats(&self, event_type: Option<&str>, window_s: f64) -> EventStats {
        lock(&self.shared.events).stats(event_type, window_s)
    }

    pub fn export_events(&self, path: impl AsRef<Path>, format: ExportFormat) -> anyhow::Result<usize> {
        lock(&self.shared.events).export(path, format)
    }

    pub fn clear_events(&self) -> PipelineResult<()> {
        lock(&self.shared.events).clear()
    }

    pub fn event_log_path(&self) -> PathBuf {
        lock(&self.shared.events).path().to_path_buf()
    }

    pub fn state(&self) -> PipelineState {
        self.shared.state()
    }

    pub fn is_running(&self) -> bool {
        self.state() == PipelineState::Running
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.shared.settings
    }

    pub fn status(&self) -> PipelineStatus {
        let state = self.shared.state();
        let business_type = self.business_type();
        let session = lock(&self.session);
        let Some(session) = session.as_ref() else {
            return PipelineStatus {
                state,
                source: None,
                business_type,
                frames_read: 0,
                frames_processed: 0,
                frames_skipped: 0,
                frames_dropped: 0,
                read_errors: 0,
                detections: 0,
                queued: 0,
            };
        };
        let s = &session.shared;
        PipelineStatus {
            state,
            source: Some(s.source.clone()),
            business_type,
            frames_read: s.counters.frames_read.load(Ordering::Relaxed),
            frames_processed: s.counters.frames_processed.load(Ordering::Relaxed),
            frames_skipped: s.counters.frames_skipped.load(Ordering::Relaxed),
            frames_dropped: s.queue.dropped(),
            read_errors: s.counters.read_errors.load(Ordering::Relaxed),
            detections: s.counters.detections.load(Ordering::Relaxed),
            queued: s.queue.len(),
        }
    }
}

impl Drop for StreamController {
    fn drop(&mut self) {
        self.disconnect();
    }
}

// ----------------------------------------------------------------------------
// Threads
// ----------------------------------------------------------------------------

fn run_acquisition(mut source: Box<dyn FrameSource>, session: &SessionShared, shared: &Shared) {
    let settings = &shared.settings;
    while !session.stopped() {
        let started = Instant::now();
        match source.next_frame() {
            Ok(Some(frame)) => {
                session.counters.frames_read.fetch_add(1, Ordering::Relaxed);
                if let Some(evicted) = session.queue.push(frame) {
                    log::debug!("StreamController: queue full, dropped frame {}", evicted.sequence);
                }
            }
            Ok(None) => {
                log::info!("StreamController: end of input from {}", session.source);
                break;
            }
            Err(e) => {
                let err = PipelineError::TransientRead(format!("{:#}", e));
                session.counters.read_errors.fetch_add(1, Ordering::Relaxed);
                log::warn!(
                    "StreamController: {}; retrying in {:?}",
                    err,
                    settings.read_retry_delay
                );
                session.sleep(settings.read_retry_delay);
                continue;
            }
        }
        if let Some(remaining) = settings.frame_interval.checked_sub(started.elapsed()) {
            session.sleep(remaining);
        }
    }
    source.close();
}

fn run_worker(session: &SessionShared, shared: &Shared) {
    let settings = &shared.settings;
    let mut skipper = FrameSkipper::new(
        settings.frame_interval,
        settings.skip_threshold,
        settings.max_skip_frames,
    );
    let mut throttle = DetectionThrottle::new(settings.detection_interval);

    while !session.stopped() {
        let Some(frame) = session.queue.pop() else {
            thread::sleep(settings.idle_poll);
            continue;
        };
        if !frame.is_valid() {
            log::debug!("StreamController: discarding invalid frame {}", frame.sequence);
            continue;
        }

        let now = Instant::now();
        if skipper.decide(now) == SkipDecision::Skip {
            session.counters.frames_skipped.fetch_add(1, Ordering::Relaxed);
            shared.latest.publish(frame);
            continue;
        }
        skipper.mark_processed(now);

        if throttle.try_acquire(now) {
            let recorded = shared.detect_and_record(&frame);
            session
                .counters
                .detections
                .fetch_add(recorded as u64, Ordering::Relaxed);
        }
        session.counters.frames_processed.fetch_add(1, Ordering::Relaxed);
        shared.latest.publish(frame);
    }
}

fn join_with_timeout(handle: Option<JoinHandle<()>>, timeout: Duration, name: &str) {
    let Some(handle) = handle else {
        return;
    };
    let deadline = Instant::now() + timeout;
    while !handle.is_finished() {
        if Instant::now() >= deadline {
            log::warn!(
                "StreamController: {} thread still running after {:?}; detaching",
                name,
                timeout
            );
            return;
        }
        thread::sleep(JOIN_POLL);
    }
    if handle.join().is_err() {
        log::error!("StreamController: {} thread panicked", name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::{shared, DetectorBackend, RawDetection, ScriptedBackend, StubBackend};
    use anyhow::anyhow;
    use std::sync::atomic::AtomicU32;

    fn settings(dir: &Path) -> PipelineSettings {
        PipelineSettings {
            frame_interval: Duration::from_millis(5),
            detection_interval: Duration::ZERO,
            max_skip_frames: 0,
            connect: ConnectPolicy {
                attempts: 3,
                retry_delay: Duration::from_millis(5),
                first_frame_timeout: Duration::from_millis(100),
                poll_interval: Duration::from_millis(5),
            },
            read_retry_delay: Duration::from_millis(5),
            events_dir: dir.to_path_buf(),
            ..PipelineSettings::default()
        }
    }

    fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(10));
        }
        cond()
    }

    fn person() -> RawDetection {
        RawDetection::new("person", 0.9, [10, 10, 60, 120])
    }

    struct Unreachable(Arc<AtomicU32>);

    impl SourceFactory for Unreachable {
        fn open(&self, _source: &str) -> anyhow::Result<Box<dyn FrameSource>> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Err(anyhow!("host unreachable"))
        }
    }

    /// Takes `delay` per call and never finds anything.
    struct SlowBackend {
        delay: Duration,
        calls: Arc<AtomicU64>,
    }

    impl DetectorBackend for SlowBackend {
        fn name(&self) -> &'static str {
            "slow"
        }

        fn detect(&mut self, _frame: &Frame, _min_confidence: f32) -> anyhow::Result<Vec<RawDetection>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            thread::sleep(self.delay);
            Ok(Vec::new())
        }
    }

    struct ColdBackend {
        warm_ups: Arc<AtomicU32>,
        fail: bool,
    }

    impl DetectorBackend for ColdBackend {
        fn name(&self) -> &'static str {
            "cold"
        }

        fn detect(&mut self, _frame: &Frame, _min_confidence: f32) -> anyhow::Result<Vec<RawDetection>> {
            Ok(Vec::new())
        }

        fn warm_up(&mut self) -> anyhow::Result<()> {
            self.warm_ups.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(anyhow!("weights missing"));
            }
            Ok(())
        }
    }

    #[test]
    fn detector_is_warmed_up_on_construction() {
        let dir = tempfile::tempdir().unwrap();
        let warm_ups = Arc::new(AtomicU32::new(0));
        let ready = ColdBackend { warm_ups: warm_ups.clone(), fail: false };
        let controller = StreamController::new(settings(dir.path()), shared(ready), BusinessType::Supermarket);
        assert!(controller.is_ok());
        assert_eq!(warm_ups.load(Ordering::SeqCst), 1);

        let broken = ColdBackend { warm_ups: warm_ups.clone(), fail: true };
        let Err(err) = StreamController::new(settings(dir.path()), shared(broken), BusinessType::Supermarket) else {
            panic!("controller built despite failed warm-up");
        };
        assert!(matches!(err, PipelineError::Detection(ref msg) if msg.contains("weights missing")));
        assert_eq!(warm_ups.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn slow_detector_skips_frames_and_stays_throttled() {
        let dir = tempfile::tempdir().unwrap();
        let calls = Arc::new(AtomicU64::new(0));
        let detector = shared(SlowBackend {
            delay: Duration::from_millis(100),
            calls: calls.clone(),
        });
        let tuned = PipelineSettings {
            frame_interval: Duration::from_millis(10),
            detection_interval: Duration::from_millis(150),
            max_skip_frames: 3,
            skip_threshold: Duration::from_millis(20),
            ..settings(dir.path())
        };
        let controller = StreamController::new(tuned, detector, BusinessType::Supermarket).unwrap();

        let started = Instant::now();
        controller.connect("stub://busy").unwrap();
        assert!(wait_until(|| {
            let s = controller.status();
            s.frames_skipped > 0 && s.frames_processed >= 3
        }));

        // At most one call can be in flight ahead of the processed counter.
        let made = calls.load(Ordering::SeqCst);
        let status = controller.status();
        assert!(made <= status.frames_processed + 1, "{} calls for {:?}", made, status);

        controller.disconnect();
        let allowed = (started.elapsed().as_millis() / 150) as u64 + 1;
        let made = calls.load(Ordering::SeqCst);
        assert!(made <= allowed, "{} detector calls, throttle allows {}", made, allowed);
    }

    #[test]
    fn failed_connect_leaves_controller_idle() {
        let dir = tempfile::tempdir().unwrap();
        let opens = Arc::new(AtomicU32::new(0));
        let controller = StreamController::new(settings(dir.path()), shared(StubBackend::new()), BusinessType::Supermarket)
            .unwrap()
            .with_source_factory(Arc::new(Unreachable(opens.clone())));

        let err = controller.connect("rtsp://192.0.2.1/cam").unwrap_err();
        assert!(matches!(err, PipelineError::Connection { attempts: 3, .. }));
        assert_eq!(opens.load(Ordering::SeqCst), 3);
        assert_eq!(controller.state(), PipelineState::Idle);
        assert!(controller.status().source.is_none());

        controller.disconnect();
        controller.disconnect();
        assert_eq!(controller.state(), PipelineState::Idle);
    }

    #[test]
    fn empty_source_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let controller =
            StreamController::new(settings(dir.path()), shared(StubBackend::new()), BusinessType::Supermarket).unwrap();
        assert!(controller.connect("  ").is_err());
        assert_eq!(controller.state(), PipelineState::Idle);
    }

    #[test]
    fn running_stream_feeds_analytics_and_events() {
        let dir = tempfile::tempdir().unwrap();
        let detector = shared(ScriptedBackend::repeating(vec![person()]));
        let controller =
            StreamController::new(settings(dir.path()), detector, BusinessType::Supermarket).unwrap();

        controller.connect("stub://lobby").unwrap();
        assert!(controller.is_running());
        assert!(wait_until(|| controller.status().detections >= 3));
        assert!(controller.metrics().count("person_count") >= 1);

        let status = controller.status();
        assert_eq!(status.source.as_deref(), Some("stub://lobby"));
        assert!(status.frames_read >= status.frames_processed);

        controller.disconnect();
        assert_eq!(controller.state(), PipelineState::Idle);
        assert!(controller.status().source.is_none());

        let kinds: Vec<String> = controller
            .recent_events(10_000)
            .into_iter()
            .map(|e| e.event_type)
            .collect();
        assert!(kinds.iter().any(|k| k == "stream_connected"));
        assert!(kinds.iter().any(|k| k == "stream_disconnected"));
        assert!(kinds.iter().any(|k| k == "detection"));
    }

    #[test]
    fn classes_outside_the_profile_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let detector = shared(ScriptedBackend::repeating(vec![RawDetection::new("car", 0.95, [0, 0, 50, 50])]));
        let controller =
            StreamController::new(settings(dir.path()), detector, BusinessType::Supermarket).unwrap();
        controller.connect("stub://lot").unwrap();
        assert!(wait_until(|| controller.status().frames_processed >= 5));
        assert_eq!(controller.status().detections, 0);
        assert!(controller.metrics().counts.values().all(|c| *c == 0));
        controller.disconnect();
    }

    #[test]
    fn detector_failures_do_not_stop_the_stream() {
        let dir = tempfile::tempdir().unwrap();
        let detector = shared(
            ScriptedBackend::new()
                .then_fail("model crashed")
                .then_fail("model crashed again")
                .then(vec![person()]),
        );
        let controller =
            StreamController::new(settings(dir.path()), detector, BusinessType::Supermarket).unwrap();
        controller.connect("stub://lobby").unwrap();
        assert!(wait_until(|| controller.status().detections == 1));
        assert!(controller.is_running());
        controller.disconnect();
    }

    #[test]
    fn transient_read_errors_are_retried() {
        let dir = tempfile::tempdir().unwrap();
        let controller =
            StreamController::new(settings(dir.path()), shared(StubBackend::new()), BusinessType::Supermarket).unwrap();
        controller.connect("stub://flaky?fail_every=3").unwrap();
        assert!(wait_until(|| {
            let s = controller.status();
            s.read_errors >= 2 && s.frames_processed >= 4
        }));
        assert!(controller.is_running());
        controller.disconnect();
    }

    #[test]
    fn end_of_input_keeps_state_until_disconnect() {
        let dir = tempfile::tempdir().unwrap();
        let controller =
            StreamController::new(settings(dir.path()), shared(StubBackend::new()), BusinessType::Supermarket).unwrap();
        controller.connect("stub://clip?frames=4").unwrap();
        assert!(wait_until(|| controller.status().frames_processed == 4));
        assert_eq!(controller.status().frames_read, 4);
        assert!(controller.is_running());
        controller.disconnect();
        assert_eq!(controller.state(), PipelineState::Idle);
    }

    #[test]
    fn failed_reconnect_keeps_running_stream() {
        let dir = tempfile::tempdir().unwrap();
        let controller =
            StreamController::new(settings(dir.path()), shared(StubBackend::new()), BusinessType::Supermarket).unwrap();
        controller.connect("stub://lobby").unwrap();
        assert!(controller.connect("stub://broken?frames=0").is_err());
        assert!(controller.is_running());
        assert_eq!(controller.status().source.as_deref(), Some("stub://lobby"));

        controller.connect("stub://exit").unwrap();
        assert_eq!(controller.status().source.as_deref(), Some("stub://exit"));
        controller.disconnect();
    }

    #[test]
    fn business_type_switch() {
        let dir = tempfile::tempdir().unwrap();
        let detector = shared(ScriptedBackend::repeating(vec![person()]));
        let controller =
            StreamController::new(settings(dir.path()), detector, BusinessType::Supermarket).unwrap();

        let err = controller.set_business_type("bakery").unwrap_err();
        assert!(matches!(err, PipelineError::InvalidBusinessType(_)));
        assert_eq!(controller.business_type(), BusinessType::Supermarket);

        controller.connect("stub://lobby").unwrap();
        assert!(wait_until(|| controller.metrics().count("person_count") > 0));
        controller.disconnect();

        assert_eq!(controller.set_business_type("Pharmacy").unwrap(), BusinessType::Pharmacy);
        assert_eq!(controller.business_type(), BusinessType::Pharmacy);
        assert_eq!(controller.metrics().count("person_count"), 0);
        assert!(controller.metrics().counts.contains_key("prescription_count"));
        assert_eq!(controller.event_log_path(), dir.path().join("events_pharmacy.log"));

        let events = controller.recent_events(5);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, "business_type_changed");
        assert_eq!(events[0].data["from"], "supermarket");
        assert_eq!(events[0].business_type.as_deref(), Some("pharmacy"));
    }

    #[test]
    fn concurrent_business_switches_keep_detections_in_their_own_log() {
        let dir = tempfile::tempdir().unwrap();
        let cart = RawDetection::new("shopping cart", 0.9, [10, 10, 60, 60]);
        let detector = shared(ScriptedBackend::repeating(vec![cart]));
        let controller = Arc::new(
            StreamController::new(settings(dir.path()), detector, BusinessType::Supermarket).unwrap(),
        );
        controller.connect("stub://aisle").unwrap();
        assert!(wait_until(|| controller.status().detections > 0));

        let switchers: Vec<_> = [["pharmacy", "supermarket"], ["supermarket", "pharmacy"]]
            .into_iter()
            .map(|order| {
                let controller = controller.clone();
                thread::spawn(move || {
                    for _ in 0..25 {
                        for name in order {
                            controller.set_business_type(name).unwrap();
                            thread::sleep(Duration::from_millis(1));
                        }
                    }
                })
            })
            .collect();
        for switcher in switchers {
            switcher.join().unwrap();
        }
        controller.disconnect();

        let current = controller.business_type();
        assert_eq!(
            controller.event_log_path(),
            dir.path().join(format!("events_{}.log", current.as_str()))
        );

        // Pharmacy does not admit carts, so none may have leaked into its log.
        let pharmacy = EventLog::for_business_type(dir.path(), BusinessType::Pharmacy).unwrap();
        assert!(pharmacy.events().any(|e| e.event_type == "business_type_changed"));
        assert!(pharmacy
            .events()
            .filter(|e| e.event_type == "detection")
            .all(|e| e.data["class_name"] != "shopping cart"));
    }

    #[test]
    fn idle_output_is_the_placeholder() {
        let dir = tempfile::tempdir().unwrap();
        let controller =
            StreamController::new(settings(dir.path()), shared(StubBackend::new()), BusinessType::Supermarket).unwrap();
        let segment = controller.stream_frames().next().unwrap();
        let header = b"--frame\r\nContent-Type: image/jpeg\r\n\r\n";
        assert!(segment.starts_with(header));
        assert!(segment.ends_with(b"\r\n"));
        let jpeg = &segment[header.len()..segment.len() - 2];
        let decoded = image::load_from_memory(jpeg).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (640, 480));
    }

    #[test]
    fn running_output_streams_source_frames() {
        let dir = tempfile::tempdir().unwrap();
        let dir_images = tempfile::tempdir().unwrap();
        image::RgbImage::from_pixel(64, 48, image::Rgb([200, 40, 40]))
            .save(dir_images.path().join("f0.png"))
            .unwrap();
        let controller =
            StreamController::new(settings(dir.path()), shared(StubBackend::new()), BusinessType::Supermarket).unwrap();
        controller.connect(dir_images.path().to_str().unwrap()).unwrap();
        assert!(wait_until(|| controller.status().frames_processed >= 1));

        let segment = controller.stream_frames().next().unwrap();
        let header_len = b"--frame\r\nContent-Type: image/jpeg\r\n\r\n".len();
        let decoded = image::load_from_memory(&segment[header_len..segment.len() - 2]).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (64, 48));
        controller.disconnect();
    }
}
