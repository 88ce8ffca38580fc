//! Frame sources.
//!
//! - `FileSource`: local image files, image-sequence directories, and video files
//!   (feature: ingest-ffmpeg)
//! - `StreamSource`: network streams such as RTSP (feature: ingest-ffmpeg)
//! - `stub://` URLs: synthetic frames, accepted by both
//!
//! `SourceFactory` decides which kind a source string names. `open_verified`
//! wraps it with the retry policy: a source only counts as connected once it
//! produced a valid first frame.

use anyhow::Result;
use std::path::Path;
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use crate::error::{PipelineError, PipelineResult};
use crate::frame::Frame;

#[cfg(feature = "ingest-ffmpeg")]
pub(crate) mod ffmpeg;
pub mod file;
pub mod stream;
mod synthetic;

pub use file::FileSource;
pub use stream::StreamSource;
pub use synthetic::SyntheticSource;

/// Producer of raw frames.
///
/// `next_frame` returns `Ok(None)` at end of input. An `Err` is a transient read
/// failure; callers back off and try again.
pub trait FrameSource: Send {
    fn next_frame(&mut self) -> Result<Option<Frame>>;

    /// Release the underlying handle. Further reads return end of input.
    fn close(&mut self) {}

    /// Source location as given by the caller.
    fn describe(&self) -> &str;

    fn frames_captured(&self) -> u64;
}

/// Opens a frame source from a location string.
pub trait SourceFactory: Send + Sync {
    fn open(&self, source: &str) -> Result<Box<dyn FrameSource>>;
}

/// Existing local paths open as files, everything else as network streams.
///
/// Network reads are bounded by `io_timeout` so a silent endpoint cannot block
/// a reader forever.
#[derive(Clone, Copy, Debug)]
pub struct DefaultSourceFactory {
    io_timeout: Duration,
}

impl DefaultSourceFactory {
    pub fn new(io_timeout: Duration) -> Self {
        Self { io_timeout }
    }

    pub fn io_timeout(&self) -> Duration {
        self.io_timeout
    }
}

impl Default for DefaultSourceFactory {
    fn default() -> Self {
        Self::new(ConnectPolicy::default().first_frame_timeout)
    }
}

impl SourceFactory for DefaultSourceFactory {
    fn open(&self, source: &str) -> Result<Box<dyn FrameSource>> {
        if is_local_file(source) {
            Ok(Box::new(FileSource::open(source)?))
        } else {
            Ok(Box::new(StreamSource::open_with_timeout(source, self.io_timeout)?))
        }
    }
}

pub fn is_local_file(source: &str) -> bool {
    let source = source.trim();
    !source.is_empty() && !source.contains("://") && Path::new(source).exists()
}

/// Retry policy for establishing a source.
#[derive(Clone, Debug)]
pub struct ConnectPolicy {
    pub attempts: u32,
    pub retry_delay: Duration,
    pub first_frame_timeout: Duration,
    pub poll_interval: Duration,
}

impl Default for ConnectPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            retry_delay: Duration::from_secs(2),
            first_frame_timeout: Duration::from_secs(5),
            poll_interval: Duration::from_millis(100),
        }
    }
}

/// Open `source` and wait for its first valid frame, retrying per `policy`.
///
/// Returns the open source together with that first frame.
pub fn open_verified(
    factory: &dyn SourceFactory,
    source: &str,
    policy: &ConnectPolicy,
) -> PipelineResult<(Box<dyn FrameSource>, Frame)> {
    let attempts = policy.attempts.max(1);
    let mut last_reason = String::from("no attempt made");

    for attempt in 1..=attempts {
        log::info!("ingest: connecting to {} (attempt {}/{})", source, attempt, attempts);
        match factory.open(source) {
            Ok(handle) => match first_frame_within(handle, policy) {
                Ok((handle, frame)) => {
                    log::info!(
                        "ingest: connected to {} ({}x{})",
                        source,
                        frame.width,
                        frame.height
                    );
                    return Ok((handle, frame));
                }
                Err(reason) => last_reason = reason,
            },
            Err(e) => last_reason = format!("{:#}", e),
        }
        log::warn!(
            "ingest: attempt {}/{} for {} failed: {}",
            attempt,
            attempts,
            source,
            last_reason
        );
        if attempt < attempts {
            thread::sleep(policy.retry_delay);
        }
    }

    log::error!("ingest: giving up on {} after {} attempts", source, attempts);
    Err(PipelineError::Connection {
        source_name: source.to_string(),
        attempts,
        reason: last_reason,
    })
}

/// Read the first frame on a helper thread, waiting at most `first_frame_timeout`.
///
/// A read that is still blocked at the deadline fails the attempt. The helper
/// keeps the source and closes it once that read returns.
fn first_frame_within(
    handle: Box<dyn FrameSource>,
    policy: &ConnectPolicy,
) -> std::result::Result<(Box<dyn FrameSource>, Frame), String> {
    let timeout = policy.first_frame_timeout;
    let poll_interval = policy.poll_interval;
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let mut handle = handle;
        let first = wait_first_frame(handle.as_mut(), timeout, poll_interval);
        if let Err(mpsc::SendError((mut late, _))) = tx.send((handle, first)) {
            late.close();
        }
    });

    match rx.recv_timeout(timeout) {
        Ok((handle, Ok(frame))) => Ok((handle, frame)),
        Ok((mut handle, Err(reason))) => {
            handle.close();
            Err(reason)
        }
        Err(mpsc::RecvTimeoutError::Timeout) => Err(format!("no frame within {:?}", timeout)),
        Err(mpsc::RecvTimeoutError::Disconnected) => Err("frame reader stopped unexpectedly".to_string()),
    }
}

fn wait_first_frame(
    source: &mut dyn FrameSource,
    timeout: Duration,
    poll_interval: Duration,
) -> std::result::Result<Frame, String> {
    let deadline = Instant::now() + timeout;
    loop {
        let last_error = match source.next_frame() {
            Ok(Some(frame)) if frame.is_valid() => return Ok(frame),
            Ok(Some(_)) => "empty or malformed frame".to_string(),
            Ok(None) => return Err("source ended before the first frame".to_string()),
            Err(e) => format!("{:#}", e),
        };
        if Instant::now() >= deadline {
            return Err(last_error);
        }
        thread::sleep(poll_interval);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast_policy() -> ConnectPolicy {
        ConnectPolicy {
            attempts: 3,
            retry_delay: Duration::from_millis(5),
            first_frame_timeout: Duration::from_millis(50),
            poll_interval: Duration::from_millis(5),
        }
    }

    struct Unreachable {
        opens: Arc<AtomicU32>,
    }

    impl SourceFactory for Unreachable {
        fn open(&self, source: &str) -> Result<Box<dyn FrameSource>> {
            self.opens.fetch_add(1, Ordering::SeqCst);
            Err(anyhow!("connection refused: {}", source))
        }
    }

    #[test]
    fn unreachable_source_exhausts_retries() {
        let opens = Arc::new(AtomicU32::new(0));
        let factory = Unreachable { opens: opens.clone() };
        let err = open_verified(&factory, "rtsp://10.0.0.1/cam", &fast_policy())
            .err()
            .unwrap();
        assert_eq!(opens.load(Ordering::SeqCst), 3);
        match err {
            PipelineError::Connection { source_name, attempts, reason } => {
                assert_eq!(source_name, "rtsp://10.0.0.1/cam");
                assert_eq!(attempts, 3);
                assert!(reason.contains("refused"));
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn stub_stream_connects_with_first_frame() {
        let (mut source, frame) =
            open_verified(&DefaultSourceFactory::default(), "stub://lobby", &fast_policy()).unwrap();
        assert!(frame.is_valid());
        assert_eq!(source.describe(), "stub://lobby");
        assert!(source.next_frame().unwrap().is_some());
    }

    #[test]
    fn source_without_frames_fails_to_connect() {
        let err = open_verified(&DefaultSourceFactory::default(), "stub://empty?frames=0", &fast_policy())
            .err()
            .unwrap();
        assert!(err.to_string().contains("ended before the first frame"));
    }

    #[test]
    fn only_persistent_read_failures_block_the_connect() {
        let (_, frame) =
            open_verified(&DefaultSourceFactory::default(), "stub://flaky?fail_every=2", &fast_policy()).unwrap();
        assert_eq!(frame.sequence, 1);
        assert!(open_verified(&DefaultSourceFactory::default(), "stub://dead?fail_every=1", &fast_policy()).is_err());
    }

    struct Silent;

    impl FrameSource for Silent {
        fn next_frame(&mut self) -> Result<Option<Frame>> {
            thread::sleep(Duration::from_secs(2));
            Ok(Some(Frame::filled(8, 8, [1, 2, 3], 1)))
        }

        fn describe(&self) -> &str {
            "silent"
        }

        fn frames_captured(&self) -> u64 {
            0
        }
    }

    struct SilentFactory;

    impl SourceFactory for SilentFactory {
        fn open(&self, _source: &str) -> Result<Box<dyn FrameSource>> {
            Ok(Box::new(Silent))
        }
    }

    #[test]
    fn blocked_first_read_times_out() {
        let policy = ConnectPolicy {
            attempts: 2,
            retry_delay: Duration::from_millis(5),
            first_frame_timeout: Duration::from_millis(100),
            poll_interval: Duration::from_millis(5),
        };
        let started = Instant::now();
        let err = open_verified(&SilentFactory, "rtsp://10.0.0.9/quiet", &policy)
            .err()
            .unwrap();
        assert!(started.elapsed() < Duration::from_secs(1));
        match err {
            PipelineError::Connection { attempts, reason, .. } => {
                assert_eq!(attempts, 2);
                assert!(reason.contains("no frame within"));
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn default_factory_uses_first_frame_timeout_for_io() {
        assert_eq!(
            DefaultSourceFactory::default().io_timeout(),
            ConnectPolicy::default().first_frame_timeout
        );
    }

    #[test]
    fn classifies_local_paths() {
        let dir = tempfile::tempdir().unwrap();
        assert!(is_local_file(dir.path().to_str().unwrap()));
        assert!(!is_local_file("rtsp://cam/stream"));
        assert!(!is_local_file("stub://cam"));
        assert!(!is_local_file("/definitely/not/here.mp4"));
        assert!(!is_local_file("  "));
    }
}
