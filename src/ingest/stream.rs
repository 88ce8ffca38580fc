//! Network stream frame source.
//!
//! Real streams (RTSP, HTTP, ...) decode through FFmpeg with TCP transport forced
//! and a bounded receive buffer (feature: ingest-ffmpeg). `stub://` URLs produce
//! synthetic frames.

use anyhow::{anyhow, Result};
use std::time::Duration;

use super::synthetic::SyntheticSource;
use super::FrameSource;
#[cfg(feature = "ingest-ffmpeg")]
use super::ffmpeg::FfmpegSource;
use crate::frame::Frame;

pub struct StreamSource {
    url: String,
    backend: StreamBackend,
}

enum StreamBackend {
    Synthetic(SyntheticSource),
    #[cfg(feature = "ingest-ffmpeg")]
    Ffmpeg(FfmpegSource),
}

/// Socket timeout used by `StreamSource::open`.
pub const DEFAULT_IO_TIMEOUT: Duration = Duration::from_secs(5);

impl StreamSource {
    pub fn open(url: &str) -> Result<Self> {
        Self::open_with_timeout(url, DEFAULT_IO_TIMEOUT)
    }

    /// Open `url` with network reads bounded by `io_timeout`.
    pub fn open_with_timeout(url: &str, io_timeout: Duration) -> Result<Self> {
        let url = url.trim();
        if url.is_empty() {
            return Err(anyhow!("empty stream url"));
        }
        let backend = if url.starts_with("stub://") {
            StreamBackend::Synthetic(SyntheticSource::new(url)?)
        } else {
            open_network(url, io_timeout)?
        };
        log::info!("StreamSource: opened {}", url);
        Ok(Self {
            url: url.to_string(),
            backend,
        })
    }
}

#[cfg(feature = "ingest-ffmpeg")]
fn open_network(url: &str, io_timeout: Duration) -> Result<StreamBackend> {
    Ok(StreamBackend::Ffmpeg(FfmpegSource::open(url, Some(io_timeout))?))
}

#[cfg(not(feature = "ingest-ffmpeg"))]
fn open_network(url: &str, _io_timeout: Duration) -> Result<StreamBackend> {
    Err(anyhow!(
        "stream '{}' requires the ingest-ffmpeg feature",
        url
    ))
}

impl FrameSource for StreamSource {
    fn next_frame(&mut self) -> Result<Option<Frame>> {
        match &mut self.backend {
            StreamBackend::Synthetic(source) => source.next_frame(),
            #[cfg(feature = "ingest-ffmpeg")]
            StreamBackend::Ffmpeg(source) => source.next_frame(),
        }
    }

    fn close(&mut self) {
        match &mut self.backend {
            StreamBackend::Synthetic(source) => source.close(),
            #[cfg(feature = "ingest-ffmpeg")]
            StreamBackend::Ffmpeg(source) => source.close(),
        }
        log::info!("StreamSource: closed {}", self.url);
    }

    fn describe(&self) -> &str {
        &self.url
    }

    fn frames_captured(&self) -> u64 {
        match &self.backend {
            StreamBackend::Synthetic(source) => source.frames_captured(),
            #[cfg(feature = "ingest-ffmpeg")]
            StreamBackend::Ffmpeg(source) => source.frames_captured(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stub_stream_produces_frames() {
        let mut source = StreamSource::open("stub://entrance").unwrap();
        let frame = source.next_frame().unwrap().unwrap();
        assert!(frame.is_valid());
        assert_eq!(source.frames_captured(), 1);
        source.close();
        assert!(source.next_frame().unwrap().is_none());
    }

    #[test]
    fn empty_url_is_rejected() {
        assert!(StreamSource::open("   ").is_err());
    }

    #[cfg(not(feature = "ingest-ffmpeg"))]
    #[test]
    fn network_url_needs_ffmpeg() {
        let err = StreamSource::open("rtsp://10.0.0.5/live").err().unwrap();
        assert!(err.to_string().contains("ingest-ffmpeg"));
    }
}
