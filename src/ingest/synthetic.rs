use anyhow::{anyhow, bail, Result};

use super::FrameSource;
use crate::frame::{Frame, CHANNELS};

const WIDTH: u32 = 640;
const HEIGHT: u32 = 480;

/// Synthetic frames for `stub://name[?frames=N&fail_every=M]`.
///
/// `frames` bounds the sequence (end of input afterwards), `fail_every` makes
/// every M-th read a transient failure. Frames are 640x480 with a pattern that
/// drifts with the sequence number.
pub struct SyntheticSource {
    location: String,
    frame_count: u64,
    reads: u64,
    limit: Option<u64>,
    fail_every: Option<u64>,
    closed: bool,
}

impl SyntheticSource {
    pub fn new(location: &str) -> Result<Self> {
        let rest = location
            .strip_prefix("stub://")
            .ok_or_else(|| anyhow!("not a stub:// location: {}", location))?;
        let mut limit = None;
        let mut fail_every = None;
        if let Some((_, query)) = rest.split_once('?') {
            for pair in query.split('&').filter(|p| !p.is_empty()) {
                let (key, value) = pair
                    .split_once('=')
                    .ok_or_else(|| anyhow!("malformed stub parameter '{}'", pair))?;
                let value: u64 = value
                    .parse()
                    .map_err(|_| anyhow!("stub parameter '{}' needs an integer", key))?;
                match key {
                    "frames" => limit = Some(value),
                    "fail_every" if value > 0 => fail_every = Some(value),
                    "fail_every" => {}
                    other => bail!("unknown stub parameter '{}'", other),
                }
            }
        }
        Ok(Self {
            location: location.to_string(),
            frame_count: 0,
            reads: 0,
            limit,
            fail_every,
            closed: false,
        })
    }

    fn pixels(&self) -> Vec<u8> {
        let len = WIDTH as usize * HEIGHT as usize * CHANNELS;
        let shift = self.frame_count as usize;
        (0..len).map(|i| ((i / CHANNELS + shift) % 256) as u8).collect()
    }
}

impl FrameSource for SyntheticSource {
    fn next_frame(&mut self) -> Result<Option<Frame>> {
        if self.closed || self.limit.is_some_and(|limit| self.frame_count >= limit) {
            return Ok(None);
        }
        self.reads += 1;
        if let Some(every) = self.fail_every {
            if self.reads % every == 0 {
                bail!("synthetic read failure on read {}", self.reads);
            }
        }
        self.frame_count += 1;
        Ok(Some(Frame::new(self.pixels(), WIDTH, HEIGHT, self.frame_count)))
    }

    fn close(&mut self) {
        self.closed = true;
    }

    fn describe(&self) -> &str {
        &self.location
    }

    fn frames_captured(&self) -> u64 {
        self.frame_count
    }
}
