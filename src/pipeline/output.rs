use std::sync::Arc;
use std::thread;
use std::time::Duration;

use super::Shared;
use crate::encode::{multipart_segment, placeholder_frame, FrameEncoder, JpegEncoder};

/// Endless sequence of multipart JPEG segments for the output stream.
///
/// Each item is the newest frame of the running stream, or the placeholder frame
/// while nothing is connected. Successive items are spaced by the frame
/// interval. The sequence never ends; drop it to stop.
pub struct FrameStream {
    shared: Arc<Shared>,
    encoder: JpegEncoder,
    interval: Duration,
    placeholder: Vec<u8>,
    started: bool,
}

impl FrameStream {
    pub(super) fn new(shared: Arc<Shared>) -> Self {
        let encoder = JpegEncoder::new(shared.settings.jpeg_quality);
        let interval = shared.settings.frame_interval;
        let placeholder = encoder.encode(&placeholder_frame()).unwrap_or_else(|e| {
            log::error!("FrameStream: placeholder encoding failed: {}", e);
            Vec::new()
        });
        Self {
            shared,
            encoder,
            interval,
            placeholder,
            started: false,
        }
    }

    fn next_jpeg(&self) -> Vec<u8> {
        let Some(frame) = self.shared.current_frame() else {
            return self.placeholder.clone();
        };
        match self.encoder.encode(&frame) {
            Ok(jpeg) => jpeg,
            Err(e) => {
                log::warn!("FrameStream: {}; sending placeholder", e);
                self.placeholder.clone()
            }
        }
    }
}

impl Iterator for FrameStream {
    type Item = Vec<u8>;

    fn next(&mut self) -> Option<Vec<u8>> {
        if self.started {
            thread::sleep(self.interval);
        }
        self.started = true;
        Some(multipart_segment(&self.next_jpeg()))
    }
}
