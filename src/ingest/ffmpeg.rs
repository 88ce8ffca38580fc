//! FFmpeg-backed decoder for video files and network streams.

use anyhow::{anyhow, Context, Result};
use ffmpeg_next as ffmpeg;
use std::time::Duration;

use crate::frame::Frame;

/// Receive buffer for network inputs, in bytes.
const NETWORK_BUFFER_SIZE: &str = "1048576";

pub(crate) struct FfmpegSource {
    location: String,
    input: ffmpeg::format::context::Input,
    stream_index: usize,
    decoder: ffmpeg::codec::decoder::Video,
    scaler: ffmpeg::software::scaling::Context,
    frame_count: u64,
    eof_sent: bool,
    closed: bool,
}

impl FfmpegSource {
    /// Open `location`. Network inputs (`io_timeout` set) force TCP transport,
    /// a bounded buffer and socket timeouts.
    pub(crate) fn open(location: &str, io_timeout: Option<Duration>) -> Result<Self> {
        ffmpeg::init().context("initialize ffmpeg")?;
        let mut options = ffmpeg::Dictionary::new();
        if let Some(timeout) = io_timeout {
            // FFmpeg timeouts are in microseconds.
            let micros = timeout.as_micros().max(1).to_string();
            options.set("rtsp_transport", "tcp");
            options.set("buffer_size", NETWORK_BUFFER_SIZE);
            options.set("rw_timeout", &micros);
            options.set("timeout", &micros);
            if location.starts_with("rtsp://") || location.starts_with("rtsps://") {
                // Pre-5.0 builds only know the RTSP socket timeout as `stimeout`.
                options.set("stimeout", &micros);
            }
        }
        let input = ffmpeg::format::input_with_dictionary(&location, options)
            .with_context(|| format!("failed to open '{}' with ffmpeg", location))?;
        let input_stream = input
            .streams()
            .best(ffmpeg::media::Type::Video)
            .ok_or_else(|| anyhow!("'{}' has no video track", location))?;
        let stream_index = input_stream.index();
        let context = ffmpeg::codec::context::Context::from_parameters(input_stream.parameters())
            .context("load video decoder parameters")?;
        let decoder = context
            .decoder()
            .video()
            .context("open ffmpeg video decoder")?;

        let scaler = ffmpeg::software::scaling::context::Context::get(
            decoder.format(),
            decoder.width(),
            decoder.height(),
            ffmpeg::util::format::pixel::Pixel::RGB24,
            decoder.width(),
            decoder.height(),
            ffmpeg::software::scaling::flag::Flags::BILINEAR,
        )
        .context("create ffmpeg scaler")?;

        log::info!(
            "FfmpegSource: opened {} ({}x{})",
            location,
            decoder.width(),
            decoder.height()
        );
        Ok(Self {
            location: location.to_string(),
            input,
            stream_index,
            decoder,
            scaler,
            frame_count: 0,
            eof_sent: false,
            closed: false,
        })
    }

    pub(crate) fn next_frame(&mut self) -> Result<Option<Frame>> {
        if self.closed {
            return Ok(None);
        }
        let mut decoded = ffmpeg::frame::Video::empty();

        // Frames already buffered in the decoder go out before more input is read.
        if self.decoder.receive_frame(&mut decoded).is_ok() {
            return self.convert(&decoded).map(Some);
        }

        if !self.eof_sent {
            let mut received = false;
            for (stream, packet) in self.input.packets() {
                if stream.index() != self.stream_index {
                    continue;
                }
                self.decoder
                    .send_packet(&packet)
                    .context("send packet to ffmpeg decoder")?;
                if self.decoder.receive_frame(&mut decoded).is_ok() {
                    received = true;
                    break;
                }
            }
            if received {
                return self.convert(&decoded).map(Some);
            }
            self.decoder.send_eof().context("flush ffmpeg decoder")?;
            self.eof_sent = true;
            if self.decoder.receive_frame(&mut decoded).is_ok() {
                return self.convert(&decoded).map(Some);
            }
        }

        log::info!("FfmpegSource: end of input for {}", self.location);
        Ok(None)
    }

    fn convert(&mut self, decoded: &ffmpeg::frame::Video) -> Result<Frame> {
        let mut rgb_frame = ffmpeg::frame::Video::empty();
        self.scaler
            .run(decoded, &mut rgb_frame)
            .context("scale frame to RGB")?;
        let (pixels, width, height) = frame_to_pixels(&rgb_frame)?;
        self.frame_count += 1;
        Ok(Frame::new(pixels, width, height, self.frame_count))
    }

    pub(crate) fn close(&mut self) {
        self.closed = true;
    }

    pub(crate) fn frames_captured(&self) -> u64 {
        self.frame_count
    }
}

fn frame_to_pixels(frame: &ffmpeg::frame::Video) -> Result<(Vec<u8>, u32, u32)> {
    let width = frame.width();
    let height = frame.height();
    let row_bytes = (width as usize) * 3;
    let stride = frame.stride(0);
    let data = frame.data(0);

    if stride == row_bytes {
        let len = row_bytes * height as usize;
        let pixels = data
            .get(..len)
            .context("ffmpeg frame is shorter than its geometry")?;
        return Ok((pixels.to_vec(), width, height));
    }

    let mut pixels = Vec::with_capacity(row_bytes * height as usize);
    for row in 0..height as usize {
        let start = row * stride;
        let end = start + row_bytes;
        pixels.extend_from_slice(
            data.get(start..end)
                .context("ffmpeg frame row is out of bounds")?,
        );
    }

    Ok((pixels, width, height))
}
