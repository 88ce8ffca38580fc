//! Output frame encoding: JPEG stills wrapped as multipart MJPEG segments.

use image::codecs::jpeg::JpegEncoder as ImageJpegEncoder;
use image::{ExtendedColorType, ImageEncoder};

use crate::error::{PipelineError, PipelineResult};
use crate::frame::Frame;

pub const DEFAULT_JPEG_QUALITY: u8 = 85;

/// Multipart boundary token used between segments.
pub const BOUNDARY: &str = "frame";

/// Content type a server would advertise for the segment stream.
pub const MULTIPART_CONTENT_TYPE: &str = "multipart/x-mixed-replace; boundary=frame";

pub const PLACEHOLDER_WIDTH: u32 = 640;
pub const PLACEHOLDER_HEIGHT: u32 = 480;
const PLACEHOLDER_RGB: [u8; 3] = [32, 32, 32];

pub trait FrameEncoder: Send + Sync {
    fn encode(&self, frame: &Frame) -> PipelineResult<Vec<u8>>;
}

#[derive(Clone, Copy, Debug)]
pub struct JpegEncoder {
    quality: u8,
}

impl JpegEncoder {
    /// Quality is clamped to 1..=100.
    pub fn new(quality: u8) -> Self {
        Self {
            quality: quality.clamp(1, 100),
        }
    }

    pub fn quality(&self) -> u8 {
        self.quality
    }
}

impl Default for JpegEncoder {
    fn default() -> Self {
        Self::new(DEFAULT_JPEG_QUALITY)
    }
}

impl FrameEncoder for JpegEncoder {
    fn encode(&self, frame: &Frame) -> PipelineResult<Vec<u8>> {
        if !frame.is_valid() {
            return Err(PipelineError::Encode(format!(
                "invalid frame {}x{} ({} bytes)",
                frame.width,
                frame.height,
                frame.pixels().len()
            )));
        }
        let mut buf = Vec::new();
        ImageJpegEncoder::new_with_quality(&mut buf, self.quality)
            .write_image(
                frame.pixels(),
                frame.width,
                frame.height,
                ExtendedColorType::Rgb8,
            )
            .map_err(|e| PipelineError::Encode(e.to_string()))?;
        Ok(buf)
    }
}

/// Dark frame shown while nothing has been captured yet.
pub fn placeholder_frame() -> Frame {
    Frame::filled(PLACEHOLDER_WIDTH, PLACEHOLDER_HEIGHT, PLACEHOLDER_RGB, 0)
}

/// Wrap one JPEG as a multipart segment:
/// `--frame\r\nContent-Type: image/jpeg\r\n\r\n<jpeg>\r\n`.
pub fn multipart_segment(jpeg: &[u8]) -> Vec<u8> {
    let header = format!("--{}\r\nContent-Type: image/jpeg\r\n\r\n", BOUNDARY);
    let mut out = Vec::with_capacity(header.len() + jpeg.len() + 2);
    out.extend_from_slice(header.as_bytes());
    out.extend_from_slice(jpeg);
    out.extend_from_slice(b"\r\n");
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jpeg_has_soi_and_eoi_markers() {
        let jpeg = JpegEncoder::default().encode(&Frame::filled(32, 16, [200, 10, 10], 1)).unwrap();
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
        assert_eq!(&jpeg[jpeg.len() - 2..], &[0xFF, 0xD9]);
    }

    #[test]
    fn encoded_jpeg_decodes_to_same_geometry() {
        let jpeg = JpegEncoder::new(70).encode(&Frame::filled(40, 30, [0, 128, 255], 0)).unwrap();
        let decoded = image::load_from_memory(&jpeg).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (40, 30));
    }

    #[test]
    fn invalid_frame_is_an_encode_error() {
        let err = JpegEncoder::default()
            .encode(&Frame::new(vec![1, 2, 3], 4, 4, 0))
            .unwrap_err();
        assert!(matches!(err, PipelineError::Encode(_)));
    }

    #[test]
    fn quality_is_clamped() {
        assert_eq!(JpegEncoder::new(0).quality(), 1);
        assert_eq!(JpegEncoder::new(200).quality(), 100);
    }

    #[test]
    fn segment_framing() {
        let seg = multipart_segment(b"JPEG");
        assert_eq!(seg, b"--frame\r\nContent-Type: image/jpeg\r\n\r\nJPEG\r\n".to_vec());
    }

    #[test]
    fn placeholder_is_vga() {
        let f = placeholder_frame();
        assert!(f.is_valid());
        assert_eq!((f.width, f.height), (640, 480));
    }
}
