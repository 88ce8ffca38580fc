//! Local file frame source.
//!
//! Accepts:
//! - a directory of `.jpg`/`.jpeg`/`.png` images, read in file-name order
//! - a single image file (one frame)
//! - a video file, decoded with FFmpeg (feature: ingest-ffmpeg)
//! - `stub://` locations, for tests
//!
//! End of input is reported after the last frame; the file is never rewound.

use anyhow::{anyhow, Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

use super::synthetic::SyntheticSource;
use super::FrameSource;
#[cfg(feature = "ingest-ffmpeg")]
use super::ffmpeg::FfmpegSource;
use crate::frame::Frame;

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png"];

pub struct FileSource {
    location: String,
    backend: FileBackend,
}

enum FileBackend {
    Synthetic(SyntheticSource),
    Images(ImageSequence),
    #[cfg(feature = "ingest-ffmpeg")]
    Ffmpeg(FfmpegSource),
}

impl FileSource {
    pub fn open(location: &str) -> Result<Self> {
        let location = location.trim();
        if location.is_empty() {
            return Err(anyhow!("empty file path"));
        }
        let backend = if location.starts_with("stub://") {
            FileBackend::Synthetic(SyntheticSource::new(location)?)
        } else if location.contains("://") {
            return Err(anyhow!(
                "file ingestion only supports local paths (got '{}')",
                location
            ));
        } else {
            let path = Path::new(location);
            if path.is_dir() || is_image(path) {
                FileBackend::Images(ImageSequence::open(path)?)
            } else {
                open_video(location)?
            }
        };
        log::info!("FileSource: opened {}", location);
        Ok(Self {
            location: location.to_string(),
            backend,
        })
    }
}

#[cfg(feature = "ingest-ffmpeg")]
fn open_video(location: &str) -> Result<FileBackend> {
    Ok(FileBackend::Ffmpeg(FfmpegSource::open(location, None)?))
}

#[cfg(not(feature = "ingest-ffmpeg"))]
fn open_video(location: &str) -> Result<FileBackend> {
    if !Path::new(location).exists() {
        return Err(anyhow!("file not found: {}", location));
    }
    Err(anyhow!(
        "video file '{}' requires the ingest-ffmpeg feature",
        location
    ))
}

impl FrameSource for FileSource {
    fn next_frame(&mut self) -> Result<Option<Frame>> {
        match &mut self.backend {
            FileBackend::Synthetic(source) => source.next_frame(),
            FileBackend::Images(source) => source.next_frame(),
            #[cfg(feature = "ingest-ffmpeg")]
            FileBackend::Ffmpeg(source) => source.next_frame(),
        }
    }

    fn close(&mut self) {
        match &mut self.backend {
            FileBackend::Synthetic(source) => source.close(),
            FileBackend::Images(source) => source.close(),
            #[cfg(feature = "ingest-ffmpeg")]
            FileBackend::Ffmpeg(source) => source.close(),
        }
    }

    fn describe(&self) -> &str {
        &self.location
    }

    fn frames_captured(&self) -> u64 {
        match &self.backend {
            FileBackend::Synthetic(source) => source.frames_captured(),
            FileBackend::Images(source) => source.frames_captured,
            #[cfg(feature = "ingest-ffmpeg")]
            FileBackend::Ffmpeg(source) => source.frames_captured(),
        }
    }
}

// ----------------------------------------------------------------------------
// Image sequence
// ----------------------------------------------------------------------------

struct ImageSequence {
    files: Vec<PathBuf>,
    next: usize,
    frames_captured: u64,
}

impl ImageSequence {
    fn open(path: &Path) -> Result<Self> {
        let files = if path.is_dir() {
            let mut files = Vec::new();
            for entry in fs::read_dir(path).with_context(|| format!("read dir {}", path.display()))? {
                let entry_path = entry?.path();
                if entry_path.is_file() && is_image(&entry_path) {
                    files.push(entry_path);
                }
            }
            files.sort();
            files
        } else {
            vec![path.to_path_buf()]
        };
        if files.is_empty() {
            return Err(anyhow!("no images found in {}", path.display()));
        }
        Ok(Self {
            files,
            next: 0,
            frames_captured: 0,
        })
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        let Some(path) = self.files.get(self.next) else {
            return Ok(None);
        };
        // Advance first so an undecodable image is skipped on the next read.
        self.next += 1;
        let image = image::open(path).with_context(|| format!("decode {}", path.display()))?;
        let rgb = image.into_rgb8();
        let (width, height) = rgb.dimensions();
        self.frames_captured += 1;
        Ok(Some(Frame::new(rgb.into_raw(), width, height, self.frames_captured)))
    }

    fn close(&mut self) {
        self.next = self.files.len();
    }
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}
