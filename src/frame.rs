//! Frames and the handoff structures between pipeline stages.
//!
//! - `Frame`: RGB8 pixel buffer with geometry and sequence number.
//! - `FrameQueue`: bounded queue between acquisition and the worker. Drops oldest on overflow.
//! - `LatestFrame`: single-value slot holding the newest frame for the output stream.
//!
//! A frame is owned by exactly one stage at a time. Handoff happens by moving it
//! through the queue; the latest slot shares it read-only behind an `Arc`.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

/// Default bounded queue capacity between acquisition and processing.
pub const DEFAULT_QUEUE_CAPACITY: usize = 10;

/// Bytes per pixel (RGB8).
pub const CHANNELS: usize = 3;

// ----------------------------------------------------------------------------
// Frame
// ----------------------------------------------------------------------------

#[derive(Clone)]
pub struct Frame {
    data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// Monotonic sequence number assigned by the source.
    pub sequence: u64,
}

impl Frame {
    pub fn new(data: Vec<u8>, width: u32, height: u32, sequence: u64) -> Self {
        Self {
            data,
            width,
            height,
            sequence,
        }
    }

    /// Solid-color frame. Used for placeholders and synthetic sources.
    pub fn filled(width: u32, height: u32, rgb: [u8; 3], sequence: u64) -> Self {
        let pixel_count = width as usize * height as usize;
        let mut data = Vec::with_capacity(pixel_count * CHANNELS);
        for _ in 0..pixel_count {
            data.extend_from_slice(&rgb);
        }
        Self::new(data, width, height, sequence)
    }

    pub fn pixels(&self) -> &[u8] {
        &self.data
    }

    /// Non-empty geometry with a buffer that matches it.
    pub fn is_valid(&self) -> bool {
        if self.width == 0 || self.height == 0 {
            return false;
        }
        let expected = (self.width as usize)
            .checked_mul(self.height as usize)
            .and_then(|v| v.checked_mul(CHANNELS));
        expected == Some(self.data.len())
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("sequence", &self.sequence)
            .field("bytes", &self.data.len())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// FrameQueue: bounded, drop-oldest
// ----------------------------------------------------------------------------

/// Bounded FIFO of frames shared between the acquisition and worker threads.
///
/// `push` never blocks: when the queue is full the oldest frame is evicted so the
/// newest always gets in. `pop` never blocks either; callers poll.
pub struct FrameQueue {
    inner: Mutex<QueueInner>,
    capacity: usize,
}

struct QueueInner {
    frames: VecDeque<Frame>,
    dropped: u64,
}

impl FrameQueue {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Mutex::new(QueueInner {
                frames: VecDeque::with_capacity(capacity),
                dropped: 0,
            }),
            capacity,
        }
    }

    /// Push a frame, returning the evicted frame when the queue was full.
    pub fn push(&self, frame: Frame) -> Option<Frame> {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let evicted = if inner.frames.len() >= self.capacity {
            inner.dropped += 1;
            inner.frames.pop_front()
        } else {
            None
        };
        inner.frames.push_back(frame);
        evicted
    }

    /// Oldest queued frame.
    pub fn pop(&self) -> Option<Frame> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .frames
            .pop_front()
    }

    /// Remove everything, newest first.
    pub fn drain_newest_first(&self) -> Vec<Frame> {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.frames.drain(..).rev().collect()
    }

    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .frames
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Frames evicted by overflow since creation.
    pub fn dropped(&self) -> u64 {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .dropped
    }
}

impl Default for FrameQueue {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY)
    }
}

// ----------------------------------------------------------------------------
// LatestFrame: single most-recent-value slot
// ----------------------------------------------------------------------------

/// Newest-value slot. One writer replaces, any number of readers clone the `Arc`.
#[derive(Default)]
pub struct LatestFrame {
    slot: Mutex<Option<Arc<Frame>>>,
}

impl LatestFrame {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, frame: Frame) {
        *self.slot.lock().unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(frame));
    }

    pub fn get(&self) -> Option<Arc<Frame>> {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn clear(&self) {
        *self.slot.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }
}
