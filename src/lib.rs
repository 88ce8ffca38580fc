//! Occupancy kernel
//!
//! Real-time occupancy analytics for a single camera stream.
//!
//! # Architecture
//!
//! ```text
//! FrameSource -> FrameQueue -> worker -> DetectorBackend
//!                                  |-> BusinessAnalytics (tracker + metrics)
//!                                  |-> EventLog
//!                                  '-> LatestFrame -> FrameStream (multipart JPEG)
//! ```
//!
//! # Module Structure
//!
//! - `frame`: Frame buffers, the bounded frame queue, the latest-frame slot
//! - `ingest`: Frame sources (network streams, local files, synthetic `stub://`)
//! - `detect`: Detector adapter trait, detection types, backend registry
//! - `tracker`: IoU object tracker
//! - `profile`: Business-type configuration table
//! - `analytics`: Rolling-window business metrics and insights
//! - `events`: Persistent event log with queries, stats and export
//! - `pipeline`: Stream controller, skip policy, output stream
//! - `encode`: JPEG encoding and multipart framing
//! - `config`: File and environment configuration

use std::time::{SystemTime, UNIX_EPOCH};

pub mod analytics;
pub mod config;
pub mod detect;
pub mod encode;
pub mod error;
pub mod events;
pub mod frame;
pub mod geometry;
pub mod ingest;
pub mod pipeline;
pub mod profile;
pub mod tracker;

pub use analytics::{BusinessAnalytics, BusinessMetrics, Insights, Trend, TrendDirection};
pub use detect::{BackendRegistry, Detection, DetectorBackend, RawDetection, SharedDetector};
pub use error::{PipelineError, PipelineResult};
pub use events::{Event, EventLog, EventQuery, EventStats, ExportFormat};
pub use frame::{Frame, FrameQueue, LatestFrame};
pub use geometry::{BBox, Zone};
pub use ingest::{FileSource, FrameSource, SourceFactory, StreamSource};
pub use pipeline::{PipelineSettings, PipelineState, PipelineStatus, StreamController};
pub use profile::{BusinessProfile, BusinessType};
pub use tracker::{ObjectId, ObjectTracker};

/// Wall-clock seconds since the Unix epoch.
pub fn now_s() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}
