use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::ingest::ConnectPolicy;
use crate::pipeline::PipelineSettings;
use crate::profile::BusinessType;

const DEFAULT_DETECTOR: &str = "stub";

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct OccupancyConfigFile {
    source: Option<String>,
    business_type: Option<String>,
    events_dir: Option<PathBuf>,
    detector: Option<DetectorConfigFile>,
    pipeline: Option<PipelineConfigFile>,
    encoder: Option<EncoderConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct DetectorConfigFile {
    backend: Option<String>,
    min_confidence: Option<f32>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct PipelineConfigFile {
    frame_interval_ms: Option<u64>,
    detection_interval_ms: Option<u64>,
    queue_capacity: Option<usize>,
    max_skip_frames: Option<u32>,
    skip_threshold_ms: Option<u64>,
    connect_attempts: Option<u32>,
    connect_retry_delay_ms: Option<u64>,
    first_frame_timeout_ms: Option<u64>,
    read_retry_delay_ms: Option<u64>,
    join_timeout_ms: Option<u64>,
    idle_poll_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct EncoderConfigFile {
    jpeg_quality: Option<u8>,
}

/// Daemon configuration: defaults, then an optional file, then environment.
#[derive(Debug, Clone)]
pub struct OccupancyConfig {
    /// Stream URL or local path to connect at startup.
    pub source: Option<String>,
    pub business_type: BusinessType,
    /// Detector backend name, resolved through the backend registry.
    pub detector: String,
    /// Pipeline tuning, including the events directory, confidence floor and
    /// JPEG quality.
    pub pipeline: PipelineSettings,
}

impl OccupancyConfig {
    /// Load from the file named by `OCCUPANCY_CONFIG` (if any) plus environment overrides.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("OCCUPANCY_CONFIG").ok();
        let file_cfg = match config_path.as_deref().map(str::trim) {
            Some(path) if !path.is_empty() => Some(read_config_file(Path::new(path))?),
            _ => None,
        };
        Self::resolve(file_cfg.unwrap_or_default())
    }

    /// Load from an explicit file plus environment overrides.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        Self::resolve(read_config_file(path.as_ref())?)
    }

    fn resolve(file: OccupancyConfigFile) -> Result<Self> {
        let mut cfg = Self::from_file(file)?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: OccupancyConfigFile) -> Result<Self> {
        let business_type = match file.business_type.as_deref() {
            Some(name) => name.parse()?,
            None => BusinessType::default(),
        };

        let defaults = PipelineSettings::default();
        let detector = file.detector.unwrap_or_default();
        let pipeline = file.pipeline.unwrap_or_default();
        let encoder = file.encoder.unwrap_or_default();
        let ms = |value: Option<u64>, default: Duration| value.map(Duration::from_millis).unwrap_or(default);

        let settings = PipelineSettings {
            frame_interval: ms(pipeline.frame_interval_ms, defaults.frame_interval),
            detection_interval: ms(pipeline.detection_interval_ms, defaults.detection_interval),
            queue_capacity: pipeline.queue_capacity.unwrap_or(defaults.queue_capacity),
            max_skip_frames: pipeline.max_skip_frames.unwrap_or(defaults.max_skip_frames),
            skip_threshold: ms(pipeline.skip_threshold_ms, defaults.skip_threshold),
            connect: ConnectPolicy {
                attempts: pipeline
                    .connect_attempts
                    .unwrap_or(defaults.connect.attempts),
                retry_delay: ms(pipeline.connect_retry_delay_ms, defaults.connect.retry_delay),
                first_frame_timeout: ms(
                    pipeline.first_frame_timeout_ms,
                    defaults.connect.first_frame_timeout,
                ),
                poll_interval: defaults.connect.poll_interval,
            },
            read_retry_delay: ms(pipeline.read_retry_delay_ms, defaults.read_retry_delay),
            join_timeout: ms(pipeline.join_timeout_ms, defaults.join_timeout),
            idle_poll: ms(pipeline.idle_poll_ms, defaults.idle_poll),
            min_confidence: detector.min_confidence.unwrap_or(defaults.min_confidence),
            jpeg_quality: encoder.jpeg_quality.unwrap_or(defaults.jpeg_quality),
            events_dir: file.events_dir.unwrap_or(defaults.events_dir),
        };

        Ok(Self {
            source: file.source.filter(|s| !s.trim().is_empty()),
            business_type,
            detector: detector
                .backend
                .unwrap_or_else(|| DEFAULT_DETECTOR.to_string()),
            pipeline: settings,
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(source) = env_value("OCCUPANCY_SOURCE") {
            self.source = Some(source);
        }
        if let Some(name) = env_value("OCCUPANCY_BUSINESS_TYPE") {
            self.business_type = name
                .parse()
                .with_context(|| "OCCUPANCY_BUSINESS_TYPE is not a known business type")?;
        }
        if let Some(dir) = env_value("OCCUPANCY_EVENTS_DIR") {
            self.pipeline.events_dir = PathBuf::from(dir);
        }
        if let Some(detector) = env_value("OCCUPANCY_DETECTOR") {
            self.detector = detector;
        }
        if let Some(conf) = env_value("OCCUPANCY_MIN_CONFIDENCE") {
            self.pipeline.min_confidence = conf
                .parse()
                .map_err(|_| anyhow!("OCCUPANCY_MIN_CONFIDENCE must be a number"))?;
        }
        if let Some(quality) = env_value("OCCUPANCY_JPEG_QUALITY") {
            self.pipeline.jpeg_quality = quality
                .parse()
                .map_err(|_| anyhow!("OCCUPANCY_JPEG_QUALITY must be an integer between 1 and 100"))?;
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        let p = &self.pipeline;
        if !(0.0..=1.0).contains(&p.min_confidence) {
            return Err(anyhow!(
                "min_confidence must be within [0, 1] (got {})",
                p.min_confidence
            ));
        }
        if !(1..=100).contains(&p.jpeg_quality) {
            return Err(anyhow!(
                "jpeg_quality must be within 1..=100 (got {})",
                p.jpeg_quality
            ));
        }
        if p.queue_capacity == 0 {
            return Err(anyhow!("queue_capacity must be greater than zero"));
        }
        if p.connect.attempts == 0 {
            return Err(anyhow!("connect_attempts must be greater than zero"));
        }
        if p.frame_interval.is_zero() {
            return Err(anyhow!("frame_interval_ms must be greater than zero"));
        }
        if self.detector.trim().is_empty() {
            return Err(anyhow!("detector backend name must not be empty"));
        }
        Ok(())
    }
}

fn env_value(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn read_config_file(path: &Path) -> Result<OccupancyConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}
