//! Event log: append-only JSON-lines file mirrored by a bounded in-memory buffer.
//!
//! Each business type writes its own file (`events_{type}.log`). On open the file
//! is replayed into the buffer; unparseable lines are skipped with a warning.
//! Lines in the legacy `datetime,class,confidence` format load as `detection`
//! events.

use anyhow::{anyhow, Context, Result};
use chrono::{Local, NaiveDateTime, TimeZone};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::{BTreeMap, VecDeque};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::{PipelineError, PipelineResult};
use crate::profile::BusinessType;

/// In-memory events retained (oldest evicted first).
pub const BUFFER_CAPACITY: usize = 1000;

pub const DEFAULT_STATS_WINDOW_S: f64 = 3600.0;

pub const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub const EVENT_DETECTION: &str = "detection";
pub const EVENT_STREAM_CONNECTED: &str = "stream_connected";
pub const EVENT_STREAM_DISCONNECTED: &str = "stream_disconnected";
pub const EVENT_BUSINESS_TYPE_CHANGED: &str = "business_type_changed";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Epoch seconds.
    pub timestamp: f64,
    #[serde(default)]
    pub datetime: String,
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub business_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
}

impl Event {
    /// Top-level confidence, else `data.confidence`.
    pub fn effective_confidence(&self) -> Option<f64> {
        self.confidence
            .or_else(|| self.data.get("confidence").and_then(Value::as_f64))
    }
}

/// Filters for `EventLog::query`. Unset fields match everything.
#[derive(Clone, Debug, Default)]
pub struct EventQuery {
    pub limit: Option<usize>,
    pub event_type: Option<String>,
    pub start: Option<f64>,
    pub end: Option<f64>,
}

impl EventQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn event_type(mut self, event_type: impl Into<String>) -> Self {
        self.event_type = Some(event_type.into());
        self
    }

    pub fn start(mut self, start: f64) -> Self {
        self.start = Some(start);
        self
    }

    pub fn end(mut self, end: f64) -> Self {
        self.end = Some(end);
        self
    }

    fn matches(&self, event: &Event) -> bool {
        if let Some(t) = &self.event_type {
            if &event.event_type != t {
                return false;
            }
        }
        if let Some(start) = self.start {
            if event.timestamp < start {
                return false;
            }
        }
        if let Some(end) = self.end {
            if event.timestamp > end {
                return false;
            }
        }
        true
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct EventStats {
    pub total_events: usize,
    pub events_per_type: BTreeMap<String, usize>,
    pub average_confidence: f64,
    pub time_window: f64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExportFormat {
    Json,
    Csv,
}

impl FromStr for ExportFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(ExportFormat::Json),
            "csv" => Ok(ExportFormat::Csv),
            other => Err(anyhow!("unsupported export format '{}'", other)),
        }
    }
}

pub struct EventLog {
    path: PathBuf,
    business_type: Option<String>,
    buffer: VecDeque<Event>,
    skipped_lines: usize,
}

impl EventLog {
    /// Log for one business type under `dir`: `{dir}/events_{type}.log`.
    pub fn for_business_type(dir: impl AsRef<Path>, business_type: BusinessType) -> PipelineResult<Self> {
        let path = dir
            .as_ref()
            .join(format!("events_{}.log", business_type.as_str()));
        Self::open(path, Some(business_type.as_str()))
    }

    /// Open (creating if needed) a log file and replay it into the buffer.
    pub fn open(path: impl Into<PathBuf>, business_type: Option<&str>) -> PipelineResult<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        if !path.exists() {
            File::create(&path)?;
        }

        let mut log = Self {
            path,
            business_type: business_type.map(str::to_string),
            buffer: VecDeque::with_capacity(BUFFER_CAPACITY),
            skipped_lines: 0,
        };
        log.load()?;
        log::info!(
            "EventLog: opened {} ({} events, {} skipped)",
            log.path.display(),
            log.buffer.len(),
            log.skipped_lines
        );
        Ok(log)
    }

    fn load(&mut self) -> PipelineResult<()> {
        let reader = BufReader::new(File::open(&self.path)?);
        for (idx, line) in reader.lines().enumerate() {
            let line = match line {
                Ok(line) => line,
                Err(e) => {
                    log::warn!("EventLog: unreadable line {} in {}: {}", idx + 1, self.path.display(), e);
                    self.skipped_lines += 1;
                    continue;
                }
            };
            match parse_line(&line, idx + 1) {
                Ok(Some(event)) => self.push(event),
                Ok(None) => {}
                Err(e) => {
                    log::warn!("EventLog: skipping {}: {}", self.path.display(), e);
                    self.skipped_lines += 1;
                }
            }
        }
        Ok(())
    }

    fn push(&mut self, event: Event) {
        if self.buffer.len() >= BUFFER_CAPACITY {
            self.buffer.pop_front();
        }
        self.buffer.push_back(event);
    }

    /// Record an event stamped with the current time.
    pub fn log(&mut self, event_type: &str, data: Value, confidence: Option<f64>) -> PipelineResult<Event> {
        self.log_at(event_type, data, confidence, crate::now_s())
    }

    /// Record an event at `timestamp` (epoch seconds).
    ///
    /// The event enters the buffer even when the file append fails.
    pub fn log_at(
        &mut self,
        event_type: &str,
        data: Value,
        confidence: Option<f64>,
        timestamp: f64,
    ) -> PipelineResult<Event> {
        let event = Event {
            timestamp,
            datetime: format_datetime(timestamp),
            event_type: event_type.to_string(),
            data,
            business_type: self.business_type.clone(),
            confidence,
        };
        self.push(event.clone());

        let line = serde_json::to_string(&event).map_err(std::io::Error::from)?;
        let mut file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        writeln!(file, "{}", line)?;
        log::debug!("EventLog: recorded {} at {:.3}", event.event_type, event.timestamp);
        Ok(event)
    }

    /// Buffered events matching `query`, newest first.
    pub fn query(&self, query: &EventQuery) -> Vec<Event> {
        let mut events: Vec<Event> = self
            .buffer
            .iter()
            .filter(|e| query.matches(e))
            .cloned()
            .collect();
        events.sort_by(|a, b| b.timestamp.total_cmp(&a.timestamp));
        if let Some(limit) = query.limit {
            events.truncate(limit);
        }
        events
    }

    pub fn recent(&self, limit: usize) -> Vec<Event> {
        self.query(&EventQuery::new().limit(limit))
    }

    pub fn stats(&self, event_type: Option<&str>, window_s: f64) -> EventStats {
        self.stats_at(event_type, window_s, crate::now_s())
    }

    /// Counts and mean confidence over `[now - window_s, now]`.
    pub fn stats_at(&self, event_type: Option<&str>, window_s: f64, now: f64) -> EventStats {
        let mut query = EventQuery::new().start(now - window_s).end(now);
        if let Some(t) = event_type {
            query = query.event_type(t);
        }
        let events = self.query(&query);

        let mut events_per_type = BTreeMap::new();
        for e in &events {
            *events_per_type.entry(e.event_type.clone()).or_insert(0) += 1;
        }
        let confidences: Vec<f64> = events.iter().filter_map(Event::effective_confidence).collect();
        let average_confidence = if confidences.is_empty() {
            0.0
        } else {
            confidences.iter().sum::<f64>() / confidences.len() as f64
        };

        EventStats {
            total_events: events.len(),
            events_per_type,
            average_confidence,
            time_window: window_s,
        }
    }

    /// Write the whole buffer (oldest first) to `path`. Returns the event count.
    pub fn export(&self, path: impl AsRef<Path>, format: ExportFormat) -> Result<usize> {
        let path = path.as_ref();
        let file = File::create(path).with_context(|| format!("create {}", path.display()))?;
        let mut out = BufWriter::new(file);
        match format {
            ExportFormat::Json => {
                let events: Vec<&Event> = self.buffer.iter().collect();
                serde_json::to_writer_pretty(&mut out, &events).context("write json export")?;
            }
            ExportFormat::Csv => {
                writeln!(out, "timestamp,datetime,type,confidence,data")?;
                for event in &self.buffer {
                    let confidence = event
                        .effective_confidence()
                        .map(|c| c.to_string())
                        .unwrap_or_default();
                    let data = serde_json::to_string(&event.data).context("encode event data")?;
                    writeln!(
                        out,
                        "{},{},{},{},{}",
                        event.timestamp, event.datetime, event.event_type, confidence, data
                    )?;
                }
            }
        }
        out.flush()?;
        log::info!(
            "EventLog: exported {} events to {}",
            self.buffer.len(),
            path.display()
        );
        Ok(self.buffer.len())
    }

    /// Truncate the file and empty the buffer.
    pub fn clear(&mut self) -> PipelineResult<()> {
        File::create(&self.path)?;
        self.buffer.clear();
        log::info!("EventLog: cleared {}", self.path.display());
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn business_type(&self) -> Option<&str> {
        self.business_type.as_deref()
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Lines skipped as malformed during the last load.
    pub fn skipped_lines(&self) -> usize {
        self.skipped_lines
    }

    pub fn events(&self) -> impl Iterator<Item = &Event> {
        self.buffer.iter()
    }
}

fn format_datetime(timestamp: f64) -> String {
    let secs = timestamp.floor() as i64;
    let nanos = ((timestamp - timestamp.floor()) * 1e9) as u32;
    Local
        .timestamp_opt(secs, nanos.min(999_999_999))
        .earliest()
        .map(|dt| dt.format(DATETIME_FORMAT).to_string())
        .unwrap_or_default()
}

/// Parse one persisted line. Blank lines yield `Ok(None)`.
pub fn parse_line(line: &str, line_no: usize) -> PipelineResult<Option<Event>> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let json_err = match serde_json::from_str::<Event>(line) {
        Ok(event) => return Ok(Some(event)),
        Err(e) => e,
    };
    parse_legacy_line(line).map(Some).ok_or_else(|| PipelineError::MalformedLogEntry {
        line: line_no,
        reason: json_err.to_string(),
    })
}

fn parse_legacy_line(line: &str) -> Option<Event> {
    let parts: Vec<&str> = line.split(',').collect();
    if parts.len() < 3 {
        return None;
    }
    let naive = NaiveDateTime::parse_from_str(parts[0].trim(), DATETIME_FORMAT).ok()?;
    let timestamp = Local.from_local_datetime(&naive).earliest()?.timestamp() as f64;
    let confidence: f64 = parts[2].trim().parse().ok()?;
    Some(Event {
        timestamp,
        datetime: parts[0].trim().to_string(),
        event_type: EVENT_DETECTION.to_string(),
        data: json!({
            "class_name": parts[1].trim(),
            "confidence": confidence,
        }),
        business_type: None,
        confidence: None,
    })
}
