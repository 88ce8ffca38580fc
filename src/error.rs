//! Error taxonomy for the stream pipeline.
//!
//! Only connection establishment and configuration errors reach the caller.
//! Everything else is logged by the stage that hit it and the loop carries on.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// Source stayed unreachable after every connection attempt.
    #[error("failed to connect to '{source_name}' after {attempts} attempt(s): {reason}")]
    Connection {
        source_name: String,
        attempts: u32,
        reason: String,
    },

    /// A single frame read failed. Never fatal.
    #[error("transient read error: {0}")]
    TransientRead(String),

    /// One detection (or one detector call) was unusable.
    #[error("detection error: {0}")]
    Detection(String),

    /// A persisted event-log line could not be parsed.
    #[error("malformed log entry at line {line}: {reason}")]
    MalformedLogEntry { line: usize, reason: String },

    /// Business type has no profile. The previous configuration stays active.
    #[error("unknown business type '{0}'")]
    InvalidBusinessType(String),

    #[error("frame encoding failed: {0}")]
    Encode(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type PipelineResult<T> = std::result::Result<T, PipelineError>;

impl PipelineError {
    /// True for errors the processing loops swallow and log.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            PipelineError::TransientRead(_)
                | PipelineError::Detection(_)
                | PipelineError::MalformedLogEntry { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_local_errors_are_recoverable() {
        assert!(PipelineError::TransientRead("eof".into()).is_recoverable());
        assert!(PipelineError::Detection("nan".into()).is_recoverable());
        assert!(PipelineError::MalformedLogEntry {
            line: 3,
            reason: "bad json".into()
        }
        .is_recoverable());
        assert!(!PipelineError::InvalidBusinessType("bakery".into()).is_recoverable());
        assert!(!PipelineError::Connection {
            source_name: "rtsp://cam".into(),
            attempts: 3,
            reason: "timeout".into()
        }
        .is_recoverable());
    }

    #[test]
    fn connection_error_names_source_and_attempts() {
        let err = PipelineError::Connection {
            source_name: "rtsp://cam".into(),
            attempts: 3,
            reason: "refused".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("rtsp://cam"));
        assert!(msg.contains("3 attempt"));
    }
}
