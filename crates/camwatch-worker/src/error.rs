//! Worker error types.

use std::time::Duration;

use thiserror::Error;

use camwatch_queue::JobKind;

pub type WorkerResult<T> = Result<T, WorkerError>;

#[derive(Debug, Error)]
pub enum WorkerError {
    /// The capture process ran and exited non-zero.
    #[error("Capture failed: {0}")]
    CaptureFailed(String),

    #[error("Detection failed: {0}")]
    DetectionFailed(String),

    /// The segment or image a job needs is gone.
    #[error("Input missing: {0}")]
    InputMissing(String),

    #[error("Invalid job: {0}")]
    InvalidJob(String),

    #[error("Job timed out after {0:?}")]
    Timeout(Duration),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Database error: {0}")]
    Db(#[from] camwatch_db::DbError),

    #[error("Media error: {0}")]
    Media(#[from] camwatch_media::MediaError),

    #[error("ML service error: {0}")]
    Ml(#[from] camwatch_ml_client::MlError),

    #[error("Queue error: {0}")]
    Queue(#[from] camwatch_queue::QueueError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl WorkerError {
    pub fn capture_failed(msg: impl Into<String>) -> Self {
        Self::CaptureFailed(msg.into())
    }

    pub fn detection_failed(msg: impl Into<String>) -> Self {
        Self::DetectionFailed(msg.into())
    }

    pub fn input_missing(msg: impl Into<String>) -> Self {
        Self::InputMissing(msg.into())
    }

    pub fn invalid_job(msg: impl Into<String>) -> Self {
        Self::InvalidJob(msg.into())
    }

    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    /// Check if error is retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            WorkerError::CaptureFailed(_)
            | WorkerError::DetectionFailed(_)
            | WorkerError::Db(_)
            | WorkerError::Ml(_)
            | WorkerError::Queue(_) => true,
            WorkerError::Media(e) => !e.is_missing_input(),
            WorkerError::Io(e) => e.kind() != std::io::ErrorKind::NotFound,
            WorkerError::InputMissing(_)
            | WorkerError::InvalidJob(_)
            | WorkerError::Timeout(_)
            | WorkerError::ConfigError(_) => false,
        }
    }

    /// Whether a job of `kind` failing with this error may run again.
    ///
    /// Recordings are only retried after a non-zero capture exit; every other
    /// recording failure has already been persisted as terminal.
    pub fn is_retryable_for(&self, kind: JobKind) -> bool {
        match kind {
            JobKind::Record => matches!(self, WorkerError::CaptureFailed(_)),
            JobKind::Detect | JobKind::Caption => self.is_retryable(),
        }
    }

    /// Check if this is a permanent failure that should NOT be retried.
    pub fn is_permanent_failure(&self) -> bool {
        !self.is_retryable()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use camwatch_media::MediaError;
    use std::path::PathBuf;

    #[test]
    fn test_missing_input_is_permanent() {
        let err: WorkerError = MediaError::FileNotFound(PathBuf::from("/x.mp4")).into();
        assert!(err.is_permanent_failure());
        assert!(WorkerError::input_missing("gone").is_permanent_failure());
        assert!(WorkerError::Timeout(Duration::from_secs(1800)).is_permanent_failure());
    }

    #[test]
    fn test_timeout_message_keeps_subsecond_limits() {
        assert_eq!(
            WorkerError::Timeout(Duration::from_millis(50)).to_string(),
            "Job timed out after 50ms"
        );
        assert_eq!(
            WorkerError::Timeout(Duration::from_secs(1800)).to_string(),
            "Job timed out after 1800s"
        );
    }

    #[test]
    fn test_media_failure_is_retryable() {
        let err: WorkerError = MediaError::ffmpeg_failed("decode", None, Some(1)).into();
        assert!(err.is_retryable());
        assert!(err.is_retryable_for(JobKind::Detect));
    }

    #[test]
    fn test_recording_retries_only_nonzero_exit() {
        assert!(WorkerError::capture_failed("exit 1").is_retryable_for(JobKind::Record));

        let db: WorkerError = camwatch_db::DbError::not_found("segment", 1).into();
        assert!(db.is_retryable_for(JobKind::Detect));
        assert!(!db.is_retryable_for(JobKind::Record));
    }
}
