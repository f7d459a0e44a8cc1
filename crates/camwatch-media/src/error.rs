//! Error types for media operations.

use std::path::PathBuf;
use thiserror::Error;

/// Result type for media operations.
pub type MediaResult<T> = Result<T, MediaError>;

/// Errors that can occur while capturing or reading media.
#[derive(Debug, Error)]
pub enum MediaError {
    #[error("FFmpeg not found in PATH")]
    FfmpegNotFound,

    #[error("FFprobe not found in PATH")]
    FfprobeNotFound,

    #[error("FFmpeg command failed: {message}")]
    FfmpegFailed {
        message: String,
        stderr: Option<String>,
        exit_code: Option<i32>,
    },

    #[error("FFprobe command failed: {message}")]
    FfprobeFailed {
        message: String,
        stderr: Option<String>,
    },

    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Operation timed out after {0} seconds")]
    Timeout(u64),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("Invalid video file: {0}")]
    InvalidVideo(String),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl MediaError {
    /// Create an FFmpeg failure error.
    pub fn ffmpeg_failed(
        message: impl Into<String>,
        stderr: Option<String>,
        exit_code: Option<i32>,
    ) -> Self {
        Self::FfmpegFailed {
            message: message.into(),
            stderr,
            exit_code,
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }

    /// The process ran and exited with a non-zero status.
    pub fn is_nonzero_exit(&self) -> bool {
        matches!(self, Self::FfmpegFailed { exit_code: Some(code), .. } if *code != 0)
    }

    /// Input is absent or undecodable; retrying will not help.
    pub fn is_missing_input(&self) -> bool {
        match self {
            Self::FileNotFound(_) | Self::InvalidVideo(_) => true,
            Self::Io(e) => e.kind() == std::io::ErrorKind::NotFound,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_exit_codes() {
        assert!(MediaError::ffmpeg_failed("x", None, Some(1)).is_nonzero_exit());
        assert!(!MediaError::ffmpeg_failed("x", None, None).is_nonzero_exit());
        assert!(MediaError::Timeout(75).is_timeout());
    }

    #[test]
    fn missing_input() {
        assert!(MediaError::FileNotFound(PathBuf::from("/nope")).is_missing_input());
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        assert!(MediaError::Io(io).is_missing_input());
        assert!(!MediaError::Timeout(1).is_missing_input());
    }
}
