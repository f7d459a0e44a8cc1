//! Recording segments.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::status::{AnalysisStatus, RecordingStatus};

/// Database identifier of a recording segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct SegmentId(pub i64);

impl SegmentId {
    pub fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for SegmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SegmentId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse().map(SegmentId)
    }
}

/// One attempted recording window for one camera.
///
/// Rows are created before capture starts so that a crash mid-capture still
/// leaves an `in_progress` record behind for auditing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct RecordingSegment {
    pub id: SegmentId,
    /// Camera identifier (defaults to the camera host)
    pub camera_id: String,
    /// Credentials reference: the user name only, never the password
    pub camera_user: String,
    /// Correlation id of the recording job that owns this row
    pub task_id: Option<String>,
    pub start_time: DateTime<Utc>,
    /// Null until a terminal recording status is reached
    pub end_time: Option<DateTime<Utc>>,
    pub status: RecordingStatus,
    pub file_path: Option<String>,
    /// Bytes on disk, stored only on success
    pub file_size: Option<i64>,
    pub error_message: Option<String>,
    pub analysis_status: AnalysisStatus,
    pub analysis_time: Option<DateTime<Utc>>,
}

impl RecordingSegment {
    /// Wall-clock recording duration, once the segment has ended.
    pub fn duration(&self) -> Option<chrono::Duration> {
        self.end_time.map(|end| end - self.start_time)
    }

    /// Duration in seconds as shown in admin listings.
    pub fn duration_secs(&self) -> Option<f64> {
        self.duration()
            .map(|d| d.num_milliseconds() as f64 / 1000.0)
    }

    pub fn path(&self) -> Option<PathBuf> {
        self.file_path.as_ref().map(PathBuf::from)
    }

    /// Whether detection may run at all: only successful recordings with a path.
    pub fn is_analyzable(&self) -> bool {
        self.status == RecordingStatus::Success && self.file_path.is_some()
    }
}

/// Fields supplied when a recording attempt starts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewSegment {
    pub camera_id: String,
    pub camera_user: String,
    pub task_id: Option<String>,
    pub start_time: DateTime<Utc>,
    pub file_path: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn segment() -> RecordingSegment {
        RecordingSegment {
            id: SegmentId(7),
            camera_id: "192.168.1.10".to_string(),
            camera_user: "admin".to_string(),
            task_id: None,
            start_time: Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap(),
            end_time: None,
            status: RecordingStatus::InProgress,
            file_path: Some("/data/rec/a.mp4".to_string()),
            file_size: None,
            error_message: None,
            analysis_status: AnalysisStatus::Pending,
            analysis_time: None,
        }
    }

    #[test]
    fn duration_is_none_until_ended() {
        let mut seg = segment();
        assert!(seg.duration().is_none());

        seg.end_time = Some(seg.start_time + chrono::Duration::milliseconds(61_500));
        assert_eq!(seg.duration_secs(), Some(61.5));
    }

    #[test]
    fn only_successful_segments_are_analyzable() {
        let mut seg = segment();
        assert!(!seg.is_analyzable());
        seg.status = RecordingStatus::Success;
        assert!(seg.is_analyzable());
        seg.file_path = None;
        assert!(!seg.is_analyzable());
    }
}
