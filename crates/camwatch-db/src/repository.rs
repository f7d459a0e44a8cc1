//! Repository traits.
//!
//! Every status write is conditional on the current status being a legal
//! predecessor of the new one, so concurrent or redelivered jobs cannot
//! move a row backwards. Conditional writes report whether they applied.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use camwatch_models::{
    AnalysisStatus, Detection, DetectionId, GpuSnapshot, GpuTaskType, NewDetection, NewSegment,
    RecordingSegment, RecordingStatus, SegmentId,
};

use crate::error::DbResult;

/// Terminal result of a recording attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordingOutcome {
    pub status: RecordingStatus,
    pub end_time: DateTime<Utc>,
    /// Only recorded on success
    pub file_size: Option<i64>,
    pub error_message: Option<String>,
}

impl RecordingOutcome {
    pub fn success(file_size: i64) -> Self {
        Self {
            status: RecordingStatus::Success,
            end_time: Utc::now(),
            file_size: Some(file_size),
            error_message: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: RecordingStatus::Failed,
            end_time: Utc::now(),
            file_size: None,
            error_message: Some(error.into()),
        }
    }

    pub fn timeout(error: impl Into<String>) -> Self {
        Self {
            status: RecordingStatus::Timeout,
            end_time: Utc::now(),
            file_size: None,
            error_message: Some(error.into()),
        }
    }
}

/// Segment query. Newest first.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SegmentFilter {
    pub camera_id: Option<String>,
    pub status: Option<RecordingStatus>,
    /// Empty matches any analysis status
    pub analysis_statuses: Vec<AnalysisStatus>,
    /// Inclusive lower bound on start time
    pub start_from: Option<DateTime<Utc>>,
    /// Inclusive upper bound on start time
    pub start_to: Option<DateTime<Utc>>,
    pub limit: Option<i64>,
    pub offset: i64,
}

impl SegmentFilter {
    pub(crate) fn matches(&self, segment: &RecordingSegment) -> bool {
        self.camera_id.as_deref().map_or(true, |c| segment.camera_id == c)
            && self.status.map_or(true, |s| segment.status == s)
            && (self.analysis_statuses.is_empty()
                || self.analysis_statuses.contains(&segment.analysis_status))
            && self.start_from.map_or(true, |t| segment.start_time >= t)
            && self.start_to.map_or(true, |t| segment.start_time <= t)
    }

    pub(crate) fn analysis_status_strings(&self) -> Vec<String> {
        self.analysis_statuses
            .iter()
            .map(|s| s.as_str().to_string())
            .collect()
    }
}

#[async_trait]
pub trait SegmentRepository: Send + Sync {
    /// Insert an `in_progress` segment with pending analysis.
    async fn create_segment(&self, new: NewSegment) -> DbResult<RecordingSegment>;

    async fn get_segment(&self, id: SegmentId) -> DbResult<Option<RecordingSegment>>;

    async fn list_segments(&self, filter: &SegmentFilter) -> DbResult<Vec<RecordingSegment>>;

    /// Count matching rows, ignoring limit and offset.
    async fn count_segments(&self, filter: &SegmentFilter) -> DbResult<i64>;

    /// Move an `in_progress` segment to its terminal recording status.
    async fn finish_recording(&self, id: SegmentId, outcome: RecordingOutcome) -> DbResult<bool>;

    /// Conditional analysis transition.
    ///
    /// Entering `Processing` additionally requires a successful recording.
    /// Entering `Completed` stamps the analysis time; other targets clear it.
    async fn set_analysis_status(&self, id: SegmentId, next: AnalysisStatus) -> DbResult<bool>;

    /// Delete the segment's detections and reset analysis to `Pending`,
    /// atomically. Returns the number of detections removed.
    async fn reset_analysis(&self, id: SegmentId) -> DbResult<u64>;
}

#[async_trait]
pub trait DetectionRepository: Send + Sync {
    /// Insert in order, returning ids in the same order.
    async fn insert_detections(&self, detections: Vec<NewDetection>) -> DbResult<Vec<DetectionId>>;

    async fn get_detection(&self, id: DetectionId) -> DbResult<Option<Detection>>;

    /// All detections of a segment by timestamp.
    async fn list_for_segment(&self, segment_id: SegmentId) -> DbResult<Vec<Detection>>;

    async fn delete_for_segment(&self, segment_id: SegmentId) -> DbResult<u64>;

    /// Caption candidates: `pending` rows among `ids`, or when `ids` is
    /// `None` the oldest `pending` rows. At most `limit` rows, oldest first.
    async fn pending_captions(
        &self,
        ids: Option<&[DetectionId]>,
        limit: i64,
    ) -> DbResult<Vec<Detection>>;

    /// Atomically move still-`pending` rows among `ids` to `processing`.
    /// Returns exactly the ids this caller now owns.
    async fn claim_for_caption(&self, ids: &[DetectionId]) -> DbResult<Vec<DetectionId>>;

    /// `processing -> completed` with the caption text.
    async fn complete_caption(
        &self,
        id: DetectionId,
        caption: &str,
        at: DateTime<Utc>,
    ) -> DbResult<bool>;

    /// Mark rows `failed` from `pending` or `processing`. Returns rows changed.
    async fn fail_captions(&self, ids: &[DetectionId]) -> DbResult<u64>;
}

#[async_trait]
pub trait GpuMetricsRepository: Send + Sync {
    async fn record_snapshot(&self, snapshot: &GpuSnapshot) -> DbResult<()>;

    /// Snapshots at or after `since`, oldest first.
    async fn snapshots_since(
        &self,
        since: DateTime<Utc>,
        task_type: Option<GpuTaskType>,
    ) -> DbResult<Vec<GpuSnapshot>>;
}

/// Everything the pipeline and API persist.
#[async_trait]
pub trait Store: SegmentRepository + DetectionRepository + GpuMetricsRepository {
    /// Cheap connectivity check for readiness probes.
    async fn ping(&self) -> DbResult<()>;
}
