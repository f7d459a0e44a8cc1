//! Job types for the queue.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use camwatch_models::{CameraConfig, DetectionId, JobId, SegmentId};

/// Job to record one fixed-duration segment from one camera.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordCameraJob {
    /// Unique job ID
    pub job_id: JobId,
    /// Camera to record from
    pub camera: CameraConfig,
    /// Override for the recordings root directory
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_dir: Option<String>,
    /// Zero-based attempt counter, bumped on every scheduled retry
    #[serde(default)]
    pub attempt: u32,
    /// When the job was created
    pub created_at: DateTime<Utc>,
}

impl RecordCameraJob {
    pub fn new(camera: CameraConfig) -> Self {
        Self {
            job_id: JobId::new(),
            camera,
            base_dir: None,
            attempt: 0,
            created_at: Utc::now(),
        }
    }

    pub fn with_base_dir(mut self, base_dir: impl Into<String>) -> Self {
        self.base_dir = Some(base_dir.into());
        self
    }

    /// One recording per camera per scheduler minute.
    pub fn idempotency_key(&self) -> String {
        format!(
            "record:{}:{}",
            self.camera.id,
            self.created_at.format("%Y%m%d%H%M")
        )
    }
}

/// Job to run person detection over one recorded segment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectPersonsJob {
    /// Unique job ID
    pub job_id: JobId,
    pub segment_id: SegmentId,
    /// Re-run even if the segment was already analyzed
    #[serde(default)]
    pub force: bool,
    #[serde(default)]
    pub attempt: u32,
    pub created_at: DateTime<Utc>,
}

impl DetectPersonsJob {
    pub fn new(segment_id: SegmentId) -> Self {
        Self {
            job_id: JobId::new(),
            segment_id,
            force: false,
            attempt: 0,
            created_at: Utc::now(),
        }
    }

    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    /// At most one detection run per segment is queued or running at a time.
    pub fn idempotency_key(&self) -> String {
        format!("detect:{}", self.segment_id)
    }
}

/// Job to caption detections.
///
/// `detection_ids: None` means "every pending detection", capped by the
/// worker's per-run limit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptionDetectionsJob {
    /// Unique job ID
    pub job_id: JobId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detection_ids: Option<Vec<DetectionId>>,
    /// Segment that produced the detections, when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub segment_id: Option<SegmentId>,
    #[serde(default)]
    pub attempt: u32,
    pub created_at: DateTime<Utc>,
}

impl CaptionDetectionsJob {
    /// Caption exactly these detections.
    pub fn for_detections(segment_id: SegmentId, detection_ids: Vec<DetectionId>) -> Self {
        Self {
            job_id: JobId::new(),
            detection_ids: Some(detection_ids),
            segment_id: Some(segment_id),
            attempt: 0,
            created_at: Utc::now(),
        }
    }

    /// Caption the pending backlog.
    pub fn pending_backlog() -> Self {
        Self {
            job_id: JobId::new(),
            detection_ids: None,
            segment_id: None,
            attempt: 0,
            created_at: Utc::now(),
        }
    }

    pub fn idempotency_key(&self) -> String {
        match (&self.detection_ids, self.segment_id) {
            (None, _) => "caption:backlog".to_string(),
            (Some(_), Some(segment_id)) => format!("caption:segment:{}", segment_id),
            (Some(_), None) => format!("caption:job:{}", self.job_id),
        }
    }
}

/// Kind of job, used to select retry and timeout policies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobKind {
    Record,
    Detect,
    Caption,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Record => "record",
            JobKind::Detect => "detect",
            JobKind::Caption => "caption",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Wrapper enum for all job types.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum QueueJob {
    RecordCamera(RecordCameraJob),
    DetectPersons(DetectPersonsJob),
    CaptionDetections(CaptionDetectionsJob),
}

impl QueueJob {
    pub fn job_id(&self) -> &JobId {
        match self {
            QueueJob::RecordCamera(j) => &j.job_id,
            QueueJob::DetectPersons(j) => &j.job_id,
            QueueJob::CaptionDetections(j) => &j.job_id,
        }
    }

    pub fn kind(&self) -> JobKind {
        match self {
            QueueJob::RecordCamera(_) => JobKind::Record,
            QueueJob::DetectPersons(_) => JobKind::Detect,
            QueueJob::CaptionDetections(_) => JobKind::Caption,
        }
    }

    pub fn attempt(&self) -> u32 {
        match self {
            QueueJob::RecordCamera(j) => j.attempt,
            QueueJob::DetectPersons(j) => j.attempt,
            QueueJob::CaptionDetections(j) => j.attempt,
        }
    }

    /// Copy of this job for its next attempt.
    pub fn next_attempt(&self) -> Self {
        let mut next = self.clone();
        match &mut next {
            QueueJob::RecordCamera(j) => j.attempt += 1,
            QueueJob::DetectPersons(j) => j.attempt += 1,
            QueueJob::CaptionDetections(j) => j.attempt += 1,
        }
        next
    }

    pub fn idempotency_key(&self) -> String {
        match self {
            QueueJob::RecordCamera(j) => j.idempotency_key(),
            QueueJob::DetectPersons(j) => j.idempotency_key(),
            QueueJob::CaptionDetections(j) => j.idempotency_key(),
        }
    }
}

impl From<RecordCameraJob> for QueueJob {
    fn from(job: RecordCameraJob) -> Self {
        QueueJob::RecordCamera(job)
    }
}

impl From<DetectPersonsJob> for QueueJob {
    fn from(job: DetectPersonsJob) -> Self {
        QueueJob::DetectPersons(job)
    }
}

impl From<CaptionDetectionsJob> for QueueJob {
    fn from(job: CaptionDetectionsJob) -> Self {
        QueueJob::CaptionDetections(job)
    }
}
