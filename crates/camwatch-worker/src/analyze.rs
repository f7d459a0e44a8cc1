//! Operational re-trigger of the detection and captioning stages.

use chrono::{DateTime, Duration as ChronoDuration, NaiveDate, TimeZone, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use camwatch_db::{SegmentFilter, Store};
use camwatch_models::{AnalysisStatus, RecordingSegment, RecordingStatus, StorageLayout};
use camwatch_queue::{CaptionDetectionsJob, DetectPersonsJob, JobSink};

use crate::error::WorkerResult;

/// Which segments to analyze and how.
#[derive(Debug, Clone, Default)]
pub struct AnalyzeOptions {
    pub camera_id: Option<String>,
    /// Inclusive bounds on the segment start time
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    /// Include segments that were already analyzed
    pub all: bool,
    pub limit: Option<i64>,
    /// Clear existing detections and re-run even completed segments;
    /// implies `all`
    pub force: bool,
    /// List matches without touching the store or the queue
    pub dry_run: bool,
}

impl AnalyzeOptions {
    pub fn filter(&self) -> SegmentFilter {
        SegmentFilter {
            camera_id: self.camera_id.clone(),
            status: Some(RecordingStatus::Success),
            analysis_statuses: if self.all || self.force {
                Vec::new()
            } else {
                vec![AnalysisStatus::Pending, AnalysisStatus::Failed]
            },
            start_from: self.start,
            start_to: self.end,
            limit: self.limit,
            offset: 0,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AnalyzeSummary {
    pub matched: usize,
    pub enqueued: usize,
    /// Missing files and segments already queued
    pub skipped: usize,
    pub errors: usize,
    /// Segments that would be enqueued, filled on dry runs only
    pub planned: Vec<i64>,
}

/// Enqueue one detection job per matching segment.
pub async fn enqueue_analysis(
    store: &dyn Store,
    sink: &dyn JobSink,
    opts: &AnalyzeOptions,
) -> WorkerResult<AnalyzeSummary> {
    let segments = store.list_segments(&opts.filter()).await?;
    let mut summary = AnalyzeSummary {
        matched: segments.len(),
        ..Default::default()
    };
    info!(matched = segments.len(), force = opts.force, "Selected segments for analysis");

    for segment in &segments {
        if !file_exists(segment).await {
            warn!(
                segment_id = %segment.id,
                path = segment.file_path.as_deref().unwrap_or(""),
                "Recording file missing, skipping"
            );
            summary.skipped += 1;
            continue;
        }

        if opts.dry_run {
            summary.planned.push(segment.id.get());
            continue;
        }

        if opts.force {
            match store.reset_analysis(segment.id).await {
                Ok(removed) => debug!(segment_id = %segment.id, removed, "Analysis reset"),
                Err(e) => {
                    warn!(segment_id = %segment.id, "Failed to reset analysis: {}", e);
                    summary.errors += 1;
                    continue;
                }
            }
        }

        let job = DetectPersonsJob::new(segment.id).with_force(opts.force);
        match sink.submit(job.into()).await {
            Ok(()) => summary.enqueued += 1,
            Err(e) if e.is_duplicate() => {
                debug!(segment_id = %segment.id, "Detection already queued");
                summary.skipped += 1;
            }
            Err(e) => {
                warn!(segment_id = %segment.id, "Failed to enqueue detection: {}", e);
                summary.errors += 1;
            }
        }
    }

    Ok(summary)
}

/// Enqueue one caption job covering every pending detection.
///
/// Returns `false` when a backlog job is already queued.
pub async fn enqueue_caption_backlog(sink: &dyn JobSink) -> WorkerResult<bool> {
    match sink.submit(CaptionDetectionsJob::pending_backlog().into()).await {
        Ok(()) => Ok(true),
        Err(e) if e.is_duplicate() => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// UTC bounds covering whole local days from `start` through `end`.
pub fn day_bounds(
    layout: &StorageLayout,
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
) -> (Option<DateTime<Utc>>, Option<DateTime<Utc>>) {
    let midnight = |date: NaiveDate| {
        layout
            .utc_offset
            .from_local_datetime(&date.and_time(chrono::NaiveTime::MIN))
            .single()
            .map(|t| t.with_timezone(&Utc))
    };

    let from = start.and_then(midnight);
    let to = end
        .and_then(|d| d.succ_opt())
        .and_then(midnight)
        .map(|next| next - ChronoDuration::microseconds(1));
    (from, to)
}

async fn file_exists(segment: &RecordingSegment) -> bool {
    match segment.path() {
        Some(path) => tokio::fs::try_exists(&path).await.unwrap_or(false),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use camwatch_db::{DetectionRepository, MemoryStore, SegmentRepository};
    use camwatch_models::{BoundingBox, NewDetection, SegmentId};
    use camwatch_queue::{CollectingSink, QueueError, QueueJob, QueueResult};
    use chrono::FixedOffset;
    use std::path::PathBuf;

    struct Fixture {
        store: MemoryStore,
        sink: CollectingSink,
        dir: tempfile::TempDir,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                store: MemoryStore::new(),
                sink: CollectingSink::new(),
                dir: tempfile::tempdir().unwrap(),
            }
        }

        async fn segment(
            &self,
            id: i64,
            camera: &str,
            start: &str,
            analysis: AnalysisStatus,
            on_disk: bool,
        ) -> SegmentId {
            let path: PathBuf = self.dir.path().join(format!("{}.mp4", id));
            if on_disk {
                std::fs::write(&path, b"video").unwrap();
            }
            let start: DateTime<Utc> = start.parse().unwrap();
            self.store
                .put_segment(RecordingSegment {
                    id: SegmentId(id),
                    camera_id: camera.to_string(),
                    camera_user: "admin".to_string(),
                    task_id: None,
                    start_time: start,
                    end_time: Some(start + ChronoDuration::seconds(60)),
                    status: RecordingStatus::Success,
                    file_path: Some(path.to_string_lossy().into_owned()),
                    file_size: Some(5),
                    error_message: None,
                    analysis_status: analysis,
                    analysis_time: None,
                })
                .await;
            SegmentId(id)
        }

        async fn enqueued(&self) -> Vec<(i64, bool)> {
            let mut jobs: Vec<(i64, bool)> = self
                .sink
                .submitted()
                .await
                .into_iter()
                .map(|j| match j {
                    QueueJob::DetectPersons(d) => (d.segment_id.get(), d.force),
                    other => panic!("unexpected {:?}", other.kind()),
                })
                .collect();
            jobs.sort();
            jobs
        }
    }

    #[tokio::test]
    async fn test_default_selects_never_analyzed() {
        let f = Fixture::new();
        f.segment(1, "cam-a", "2024-05-01T01:00:00Z", AnalysisStatus::Pending, true).await;
        f.segment(2, "cam-a", "2024-05-01T02:00:00Z", AnalysisStatus::Completed, true).await;
        f.segment(3, "cam-a", "2024-05-01T03:00:00Z", AnalysisStatus::Failed, true).await;

        let summary = enqueue_analysis(&f.store, &f.sink, &AnalyzeOptions::default())
            .await
            .unwrap();

        assert_eq!(summary.matched, 2);
        assert_eq!(summary.enqueued, 2);
        assert_eq!(f.enqueued().await, vec![(1, false), (3, false)]);
    }

    #[tokio::test]
    async fn test_all_includes_completed() {
        let f = Fixture::new();
        f.segment(1, "cam-a", "2024-05-01T01:00:00Z", AnalysisStatus::Pending, true).await;
        f.segment(2, "cam-a", "2024-05-01T02:00:00Z", AnalysisStatus::Completed, true).await;

        let opts = AnalyzeOptions {
            all: true,
            ..Default::default()
        };
        let summary = enqueue_analysis(&f.store, &f.sink, &opts).await.unwrap();

        assert_eq!(summary.enqueued, 2);
    }

    #[tokio::test]
    async fn test_camera_date_and_limit_filters() {
        let f = Fixture::new();
        f.segment(1, "cam-a", "2024-05-01T01:00:00Z", AnalysisStatus::Pending, true).await;
        f.segment(2, "cam-b", "2024-05-01T01:00:00Z", AnalysisStatus::Pending, true).await;
        f.segment(3, "cam-a", "2024-05-03T01:00:00Z", AnalysisStatus::Pending, true).await;
        f.segment(4, "cam-a", "2024-05-01T05:00:00Z", AnalysisStatus::Pending, true).await;

        let opts = AnalyzeOptions {
            camera_id: Some("cam-a".to_string()),
            start: Some("2024-05-01T00:00:00Z".parse().unwrap()),
            end: Some("2024-05-02T00:00:00Z".parse().unwrap()),
            limit: Some(1),
            ..Default::default()
        };
        let summary = enqueue_analysis(&f.store, &f.sink, &opts).await.unwrap();

        // Newest first within the window
        assert_eq!(summary.matched, 1);
        assert_eq!(f.enqueued().await, vec![(4, false)]);
    }

    #[tokio::test]
    async fn test_missing_file_is_skipped() {
        let f = Fixture::new();
        f.segment(1, "cam-a", "2024-05-01T01:00:00Z", AnalysisStatus::Pending, false).await;
        f.segment(2, "cam-a", "2024-05-01T02:00:00Z", AnalysisStatus::Pending, true).await;

        let summary = enqueue_analysis(&f.store, &f.sink, &AnalyzeOptions::default())
            .await
            .unwrap();

        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.enqueued, 1);
        assert_eq!(f.enqueued().await, vec![(2, false)]);
    }

    #[tokio::test]
    async fn test_force_clears_detections_first() {
        let f = Fixture::new();
        let id = f
            .segment(1, "cam-a", "2024-05-01T01:00:00Z", AnalysisStatus::Completed, true)
            .await;
        f.store
            .insert_detections(vec![NewDetection {
                segment_id: id,
                frame_index: 0,
                timestamp_secs: 0.0,
                image_path: "/tmp/x.jpg".to_string(),
                confidence: 0.9,
                bbox: BoundingBox::new(0.0, 0.0, 1.0, 1.0),
            }])
            .await
            .unwrap();

        let opts = AnalyzeOptions {
            all: true,
            force: true,
            ..Default::default()
        };
        let summary = enqueue_analysis(&f.store, &f.sink, &opts).await.unwrap();

        assert_eq!(summary.enqueued, 1);
        assert_eq!(f.enqueued().await, vec![(1, true)]);
        assert!(f.store.list_for_segment(id).await.unwrap().is_empty());
        let segment = f.store.get_segment(id).await.unwrap().unwrap();
        assert_eq!(segment.analysis_status, AnalysisStatus::Pending);
    }

    #[tokio::test]
    async fn test_force_alone_reanalyzes_completed() {
        let f = Fixture::new();
        f.segment(1, "cam-a", "2024-05-01T01:00:00Z", AnalysisStatus::Completed, true).await;

        let opts = AnalyzeOptions {
            force: true,
            all: false,
            ..Default::default()
        };
        let summary = enqueue_analysis(&f.store, &f.sink, &opts).await.unwrap();

        assert_eq!(summary.matched, 1);
        assert_eq!(summary.enqueued, 1);
        assert_eq!(f.enqueued().await, vec![(1, true)]);
    }

    #[tokio::test]
    async fn test_dry_run_touches_nothing() {
        let f = Fixture::new();
        f.segment(1, "cam-a", "2024-05-01T01:00:00Z", AnalysisStatus::Completed, true).await;

        let opts = AnalyzeOptions {
            all: true,
            force: true,
            dry_run: true,
            ..Default::default()
        };
        let summary = enqueue_analysis(&f.store, &f.sink, &opts).await.unwrap();

        assert_eq!(summary.planned, vec![1]);
        assert_eq!(summary.enqueued, 0);
        assert!(f.sink.submitted().await.is_empty());
        let segment = f.store.get_segment(SegmentId(1)).await.unwrap().unwrap();
        assert_eq!(segment.analysis_status, AnalysisStatus::Completed);
    }

    struct DuplicateSink;

    #[async_trait]
    impl JobSink for DuplicateSink {
        async fn submit(&self, job: QueueJob) -> QueueResult<()> {
            Err(QueueError::Duplicate(job.idempotency_key()))
        }
    }

    #[tokio::test]
    async fn test_duplicates_count_as_skipped() {
        let f = Fixture::new();
        f.segment(1, "cam-a", "2024-05-01T01:00:00Z", AnalysisStatus::Pending, true).await;

        let summary = enqueue_analysis(&f.store, &DuplicateSink, &AnalyzeOptions::default())
            .await
            .unwrap();

        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.errors, 0);
        assert!(!enqueue_caption_backlog(&DuplicateSink).await.unwrap());
    }

    #[tokio::test]
    async fn test_caption_backlog() {
        let sink = CollectingSink::new();
        assert!(enqueue_caption_backlog(&sink).await.unwrap());
        assert!(matches!(
            sink.submitted().await.as_slice(),
            [QueueJob::CaptionDetections(c)] if c.detection_ids.is_none()
        ));
    }

    #[test]
    fn test_day_bounds_use_local_days() {
        let layout = StorageLayout {
            recordings_dir: PathBuf::from("/rec"),
            pics_dir: PathBuf::from("/pics"),
            resource_base_url: String::new(),
            utc_offset: FixedOffset::east_opt(8 * 3600).unwrap(),
        };
        let day = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap();

        let (from, to) = day_bounds(&layout, Some(day), Some(day));

        assert_eq!(from.unwrap().to_rfc3339(), "2024-04-30T16:00:00+00:00");
        let to = to.unwrap();
        assert!(to < "2024-05-01T16:00:00Z".parse::<DateTime<Utc>>().unwrap());
        assert!(to > "2024-05-01T15:59:59Z".parse::<DateTime<Utc>>().unwrap());
        assert_eq!(day_bounds(&layout, None, None), (None, None));
    }
}
