//! In-memory store.
//!
//! Same semantics as [`PgStore`](crate::PgStore), including conditional
//! transitions and the atomic caption claim, which runs under a single
//! write lock. Used by tests and single-process local runs.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use tokio::sync::RwLock;

use camwatch_models::{
    AnalysisStatus, CaptionStatus, Detection, DetectionId, GpuSnapshot, GpuTaskType, NewDetection,
    NewSegment, RecordingSegment, RecordingStatus, SegmentId,
};

use crate::error::{DbError, DbResult};
use crate::repository::{
    DetectionRepository, GpuMetricsRepository, RecordingOutcome, SegmentFilter,
    SegmentRepository, Store,
};

#[derive(Default)]
struct Inner {
    segments: BTreeMap<SegmentId, RecordingSegment>,
    detections: BTreeMap<DetectionId, Detection>,
    snapshots: Vec<GpuSnapshot>,
    next_segment_id: i64,
    next_detection_id: i64,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a fully-formed segment, keeping its id. For fixtures.
    pub async fn put_segment(&self, segment: RecordingSegment) {
        let mut inner = self.inner.write().await;
        inner.next_segment_id = inner.next_segment_id.max(segment.id.get());
        inner.segments.insert(segment.id, segment);
    }

    /// Every detection, by id.
    pub async fn all_detections(&self) -> Vec<Detection> {
        self.inner.read().await.detections.values().cloned().collect()
    }
}

#[async_trait]
impl SegmentRepository for MemoryStore {
    async fn create_segment(&self, new: NewSegment) -> DbResult<RecordingSegment> {
        let mut inner = self.inner.write().await;
        inner.next_segment_id += 1;
        let segment = RecordingSegment {
            id: SegmentId(inner.next_segment_id),
            camera_id: new.camera_id,
            camera_user: new.camera_user,
            task_id: new.task_id,
            start_time: new.start_time,
            end_time: None,
            status: RecordingStatus::InProgress,
            file_path: Some(new.file_path),
            file_size: None,
            error_message: None,
            analysis_status: AnalysisStatus::Pending,
            analysis_time: None,
        };
        inner.segments.insert(segment.id, segment.clone());
        Ok(segment)
    }

    async fn get_segment(&self, id: SegmentId) -> DbResult<Option<RecordingSegment>> {
        Ok(self.inner.read().await.segments.get(&id).cloned())
    }

    async fn list_segments(&self, filter: &SegmentFilter) -> DbResult<Vec<RecordingSegment>> {
        let inner = self.inner.read().await;
        let mut matching: Vec<_> = inner
            .segments
            .values()
            .filter(|s| filter.matches(s))
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.start_time.cmp(&a.start_time).then(b.id.cmp(&a.id)));

        let limit = filter.limit.map_or(usize::MAX, |l| l.max(0) as usize);
        Ok(matching
            .into_iter()
            .skip(filter.offset.max(0) as usize)
            .take(limit)
            .collect())
    }

    async fn count_segments(&self, filter: &SegmentFilter) -> DbResult<i64> {
        let inner = self.inner.read().await;
        Ok(inner.segments.values().filter(|s| filter.matches(s)).count() as i64)
    }

    async fn finish_recording(&self, id: SegmentId, outcome: RecordingOutcome) -> DbResult<bool> {
        let mut inner = self.inner.write().await;
        let Some(segment) = inner.segments.get_mut(&id) else {
            return Ok(false);
        };
        if !segment.status.can_transition_to(outcome.status) {
            return Ok(false);
        }
        segment.status = outcome.status;
        segment.end_time = Some(outcome.end_time);
        segment.file_size = outcome.file_size;
        segment.error_message = outcome.error_message;
        Ok(true)
    }

    async fn set_analysis_status(&self, id: SegmentId, next: AnalysisStatus) -> DbResult<bool> {
        let mut inner = self.inner.write().await;
        let Some(segment) = inner.segments.get_mut(&id) else {
            return Ok(false);
        };
        if !segment.analysis_status.can_transition_to(next) {
            return Ok(false);
        }
        if next == AnalysisStatus::Processing && segment.status != RecordingStatus::Success {
            return Ok(false);
        }
        segment.analysis_status = next;
        segment.analysis_time = (next == AnalysisStatus::Completed).then(Utc::now);
        Ok(true)
    }

    async fn reset_analysis(&self, id: SegmentId) -> DbResult<u64> {
        let mut inner = self.inner.write().await;
        let Some(segment) = inner.segments.get_mut(&id) else {
            return Err(DbError::not_found("segment", id.get()));
        };
        segment.analysis_status = AnalysisStatus::Pending;
        segment.analysis_time = None;

        let before = inner.detections.len();
        inner.detections.retain(|_, d| d.segment_id != id);
        Ok((before - inner.detections.len()) as u64)
    }
}

#[async_trait]
impl DetectionRepository for MemoryStore {
    async fn insert_detections(&self, detections: Vec<NewDetection>) -> DbResult<Vec<DetectionId>> {
        let mut inner = self.inner.write().await;
        if let Some(d) = detections
            .iter()
            .find(|d| !inner.segments.contains_key(&d.segment_id))
        {
            return Err(DbError::not_found("segment", d.segment_id.get()));
        }

        let now = Utc::now();
        let mut ids = Vec::with_capacity(detections.len());
        for d in detections {
            inner.next_detection_id += 1;
            let id = DetectionId(inner.next_detection_id);
            inner.detections.insert(
                id,
                Detection {
                    id,
                    segment_id: d.segment_id,
                    frame_index: d.frame_index,
                    timestamp_secs: d.timestamp_secs,
                    image_path: d.image_path,
                    confidence: d.confidence,
                    bbox: d.bbox,
                    created_at: now,
                    caption: None,
                    caption_status: CaptionStatus::Pending,
                    caption_time: None,
                },
            );
            ids.push(id);
        }
        Ok(ids)
    }

    async fn get_detection(&self, id: DetectionId) -> DbResult<Option<Detection>> {
        Ok(self.inner.read().await.detections.get(&id).cloned())
    }

    async fn list_for_segment(&self, segment_id: SegmentId) -> DbResult<Vec<Detection>> {
        let inner = self.inner.read().await;
        let mut found: Vec<_> = inner
            .detections
            .values()
            .filter(|d| d.segment_id == segment_id)
            .cloned()
            .collect();
        found.sort_by(|a, b| {
            a.timestamp_secs
                .total_cmp(&b.timestamp_secs)
                .then(a.id.cmp(&b.id))
        });
        Ok(found)
    }

    async fn delete_for_segment(&self, segment_id: SegmentId) -> DbResult<u64> {
        let mut inner = self.inner.write().await;
        let before = inner.detections.len();
        inner.detections.retain(|_, d| d.segment_id != segment_id);
        Ok((before - inner.detections.len()) as u64)
    }

    async fn pending_captions(
        &self,
        ids: Option<&[DetectionId]>,
        limit: i64,
    ) -> DbResult<Vec<Detection>> {
        let inner = self.inner.read().await;
        let mut found: Vec<_> = inner
            .detections
            .values()
            .filter(|d| d.caption_status == CaptionStatus::Pending)
            .filter(|d| ids.map_or(true, |ids| ids.contains(&d.id)))
            .cloned()
            .collect();
        found.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        found.truncate(limit.max(0) as usize);
        Ok(found)
    }

    async fn claim_for_caption(&self, ids: &[DetectionId]) -> DbResult<Vec<DetectionId>> {
        let mut inner = self.inner.write().await;
        let mut claimed = Vec::new();
        for id in ids {
            if let Some(d) = inner.detections.get_mut(id) {
                if d.caption_status == CaptionStatus::Pending {
                    d.caption_status = CaptionStatus::Processing;
                    claimed.push(*id);
                }
            }
        }
        Ok(claimed)
    }

    async fn complete_caption(
        &self,
        id: DetectionId,
        caption: &str,
        at: DateTime<Utc>,
    ) -> DbResult<bool> {
        let mut inner = self.inner.write().await;
        match inner.detections.get_mut(&id) {
            Some(d) if d.caption_status == CaptionStatus::Processing => {
                d.caption = Some(caption.to_string());
                d.caption_status = CaptionStatus::Completed;
                d.caption_time = Some(at);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn fail_captions(&self, ids: &[DetectionId]) -> DbResult<u64> {
        let mut inner = self.inner.write().await;
        let mut changed = 0;
        for id in ids {
            if let Some(d) = inner.detections.get_mut(id) {
                if d.caption_status.can_transition_to(CaptionStatus::Failed) {
                    d.caption_status = CaptionStatus::Failed;
                    changed += 1;
                }
            }
        }
        Ok(changed)
    }
}

#[async_trait]
impl GpuMetricsRepository for MemoryStore {
    async fn record_snapshot(&self, snapshot: &GpuSnapshot) -> DbResult<()> {
        self.inner.write().await.snapshots.push(snapshot.clone());
        Ok(())
    }

    async fn snapshots_since(
        &self,
        since: DateTime<Utc>,
        task_type: Option<GpuTaskType>,
    ) -> DbResult<Vec<GpuSnapshot>> {
        let inner = self.inner.read().await;
        let mut found: Vec<_> = inner
            .snapshots
            .iter()
            .filter(|s| s.timestamp >= since)
            .filter(|s| task_type.map_or(true, |t| s.task_type == t))
            .cloned()
            .collect();
        found.sort_by_key(|s| s.timestamp);
        Ok(found)
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn ping(&self) -> DbResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use camwatch_models::BoundingBox;
    use chrono::Duration;

    fn new_segment(camera: &str) -> NewSegment {
        NewSegment {
            camera_id: camera.to_string(),
            camera_user: "admin".to_string(),
            task_id: Some("job-1".to_string()),
            start_time: Utc::now(),
            file_path: format!("/rec/{}/00.mp4", camera),
        }
    }

    fn detection(segment_id: SegmentId, frame: i64) -> NewDetection {
        NewDetection {
            segment_id,
            frame_index: frame,
            timestamp_secs: frame as f64 / 25.0,
            image_path: format!("/pics/{}_frame_{}_person.jpg", segment_id, frame),
            confidence: 0.9,
            bbox: BoundingBox::new(0.0, 0.0, 10.0, 20.0),
        }
    }

    async fn successful_segment(store: &MemoryStore) -> SegmentId {
        let seg = store.create_segment(new_segment("cam")).await.unwrap();
        assert!(store
            .finish_recording(seg.id, RecordingOutcome::success(1024))
            .await
            .unwrap());
        seg.id
    }

    #[tokio::test]
    async fn new_segments_start_in_progress() {
        let store = MemoryStore::new();
        let seg = store.create_segment(new_segment("cam")).await.unwrap();
        assert_eq!(seg.status, RecordingStatus::InProgress);
        assert_eq!(seg.analysis_status, AnalysisStatus::Pending);
        assert!(seg.end_time.is_none());
    }

    #[tokio::test]
    async fn recording_finishes_once() {
        let store = MemoryStore::new();
        let seg = store.create_segment(new_segment("cam")).await.unwrap();

        assert!(store
            .finish_recording(seg.id, RecordingOutcome::timeout("killed"))
            .await
            .unwrap());
        assert!(!store
            .finish_recording(seg.id, RecordingOutcome::success(10))
            .await
            .unwrap());

        let seg = store.get_segment(seg.id).await.unwrap().unwrap();
        assert_eq!(seg.status, RecordingStatus::Timeout);
        assert!(seg.end_time.is_some());
        assert_eq!(seg.file_size, None);
    }

    #[tokio::test]
    async fn processing_requires_successful_recording() {
        let store = MemoryStore::new();
        let seg = store.create_segment(new_segment("cam")).await.unwrap();
        assert!(!store
            .set_analysis_status(seg.id, AnalysisStatus::Processing)
            .await
            .unwrap());

        let id = successful_segment(&store).await;
        assert!(store
            .set_analysis_status(id, AnalysisStatus::Processing)
            .await
            .unwrap());
        assert!(store
            .set_analysis_status(id, AnalysisStatus::Completed)
            .await
            .unwrap());
        let seg = store.get_segment(id).await.unwrap().unwrap();
        assert!(seg.analysis_time.is_some());

        // Completed cannot fail
        assert!(!store
            .set_analysis_status(id, AnalysisStatus::Failed)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn claim_is_exclusive() {
        let store = MemoryStore::new();
        let seg = successful_segment(&store).await;
        let ids = store
            .insert_detections(vec![detection(seg, 0), detection(seg, 250)])
            .await
            .unwrap();

        let first = store.claim_for_caption(&ids).await.unwrap();
        let second = store.claim_for_caption(&ids).await.unwrap();
        assert_eq!(first, ids);
        assert!(second.is_empty());
        assert!(store.pending_captions(None, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn caption_lifecycle() {
        let store = MemoryStore::new();
        let seg = successful_segment(&store).await;
        let ids = store
            .insert_detections(vec![detection(seg, 0), detection(seg, 250)])
            .await
            .unwrap();

        // Completing an unclaimed row does nothing
        assert!(!store.complete_caption(ids[0], "x", Utc::now()).await.unwrap());

        store.claim_for_caption(&ids).await.unwrap();
        assert!(store
            .complete_caption(ids[0], "a person", Utc::now())
            .await
            .unwrap());
        assert_eq!(store.fail_captions(&ids).await.unwrap(), 1);

        let done = store.get_detection(ids[0]).await.unwrap().unwrap();
        assert_eq!(done.caption.as_deref(), Some("a person"));
        assert_eq!(done.caption_status, CaptionStatus::Completed);
        let failed = store.get_detection(ids[1]).await.unwrap().unwrap();
        assert_eq!(failed.caption_status, CaptionStatus::Failed);
    }

    #[tokio::test]
    async fn pending_captions_respects_ids_and_limit() {
        let store = MemoryStore::new();
        let seg = successful_segment(&store).await;
        let ids = store
            .insert_detections((0..5).map(|i| detection(seg, i * 250)).collect())
            .await
            .unwrap();

        let subset = store
            .pending_captions(Some(&ids[1..3]), 100)
            .await
            .unwrap();
        assert_eq!(subset.iter().map(|d| d.id).collect::<Vec<_>>(), ids[1..3]);

        let capped = store.pending_captions(None, 2).await.unwrap();
        assert_eq!(capped.len(), 2);
        assert_eq!(capped[0].id, ids[0]);
    }

    #[tokio::test]
    async fn reset_analysis_cascades() {
        let store = MemoryStore::new();
        let seg = successful_segment(&store).await;
        let other = successful_segment(&store).await;
        store
            .insert_detections(vec![detection(seg, 0), detection(other, 0)])
            .await
            .unwrap();
        store.set_analysis_status(seg, AnalysisStatus::Processing).await.unwrap();
        store.set_analysis_status(seg, AnalysisStatus::Completed).await.unwrap();

        assert_eq!(store.reset_analysis(seg).await.unwrap(), 1);
        let seg_row = store.get_segment(seg).await.unwrap().unwrap();
        assert_eq!(seg_row.analysis_status, AnalysisStatus::Pending);
        assert!(seg_row.analysis_time.is_none());
        assert_eq!(store.list_for_segment(other).await.unwrap().len(), 1);

        assert!(store.reset_analysis(SegmentId(999)).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn list_filters_and_orders_newest_first() {
        let store = MemoryStore::new();
        let mut older = new_segment("a");
        older.start_time = Utc::now() - Duration::hours(2);
        let older = store.create_segment(older).await.unwrap();
        let newer = store.create_segment(new_segment("a")).await.unwrap();
        store.create_segment(new_segment("b")).await.unwrap();

        let filter = SegmentFilter {
            camera_id: Some("a".to_string()),
            ..Default::default()
        };
        let listed = store.list_segments(&filter).await.unwrap();
        assert_eq!(listed.iter().map(|s| s.id).collect::<Vec<_>>(), vec![newer.id, older.id]);
        assert_eq!(store.count_segments(&filter).await.unwrap(), 2);

        let recent = SegmentFilter {
            start_from: Some(Utc::now() - Duration::hours(1)),
            limit: Some(1),
            ..Default::default()
        };
        assert_eq!(store.list_segments(&recent).await.unwrap().len(), 1);
        assert_eq!(store.count_segments(&recent).await.unwrap(), 2);
    }
}
