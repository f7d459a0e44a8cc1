//! Person detection over one recorded segment.
//!
//! Frames are read strictly in order. Every `stride`-th frame is buffered;
//! full buffers go to the detector in one call. Each frame contributes at
//! most its best person box, and a frame is only accepted when it is at
//! least `dedup_window` seconds after the last accepted one. The dedup clock
//! is carried across batches.

use std::path::Path;

use serde::Serialize;
use tracing::{debug, info, warn};

use camwatch_media::{save_crop, FrameReader, RgbImage};
use camwatch_ml_client::{BoxPrediction, DetectionModel, ModelLease};
use camwatch_models::{
    AnalysisStatus, DetectionId, GpuTaskType, NewDetection, RecordingSegment, SegmentId,
};
use camwatch_queue::{CaptionDetectionsJob, DetectPersonsJob};

use crate::context::ProcessingContext;
use crate::error::{WorkerError, WorkerResult};
use crate::gpu::capture_snapshot;
use crate::logging::JobLogger;
use crate::metrics;

/// Picks which frame indices are sent to the detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameSampler {
    stride: u64,
}

impl FrameSampler {
    /// One sample every `interval_secs` of video, and never less than every frame.
    pub fn new(fps: f64, interval_secs: f64) -> Self {
        let stride = (fps * interval_secs).round();
        let stride = if stride.is_finite() && stride >= 1.0 {
            stride as u64
        } else {
            1
        };
        Self { stride }
    }

    pub fn stride(&self) -> u64 {
        self.stride
    }

    pub fn is_sampled(&self, frame_index: u64) -> bool {
        frame_index % self.stride == 0
    }
}

/// Running dedup state for one segment.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DedupWindow {
    window_secs: f64,
    last_accepted: f64,
}

impl DedupWindow {
    /// The clock starts one window in the past so the first sighting always passes.
    pub fn new(window_secs: f64) -> Self {
        Self {
            window_secs,
            last_accepted: -window_secs,
        }
    }

    /// Accept `timestamp` if it is far enough from the last accepted one.
    pub fn accept(&mut self, timestamp: f64) -> bool {
        if timestamp - self.last_accepted < self.window_secs {
            return false;
        }
        self.last_accepted = timestamp;
        true
    }
}

/// Highest-confidence person box at or above `threshold`.
pub fn best_person(predictions: &[BoxPrediction], threshold: f32) -> Option<BoxPrediction> {
    predictions
        .iter()
        .filter(|p| p.is_person() && p.confidence >= threshold)
        .copied()
        .max_by(|a, b| a.confidence.total_cmp(&b.confidence))
}

/// Outcome of one detection job.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetectionReport {
    pub segment_id: SegmentId,
    /// Nothing ran: the segment was already analyzed
    pub skipped: bool,
    pub frames_sampled: u64,
    pub detection_ids: Vec<DetectionId>,
}

/// Frames buffered for one detector call.
struct FrameBatch {
    indices: Vec<u64>,
    frames: Vec<RgbImage>,
}

impl FrameBatch {
    fn with_capacity(n: usize) -> Self {
        Self {
            indices: Vec::with_capacity(n),
            frames: Vec::with_capacity(n),
        }
    }

    fn push(&mut self, index: u64, frame: RgbImage) {
        self.indices.push(index);
        self.frames.push(frame);
    }

    fn len(&self) -> usize {
        self.frames.len()
    }

    fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

/// State of one scan over a segment's frames.
struct SegmentScan<'a> {
    ctx: &'a ProcessingContext,
    segment: &'a RecordingSegment,
    model: &'a dyn DetectionModel,
    fps: f64,
    dedup: DedupWindow,
    frames_sampled: u64,
    detection_ids: Vec<DetectionId>,
}

impl<'a> SegmentScan<'a> {
    async fn run(mut self, reader: &mut dyn FrameReader) -> WorkerResult<(u64, Vec<DetectionId>)> {
        let ctx = self.ctx;
        let cfg = &ctx.pipeline;
        let sampler = FrameSampler::new(self.fps, cfg.sampling_interval_secs);
        debug!(
            segment_id = %self.segment.id,
            fps = self.fps,
            stride = sampler.stride(),
            "Scanning segment"
        );

        let mut batch = FrameBatch::with_capacity(cfg.detection_batch_size);
        let mut index: u64 = 0;
        loop {
            if sampler.is_sampled(index) {
                match reader.next_frame().await? {
                    Some(frame) => batch.push(index, frame),
                    None => break,
                }
            } else if !reader.skip_frame().await? {
                break;
            }
            index += 1;

            if batch.len() >= cfg.detection_batch_size {
                let full = std::mem::replace(
                    &mut batch,
                    FrameBatch::with_capacity(cfg.detection_batch_size),
                );
                self.flush(full).await?;
            }
        }

        if !batch.is_empty() {
            self.flush(batch).await?;
        }

        Ok((self.frames_sampled, self.detection_ids))
    }

    /// Infer one batch, dedup, save crops and insert the accepted rows.
    async fn flush(&mut self, batch: FrameBatch) -> WorkerResult<()> {
        self.frames_sampled += batch.len() as u64;
        let results = self.model.detect(&batch.frames).await?;
        if results.len() != batch.len() {
            return Err(WorkerError::detection_failed(format!(
                "detector returned {} results for {} frames",
                results.len(),
                batch.len()
            )));
        }

        let threshold = self.ctx.pipeline.confidence_threshold;
        let mut accepted = Vec::new();
        for ((index, frame), predictions) in batch.indices.iter().zip(&batch.frames).zip(&results) {
            let Some(best) = best_person(predictions, threshold) else {
                continue;
            };
            let timestamp = *index as f64 / self.fps;
            if !self.dedup.accept(timestamp) {
                continue;
            }

            let image_path = self.ctx.layout.crop_path(
                &self.segment.camera_id,
                self.segment.start_time,
                self.segment.id.get(),
                *index as i64,
            );
            save_crop(frame, &best.bbox, &image_path).await?;

            accepted.push(NewDetection {
                segment_id: self.segment.id,
                frame_index: *index as i64,
                timestamp_secs: timestamp,
                image_path: image_path.to_string_lossy().into_owned(),
                confidence: best.confidence,
                bbox: best.bbox,
            });
        }

        if !accepted.is_empty() {
            debug!(
                segment_id = %self.segment.id,
                accepted = accepted.len(),
                "Persisting detections"
            );
            let ids = self.ctx.store.insert_detections(accepted).await?;
            self.detection_ids.extend(ids);
        }
        Ok(())
    }
}

/// Run person detection for one segment.
pub async fn detect_persons(
    ctx: &ProcessingContext,
    job: &DetectPersonsJob,
) -> WorkerResult<DetectionReport> {
    let logger = JobLogger::new(&job.job_id, "detect").with_attempt(job.attempt);

    let segment = ctx
        .store
        .get_segment(job.segment_id)
        .await?
        .ok_or_else(|| WorkerError::invalid_job(format!("segment {} not found", job.segment_id)))?;

    if !job.force && segment.analysis_status == AnalysisStatus::Completed {
        logger.log_progress(&format!("segment {} already analyzed, skipping", segment.id));
        return Ok(DetectionReport {
            segment_id: segment.id,
            skipped: true,
            frames_sampled: 0,
            detection_ids: Vec::new(),
        });
    }

    let Some(path) = segment.path().filter(|_| segment.is_analyzable()) else {
        mark_failed(ctx, segment.id).await;
        return Err(WorkerError::input_missing(format!(
            "segment {} has no successful recording",
            segment.id
        )));
    };
    if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
        mark_failed(ctx, segment.id).await;
        return Err(WorkerError::input_missing(format!(
            "recording {} is missing",
            path.display()
        )));
    }

    // Redelivered or forced runs start from a clean slate
    let stale = ctx.store.delete_for_segment(segment.id).await?;
    if stale > 0 {
        logger.log_warning(&format!("removed {} stale detections", stale));
    }

    if !ctx
        .store
        .set_analysis_status(segment.id, AnalysisStatus::Processing)
        .await?
    {
        return Err(WorkerError::invalid_job(format!(
            "segment {} cannot enter processing",
            segment.id
        )));
    }

    logger.log_start(&format!(
        "segment {} camera {} file {}",
        segment.id,
        segment.camera_id,
        path.display()
    ));
    capture_snapshot(ctx.gpu.as_ref(), ctx.store.as_ref(), GpuTaskType::Detection).await;

    let result = analyze_file(ctx, &segment, &path).await;

    capture_snapshot(ctx.gpu.as_ref(), ctx.store.as_ref(), GpuTaskType::Detection).await;

    let (frames_sampled, detection_ids) = match result {
        Ok(found) => found,
        Err(e) => {
            logger.log_error(&format!("segment {}: {}", segment.id, e));
            mark_failed(ctx, segment.id).await;
            return Err(e);
        }
    };

    if !ctx
        .store
        .set_analysis_status(segment.id, AnalysisStatus::Completed)
        .await?
    {
        logger.log_warning(&format!("segment {} left processing concurrently", segment.id));
    }
    metrics::record_detection_run(frames_sampled, detection_ids.len());

    if !detection_ids.is_empty() {
        let caption = CaptionDetectionsJob::for_detections(segment.id, detection_ids.clone());
        if let Err(e) = ctx.sink.submit(caption.into()).await {
            logger.log_warning(&format!("caption handoff failed: {}", e));
        }
    }

    logger.log_completion(&format!(
        "segment {}: {} frames sampled, {} detections",
        segment.id,
        frames_sampled,
        detection_ids.len()
    ));

    Ok(DetectionReport {
        segment_id: segment.id,
        skipped: false,
        frames_sampled,
        detection_ids,
    })
}

/// Open the video and the detector, scan, then release both on every path.
async fn analyze_file(
    ctx: &ProcessingContext,
    segment: &RecordingSegment,
    path: &Path,
) -> WorkerResult<(u64, Vec<DetectionId>)> {
    let mut reader = ctx.video.open(path).await?;

    let model = match ctx.models.load_detector().await {
        Ok(model) => ModelLease::new(model),
        Err(e) => {
            reader.close().await;
            return Err(e.into());
        }
    };

    let scan = SegmentScan {
        ctx,
        segment,
        model: &*model,
        fps: reader.info().fps,
        dedup: DedupWindow::new(ctx.pipeline.dedup_window_secs),
        frames_sampled: 0,
        detection_ids: Vec::new(),
    };
    let result = scan.run(reader.as_mut()).await;

    reader.close().await;
    if let Err(e) = model.release().await {
        warn!(segment_id = %segment.id, "Failed to release detector: {}", e);
    }

    result
}

async fn mark_failed(ctx: &ProcessingContext, segment_id: SegmentId) {
    match ctx
        .store
        .set_analysis_status(segment_id, AnalysisStatus::Failed)
        .await
    {
        Ok(true) => info!(segment_id = %segment_id, "Marked analysis failed"),
        Ok(false) => debug!(segment_id = %segment_id, "Analysis status not moved to failed"),
        Err(e) => warn!(segment_id = %segment_id, "Failed to mark analysis failed: {}", e),
    }
}
