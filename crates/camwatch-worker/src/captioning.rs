//! Batched captioning of detection crops.

use std::collections::HashSet;

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, warn};

use camwatch_media::{load_image, RgbImage};
use camwatch_ml_client::{CaptionModel, ModelLease};
use camwatch_models::{CaptionStatus, Detection, DetectionId, GpuTaskType};
use camwatch_queue::CaptionDetectionsJob;

use crate::context::ProcessingContext;
use crate::error::WorkerResult;
use crate::gpu::capture_snapshot;
use crate::logging::JobLogger;
use crate::metrics;

/// Counts for one captioning run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CaptionReport {
    /// Pending candidates selected for this run
    pub selected: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Candidates another run claimed first
    pub skipped: usize,
}

/// Caption the job's detections, or the pending backlog.
///
/// Per-image and per-batch failures are recorded on the detections and do
/// not fail the run; only errors outside a batch (model load, candidate
/// selection) propagate.
pub async fn caption_detections(
    ctx: &ProcessingContext,
    job: &CaptionDetectionsJob,
) -> WorkerResult<CaptionReport> {
    let logger = JobLogger::new(&job.job_id, "caption").with_attempt(job.attempt);
    let cfg = &ctx.pipeline;

    let limit = match &job.detection_ids {
        Some(ids) => ids.len() as i64,
        None => cfg.caption_max_per_run,
    };
    let candidates = ctx
        .store
        .pending_captions(job.detection_ids.as_deref(), limit)
        .await?;

    let mut report = CaptionReport {
        selected: candidates.len(),
        ..Default::default()
    };
    if candidates.is_empty() {
        logger.log_progress("no pending detections");
        return Ok(report);
    }

    logger.log_start(&format!("{} pending detections", candidates.len()));
    capture_snapshot(ctx.gpu.as_ref(), ctx.store.as_ref(), GpuTaskType::Captioning).await;

    let model = ModelLease::new(ctx.models.load_captioner().await?);

    let mut result = Ok(());
    for (n, batch) in candidates.chunks(cfg.caption_batch_size).enumerate() {
        debug!(batch = n, size = batch.len(), "Captioning batch");
        if let Err(e) = caption_batch(ctx, &*model, batch, &mut report).await {
            result = Err(e);
            break;
        }
    }

    if let Err(e) = model.release().await {
        logger.log_warning(&format!("failed to release captioner: {}", e));
    }
    capture_snapshot(ctx.gpu.as_ref(), ctx.store.as_ref(), GpuTaskType::Captioning).await;

    metrics::record_captions(CaptionStatus::Completed, report.succeeded);
    metrics::record_captions(CaptionStatus::Failed, report.failed);
    result?;

    logger.log_completion(&format!(
        "{} captioned, {} failed, {} claimed elsewhere",
        report.succeeded, report.failed, report.skipped
    ));
    Ok(report)
}

/// Claim, load, infer and persist one batch.
///
/// Returns an error only when the store itself fails.
async fn caption_batch(
    ctx: &ProcessingContext,
    model: &dyn CaptionModel,
    batch: &[Detection],
    report: &mut CaptionReport,
) -> WorkerResult<()> {
    let ids: Vec<DetectionId> = batch.iter().map(|d| d.id).collect();
    let claimed: HashSet<DetectionId> = ctx
        .store
        .claim_for_caption(&ids)
        .await?
        .into_iter()
        .collect();
    report.skipped += batch.len() - claimed.len();

    let mut valid: Vec<DetectionId> = Vec::with_capacity(claimed.len());
    let mut images: Vec<RgbImage> = Vec::with_capacity(claimed.len());
    let mut unreadable: Vec<DetectionId> = Vec::new();
    for detection in batch.iter().filter(|d| claimed.contains(&d.id)) {
        match load_image(&detection.image_path).await {
            Ok(image) => {
                valid.push(detection.id);
                images.push(image);
            }
            Err(e) => {
                warn!(
                    detection_id = %detection.id,
                    path = %detection.image_path,
                    "Cannot load crop: {}",
                    e
                );
                unreadable.push(detection.id);
            }
        }
    }

    if !unreadable.is_empty() {
        ctx.store.fail_captions(&unreadable).await?;
        report.failed += unreadable.len();
    }
    if valid.is_empty() {
        return Ok(());
    }

    let captions = match model.caption(&images, &ctx.pipeline.caption_options).await {
        Ok(captions) if captions.len() == valid.len() => captions,
        Ok(captions) => {
            warn!(
                expected = valid.len(),
                got = captions.len(),
                "Caption count mismatch, failing batch"
            );
            ctx.store.fail_captions(&valid).await?;
            report.failed += valid.len();
            return Ok(());
        }
        Err(e) => {
            warn!(size = valid.len(), "Caption batch failed: {}", e);
            ctx.store.fail_captions(&valid).await?;
            report.failed += valid.len();
            return Ok(());
        }
    };

    let now = Utc::now();
    for (id, caption) in valid.iter().zip(&captions) {
        if ctx.store.complete_caption(*id, caption, now).await? {
            report.succeeded += 1;
        } else {
            warn!(detection_id = %id, "Caption not stored, detection left processing");
            report.failed += 1;
        }
    }
    Ok(())
}
