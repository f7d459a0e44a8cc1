//! Recording one segment from one camera.

use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::Serialize;

use camwatch_db::RecordingOutcome;
use camwatch_models::{NewSegment, RecordingStatus, SegmentId};
use camwatch_queue::{DetectPersonsJob, RecordCameraJob};

use crate::context::ProcessingContext;
use crate::error::{WorkerError, WorkerResult};
use crate::logging::JobLogger;
use crate::metrics;

/// Outcome of one recording attempt.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordingReport {
    pub segment_id: SegmentId,
    pub status: RecordingStatus,
    pub file_path: PathBuf,
    pub file_size: Option<u64>,
}

/// Record one segment and hand it to detection on success.
///
/// | capture result              | segment   | job result      |
/// |-----------------------------|-----------|-----------------|
/// | file written                | success   | `Ok`            |
/// | killed at the hard deadline | timeout   | `Ok`            |
/// | soft deadline exceeded      | timeout   | `Ok`            |
/// | non-zero exit               | failed    | `CaptureFailed` |
/// | anything else               | failed    | `Ok`            |
///
/// Only the non-zero exit is returned as an error so that the executor
/// retries it; every other outcome is already final once persisted.
pub async fn record_camera(
    ctx: &ProcessingContext,
    job: &RecordCameraJob,
) -> WorkerResult<RecordingReport> {
    let logger = JobLogger::new(&job.job_id, "record").with_attempt(job.attempt);
    let cfg = &ctx.pipeline;
    let camera = &job.camera;

    let start_time = Utc::now();
    let file_path = match &job.base_dir {
        Some(base) => ctx
            .layout
            .recording_path_under(Path::new(base), &camera.id, start_time),
        None => ctx.layout.recording_path(&camera.id, start_time),
    };

    // The row exists before capture starts so a crash leaves it in_progress
    let segment = ctx
        .store
        .create_segment(NewSegment {
            camera_id: camera.id.clone(),
            camera_user: camera.user.clone(),
            task_id: Some(job.job_id.to_string()),
            start_time,
            file_path: file_path.to_string_lossy().into_owned(),
        })
        .await?;

    logger.log_start(&format!(
        "segment {} from {} to {}",
        segment.id,
        camera.redacted_url(),
        file_path.display()
    ));

    let captured = tokio::time::timeout(
        cfg.capture_soft_timeout,
        ctx.capture
            .capture(camera, cfg.recording_duration, &file_path),
    )
    .await;

    let (outcome, retry_error) = match captured {
        Ok(Ok(output)) => (RecordingOutcome::success(output.size_bytes as i64), None),
        Ok(Err(e)) if e.is_timeout() => (
            RecordingOutcome::timeout(format!("capture killed at hard deadline: {}", e)),
            None,
        ),
        Ok(Err(e)) if e.is_nonzero_exit() => {
            let message = e.to_string();
            (
                RecordingOutcome::failed(message.clone()),
                Some(WorkerError::capture_failed(message)),
            )
        }
        Ok(Err(e)) => (RecordingOutcome::failed(e.to_string()), None),
        Err(_) => (
            RecordingOutcome::timeout(format!(
                "capture exceeded {}s soft deadline",
                cfg.capture_soft_timeout.as_secs()
            )),
            None,
        ),
    };

    let status = outcome.status;
    let file_size = outcome.file_size.map(|s| s as u64);
    let error_message = outcome.error_message.clone();
    if !ctx.store.finish_recording(segment.id, outcome).await? {
        logger.log_warning(&format!("segment {} was already finished", segment.id));
    }
    metrics::record_recording(status);

    match status {
        RecordingStatus::Success => {
            logger.log_completion(&format!(
                "segment {} recorded, {} bytes",
                segment.id,
                file_size.unwrap_or(0)
            ));
            let detect = DetectPersonsJob::new(segment.id);
            if let Err(e) = ctx.sink.submit(detect.into()).await {
                logger.log_warning(&format!(
                    "detection handoff for segment {} failed: {}",
                    segment.id, e
                ));
            }
        }
        _ => logger.log_error(&format!(
            "segment {} {}: {}",
            segment.id,
            status,
            error_message.as_deref().unwrap_or("unknown error")
        )),
    }

    if let Some(e) = retry_error {
        return Err(e);
    }

    Ok(RecordingReport {
        segment_id: segment.id,
        status,
        file_path,
        file_size,
    })
}
