//! Queue status handler.

use axum::extract::State;
use axum::Json;

use crate::error::ApiResult;
use crate::metrics;
use crate::state::{AppState, QueueStats};

/// Lengths of the job stream, dead letter stream and retry set.
pub async fn get_queue_status(State(state): State<AppState>) -> ApiResult<Json<QueueStats>> {
    let stats = state.queue.stats().await?;
    metrics::set_queue_stats(&stats);
    Ok(Json(stats))
}
