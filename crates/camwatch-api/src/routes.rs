//! API routes.

use std::sync::Arc;

use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::limit::RequestBodyLimitLayer;

use crate::handlers::{
    get_gpu_metrics, get_queue_status, get_segment, health, list_segment_detections,
    list_segments, ready, reanalyze_segment,
};
use crate::metrics::metrics_middleware;
use crate::middleware::{
    cors_layer, rate_limit_middleware, request_id, request_logging, security_headers,
    RateLimiterCache,
};
use crate::state::AppState;

/// Create the API router.
pub fn create_router(state: AppState, metrics_handle: Option<PrometheusHandle>) -> Router {
    let segment_routes = Router::new()
        .route("/segments", get(list_segments))
        .route("/segments/:id", get(get_segment))
        .route("/segments/:id/detections", get(list_segment_detections))
        .route("/segments/:id/reanalyze", post(reanalyze_segment));

    let ops_routes = Router::new()
        .route("/queue/status", get(get_queue_status))
        .route("/gpu/metrics", get(get_gpu_metrics));

    let rate_limiter = Arc::new(RateLimiterCache::new(state.config.rate_limit_rps));
    let api_routes = Router::new()
        .merge(segment_routes)
        .merge(ops_routes)
        .layer(middleware::from_fn_with_state(
            rate_limiter,
            rate_limit_middleware,
        ));

    let health_routes = Router::new()
        .route("/health", get(health))
        .route("/healthz", get(health))
        .route("/ready", get(ready));

    let metrics_routes = if let Some(handle) = metrics_handle {
        Router::new().route(
            "/metrics",
            get(move || {
                let handle = handle.clone();
                async move { handle.render() }
            }),
        )
    } else {
        Router::new()
    };

    Router::new()
        .nest("/api", api_routes)
        .merge(health_routes)
        .merge(metrics_routes)
        .layer(RequestBodyLimitLayer::new(state.config.max_body_size))
        .layer(middleware::from_fn(metrics_middleware))
        .layer(middleware::from_fn(security_headers))
        .layer(middleware::from_fn(request_id))
        .layer(middleware::from_fn(request_logging))
        .layer(cors_layer(&state.config.cors_origins))
        .with_state(state)
}
