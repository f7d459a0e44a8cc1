//! Administrative HTTP API.
//!
//! This crate provides:
//! - Health and readiness probes for Redis and PostgreSQL
//! - Segment and detection queries, single-segment reanalysis
//! - Queue status and GPU telemetry series
//! - Rate limiting, security headers and Prometheus metrics

pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod routes;
pub mod state;

pub use config::ApiConfig;
pub use error::{ApiError, ApiResult};
pub use routes::create_router;
pub use state::{AppState, QueueInspector, QueueStats};
