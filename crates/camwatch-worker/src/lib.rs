//! Recording, detection and captioning worker.
//!
//! This crate provides:
//! - The three pipeline stages and their handoffs
//! - Job executor with per-kind limits, retries and a dead letter queue
//! - Capture scheduler and the operational analyze command
//! - GPU telemetry sampling
//! - Graceful shutdown

pub mod analyze;
pub mod captioning;
pub mod config;
pub mod context;
pub mod detection;
pub mod error;
pub mod executor;
pub mod gpu;
pub mod logging;
pub mod metrics;
pub mod recording;
pub mod retry;
pub mod scheduler;

#[cfg(test)]
mod testing;

pub use config::{PipelineConfig, SchedulerConfig, WorkerConfig};
pub use context::ProcessingContext;
pub use error::{WorkerError, WorkerResult};
pub use executor::JobExecutor;
pub use logging::JobLogger;
pub use scheduler::CaptureScheduler;
