//! Persistence for the camwatch pipeline.
//!
//! This crate provides:
//! - Repository traits for segments, detections and GPU snapshots
//! - [`PgStore`], a PostgreSQL implementation with embedded migrations
//! - [`MemoryStore`], an in-memory implementation with the same semantics

pub mod detections;
pub mod error;
pub mod gpu_metrics;
pub mod memory;
pub mod pool;
pub mod postgres;
pub mod repository;
pub mod segments;

pub use error::{DbError, DbResult};
pub use memory::MemoryStore;
pub use pool::{create_pool, PoolConfig};
pub use postgres::PgStore;
pub use repository::{
    DetectionRepository, GpuMetricsRepository, RecordingOutcome, SegmentFilter,
    SegmentRepository, Store,
};
