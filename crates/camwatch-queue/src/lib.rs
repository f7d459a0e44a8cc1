//! Redis Streams job queue.
//!
//! This crate provides:
//! - Job payloads for the recording, detection and captioning stages
//! - Enqueueing with idempotency keys via Redis Streams
//! - Consumer-group consumption, crash recovery and a dead letter queue
//! - Delayed retries through a sorted set, with per-kind retry policies

pub mod error;
pub mod job;
pub mod policy;
pub mod queue;
pub mod sink;

pub use error::{QueueError, QueueResult};
pub use job::{CaptionDetectionsJob, DetectPersonsJob, JobKind, QueueJob, RecordCameraJob};
pub use policy::{Backoff, RetryPolicy};
pub use queue::{JobQueue, QueueConfig};
pub use sink::{CollectingSink, JobSink};
