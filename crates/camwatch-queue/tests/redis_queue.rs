//! Redis queue integration tests.

use std::time::Duration;

use camwatch_models::{JobId, SegmentId};
use camwatch_queue::{DetectPersonsJob, JobQueue, QueueConfig, QueueJob};

/// Queue on throwaway stream names so tests never see each other's jobs.
async fn isolated_queue() -> JobQueue {
    dotenvy::dotenv().ok();

    let suffix = JobId::new();
    let base = QueueConfig::from_env();
    let config = QueueConfig {
        stream_name: format!("camwatch:test:{}:jobs", suffix),
        consumer_group: format!("camwatch:test:{}:workers", suffix),
        dlq_stream_name: format!("camwatch:test:{}:dlq", suffix),
        delayed_set_name: format!("camwatch:test:{}:delayed", suffix),
        dedup_prefix: format!("camwatch:test:{}:dedup", suffix),
        ..base
    };

    let queue = JobQueue::new(config).expect("Failed to create queue");
    queue.init().await.expect("Failed to initialize queue");
    queue
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_enqueue_consume_ack() {
    let queue = isolated_queue().await;

    let job: QueueJob = DetectPersonsJob::new(SegmentId(101)).into();
    let job_id = job.job_id().clone();
    queue.enqueue(job.clone()).await.expect("Failed to enqueue");

    let jobs = queue.consume("test-consumer", 1000, 5).await.expect("Failed to consume");
    assert_eq!(jobs.len(), 1);
    let (message_id, consumed) = &jobs[0];
    assert_eq!(consumed.job_id(), &job_id);

    queue.ack(message_id).await.expect("Failed to ack");
    queue.clear_dedup(&job).await.expect("Failed to clear dedup");
    assert_eq!(queue.len().await.unwrap(), 0);
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_duplicate_is_rejected_until_cleared() {
    let queue = isolated_queue().await;

    let job: QueueJob = DetectPersonsJob::new(SegmentId(7)).into();
    queue.enqueue(job.clone()).await.expect("first enqueue");

    let err = queue
        .enqueue(DetectPersonsJob::new(SegmentId(7)).into())
        .await
        .expect_err("duplicate must be rejected");
    assert!(err.is_duplicate());

    queue.clear_dedup(&job).await.unwrap();
    queue
        .enqueue(DetectPersonsJob::new(SegmentId(7)).into())
        .await
        .expect("enqueue after clearing dedup");
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_delayed_retry_is_promoted_once() {
    let queue = isolated_queue().await;

    let job: QueueJob = DetectPersonsJob::new(SegmentId(55)).into();
    let retry = job.next_attempt();
    queue
        .schedule_retry(&retry, Duration::from_millis(0))
        .await
        .expect("schedule retry");
    assert_eq!(queue.delayed_len().await.unwrap(), 1);

    assert_eq!(queue.promote_due(10).await.unwrap(), 1);
    assert_eq!(queue.promote_due(10).await.unwrap(), 0);

    let jobs = queue.consume("test-consumer", 1000, 5).await.unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].1.attempt(), 1);
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_dlq_acks_original() {
    let queue = isolated_queue().await;

    let job: QueueJob = DetectPersonsJob::new(SegmentId(9)).into();
    queue.enqueue(job.clone()).await.unwrap();
    let jobs = queue.consume("test-consumer", 1000, 1).await.unwrap();
    let (message_id, consumed) = &jobs[0];

    queue.dlq(message_id, consumed, "boom").await.expect("move to DLQ");
    assert_eq!(queue.dlq_len().await.unwrap(), 1);
    assert_eq!(queue.len().await.unwrap(), 0);
}
