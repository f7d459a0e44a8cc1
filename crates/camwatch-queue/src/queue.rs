//! Job queue using Redis Streams.

use std::time::Duration;

use chrono::Utc;
use redis::AsyncCommands;
use tracing::{debug, info, warn};

use crate::error::{QueueError, QueueResult};
use crate::job::QueueJob;

/// Queue configuration.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Redis URL
    pub redis_url: String,
    /// Stream name for jobs
    pub stream_name: String,
    /// Consumer group name
    pub consumer_group: String,
    /// Dead letter queue stream name
    pub dlq_stream_name: String,
    /// Sorted set holding jobs waiting for their retry time
    pub delayed_set_name: String,
    /// Prefix for idempotency keys
    pub dedup_prefix: String,
    /// How long an idempotency key blocks duplicates
    pub dedup_ttl: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://localhost:6379".to_string(),
            stream_name: "camwatch:jobs".to_string(),
            consumer_group: "camwatch:workers".to_string(),
            dlq_stream_name: "camwatch:dlq".to_string(),
            delayed_set_name: "camwatch:delayed".to_string(),
            dedup_prefix: "camwatch:dedup".to_string(),
            dedup_ttl: Duration::from_secs(3600),
        }
    }
}

impl QueueConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            redis_url: std::env::var("REDIS_URL").unwrap_or(defaults.redis_url),
            stream_name: std::env::var("QUEUE_STREAM").unwrap_or(defaults.stream_name),
            consumer_group: std::env::var("QUEUE_CONSUMER_GROUP")
                .unwrap_or(defaults.consumer_group),
            dlq_stream_name: std::env::var("QUEUE_DLQ_STREAM").unwrap_or(defaults.dlq_stream_name),
            delayed_set_name: std::env::var("QUEUE_DELAYED_SET")
                .unwrap_or(defaults.delayed_set_name),
            dedup_prefix: defaults.dedup_prefix,
            dedup_ttl: Duration::from_secs(
                std::env::var("QUEUE_DEDUP_TTL_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(3600),
            ),
        }
    }
}

/// Job queue client.
pub struct JobQueue {
    client: redis::Client,
    config: QueueConfig,
}

impl JobQueue {
    /// Create a new job queue.
    pub fn new(config: QueueConfig) -> QueueResult<Self> {
        let client = redis::Client::open(config.redis_url.as_str())?;
        Ok(Self { client, config })
    }

    /// Create from environment variables.
    pub fn from_env() -> QueueResult<Self> {
        Self::new(QueueConfig::from_env())
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    async fn connection(&self) -> QueueResult<redis::aio::MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| QueueError::connection_failed(e.to_string()))
    }

    /// Initialize the queue (create consumer group if not exists).
    pub async fn init(&self) -> QueueResult<()> {
        let mut conn = self.connection().await?;

        let result: Result<(), redis::RedisError> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg("$")
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;

        match result {
            Ok(_) => info!("Created consumer group: {}", self.config.consumer_group),
            Err(e) if e.to_string().contains("BUSYGROUP") => {
                debug!("Consumer group already exists: {}", self.config.consumer_group);
            }
            Err(e) => return Err(QueueError::Redis(e)),
        }

        Ok(())
    }

    fn dedup_key(&self, job: &QueueJob) -> String {
        format!("{}:{}", self.config.dedup_prefix, job.idempotency_key())
    }

    /// Enqueue a job, rejecting it if its idempotency key is still held.
    pub async fn enqueue(&self, job: QueueJob) -> QueueResult<String> {
        let mut conn = self.connection().await?;

        let dedup_key = self.dedup_key(&job);
        // SET NX claims the key atomically so two producers cannot both pass.
        let claimed: bool = redis::cmd("SET")
            .arg(&dedup_key)
            .arg(job.job_id().as_str())
            .arg("NX")
            .arg("EX")
            .arg(self.config.dedup_ttl.as_secs().max(1))
            .query_async::<Option<String>>(&mut conn)
            .await?
            .is_some();
        if !claimed {
            warn!(key = %job.idempotency_key(), "Duplicate job rejected");
            return Err(QueueError::Duplicate(job.idempotency_key()));
        }

        match self.xadd(&mut conn, &job).await {
            Ok(message_id) => {
                info!(
                    job_id = %job.job_id(),
                    kind = %job.kind(),
                    message_id = %message_id,
                    "Enqueued job"
                );
                Ok(message_id)
            }
            Err(e) => {
                // Release the key so the producer can try again.
                let _: redis::RedisResult<()> = conn.del(&dedup_key).await;
                Err(e)
            }
        }
    }

    async fn xadd(
        &self,
        conn: &mut redis::aio::MultiplexedConnection,
        job: &QueueJob,
    ) -> QueueResult<String> {
        let payload = serde_json::to_string(job)?;
        let message_id: String = redis::cmd("XADD")
            .arg(&self.config.stream_name)
            .arg("*")
            .arg("job")
            .arg(&payload)
            .arg("key")
            .arg(job.idempotency_key())
            .query_async(conn)
            .await?;
        Ok(message_id)
    }

    /// Release a job's idempotency key so the same work can be queued again.
    pub async fn clear_dedup(&self, job: &QueueJob) -> QueueResult<()> {
        let mut conn = self.connection().await?;
        conn.del::<_, ()>(self.dedup_key(job)).await?;
        Ok(())
    }

    /// Acknowledge a job (mark as completed).
    pub async fn ack(&self, message_id: &str) -> QueueResult<()> {
        let mut conn = self.connection().await?;

        redis::cmd("XACK")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg(message_id)
            .query_async::<()>(&mut conn)
            .await?;

        redis::cmd("XDEL")
            .arg(&self.config.stream_name)
            .arg(message_id)
            .query_async::<()>(&mut conn)
            .await?;

        debug!("Acknowledged job: {}", message_id);
        Ok(())
    }

    /// Move a job to the dead letter queue.
    pub async fn dlq(&self, message_id: &str, job: &QueueJob, error: &str) -> QueueResult<()> {
        let mut conn = self.connection().await?;

        let payload = serde_json::to_string(job)?;

        redis::cmd("XADD")
            .arg(&self.config.dlq_stream_name)
            .arg("*")
            .arg("job")
            .arg(&payload)
            .arg("error")
            .arg(error)
            .arg("original_id")
            .arg(message_id)
            .query_async::<()>(&mut conn)
            .await?;

        self.ack(message_id).await?;

        warn!(job_id = %job.job_id(), kind = %job.kind(), "Moved job to DLQ: {}", error);
        Ok(())
    }

    /// Park a job in the delayed set until `delay` has elapsed.
    ///
    /// The idempotency key stays held, so the retry cannot be duplicated by
    /// a producer while it waits.
    pub async fn schedule_retry(&self, job: &QueueJob, delay: Duration) -> QueueResult<()> {
        let mut conn = self.connection().await?;

        let payload = serde_json::to_string(job)?;
        let due_ms = Utc::now().timestamp_millis() + delay.as_millis() as i64;
        conn.zadd::<_, _, _, ()>(&self.config.delayed_set_name, &payload, due_ms)
            .await?;

        info!(
            job_id = %job.job_id(),
            kind = %job.kind(),
            attempt = job.attempt(),
            delay_ms = delay.as_millis() as u64,
            "Scheduled job retry"
        );
        Ok(())
    }

    /// Move due delayed jobs into the stream. Returns how many were moved.
    ///
    /// Each member is moved only by the caller whose ZREM removed it, so
    /// concurrent promoters never duplicate a retry.
    pub async fn promote_due(&self, limit: usize) -> QueueResult<usize> {
        let mut conn = self.connection().await?;

        let now_ms = Utc::now().timestamp_millis();
        let due: Vec<String> = redis::cmd("ZRANGEBYSCORE")
            .arg(&self.config.delayed_set_name)
            .arg("-inf")
            .arg(now_ms)
            .arg("LIMIT")
            .arg(0)
            .arg(limit)
            .query_async(&mut conn)
            .await?;

        let mut promoted = 0;
        for payload in due {
            let removed: u32 = conn.zrem(&self.config.delayed_set_name, &payload).await?;
            if removed == 0 {
                continue;
            }

            match serde_json::from_str::<QueueJob>(&payload) {
                Ok(job) => {
                    self.xadd(&mut conn, &job).await?;
                    debug!(job_id = %job.job_id(), attempt = job.attempt(), "Promoted delayed job");
                    promoted += 1;
                }
                Err(e) => warn!("Dropping malformed delayed job payload: {}", e),
            }
        }

        Ok(promoted)
    }

    /// Get queue length.
    pub async fn len(&self) -> QueueResult<u64> {
        let mut conn = self.connection().await?;
        let len: u64 = conn.xlen(&self.config.stream_name).await?;
        Ok(len)
    }

    /// Get DLQ length.
    pub async fn dlq_len(&self) -> QueueResult<u64> {
        let mut conn = self.connection().await?;
        let len: u64 = conn.xlen(&self.config.dlq_stream_name).await?;
        Ok(len)
    }

    /// Number of jobs waiting for a retry.
    pub async fn delayed_len(&self) -> QueueResult<u64> {
        let mut conn = self.connection().await?;
        let len: u64 = conn.zcard(&self.config.delayed_set_name).await?;
        Ok(len)
    }

    /// Consume new jobs for this consumer.
    pub async fn consume(
        &self,
        consumer_name: &str,
        block_ms: u64,
        count: usize,
    ) -> QueueResult<Vec<(String, QueueJob)>> {
        let mut conn = self.connection().await?;

        let result: Option<redis::streams::StreamReadReply> = redis::cmd("XREADGROUP")
            .arg("GROUP")
            .arg(&self.config.consumer_group)
            .arg(consumer_name)
            .arg("COUNT")
            .arg(count)
            .arg("BLOCK")
            .arg(block_ms)
            .arg("STREAMS")
            .arg(&self.config.stream_name)
            .arg(">")
            .query_async(&mut conn)
            .await?;

        let Some(result) = result else {
            return Ok(Vec::new());
        };

        let mut jobs = Vec::new();
        for stream_key in result.keys {
            for entry in stream_key.ids {
                if let Some(job) = self.decode_entry(&entry).await {
                    debug!(job_id = %job.job_id(), "Consumed job from stream");
                    jobs.push((entry.id.clone(), job));
                }
            }
        }

        Ok(jobs)
    }

    /// Claim jobs left pending by crashed workers.
    pub async fn claim_pending(
        &self,
        consumer_name: &str,
        min_idle_ms: u64,
        count: usize,
    ) -> QueueResult<Vec<(String, QueueJob)>> {
        let mut conn = self.connection().await?;

        let result: redis::streams::StreamAutoClaimReply = redis::cmd("XAUTOCLAIM")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg(consumer_name)
            .arg(min_idle_ms)
            .arg("0-0")
            .arg("COUNT")
            .arg(count)
            .query_async(&mut conn)
            .await?;

        let mut jobs = Vec::new();
        for entry in result.claimed {
            if let Some(job) = self.decode_entry(&entry).await {
                info!(job_id = %job.job_id(), "Claimed pending job from stream");
                jobs.push((entry.id.clone(), job));
            }
        }

        Ok(jobs)
    }

    /// Decode a stream entry; malformed payloads are acked and dropped.
    async fn decode_entry(&self, entry: &redis::streams::StreamId) -> Option<QueueJob> {
        let Some(redis::Value::BulkString(payload)) = entry.map.get("job") else {
            warn!(message_id = %entry.id, "Stream entry without job payload");
            self.ack(&entry.id).await.ok();
            return None;
        };

        match serde_json::from_slice::<QueueJob>(payload) {
            Ok(job) => Some(job),
            Err(e) => {
                warn!(message_id = %entry.id, "Failed to parse job payload: {}", e);
                self.ack(&entry.id).await.ok();
                None
            }
        }
    }
}
