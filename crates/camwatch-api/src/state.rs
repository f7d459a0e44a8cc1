//! Application state.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;

use camwatch_db::{PgStore, PoolConfig, Store};
use camwatch_models::StorageLayout;
use camwatch_queue::{JobQueue, JobSink, QueueResult};

use crate::config::ApiConfig;

/// Lengths of the job stream, the dead letter stream and the retry set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub queue_length: u64,
    pub dlq_length: u64,
    pub delayed_length: u64,
}

/// Read-only view of the job queue.
#[async_trait]
pub trait QueueInspector: Send + Sync {
    async fn stats(&self) -> QueueResult<QueueStats>;
}

#[async_trait]
impl QueueInspector for JobQueue {
    async fn stats(&self) -> QueueResult<QueueStats> {
        Ok(QueueStats {
            queue_length: self.len().await?,
            dlq_length: self.dlq_len().await?,
            delayed_length: self.delayed_len().await?,
        })
    }
}

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: ApiConfig,
    pub store: Arc<dyn Store>,
    /// Where reanalysis jobs are submitted
    pub sink: Arc<dyn JobSink>,
    pub queue: Arc<dyn QueueInspector>,
    pub layout: StorageLayout,
}

impl AppState {
    /// Connect to PostgreSQL and Redis.
    pub async fn new(config: ApiConfig) -> Result<Self, Box<dyn std::error::Error>> {
        let store = PgStore::connect(&PoolConfig::from_env()).await?;
        let queue = Arc::new(JobQueue::from_env()?);
        queue.init().await?;

        Ok(Self {
            config,
            store: Arc::new(store),
            sink: queue.clone(),
            queue,
            layout: StorageLayout::from_env(),
        })
    }
}
