//! Pipeline worker binary.

use std::sync::Arc;

use tracing::{error, info};

use camwatch_queue::JobQueue;
use camwatch_worker::logging::init_tracing;
use camwatch_worker::metrics::init_metrics;
use camwatch_worker::{JobExecutor, PipelineConfig, ProcessingContext, WorkerConfig};

#[tokio::main]
async fn main() {
    // Install rustls crypto provider (required for TLS/HTTPS)
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    dotenvy::dotenv().ok();
    init_tracing();

    info!("Starting camwatch-worker");

    let config = WorkerConfig::from_env();
    info!("Worker config: {:?}", config);

    let pipeline = PipelineConfig::from_env();
    if let Err(e) = pipeline.validate() {
        error!("Invalid pipeline configuration: {}", e);
        std::process::exit(1);
    }

    if let Some(port) = config.metrics_port {
        match init_metrics(port) {
            Ok(()) => info!("Prometheus metrics on port {}", port),
            Err(e) => {
                error!("Failed to start metrics exporter: {}", e);
                std::process::exit(1);
            }
        }
    }

    let queue = match JobQueue::from_env() {
        Ok(q) => Arc::new(q),
        Err(e) => {
            error!("Failed to create job queue: {}", e);
            std::process::exit(1);
        }
    };

    // Stages hand off through the same queue the executor consumes
    let ctx = match ProcessingContext::connect(queue.clone(), pipeline).await {
        Ok(ctx) => ctx,
        Err(e) => {
            error!("Failed to create processing context: {}", e);
            std::process::exit(1);
        }
    };

    let executor = Arc::new(JobExecutor::new(config, queue, ctx));

    let signal_executor = Arc::clone(&executor);
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Received shutdown signal");
        signal_executor.shutdown();
    });

    if let Err(e) = executor.run().await {
        error!("Executor error: {}", e);
        std::process::exit(1);
    }

    info!("Worker shutdown complete");
}
