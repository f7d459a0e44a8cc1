//! Recording scheduler binary.
//!
//! Enqueues one recording per configured camera every interval.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{error, info};

use camwatch_queue::JobQueue;
use camwatch_worker::logging::init_tracing;
use camwatch_worker::{CaptureScheduler, SchedulerConfig};

#[tokio::main]
async fn main() {
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    dotenvy::dotenv().ok();
    init_tracing();

    let config = SchedulerConfig::from_env();
    if config.cameras.is_empty() {
        error!("No cameras configured (set CAMERA1_HOST and friends)");
        std::process::exit(1);
    }
    for camera in &config.cameras {
        info!(camera_id = %camera.id, url = %camera.redacted_url(), "Camera configured");
    }

    let queue = match JobQueue::from_env() {
        Ok(q) => q,
        Err(e) => {
            error!("Failed to create job queue: {}", e);
            std::process::exit(1);
        }
    };
    if let Err(e) = queue.init().await {
        error!("Failed to initialize job queue: {}", e);
        std::process::exit(1);
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Received shutdown signal");
        let _ = shutdown_tx.send(true);
    });

    CaptureScheduler::new(config, Arc::new(queue))
        .run(shutdown_rx)
        .await;
}
