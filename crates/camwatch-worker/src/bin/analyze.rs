//! Operational re-trigger for detection and captioning.

use std::sync::Arc;

use anyhow::{Context as _, Result};
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};

use camwatch_db::{PgStore, PoolConfig};
use camwatch_models::StorageLayout;
use camwatch_queue::JobQueue;
use camwatch_worker::analyze::{day_bounds, enqueue_analysis, enqueue_caption_backlog, AnalyzeOptions};
use camwatch_worker::logging::init_tracing;

#[derive(Parser)]
#[command(
    name = "camwatch-analyze",
    version,
    about = "Queue person detection over recorded segments",
    args_conflicts_with_subcommands = true,
    after_help = "EXAMPLES:\n  \
                  camwatch-analyze --camera 192.168.1.64 --start 2024-05-01 --end 2024-05-02\n  \
                  camwatch-analyze --all --force --limit 50\n  \
                  camwatch-analyze captions"
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    #[command(flatten)]
    detect: DetectArgs,
}

#[derive(Subcommand)]
enum Commands {
    /// Queue one caption run over every pending detection
    Captions,
}

#[derive(Args)]
struct DetectArgs {
    /// Only this camera id
    #[arg(long)]
    camera: Option<String>,

    /// First local day to include (YYYY-MM-DD)
    #[arg(long)]
    start: Option<NaiveDate>,

    /// Last local day to include (YYYY-MM-DD)
    #[arg(long)]
    end: Option<NaiveDate>,

    /// Include segments that were already analyzed
    #[arg(long)]
    all: bool,

    /// Maximum number of segments
    #[arg(long)]
    limit: Option<i64>,

    /// Clear existing detections and analyze again, completed segments included
    #[arg(long)]
    force: bool,

    /// Print the matching segments without queueing anything
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("failed to install rustls crypto provider"))?;

    dotenvy::dotenv().ok();
    init_tracing();
    let cli = Cli::parse();

    let queue = Arc::new(JobQueue::from_env().context("creating job queue")?);
    queue.init().await.context("initializing job queue")?;

    if let Some(Commands::Captions) = cli.command {
        if enqueue_caption_backlog(queue.as_ref()).await? {
            println!("caption backlog job queued");
        } else {
            println!("caption backlog job already queued");
        }
        return Ok(());
    }

    let args = cli.detect;
    if let (Some(start), Some(end)) = (args.start, args.end) {
        anyhow::ensure!(start <= end, "--start {} is after --end {}", start, end);
    }

    let store = PgStore::connect(&PoolConfig::from_env())
        .await
        .context("connecting to database")?;
    let layout = StorageLayout::from_env();
    let (start, end) = day_bounds(&layout, args.start, args.end);

    let opts = AnalyzeOptions {
        camera_id: args.camera,
        start,
        end,
        all: args.all,
        limit: args.limit,
        force: args.force,
        dry_run: args.dry_run,
    };
    let summary = enqueue_analysis(&store, queue.as_ref(), &opts).await?;

    if opts.dry_run {
        for id in &summary.planned {
            println!("would analyze segment {}", id);
        }
    }
    println!(
        "matched: {}, enqueued: {}, skipped: {}, errors: {}",
        summary.matched, summary.enqueued, summary.skipped, summary.errors
    );

    if summary.errors > 0 {
        std::process::exit(2);
    }
    Ok(())
}
