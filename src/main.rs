use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use beatmap_sync::collection::CollectionFile;
use beatmap_sync::config::{self, Config};
use beatmap_sync::db;
use beatmap_sync::osu::OsuClient;
use beatmap_sync::pipeline::{self, SyncContext};
use beatmap_sync::processor::BeatmapProcessor;
use beatmap_sync::queue::{ConcurrentQueue, RateLimitedQueue};
use beatmap_sync::storage::LocalStorage;

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Walk the ranked catalog from the stored cursor
    Ranked,
    /// Download and review pending submissions
    Approve,
    /// Resubmit local beatmaps that changed upstream
    Freshness,
    /// Queue beatmaps for review
    Submit {
        #[arg(required = true)]
        ids: Vec<i64>,
    },
    /// Forget every beatmap and submission and rewind the cursor
    Reset,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = config::load(Some(&args.config))
        .with_context(|| format!("failed to load {}", args.config.display()))?;
    cfg.ensure_dirs()?;

    let database_url = std::env::var("DATABASE_URL").unwrap_or_else(|_| cfg.database_url());
    let pool = db::init_pool(&database_url).await?;
    db::run_migrations(&pool).await?;

    match args.command {
        Command::Submit { ids } => {
            for id in &ids {
                db::create_submission(&pool, *id).await?;
            }
            info!(count = ids.len(), "submissions queued");
        }
        Command::Reset => {
            db::reset(&pool).await?;
            info!("local state reset");
        }
        Command::Ranked => {
            let ctx = build_context(&cfg, pool)?;
            let report = pipeline::process_ranked_beatmaps(&ctx, &processing_queue(&cfg)).await?;
            info!(?report, "done");
        }
        Command::Approve => {
            let ctx = build_context(&cfg, pool)?;
            let download = &cfg.queues.download;
            let downloads = RateLimitedQueue::new(
                "downloads",
                download.concurrency,
                download.interval(),
                download.interval_cap,
                cfg.queues.task_timeout(),
            );
            let report =
                pipeline::approve_submissions(&ctx, &downloads, &processing_queue(&cfg)).await?;
            info!(?report, "done");
        }
        Command::Freshness => {
            let ctx = build_context(&cfg, pool)?;
            let report =
                pipeline::check_submissions_last_update(&ctx, &processing_queue(&cfg)).await?;
            info!(?report, "done");
        }
    }

    Ok(())
}

fn processing_queue(cfg: &Config) -> ConcurrentQueue {
    ConcurrentQueue::with_task_timeout(
        "processing",
        cfg.queues.concurrency,
        cfg.queues.task_timeout(),
    )
}

fn build_context(cfg: &Config, pool: db::Pool) -> Result<SyncContext> {
    let catalog = OsuClient::from_config(cfg)?;
    let storage = LocalStorage::new(cfg.app.beatmaps_path());
    let processor = BeatmapProcessor::new(pool.clone(), cfg.validation.clone());
    let artifact = CollectionFile::new(
        pool.clone(),
        cfg.app.collection_path(),
        cfg.app.collection_prefix.clone(),
    );
    Ok(SyncContext::new(
        pool,
        Arc::new(catalog),
        Arc::new(storage),
        processor,
        Arc::new(artifact),
    ))
}
