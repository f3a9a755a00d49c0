/// Delete stored blobs that no task references any more.
/// Deleting a task leaves its attachments on disk; run this periodically
/// (e.g. cron: 0 3 * * * /app/purge-orphan-blobs) to reclaim the space.
///
/// Usage: purge-orphan-blobs [--dry-run] [--blob-dir DIR] [--min-age-minutes N]

use std::collections::HashSet;

use clap::Parser;
use sqlx::postgres::PgPoolOptions;

use taskboard_api::{
    services::tasks::TaskService,
    storage::{select_orphans, BlobStore},
};

#[derive(Parser)]
#[command(name = "purge-orphan-blobs", about = "Remove blobs not referenced by any task")]
struct Args {
    /// List what would be deleted without deleting it
    #[arg(long)]
    dry_run: bool,

    /// Blob directory (defaults to BLOB_DIR, then ./data/blobs)
    #[arg(long)]
    blob_dir: Option<String>,

    /// Leave blobs younger than this alone; their task may not be saved yet
    #[arg(long, default_value_t = 60)]
    min_age_minutes: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let args = Args::parse();

    let database_url = std::env::var("DATABASE_URL")
        .map_err(|_| anyhow::anyhow!("DATABASE_URL environment variable not set"))?;
    let blob_dir = args
        .blob_dir
        .or_else(|| std::env::var("BLOB_DIR").ok())
        .unwrap_or_else(|| "./data/blobs".to_string());

    let pool = PgPoolOptions::new()
        .max_connections(2)
        .connect(&database_url)
        .await?;

    let blobs = BlobStore::pending(&blob_dir);
    blobs.initialize().await;
    blobs.ready().await?;

    tracing::info!("Scanning {} for orphaned blobs...", blob_dir);

    let stored = blobs.list_keys().await?;
    let referenced: HashSet<String> = TaskService::referenced_blob_keys(&pool)
        .await?
        .into_iter()
        .collect();

    let cutoff_ms = (chrono::Utc::now().timestamp_millis().max(0) as u64)
        .saturating_sub(args.min_age_minutes.saturating_mul(60_000));
    let orphans = select_orphans(stored, &referenced, cutoff_ms);

    tracing::info!(
        "{} referenced, {} orphaned",
        referenced.len(),
        orphans.len()
    );

    let mut removed = 0usize;
    for key in &orphans {
        if args.dry_run {
            tracing::info!("Would delete {}", key);
            continue;
        }
        match blobs.delete(key).await {
            Ok(()) => removed += 1,
            Err(e) => tracing::error!("Error deleting blob {}: {}", key, e),
        }
    }

    if args.dry_run {
        tracing::info!("Dry run complete, nothing deleted");
    } else {
        tracing::info!("Removed {} orphaned blobs", removed);
    }

    Ok(())
}
