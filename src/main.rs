use std::sync::Arc;

use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use taskboard_api::{build_router, config::Config, db, services, storage::BlobStore, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;
    let config = Arc::new(config);

    let pool = db::create_pool(&config.database_url, config.db_max_connections).await?;
    db::run_migrations(&pool).await?;
    info!("Database connected and migrations applied");

    // Handlers await readiness, so the server can start accepting right away.
    let blobs = BlobStore::open(&config.blob_dir);

    services::metrics::start(pool.clone());

    let state = AppState {
        db: pool,
        blobs,
        config: config.clone(),
    };
    let app = build_router(state);

    let addr = format!("{}:{}", config.host, config.port);
    info!("taskboard API listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
