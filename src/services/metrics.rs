use lazy_static::lazy_static;
use prometheus::{register_counter, register_counter_vec, register_gauge, Counter, CounterVec, Gauge};
use sqlx::PgPool;
use tracing::{info, warn};

lazy_static! {
    // ── Event counters (increment on each event) ────────────────────────────
    pub static ref LOGINS_COUNTER: CounterVec = register_counter_vec!(
        "api_logins_total",
        "Login attempts by outcome",
        &["status"]
    ).unwrap();

    pub static ref REGISTRATIONS_COUNTER: Counter = register_counter!(
        "api_registrations_total",
        "Accounts registered"
    ).unwrap();

    pub static ref TASKS_CREATED_COUNTER: Counter = register_counter!(
        "api_tasks_created_total",
        "Tasks created"
    ).unwrap();

    pub static ref BLOBS_STORED_COUNTER: Counter = register_counter!(
        "api_blobs_stored_total",
        "Attachment blobs written to the blob store"
    ).unwrap();

    // ── Business metrics ────────────────────────────────────────────────────
    pub static ref USERS_GAUGE: Gauge = register_gauge!(
        "taskboard_users_total",
        "Registered users"
    ).unwrap();

    pub static ref GROUPS_GAUGE: Gauge = register_gauge!(
        "taskboard_groups_total",
        "Existing groups"
    ).unwrap();

    pub static ref TASKS_GAUGE: Gauge = register_gauge!(
        "taskboard_tasks_total",
        "Stored tasks"
    ).unwrap();
}

/// Spawn the background metrics collector (refreshes every 5 minutes).
pub fn start(pool: PgPool) {
    tokio::spawn(async move {
        // Initial collection on startup
        if let Err(e) = collect(&pool).await {
            warn!("Metrics: initial collection failed: {}", e);
        }
        loop {
            tokio::time::sleep(tokio::time::Duration::from_secs(300)).await;
            if let Err(e) = collect(&pool).await {
                warn!("Metrics: collection failed: {}", e);
            }
        }
    });
}

async fn collect(pool: &PgPool) -> anyhow::Result<()> {
    let (users, groups, tasks): (i64, i64, i64) = sqlx::query_as(
        "SELECT (SELECT COUNT(*) FROM users)::BIGINT,
                (SELECT COUNT(*) FROM groups)::BIGINT,
                (SELECT COUNT(*) FROM tasks)::BIGINT",
    )
    .fetch_one(pool)
    .await?;

    USERS_GAUGE.set(users as f64);
    GROUPS_GAUGE.set(groups as f64);
    TASKS_GAUGE.set(tasks as f64);

    info!("Metrics: {} users, {} groups, {} tasks", users, groups, tasks);
    Ok(())
}
