//! Postgres backing for the job store.

use std::time::Duration;

use sqlx::{postgres::PgPoolOptions, PgPool};

pub mod queries;

/// Connections kept for the API handlers on top of one per worker.
const API_CONNECTIONS: u32 = 4;

/// Open a pool sized for `workers` concurrent jobs plus request traffic.
pub async fn init_pool(database_url: &str, workers: usize) -> Result<PgPool, sqlx::Error> {
    let workers = u32::try_from(workers).unwrap_or(u32::MAX);
    PgPoolOptions::new()
        .max_connections(workers.saturating_add(API_CONNECTIONS))
        .min_connections(1)
        .acquire_timeout(Duration::from_secs(10))
        .idle_timeout(Duration::from_secs(600))
        .connect(database_url)
        .await
}

/// Apply pending migrations for the `generation_jobs` table.
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}
