//! Database access layer using sqlx with PostgreSQL.
//!
//! The schema and its migrations belong to the CRUD service; this side only
//! reads configuration snapshots and appends call detail records.

pub mod cdr;
pub mod snapshot;

use sqlx::{postgres::PgPoolOptions, PgPool};
use std::time::Duration;

/// Initialize the database connection pool
pub async fn init_pool(database_url: &str) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(Duration::from_secs(5))
        .connect(database_url)
        .await
}
