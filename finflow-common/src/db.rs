//! Database pool initialization
//!
//! All pipeline state (contracts, watermarks, staging, warehouse, runs,
//! model artifacts) lives in one SQLite file per data directory. Table
//! creation is owned by `finflow-etl::db::init_tables`.

use crate::Result;
use sqlx::SqlitePool;
use std::path::Path;

/// Open (or create) the warehouse database and return a connection pool
pub async fn init_database_pool(db_path: &Path) -> Result<SqlitePool> {
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    // SQLite URI with mode=rwc (read, write, create)
    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    tracing::debug!("Connecting to database: {}", db_url);

    let pool = SqlitePool::connect(&db_url).await?;
    Ok(pool)
}

/// In-memory pool for tests.
///
/// Capped at one connection: every pooled connection to `:memory:`
/// would otherwise get its own empty database.
pub async fn memory_pool() -> Result<SqlitePool> {
    Ok(sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await?)
}
