//! Database access for finflow-etl
//!
//! One module per table group, raw sqlx queries throughout. Timestamps
//! are stored as RFC3339 text; JSON columns hold serde-serialized
//! structures.

pub mod artifacts;
pub mod contracts;
pub mod runs;
pub mod staging;
pub mod warehouse;
pub mod watermarks;

use finflow_common::Result;
use sqlx::SqlitePool;

/// Create all finflow tables if they don't exist.
///
/// Safe to call on every startup; creation is idempotent.
pub async fn init_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS schema_contracts (
            domain TEXT NOT NULL,
            version INTEGER NOT NULL,
            definition TEXT NOT NULL,
            registered_at TEXT NOT NULL,
            PRIMARY KEY (domain, version)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS watermarks (
            domain TEXT PRIMARY KEY,
            value TEXT NOT NULL,
            version INTEGER NOT NULL DEFAULT 1,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS raw_records (
            record_id TEXT PRIMARY KEY,
            domain TEXT NOT NULL,
            source TEXT NOT NULL,
            payload TEXT NOT NULL,
            source_timestamp TEXT NOT NULL,
            ingested_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS rejected_records (
            record_id TEXT PRIMARY KEY,
            domain TEXT NOT NULL,
            source TEXT NOT NULL,
            field TEXT NOT NULL,
            rule TEXT NOT NULL,
            reason TEXT NOT NULL,
            source_timestamp TEXT NOT NULL,
            payload TEXT NOT NULL,
            recorded_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS dimensional_rows (
            row_id INTEGER PRIMARY KEY AUTOINCREMENT,
            domain TEXT NOT NULL,
            business_key TEXT NOT NULL,
            attributes TEXT NOT NULL,
            attr_hash TEXT NOT NULL,
            measure REAL,
            valid_from TEXT NOT NULL,
            valid_to TEXT,
            source TEXT NOT NULL,
            record_id TEXT NOT NULL,
            loaded_at TEXT NOT NULL,
            UNIQUE (domain, business_key, valid_from)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_dimensional_current
         ON dimensional_rows (domain, business_key) WHERE valid_to IS NULL",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS pipeline_runs (
            run_id TEXT PRIMARY KEY,
            domain TEXT NOT NULL,
            run_trigger TEXT NOT NULL,
            state TEXT NOT NULL,
            stages TEXT NOT NULL,
            counters TEXT NOT NULL,
            errors TEXT NOT NULL DEFAULT '[]',
            started_at TEXT NOT NULL,
            ended_at TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS forecast_models (
            artifact_id TEXT PRIMARY KEY,
            domain TEXT NOT NULL,
            status TEXT NOT NULL,
            params TEXT NOT NULL,
            mape REAL NOT NULL,
            mae REAL NOT NULL,
            holdout_months INTEGER NOT NULL,
            window_start TEXT NOT NULL,
            window_end TEXT NOT NULL,
            input_rows INTEGER NOT NULL,
            input_hash TEXT NOT NULL,
            trained_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    tracing::info!("Database tables initialized");
    Ok(())
}

/// Parse an RFC3339 column value back into a UTC timestamp
pub(crate) fn parse_ts(value: &str) -> Result<chrono::DateTime<chrono::Utc>> {
    chrono::DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&chrono::Utc))
        .map_err(|e| finflow_common::Error::Internal(format!("Bad timestamp '{}': {}", value, e)))
}
