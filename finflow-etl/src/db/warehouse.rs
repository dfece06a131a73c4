//! Dimensional row storage (Type-2 SCD)
//!
//! Rows are append-only with supersession: a changed attribute set
//! closes the prior row's validity interval and opens a new row. Rows
//! are never physically deleted.
//!
//! Write functions take a `SqliteConnection` so the loader can scope
//! them to one transaction per chunk; read queries run on the pool.

use chrono::{DateTime, Utc};
use finflow_common::config::SourceKind;
use finflow_common::{Error, Result};
use serde_json::Value;
use sqlx::{Row, SqliteConnection, SqlitePool};
use std::collections::BTreeMap;
use uuid::Uuid;

/// One warehouse-resident dimensional row
#[derive(Debug, Clone, serde::Serialize)]
pub struct DimensionalRow {
    pub row_id: i64,
    pub domain: String,
    pub business_key: String,
    pub attributes: BTreeMap<String, Value>,
    pub attr_hash: String,
    pub measure: Option<f64>,
    pub valid_from: DateTime<Utc>,
    /// None = currently valid (open) row
    pub valid_to: Option<DateTime<Utc>>,
    pub source: SourceKind,
    pub record_id: Uuid,
    pub loaded_at: DateTime<Utc>,
}

fn row_from(row: &sqlx::sqlite::SqliteRow) -> Result<DimensionalRow> {
    let attributes: String = row.get("attributes");
    let attributes: BTreeMap<String, Value> = serde_json::from_str(&attributes)
        .map_err(|e| Error::Internal(format!("Failed to deserialize attributes: {}", e)))?;

    let valid_from: String = row.get("valid_from");
    let valid_to: Option<String> = row.get("valid_to");
    let loaded_at: String = row.get("loaded_at");
    let source: String = row.get("source");
    let record_id: String = row.get("record_id");

    Ok(DimensionalRow {
        row_id: row.get("row_id"),
        domain: row.get("domain"),
        business_key: row.get("business_key"),
        attributes,
        attr_hash: row.get("attr_hash"),
        measure: row.get("measure"),
        valid_from: super::parse_ts(&valid_from)?,
        valid_to: valid_to.as_deref().map(super::parse_ts).transpose()?,
        source: source.parse()?,
        record_id: Uuid::parse_str(&record_id)
            .map_err(|e| Error::Internal(format!("Invalid record id in warehouse: {}", e)))?,
        loaded_at: super::parse_ts(&loaded_at)?,
    })
}

const SELECT_COLS: &str = "row_id, domain, business_key, attributes, attr_hash, measure, \
                           valid_from, valid_to, source, record_id, loaded_at";

/// Currently open row for a business key
pub async fn current_row(
    conn: &mut SqliteConnection,
    domain: &str,
    business_key: &str,
) -> Result<Option<DimensionalRow>> {
    let row = sqlx::query(&format!(
        "SELECT {SELECT_COLS} FROM dimensional_rows
         WHERE domain = ? AND business_key = ? AND valid_to IS NULL"
    ))
    .bind(domain)
    .bind(business_key)
    .fetch_optional(conn)
    .await?;

    row.as_ref().map(row_from).transpose()
}

/// Row with an exact effective date, open or closed
pub async fn row_at(
    conn: &mut SqliteConnection,
    domain: &str,
    business_key: &str,
    valid_from: DateTime<Utc>,
) -> Result<Option<DimensionalRow>> {
    let row = sqlx::query(&format!(
        "SELECT {SELECT_COLS} FROM dimensional_rows
         WHERE domain = ? AND business_key = ? AND valid_from = ?"
    ))
    .bind(domain)
    .bind(business_key)
    .bind(valid_from.to_rfc3339())
    .fetch_optional(conn)
    .await?;

    row.as_ref().map(row_from).transpose()
}

/// Insert a new open row
#[allow(clippy::too_many_arguments)]
pub async fn insert_row(
    conn: &mut SqliteConnection,
    domain: &str,
    business_key: &str,
    attributes: &BTreeMap<String, Value>,
    attr_hash: &str,
    measure: Option<f64>,
    valid_from: DateTime<Utc>,
    source: SourceKind,
    record_id: Uuid,
) -> Result<()> {
    let attributes = serde_json::to_string(attributes)
        .map_err(|e| Error::Internal(format!("Failed to serialize attributes: {}", e)))?;

    sqlx::query(
        r#"
        INSERT INTO dimensional_rows
            (domain, business_key, attributes, attr_hash, measure,
             valid_from, valid_to, source, record_id, loaded_at)
        VALUES (?, ?, ?, ?, ?, ?, NULL, ?, ?, ?)
        "#,
    )
    .bind(domain)
    .bind(business_key)
    .bind(&attributes)
    .bind(attr_hash)
    .bind(measure)
    .bind(valid_from.to_rfc3339())
    .bind(source.to_string())
    .bind(record_id.to_string())
    .bind(Utc::now().to_rfc3339())
    .execute(conn)
    .await?;

    Ok(())
}

/// Close a row's validity interval
pub async fn close_row(
    conn: &mut SqliteConnection,
    row_id: i64,
    valid_to: DateTime<Utc>,
) -> Result<()> {
    sqlx::query("UPDATE dimensional_rows SET valid_to = ? WHERE row_id = ?")
        .bind(valid_to.to_rfc3339())
        .bind(row_id)
        .execute(conn)
        .await?;
    Ok(())
}

/// All currently open rows of a domain (the read-only BI surface)
pub async fn current_rows(pool: &SqlitePool, domain: &str) -> Result<Vec<DimensionalRow>> {
    let rows = sqlx::query(&format!(
        "SELECT {SELECT_COLS} FROM dimensional_rows
         WHERE domain = ? AND valid_to IS NULL
         ORDER BY business_key"
    ))
    .bind(domain)
    .fetch_all(pool)
    .await?;

    rows.iter().map(row_from).collect()
}

/// Full version history for one business key, oldest first
pub async fn history(
    pool: &SqlitePool,
    domain: &str,
    business_key: &str,
) -> Result<Vec<DimensionalRow>> {
    let rows = sqlx::query(&format!(
        "SELECT {SELECT_COLS} FROM dimensional_rows
         WHERE domain = ? AND business_key = ?
         ORDER BY valid_from"
    ))
    .bind(domain)
    .bind(business_key)
    .fetch_all(pool)
    .await?;

    rows.iter().map(row_from).collect()
}

/// Monthly totals of the measure over open rows, ordered by month
/// (`YYYY-MM`). Feeds the forecast feature series.
pub async fn monthly_series(pool: &SqlitePool, domain: &str) -> Result<Vec<(String, f64)>> {
    let rows = sqlx::query(
        r#"
        SELECT substr(valid_from, 1, 7) AS ym, SUM(measure) AS total
        FROM dimensional_rows
        WHERE domain = ? AND valid_to IS NULL AND measure IS NOT NULL
        GROUP BY ym
        ORDER BY ym
        "#,
    )
    .bind(domain)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .iter()
        .map(|row| (row.get::<String, _>("ym"), row.get::<f64, _>("total")))
        .collect())
}

/// Count of open rows carrying a measure (forecast input size)
pub async fn measured_count(pool: &SqlitePool, domain: &str) -> Result<i64> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM dimensional_rows
         WHERE domain = ? AND valid_to IS NULL AND measure IS NOT NULL",
    )
    .bind(domain)
    .fetch_one(pool)
    .await?;
    Ok(count)
}

/// Count of open rows per domain (status surface)
pub async fn current_count(pool: &SqlitePool, domain: &str) -> Result<i64> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM dimensional_rows WHERE domain = ? AND valid_to IS NULL",
    )
    .bind(domain)
    .fetch_one(pool)
    .await?;
    Ok(count)
}
