//! Schema contract persistence
//!
//! Contracts are immutable once registered: the insert uses
//! `ON CONFLICT DO NOTHING` and a zero row count surfaces as
//! RegistryConflict, which doubles as the per-key compare-and-set
//! guard for concurrent registrations.

use crate::models::SchemaContract;
use chrono::Utc;
use finflow_common::{Error, Result};
use sqlx::{Row, SqlitePool};

/// Register a contract version; fails with RegistryConflict if the
/// (domain, version) pair already exists.
pub async fn register(pool: &SqlitePool, contract: &SchemaContract) -> Result<()> {
    let definition = serde_json::to_string(contract)
        .map_err(|e| Error::Internal(format!("Failed to serialize contract: {}", e)))?;

    let result = sqlx::query(
        r#"
        INSERT INTO schema_contracts (domain, version, definition, registered_at)
        VALUES (?, ?, ?, ?)
        ON CONFLICT (domain, version) DO NOTHING
        "#,
    )
    .bind(&contract.domain)
    .bind(contract.version as i64)
    .bind(&definition)
    .bind(Utc::now().to_rfc3339())
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(Error::RegistryConflict {
            domain: contract.domain.clone(),
            version: contract.version,
        });
    }

    tracing::info!(
        domain = %contract.domain,
        version = contract.version,
        "Schema contract registered"
    );
    Ok(())
}

/// Fetch a contract version; NotFound if absent
pub async fn get(pool: &SqlitePool, domain: &str, version: u32) -> Result<SchemaContract> {
    let row = sqlx::query(
        "SELECT definition FROM schema_contracts WHERE domain = ? AND version = ?",
    )
    .bind(domain)
    .bind(version as i64)
    .fetch_optional(pool)
    .await?;

    match row {
        Some(row) => {
            let definition: String = row.get("definition");
            serde_json::from_str(&definition)
                .map_err(|e| Error::Internal(format!("Failed to deserialize contract: {}", e)))
        }
        None => Err(Error::NotFound(format!(
            "Schema contract {} v{}",
            domain, version
        ))),
    }
}

/// Whether a contract version exists
pub async fn exists(pool: &SqlitePool, domain: &str, version: u32) -> Result<bool> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM schema_contracts WHERE domain = ? AND version = ?",
    )
    .bind(domain)
    .bind(version as i64)
    .fetch_one(pool)
    .await?;
    Ok(count > 0)
}

/// List registered versions for a domain, ascending
pub async fn versions(pool: &SqlitePool, domain: &str) -> Result<Vec<u32>> {
    let rows = sqlx::query(
        "SELECT version FROM schema_contracts WHERE domain = ? ORDER BY version",
    )
    .bind(domain)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .iter()
        .map(|row| row.get::<i64, _>("version") as u32)
        .collect())
}
