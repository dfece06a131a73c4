//! Raw record archive and rejection log
//!
//! Raw records are immutable once ingested; re-ingestion of the same
//! record id is a no-op. Rejected records are retained itemized for
//! governance review so no record is silently dropped.

use crate::models::{RawRecord, ValidatedRecord};
use chrono::Utc;
use finflow_common::{Error, Result};
use sqlx::{Row, SqlitePool};

/// Archive a batch of raw records (insert-or-ignore per record)
pub async fn archive_raw(pool: &SqlitePool, records: &[RawRecord]) -> Result<()> {
    for record in records {
        let payload = serde_json::to_string(&record.payload)
            .map_err(|e| Error::Internal(format!("Failed to serialize payload: {}", e)))?;

        sqlx::query(
            r#"
            INSERT INTO raw_records
                (record_id, domain, source, payload, source_timestamp, ingested_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT (record_id) DO NOTHING
            "#,
        )
        .bind(record.record_id.to_string())
        .bind(&record.domain)
        .bind(record.source.to_string())
        .bind(&payload)
        .bind(record.source_timestamp.to_rfc3339())
        .bind(record.ingested_at.to_rfc3339())
        .execute(pool)
        .await?;
    }
    Ok(())
}

/// Record rejected records for governance review
pub async fn record_rejections(
    pool: &SqlitePool,
    rejected: &[ValidatedRecord],
    raw_payloads: &[RawRecord],
) -> Result<()> {
    for record in rejected {
        let (field, rule, reason) = match record.rejection() {
            Some(parts) => parts,
            None => continue,
        };

        // Keep the original payload alongside the reason so review does
        // not need a join back into raw_records.
        let payload = raw_payloads
            .iter()
            .find(|raw| raw.record_id == record.record_id)
            .map(|raw| serde_json::to_string(&raw.payload))
            .transpose()
            .map_err(|e| Error::Internal(format!("Failed to serialize payload: {}", e)))?
            .unwrap_or_else(|| "{}".to_string());

        sqlx::query(
            r#"
            INSERT INTO rejected_records
                (record_id, domain, source, field, rule, reason,
                 source_timestamp, payload, recorded_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (record_id) DO UPDATE SET
                field = excluded.field,
                rule = excluded.rule,
                reason = excluded.reason,
                recorded_at = excluded.recorded_at
            "#,
        )
        .bind(record.record_id.to_string())
        .bind(&record.domain)
        .bind(record.source.to_string())
        .bind(field)
        .bind(rule)
        .bind(reason)
        .bind(record.source_timestamp.to_rfc3339())
        .bind(&payload)
        .bind(Utc::now().to_rfc3339())
        .execute(pool)
        .await?;
    }
    Ok(())
}

/// Itemized rejection summary for a domain
#[derive(Debug, Clone, serde::Serialize)]
pub struct RejectionEntry {
    pub record_id: String,
    pub field: String,
    pub rule: String,
    pub reason: String,
    pub source_timestamp: String,
}

/// List rejections for a domain, newest first
pub async fn list_rejections(
    pool: &SqlitePool,
    domain: &str,
    limit: i64,
) -> Result<Vec<RejectionEntry>> {
    let rows = sqlx::query(
        r#"
        SELECT record_id, field, rule, reason, source_timestamp
        FROM rejected_records
        WHERE domain = ?
        ORDER BY recorded_at DESC
        LIMIT ?
        "#,
    )
    .bind(domain)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .iter()
        .map(|row| RejectionEntry {
            record_id: row.get("record_id"),
            field: row.get("field"),
            rule: row.get("rule"),
            reason: row.get("reason"),
            source_timestamp: row.get("source_timestamp"),
        })
        .collect())
}
