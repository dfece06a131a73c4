//! Watermark store
//!
//! One row per domain marking the last successfully loaded source
//! timestamp. Concurrent domain pipelines never touch each other's
//! rows, but re-runs of the same domain race against themselves, so
//! advancement is an optimistic compare-and-set on a version counter.

use chrono::{DateTime, Utc};
use finflow_common::Result;
use sqlx::{Row, SqlitePool};

/// Current watermark for a domain, if any
#[derive(Debug, Clone)]
pub struct Watermark {
    pub domain: String,
    pub value: DateTime<Utc>,
    pub version: i64,
}

/// Read the domain watermark; None before the first successful load
pub async fn get(pool: &SqlitePool, domain: &str) -> Result<Option<Watermark>> {
    let row = sqlx::query("SELECT value, version FROM watermarks WHERE domain = ?")
        .bind(domain)
        .fetch_optional(pool)
        .await?;

    match row {
        Some(row) => {
            let value: String = row.get("value");
            Ok(Some(Watermark {
                domain: domain.to_string(),
                value: super::parse_ts(&value)?,
                version: row.get("version"),
            }))
        }
        None => Ok(None),
    }
}

/// Compare-and-set advancement.
///
/// `expected_version` None means "no watermark yet" (initial insert).
/// Returns false on a lost race or when the stored value moved ahead;
/// the caller re-reads and decides whether its advance is still needed.
pub async fn try_advance(
    pool: &SqlitePool,
    domain: &str,
    new_value: DateTime<Utc>,
    expected_version: Option<i64>,
) -> Result<bool> {
    let now = Utc::now().to_rfc3339();
    let value = new_value.to_rfc3339();

    let result = match expected_version {
        None => {
            sqlx::query(
                r#"
                INSERT INTO watermarks (domain, value, version, updated_at)
                VALUES (?, ?, 1, ?)
                ON CONFLICT (domain) DO NOTHING
                "#,
            )
            .bind(domain)
            .bind(&value)
            .bind(&now)
            .execute(pool)
            .await?
        }
        Some(version) => {
            sqlx::query(
                r#"
                UPDATE watermarks
                SET value = ?, version = version + 1, updated_at = ?
                WHERE domain = ? AND version = ? AND value < ?
                "#,
            )
            .bind(&value)
            .bind(&now)
            .bind(domain)
            .bind(version)
            .bind(&value)
            .execute(pool)
            .await?
        }
    };

    let advanced = result.rows_affected() == 1;
    if advanced {
        tracing::debug!(domain = %domain, watermark = %value, "Watermark advanced");
    } else {
        tracing::debug!(domain = %domain, watermark = %value, "Watermark CAS lost or stale");
    }
    Ok(advanced)
}
