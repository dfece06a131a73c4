//! ERP extract adapter
//!
//! The ERP export job lands an extract SQLite database next to the data
//! directory; this adapter runs the configured extraction query against
//! it. The query must expose a `source_ts` column (RFC3339 text, the
//! export job writes it) and take the watermark as its single `?` bind,
//! e.g.:
//!
//! ```sql
//! SELECT codigo_cliente, cidade, tipo_documento, qtde_contratos,
//!        total_ativos, source_ts
//! FROM clientes_extract
//! WHERE source_ts > ?
//! ```

use super::{newer_than, parse_source_timestamp};
use crate::models::RawRecord;
use chrono::{DateTime, Utc};
use finflow_common::config::SourceKind;
use finflow_common::{Error, Result};
use serde_json::Value;
use sqlx::{Column, Row, SqlitePool};
use std::path::PathBuf;

pub struct ErpAdapter {
    domain: String,
    db_path: PathBuf,
    query: String,
}

impl ErpAdapter {
    pub fn new(domain: &str, db_path: PathBuf, query: &str) -> Self {
        Self {
            domain: domain.to_string(),
            db_path,
            query: query.to_string(),
        }
    }

    pub async fn fetch(&self, since: Option<DateTime<Utc>>) -> Result<Vec<RawRecord>> {
        if !self.db_path.is_file() {
            return Err(Error::SourceUnavailable(format!(
                "ERP extract database missing: {}",
                self.db_path.display()
            )));
        }

        let db_url = format!("sqlite://{}?mode=ro", self.db_path.display());
        let pool = SqlitePool::connect(&db_url).await.map_err(|e| {
            Error::SourceUnavailable(format!(
                "Cannot open ERP extract {}: {}",
                self.db_path.display(),
                e
            ))
        })?;

        let watermark = since
            .map(|ts| ts.to_rfc3339())
            .unwrap_or_else(|| "1970-01-01T00:00:00+00:00".to_string());

        let rows = sqlx::query(&self.query)
            .bind(&watermark)
            .fetch_all(&pool)
            .await
            .map_err(|e| Error::SourceFormat(format!("ERP extraction query failed: {}", e)))?;

        let mut records = Vec::new();
        for row in &rows {
            let mut payload = serde_json::Map::new();
            let mut source_ts: Option<String> = None;

            for (idx, column) in row.columns().iter().enumerate() {
                let name = column.name().to_string();
                let value = decode_value(row, idx);
                if name == "source_ts" {
                    source_ts = value.as_str().map(|s| s.to_string());
                }
                payload.insert(name, value);
            }

            let source_ts = source_ts.ok_or_else(|| {
                Error::SourceFormat(
                    "ERP extraction query must expose a textual source_ts column".to_string(),
                )
            })?;
            let source_timestamp = parse_source_timestamp(&source_ts)?;

            records.push(RawRecord::new(
                &self.domain,
                SourceKind::Erp,
                payload,
                source_timestamp,
            ));
        }

        pool.close().await;

        tracing::info!(
            domain = %self.domain,
            rows = records.len(),
            db = %self.db_path.display(),
            "ERP extract fetched"
        );

        // The query already filters on the bind, but the filter keeps
        // the strictly-newer guarantee even for sloppy queries.
        Ok(newer_than(records, since))
    }
}

/// Decode a SQLite column into a JSON value by its storage class.
///
/// The storage class must drive the decode: asking SQLite for an i64
/// out of a TEXT cell silently coerces to 0 instead of failing.
fn decode_value(row: &sqlx::sqlite::SqliteRow, idx: usize) -> Value {
    use sqlx::{TypeInfo, ValueRef};

    let raw = match row.try_get_raw(idx) {
        Ok(raw) => raw,
        Err(_) => return Value::Null,
    };
    if raw.is_null() {
        return Value::Null;
    }

    match raw.type_info().name() {
        "INTEGER" => row
            .try_get::<i64, _>(idx)
            .map(Value::from)
            .unwrap_or(Value::Null),
        "REAL" => row
            .try_get::<f64, _>(idx)
            .map(Value::from)
            .unwrap_or(Value::Null),
        _ => row
            .try_get::<String, _>(idx)
            .map(Value::from)
            .unwrap_or(Value::Null),
    }
}
