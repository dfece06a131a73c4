//! Ingestion adapters
//!
//! A closed set of tagged variants over one capability: fetch raw
//! records strictly newer than the supplied watermark. The variant is
//! picked from domain configuration, never from runtime inspection.
//!
//! Error contract: transient connectivity loss is `SourceUnavailable`
//! (retryable); unreadable payloads are `SourceFormat` (fatal for the
//! batch, other domains keep running).

mod crm;
mod erp;
mod spreadsheet;

pub use crm::CrmAdapter;
pub use erp::ErpAdapter;
pub use spreadsheet::SpreadsheetAdapter;

use crate::models::RawRecord;
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use finflow_common::config::{SourceConfig, SourceKind};
use finflow_common::{Error, Result};
use std::path::Path;

/// One ingestion source, dispatched by configuration
pub enum SourceAdapter {
    Spreadsheet(SpreadsheetAdapter),
    Erp(ErpAdapter),
    Crm(CrmAdapter),
}

impl SourceAdapter {
    /// Build the adapter for a domain from its source configuration.
    /// Relative paths resolve against the data directory.
    pub fn from_config(domain: &str, config: &SourceConfig, data_dir: &Path) -> Self {
        match config {
            SourceConfig::Spreadsheet {
                path,
                timestamp_column,
            } => SourceAdapter::Spreadsheet(SpreadsheetAdapter::new(
                domain,
                data_dir.join(path),
                timestamp_column,
            )),
            SourceConfig::Erp { db_path, query } => {
                SourceAdapter::Erp(ErpAdapter::new(domain, data_dir.join(db_path), query))
            }
            SourceConfig::Crm {
                endpoint,
                api_key,
                timestamp_field,
            } => SourceAdapter::Crm(CrmAdapter::new(
                domain,
                endpoint,
                api_key.clone(),
                timestamp_field,
            )),
        }
    }

    pub fn kind(&self) -> SourceKind {
        match self {
            SourceAdapter::Spreadsheet(_) => SourceKind::Spreadsheet,
            SourceAdapter::Erp(_) => SourceKind::Erp,
            SourceAdapter::Crm(_) => SourceKind::Crm,
        }
    }

    /// Fetch raw records strictly newer than `since`.
    ///
    /// The result is finite and the call is restartable: re-fetching
    /// with the same watermark yields the same (or a superset of the
    /// same) records, never older ones.
    pub async fn fetch(&self, since: Option<DateTime<Utc>>) -> Result<Vec<RawRecord>> {
        match self {
            SourceAdapter::Spreadsheet(adapter) => adapter.fetch(since).await,
            SourceAdapter::Erp(adapter) => adapter.fetch(since).await,
            SourceAdapter::Crm(adapter) => adapter.fetch(since).await,
        }
    }
}

/// Parse a source-supplied timestamp.
///
/// Sources disagree on formats: the ERP extract writes RFC3339, the
/// spreadsheets carry `YYYY-MM-DD` posting dates (taken as midnight
/// UTC), and some exports add a time without offset.
pub(crate) fn parse_source_timestamp(value: &str) -> Result<DateTime<Utc>> {
    let value = value.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Ok(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S") {
        return Ok(Utc.from_utc_datetime(&naive));
    }
    if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        return Ok(Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0).expect("valid midnight")));
    }

    Err(Error::SourceFormat(format!(
        "Unparseable source timestamp: '{}'",
        value
    )))
}

/// Keep only records strictly newer than the watermark
pub(crate) fn newer_than(records: Vec<RawRecord>, since: Option<DateTime<Utc>>) -> Vec<RawRecord> {
    match since {
        Some(watermark) => records
            .into_iter()
            .filter(|r| r.source_timestamp > watermark)
            .collect(),
        None => records,
    }
}
