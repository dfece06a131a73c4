//! Spreadsheet drop-directory adapter
//!
//! Finance teams export ledgers as CSV into a watched directory; every
//! file whose name starts with the domain name is read on each fetch.
//! Re-reading the same files is safe: the watermark filter drops
//! anything already loaded.

use super::{newer_than, parse_source_timestamp};
use crate::models::RawRecord;
use chrono::{DateTime, Utc};
use finflow_common::config::SourceKind;
use finflow_common::{Error, Result};
use serde_json::Value;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

pub struct SpreadsheetAdapter {
    domain: String,
    drop_dir: PathBuf,
    timestamp_column: String,
}

impl SpreadsheetAdapter {
    pub fn new(domain: &str, drop_dir: PathBuf, timestamp_column: &str) -> Self {
        Self {
            domain: domain.to_string(),
            drop_dir,
            timestamp_column: timestamp_column.to_string(),
        }
    }

    pub async fn fetch(&self, since: Option<DateTime<Utc>>) -> Result<Vec<RawRecord>> {
        if !self.drop_dir.is_dir() {
            // A missing drop directory is usually an unmounted share,
            // which clears on its own.
            return Err(Error::SourceUnavailable(format!(
                "Spreadsheet drop directory missing: {}",
                self.drop_dir.display()
            )));
        }

        let files = self.discover_files();
        tracing::info!(
            domain = %self.domain,
            files = files.len(),
            dir = %self.drop_dir.display(),
            "Scanning spreadsheet drops"
        );

        let mut records = Vec::new();
        for path in files {
            records.extend(self.read_file(&path)?);
        }

        Ok(newer_than(records, since))
    }

    fn discover_files(&self) -> Vec<PathBuf> {
        let mut files: Vec<PathBuf> = WalkDir::new(&self.drop_dir)
            .max_depth(2)
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file())
            .map(|entry| entry.into_path())
            .filter(|path| {
                path.extension()
                    .map(|ext| ext.eq_ignore_ascii_case("csv"))
                    .unwrap_or(false)
                    && path
                        .file_stem()
                        .and_then(|stem| stem.to_str())
                        .map(|stem| stem.starts_with(self.domain.as_str()))
                        .unwrap_or(false)
            })
            .collect();
        files.sort();
        files
    }

    fn read_file(&self, path: &Path) -> Result<Vec<RawRecord>> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .from_path(path)
            .map_err(|e| {
                Error::SourceFormat(format!("Cannot open {}: {}", path.display(), e))
            })?;

        let headers = reader
            .headers()
            .map_err(|e| Error::SourceFormat(format!("Bad header in {}: {}", path.display(), e)))?
            .clone();

        if !headers.iter().any(|h| h == self.timestamp_column) {
            return Err(Error::SourceFormat(format!(
                "{}: missing timestamp column '{}'",
                path.display(),
                self.timestamp_column
            )));
        }

        let mut records = Vec::new();
        for (line, row) in reader.records().enumerate() {
            let row = row.map_err(|e| {
                Error::SourceFormat(format!("{} line {}: {}", path.display(), line + 2, e))
            })?;

            let mut payload = serde_json::Map::new();
            for (header, field) in headers.iter().zip(row.iter()) {
                payload.insert(header.to_string(), Value::String(field.to_string()));
            }

            let ts_value = payload
                .get(&self.timestamp_column)
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string();
            let source_timestamp = parse_source_timestamp(&ts_value).map_err(|e| {
                Error::SourceFormat(format!("{} line {}: {}", path.display(), line + 2, e))
            })?;

            records.push(RawRecord::new(
                &self.domain,
                SourceKind::Spreadsheet,
                payload,
                source_timestamp,
            ));
        }

        tracing::debug!(
            domain = %self.domain,
            file = %path.display(),
            rows = records.len(),
            "Spreadsheet file read"
        );
        Ok(records)
    }
}
