//! Raw and validated record types
//!
//! A raw record is the source-tagged, schema-less payload an adapter
//! produced. Validation turns it into exactly one validated record
//! carrying the contract version it was checked against.

use chrono::{DateTime, Utc};
use finflow_common::config::SourceKind;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use uuid::Uuid;

/// Source-tagged raw record, immutable once ingested
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawRecord {
    pub record_id: Uuid,
    pub domain: String,
    pub source: SourceKind,
    /// Schema-less key/value payload as delivered by the source
    pub payload: serde_json::Map<String, Value>,
    /// When the source says this observation happened
    pub source_timestamp: DateTime<Utc>,
    pub ingested_at: DateTime<Utc>,
}

impl RawRecord {
    pub fn new(
        domain: impl Into<String>,
        source: SourceKind,
        payload: serde_json::Map<String, Value>,
        source_timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            record_id: Uuid::new_v4(),
            domain: domain.into(),
            source,
            payload,
            source_timestamp,
            ingested_at: Utc::now(),
        }
    }
}

/// Outcome of contract enforcement for one record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "UPPERCASE")]
pub enum RecordStatus {
    Accepted,
    Rejected {
        /// Field the failing rule was declared on
        field: String,
        /// Short rule identifier (e.g. "non_empty", "type")
        rule: String,
        reason: String,
    },
}

/// A raw record after contract enforcement.
///
/// Traces to exactly one raw record (`record_id`) and one contract
/// version (`contract_version`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidatedRecord {
    pub record_id: Uuid,
    pub domain: String,
    pub contract_version: u32,
    pub source: SourceKind,
    pub source_timestamp: DateTime<Utc>,
    /// Business key parts joined with `|`, in contract order
    pub business_key: String,
    /// Coerced and enriched attributes (empty for rejected records)
    pub attributes: BTreeMap<String, Value>,
    pub status: RecordStatus,
    pub ingested_at: DateTime<Utc>,
}

impl ValidatedRecord {
    pub fn is_accepted(&self) -> bool {
        matches!(self.status, RecordStatus::Accepted)
    }

    /// Rejection reason, if rejected
    pub fn rejection(&self) -> Option<(&str, &str, &str)> {
        match &self.status {
            RecordStatus::Rejected { field, rule, reason } => {
                Some((field.as_str(), rule.as_str(), reason.as_str()))
            }
            RecordStatus::Accepted => None,
        }
    }
}
