//! CRM HTTP adapter
//!
//! Pulls a JSON array of records from the CRM's export endpoint. The
//! watermark travels as a `since` query parameter so well-behaved
//! servers can pre-filter; the strictly-newer filter still applies to
//! whatever comes back.

use super::{newer_than, parse_source_timestamp};
use crate::models::RawRecord;
use chrono::{DateTime, Utc};
use finflow_common::config::SourceKind;
use finflow_common::{Error, Result};
use std::time::Duration;

pub struct CrmAdapter {
    domain: String,
    endpoint: String,
    api_key: Option<String>,
    timestamp_field: String,
    client: reqwest::Client,
}

impl CrmAdapter {
    pub fn new(
        domain: &str,
        endpoint: &str,
        api_key: Option<String>,
        timestamp_field: &str,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();

        Self {
            domain: domain.to_string(),
            endpoint: endpoint.to_string(),
            api_key,
            timestamp_field: timestamp_field.to_string(),
            client,
        }
    }

    pub async fn fetch(&self, since: Option<DateTime<Utc>>) -> Result<Vec<RawRecord>> {
        let mut request = self.client.get(&self.endpoint);
        if let Some(watermark) = since {
            request = request.query(&[("since", watermark.to_rfc3339())]);
        }
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| {
            // Connectivity problems are transient; anything else about
            // the request itself is a format problem.
            if e.is_connect() || e.is_timeout() {
                Error::SourceUnavailable(format!("CRM endpoint unreachable: {}", e))
            } else {
                Error::SourceFormat(format!("CRM request failed: {}", e))
            }
        })?;

        let status = response.status();
        if status.is_server_error() {
            return Err(Error::SourceUnavailable(format!(
                "CRM endpoint returned {}",
                status
            )));
        }
        if !status.is_success() {
            return Err(Error::SourceFormat(format!(
                "CRM endpoint returned {}",
                status
            )));
        }

        let body: Vec<serde_json::Value> = response
            .json()
            .await
            .map_err(|e| Error::SourceFormat(format!("CRM response is not a JSON array: {}", e)))?;

        let mut records = Vec::new();
        for (idx, item) in body.into_iter().enumerate() {
            let payload = match item {
                serde_json::Value::Object(map) => map,
                other => {
                    return Err(Error::SourceFormat(format!(
                        "CRM record {} is not an object: {}",
                        idx, other
                    )))
                }
            };

            let ts_value = payload
                .get(&self.timestamp_field)
                .and_then(|v| v.as_str())
                .ok_or_else(|| {
                    Error::SourceFormat(format!(
                        "CRM record {} missing timestamp field '{}'",
                        idx, self.timestamp_field
                    ))
                })?
                .to_string();
            let source_timestamp = parse_source_timestamp(&ts_value)?;

            records.push(RawRecord::new(
                &self.domain,
                SourceKind::Crm,
                payload,
                source_timestamp,
            ));
        }

        tracing::info!(
            domain = %self.domain,
            rows = records.len(),
            endpoint = %self.endpoint,
            "CRM feed fetched"
        );

        Ok(newer_than(records, since))
    }
}
