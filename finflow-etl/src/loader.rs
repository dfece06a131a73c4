//! Warehouse loader
//!
//! Idempotent incremental upsert of validated records into dimensional
//! rows with Type-2 SCD semantics. Records are committed in chunks;
//! the domain watermark advances only past fully committed chunks, so
//! a mid-batch failure is safe to retry (at-least-once delivery in,
//! exactly-once effect in the warehouse).

use crate::db;
use crate::models::{SchemaContract, ValidatedRecord};
use chrono::{DateTime, Utc};
use finflow_common::events::{EventBus, PipelineEvent};
use finflow_common::{Error, Result};
use sha2::{Digest, Sha256};
use sqlx::SqlitePool;

/// Outcome of one load call
#[derive(Debug, Clone, Copy, Default)]
pub struct LoadResult {
    /// New business keys opened
    pub inserted: usize,
    /// Prior versions closed by a changed attribute set
    pub superseded: usize,
    /// Records that produced no warehouse change (idempotent replays)
    pub unchanged: usize,
    /// Watermark after the last committed chunk
    pub watermark: Option<DateTime<Utc>>,
}

pub struct WarehouseLoader {
    pool: SqlitePool,
    chunk_size: usize,
    event_bus: EventBus,
}

impl WarehouseLoader {
    pub fn new(pool: SqlitePool, chunk_size: usize, event_bus: EventBus) -> Self {
        Self {
            pool,
            chunk_size: chunk_size.max(1),
            event_bus,
        }
    }

    /// Load accepted records into the domain's dimensional rows.
    ///
    /// Re-running with an overlapping record set produces no duplicate
    /// rows: unchanged attribute sets are no-ops, an existing row at
    /// the same effective date with the same attributes is skipped, and
    /// a different attribute set at the same effective date surfaces as
    /// LoadConflict.
    pub async fn load(
        &self,
        domain: &str,
        contract: &SchemaContract,
        records: &[ValidatedRecord],
    ) -> Result<LoadResult> {
        let mut sorted: Vec<&ValidatedRecord> =
            records.iter().filter(|r| r.is_accepted()).collect();
        sorted.sort_by(|a, b| {
            a.source_timestamp
                .cmp(&b.source_timestamp)
                .then_with(|| a.business_key.cmp(&b.business_key))
        });

        let mut result = LoadResult::default();

        for chunk in sorted.chunks(self.chunk_size) {
            let mut tx = self.pool.begin().await?;
            let mut chunk_max: Option<DateTime<Utc>> = None;

            for record in chunk {
                let applied = self.apply_record(&mut tx, contract, record).await?;
                match applied {
                    Applied::Inserted => result.inserted += 1,
                    Applied::Superseded => result.superseded += 1,
                    Applied::Unchanged => result.unchanged += 1,
                }
                chunk_max = Some(match chunk_max {
                    Some(prev) if prev >= record.source_timestamp => prev,
                    _ => record.source_timestamp,
                });
            }

            tx.commit().await?;

            if let Some(high) = chunk_max {
                self.advance_watermark(domain, high).await?;
                result.watermark = Some(high);
            }

            tracing::debug!(
                domain = %domain,
                chunk_rows = chunk.len(),
                inserted = result.inserted,
                superseded = result.superseded,
                "Load chunk committed"
            );
        }

        tracing::info!(
            domain = %domain,
            inserted = result.inserted,
            superseded = result.superseded,
            unchanged = result.unchanged,
            "Warehouse load finished"
        );
        Ok(result)
    }

    async fn apply_record(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
        contract: &SchemaContract,
        record: &ValidatedRecord,
    ) -> Result<Applied> {
        let attr_hash = hash_attributes(record);
        let measure = contract
            .measure_field
            .as_ref()
            .and_then(|field| record.attributes.get(field))
            .and_then(|v| v.as_f64());

        // Exact effective-date match first: the idempotent replay path.
        if let Some(existing) = db::warehouse::row_at(
            &mut **tx,
            &record.domain,
            &record.business_key,
            record.source_timestamp,
        )
        .await?
        {
            if existing.attr_hash == attr_hash {
                return Ok(Applied::Unchanged);
            }
            return Err(Error::LoadConflict(format!(
                "{} key '{}' has divergent attributes at {}",
                record.domain,
                record.business_key,
                record.source_timestamp.to_rfc3339()
            )));
        }

        let current =
            db::warehouse::current_row(&mut **tx, &record.domain, &record.business_key).await?;

        match current {
            None => {
                db::warehouse::insert_row(
                    &mut **tx,
                    &record.domain,
                    &record.business_key,
                    &record.attributes,
                    &attr_hash,
                    measure,
                    record.source_timestamp,
                    record.source,
                    record.record_id,
                )
                .await?;
                Ok(Applied::Inserted)
            }
            Some(current) => {
                if record.source_timestamp < current.valid_from {
                    // Replay of a version already superseded by a newer
                    // load; the history row either exists or the data
                    // arrived too late to change it.
                    return Ok(Applied::Unchanged);
                }
                if current.attr_hash == attr_hash {
                    return Ok(Applied::Unchanged);
                }

                db::warehouse::close_row(&mut **tx, current.row_id, record.source_timestamp).await?;
                db::warehouse::insert_row(
                    &mut **tx,
                    &record.domain,
                    &record.business_key,
                    &record.attributes,
                    &attr_hash,
                    measure,
                    record.source_timestamp,
                    record.source,
                    record.record_id,
                )
                .await?;
                Ok(Applied::Superseded)
            }
        }
    }

    /// Compare-and-set watermark advancement, tolerant of a concurrent
    /// advance that already moved past `high`.
    async fn advance_watermark(&self, domain: &str, high: DateTime<Utc>) -> Result<()> {
        for _ in 0..3 {
            let current = db::watermarks::get(&self.pool, domain).await?;
            let advanced = match &current {
                Some(w) if w.value >= high => return Ok(()),
                Some(w) => {
                    db::watermarks::try_advance(&self.pool, domain, high, Some(w.version)).await?
                }
                None => db::watermarks::try_advance(&self.pool, domain, high, None).await?,
            };

            if advanced {
                self.event_bus.emit_lossy(PipelineEvent::WatermarkAdvanced {
                    domain: domain.to_string(),
                    watermark: high.to_rfc3339(),
                    timestamp: Utc::now(),
                });
                return Ok(());
            }
        }

        Err(Error::LoadConflict(format!(
            "Watermark compare-and-set for {} kept losing; concurrent run?",
            domain
        )))
    }
}

enum Applied {
    Inserted,
    Superseded,
    Unchanged,
}

/// Stable hash over a record's attribute set.
///
/// Attributes are a BTreeMap so serialization order is deterministic.
fn hash_attributes(record: &ValidatedRecord) -> String {
    let serialized = serde_json::to_string(&record.attributes).unwrap_or_default();
    format!("{:x}", Sha256::digest(serialized.as_bytes()))
}
