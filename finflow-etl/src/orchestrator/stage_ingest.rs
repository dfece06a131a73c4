//! Stage 1: INGEST
//!
//! Builds the domain's adapter from configuration and fetches raw
//! records strictly newer than the stored watermark. Fetched records
//! are archived immediately so every later decision traces back to an
//! immutable raw payload.

use super::PipelineOrchestrator;
use crate::adapters::SourceAdapter;
use crate::db;
use crate::models::{DomainRun, RawRecord, Stage, StageStatus};
use chrono::Utc;
use finflow_common::config::DomainConfig;
use finflow_common::events::PipelineEvent;
use finflow_common::Result;

impl PipelineOrchestrator {
    pub(super) async fn stage_ingest(
        &self,
        run: &mut DomainRun,
        config: &DomainConfig,
    ) -> Result<Vec<RawRecord>> {
        run.set_stage(Stage::Ingest, StageStatus::Running);
        db::runs::save_run(&self.pool, run).await?;
        self.event_bus.emit_lossy(PipelineEvent::StageStarted {
            run_id: run.run_id,
            domain: run.domain.clone(),
            stage: Stage::Ingest.name().to_string(),
            timestamp: Utc::now(),
        });

        let watermark = db::watermarks::get(&self.pool, &run.domain)
            .await?
            .map(|w| w.value);

        tracing::info!(
            run_id = %run.run_id,
            domain = %run.domain,
            source = %config.source.kind(),
            watermark = ?watermark.map(|w| w.to_rfc3339()),
            "INGEST: fetching records newer than watermark"
        );

        let adapter =
            SourceAdapter::from_config(&run.domain, &config.source, &self.settings.data_dir);

        let records = super::retry_stage(
            run.run_id,
            &run.domain,
            Stage::Ingest,
            &self.settings.retry,
            &self.event_bus,
            || adapter.fetch(watermark),
        )
        .await?;

        db::staging::archive_raw(&self.pool, &records).await?;

        run.counters.fetched = records.len();
        run.set_stage(Stage::Ingest, StageStatus::Succeeded);
        db::runs::save_run(&self.pool, run).await?;
        self.event_bus.emit_lossy(PipelineEvent::StageCompleted {
            run_id: run.run_id,
            domain: run.domain.clone(),
            stage: Stage::Ingest.name().to_string(),
            timestamp: Utc::now(),
        });

        tracing::info!(
            run_id = %run.run_id,
            domain = %run.domain,
            fetched = records.len(),
            "INGEST complete"
        );
        Ok(records)
    }
}
