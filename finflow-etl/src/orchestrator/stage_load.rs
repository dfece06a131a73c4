//! Stage 3: LOAD
//!
//! Hands the accepted partition to the warehouse loader. Retry wraps
//! the whole call: the loader is idempotent, so replaying a partially
//! committed batch only touches the uncommitted tail.

use super::PipelineOrchestrator;
use crate::db;
use crate::loader::LoadResult;
use crate::models::{DomainRun, SchemaContract, Stage, StageStatus, ValidatedRecord};
use chrono::Utc;
use finflow_common::events::PipelineEvent;
use finflow_common::Result;

impl PipelineOrchestrator {
    pub(super) async fn stage_load(
        &self,
        run: &mut DomainRun,
        contract: &SchemaContract,
        accepted: &[ValidatedRecord],
    ) -> Result<LoadResult> {
        run.set_stage(Stage::Load, StageStatus::Running);
        db::runs::save_run(&self.pool, run).await?;
        self.event_bus.emit_lossy(PipelineEvent::StageStarted {
            run_id: run.run_id,
            domain: run.domain.clone(),
            stage: Stage::Load.name().to_string(),
            timestamp: Utc::now(),
        });

        let result = super::retry_stage(
            run.run_id,
            &run.domain,
            Stage::Load,
            &self.settings.retry,
            &self.event_bus,
            || self.loader.load(&run.domain, contract, accepted),
        )
        .await?;

        run.counters.inserted = result.inserted;
        run.counters.superseded = result.superseded;
        run.counters.unchanged = result.unchanged;
        run.set_stage(Stage::Load, StageStatus::Succeeded);
        db::runs::save_run(&self.pool, run).await?;
        self.event_bus.emit_lossy(PipelineEvent::StageCompleted {
            run_id: run.run_id,
            domain: run.domain.clone(),
            stage: Stage::Load.name().to_string(),
            timestamp: Utc::now(),
        });

        tracing::info!(
            run_id = %run.run_id,
            domain = %run.domain,
            inserted = result.inserted,
            superseded = result.superseded,
            unchanged = result.unchanged,
            watermark = ?result.watermark.map(|w| w.to_rfc3339()),
            "LOAD complete"
        );
        Ok(result)
    }
}
