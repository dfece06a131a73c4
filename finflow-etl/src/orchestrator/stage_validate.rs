//! Stage 2: VALIDATE
//!
//! Contract enforcement over the ingested batch. Rejections never halt
//! the batch: they are logged to the governance table and the accepted
//! partition moves on to the loader.

use super::PipelineOrchestrator;
use crate::db;
use crate::models::{DomainRun, RawRecord, SchemaContract, Stage, StageStatus};
use crate::validate::{ValidationOutcome, Validator};
use chrono::Utc;
use finflow_common::events::PipelineEvent;
use finflow_common::Result;

impl PipelineOrchestrator {
    pub(super) async fn stage_validate(
        &self,
        run: &mut DomainRun,
        contract: &SchemaContract,
        raw_records: &[RawRecord],
    ) -> Result<ValidationOutcome> {
        run.set_stage(Stage::Validate, StageStatus::Running);
        db::runs::save_run(&self.pool, run).await?;
        self.event_bus.emit_lossy(PipelineEvent::StageStarted {
            run_id: run.run_id,
            domain: run.domain.clone(),
            stage: Stage::Validate.name().to_string(),
            timestamp: Utc::now(),
        });

        let validator = Validator::new(contract.clone());
        let outcome = validator.validate_batch(raw_records);

        if !outcome.rejected.is_empty() {
            db::staging::record_rejections(&self.pool, &outcome.rejected, raw_records).await?;
        }

        run.counters.accepted = outcome.accepted.len();
        run.counters.rejected = outcome.rejected.len();
        run.counters.deduplicated = outcome.deduplicated;
        run.set_stage(Stage::Validate, StageStatus::Succeeded);
        db::runs::save_run(&self.pool, run).await?;

        self.event_bus.emit_lossy(PipelineEvent::ValidationCompleted {
            run_id: run.run_id,
            domain: run.domain.clone(),
            accepted: outcome.accepted.len(),
            rejected: outcome.rejected.len(),
            deduplicated: outcome.deduplicated,
            timestamp: Utc::now(),
        });
        self.event_bus.emit_lossy(PipelineEvent::StageCompleted {
            run_id: run.run_id,
            domain: run.domain.clone(),
            stage: Stage::Validate.name().to_string(),
            timestamp: Utc::now(),
        });

        tracing::info!(
            run_id = %run.run_id,
            domain = %run.domain,
            accepted = outcome.accepted.len(),
            rejected = outcome.rejected.len(),
            deduplicated = outcome.deduplicated,
            "VALIDATE complete"
        );
        Ok(outcome)
    }
}
