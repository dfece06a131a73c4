//! Stage 4: FORECAST
//!
//! Retrains the domain's forecasting model over the freshly loaded
//! warehouse state. A below-threshold evaluation is NOT a stage
//! failure: the published model stays active and the rejected artifact
//! is retained for audit. Domains without a measure field skip the
//! stage entirely.

use super::PipelineOrchestrator;
use crate::db;
use crate::forecast::RetrainOutcome;
use crate::models::{DomainRun, RunTrigger, SchemaContract, Stage, StageStatus};
use chrono::Utc;
use finflow_common::events::PipelineEvent;
use finflow_common::{Error, Result};

impl PipelineOrchestrator {
    pub(super) async fn stage_forecast(
        &self,
        run: &mut DomainRun,
        contract: &SchemaContract,
    ) -> Result<Option<RetrainOutcome>> {
        if contract.measure_field.is_none() {
            tracing::debug!(
                run_id = %run.run_id,
                domain = %run.domain,
                "FORECAST skipped: contract declares no measure field"
            );
            run.set_stage(Stage::Forecast, StageStatus::Succeeded);
            db::runs::save_run(&self.pool, run).await?;
            return Ok(None);
        }

        run.set_stage(Stage::Forecast, StageStatus::Running);
        db::runs::save_run(&self.pool, run).await?;
        self.event_bus.emit_lossy(PipelineEvent::StageStarted {
            run_id: run.run_id,
            domain: run.domain.clone(),
            stage: Stage::Forecast.name().to_string(),
            timestamp: Utc::now(),
        });

        let outcome = match self.forecast.retrain(&run.domain).await {
            Ok(outcome) => Some(outcome),
            // A young domain without enough warehouse history is only a
            // problem when retraining was the point of the run.
            Err(Error::InvalidInput(msg)) if run.trigger != RunTrigger::Retrain => {
                tracing::warn!(
                    run_id = %run.run_id,
                    domain = %run.domain,
                    reason = %msg,
                    "FORECAST skipped: not enough history yet"
                );
                None
            }
            Err(e) => return Err(e),
        };

        run.set_stage(Stage::Forecast, StageStatus::Succeeded);
        db::runs::save_run(&self.pool, run).await?;
        self.event_bus.emit_lossy(PipelineEvent::StageCompleted {
            run_id: run.run_id,
            domain: run.domain.clone(),
            stage: Stage::Forecast.name().to_string(),
            timestamp: Utc::now(),
        });

        if let Some(outcome) = &outcome {
            tracing::info!(
                run_id = %run.run_id,
                domain = %run.domain,
                promoted = outcome.promoted,
                mape = outcome.artifact.metrics.mape,
                "FORECAST complete"
            );
        }
        Ok(outcome)
    }
}
