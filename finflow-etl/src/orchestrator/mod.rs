//! Pipeline orchestrator
//!
//! Sequences INGEST → VALIDATE → LOAD → FORECAST per data domain.
//! Stages execute strictly sequentially within a domain; independent
//! domains run in parallel and never block each other. Each stage is
//! wrapped in bounded exponential backoff retry, and cancellation is
//! honored between stages only, leaving the watermark unadvanced.

mod retry;
mod scheduler;
mod stage_forecast;
mod stage_ingest;
mod stage_load;
mod stage_validate;

pub use retry::retry_stage;
pub use scheduler::{run_scheduler, spawn_timers, TriggerCommand};

use crate::db;
use crate::models::{DomainRun, RunState, RunTrigger, Stage, StageStatus};
use crate::registry::SchemaRegistry;
use chrono::Utc;
use finflow_common::config::Settings;
use finflow_common::events::{EventBus, PipelineEvent};
use finflow_common::{Error, Result};
use sqlx::SqlitePool;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// Aggregate outcome of a multi-domain run, mapped to the process exit
/// code by the CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Succeeded,
    Failed,
    PartiallyFailed,
}

impl Outcome {
    pub fn exit_code(&self) -> i32 {
        match self {
            Outcome::Succeeded => 0,
            Outcome::Failed => 1,
            Outcome::PartiallyFailed => 2,
        }
    }
}

/// Aggregate per-domain results into one outcome
pub fn overall_outcome(runs: &[DomainRun]) -> Outcome {
    let succeeded = runs.iter().filter(|r| r.state == RunState::Succeeded).count();
    if succeeded == runs.len() {
        Outcome::Succeeded
    } else if succeeded == 0 {
        Outcome::Failed
    } else {
        Outcome::PartiallyFailed
    }
}

/// Orchestrates domain pipelines over shared storage
#[derive(Clone)]
pub struct PipelineOrchestrator {
    pub(crate) pool: SqlitePool,
    pub(crate) settings: Arc<Settings>,
    pub(crate) registry: SchemaRegistry,
    pub(crate) loader: Arc<crate::loader::WarehouseLoader>,
    pub(crate) forecast: Arc<crate::forecast::ForecastPipeline>,
    pub(crate) event_bus: EventBus,
    /// Domains with a run in flight; a second run of the same domain is
    /// refused so the loader never sees a later run's records before an
    /// earlier run's watermark commit.
    active: Arc<Mutex<HashSet<String>>>,
}

impl PipelineOrchestrator {
    pub fn new(pool: SqlitePool, settings: Arc<Settings>, event_bus: EventBus) -> Self {
        let registry = SchemaRegistry::new(pool.clone());
        let loader = Arc::new(crate::loader::WarehouseLoader::new(
            pool.clone(),
            settings.load.chunk_size,
            event_bus.clone(),
        ));
        let forecast = Arc::new(crate::forecast::ForecastPipeline::new(
            pool.clone(),
            settings.forecast.clone(),
            event_bus.clone(),
        ));

        Self {
            pool,
            settings,
            registry,
            loader,
            forecast,
            event_bus,
            active: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    pub fn forecast_pipeline(&self) -> &crate::forecast::ForecastPipeline {
        &self.forecast
    }

    /// Execute one domain pipeline run.
    ///
    /// Stage failures are captured in the returned run (state FAILED);
    /// an Err return means the run could not start at all (unknown
    /// domain, or one already in flight).
    pub async fn run_domain(
        &self,
        domain_name: &str,
        trigger: RunTrigger,
        cancel_token: CancellationToken,
    ) -> Result<DomainRun> {
        let config = self.settings.domain(domain_name)?.clone();
        let _guard = self.claim_domain(domain_name)?;

        let mut run = DomainRun::new(domain_name, trigger);
        run.transition_to(RunState::Running);
        db::runs::save_run(&self.pool, &run).await?;

        self.event_bus.emit_lossy(PipelineEvent::RunStarted {
            run_id: run.run_id,
            domain: domain_name.to_string(),
            trigger: format!("{:?}", trigger),
            timestamp: Utc::now(),
        });
        tracing::info!(
            run_id = %run.run_id,
            domain = %domain_name,
            trigger = ?trigger,
            "Starting pipeline run"
        );

        // The contract gates everything downstream of ingest; fetch it
        // up front so a missing registration fails fast.
        let contract = match self
            .registry
            .get(&config.name, config.contract_version)
            .await
        {
            Ok(contract) => contract,
            Err(e) => return self.fail_run(run, Stage::Validate, e).await,
        };

        if trigger == RunTrigger::Retrain {
            // Forecast-only run over the warehouse as it stands.
            match self.stage_forecast(&mut run, &contract).await {
                Ok(_) => {}
                Err(e) => return self.fail_run(run, Stage::Forecast, e).await,
            }
            return self.complete_run(run).await;
        }

        // INGEST
        let raw_records = match self.stage_ingest(&mut run, &config).await {
            Ok(records) => records,
            Err(e) => return self.fail_run(run, Stage::Ingest, e).await,
        };
        if cancel_token.is_cancelled() {
            return self.cancel_run(run).await;
        }

        // VALIDATE
        let outcome = match self.stage_validate(&mut run, &contract, &raw_records).await {
            Ok(outcome) => outcome,
            Err(e) => return self.fail_run(run, Stage::Validate, e).await,
        };
        if cancel_token.is_cancelled() {
            return self.cancel_run(run).await;
        }

        // LOAD
        match self.stage_load(&mut run, &contract, &outcome.accepted).await {
            Ok(_) => {}
            Err(e) => return self.fail_run(run, Stage::Load, e).await,
        }
        if cancel_token.is_cancelled() {
            return self.cancel_run(run).await;
        }

        // FORECAST
        match self.stage_forecast(&mut run, &contract).await {
            Ok(_) => {}
            Err(e) => return self.fail_run(run, Stage::Forecast, e).await,
        }

        self.complete_run(run).await
    }

    /// Run every configured domain in parallel; one domain's failure
    /// never blocks another.
    pub async fn run_all(
        &self,
        trigger: RunTrigger,
        root_token: &CancellationToken,
    ) -> Vec<DomainRun> {
        let mut set = JoinSet::new();
        for domain in &self.settings.domains {
            let orchestrator = self.clone();
            let name = domain.name.clone();
            let token = root_token.child_token();
            set.spawn(async move { orchestrator.run_domain(&name, trigger, token).await });
        }

        let mut runs = Vec::new();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(Ok(run)) => runs.push(run),
                Ok(Err(e)) => tracing::error!(error = %e, "Domain run could not start"),
                Err(e) => tracing::error!(error = %e, "Domain run task panicked"),
            }
        }
        runs.sort_by(|a, b| a.domain.cmp(&b.domain));
        runs
    }

    fn claim_domain(&self, domain: &str) -> Result<ActiveGuard> {
        let mut active = self.active.lock().expect("active set poisoned");
        if !active.insert(domain.to_string()) {
            return Err(Error::InvalidInput(format!(
                "A run for {} is already in progress",
                domain
            )));
        }
        Ok(ActiveGuard {
            active: self.active.clone(),
            domain: domain.to_string(),
        })
    }

    async fn complete_run(&self, mut run: DomainRun) -> Result<DomainRun> {
        run.transition_to(RunState::Succeeded);
        db::runs::save_run(&self.pool, &run).await?;

        self.event_bus.emit_lossy(PipelineEvent::RunCompleted {
            run_id: run.run_id,
            domain: run.domain.clone(),
            inserted: run.counters.inserted,
            superseded: run.counters.superseded,
            rejected: run.counters.rejected,
            timestamp: Utc::now(),
        });
        tracing::info!(
            run_id = %run.run_id,
            domain = %run.domain,
            inserted = run.counters.inserted,
            superseded = run.counters.superseded,
            rejected = run.counters.rejected,
            "Pipeline run completed"
        );
        Ok(run)
    }

    async fn fail_run(&self, mut run: DomainRun, stage: Stage, error: Error) -> Result<DomainRun> {
        run.set_stage(stage, StageStatus::Failed);
        run.add_error(stage, error.to_string());
        run.transition_to(RunState::Failed);
        db::runs::save_run(&self.pool, &run).await?;

        self.event_bus.emit_lossy(PipelineEvent::RunFailed {
            run_id: run.run_id,
            domain: run.domain.clone(),
            stage: stage.name().to_string(),
            error: error.to_string(),
            timestamp: Utc::now(),
        });
        tracing::error!(
            run_id = %run.run_id,
            domain = %run.domain,
            stage = stage.name(),
            error = %error,
            "Pipeline run failed"
        );
        Ok(run)
    }

    async fn cancel_run(&self, mut run: DomainRun) -> Result<DomainRun> {
        run.transition_to(RunState::Cancelled);
        db::runs::save_run(&self.pool, &run).await?;

        self.event_bus.emit_lossy(PipelineEvent::RunCancelled {
            run_id: run.run_id,
            domain: run.domain.clone(),
            timestamp: Utc::now(),
        });
        tracing::info!(
            run_id = %run.run_id,
            domain = %run.domain,
            "Pipeline run cancelled between stages"
        );
        Ok(run)
    }
}

struct ActiveGuard {
    active: Arc<Mutex<HashSet<String>>>,
    domain: String,
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        if let Ok(mut active) = self.active.lock() {
            active.remove(&self.domain);
        }
    }
}
