//! Pipeline run state machine
//!
//! A domain run progresses through four sequential stages:
//! INGEST → VALIDATE → LOAD → FORECAST
//!
//! Each stage carries its own status for observability; the run itself
//! has an overall state with terminal detection, persisted after every
//! transition.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Pipeline stage identifiers, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Stage {
    /// Adapter fetch of raw records newer than the watermark
    Ingest,
    /// Contract enforcement and standardization
    Validate,
    /// Incremental SCD2 load into dimensional tables
    Load,
    /// Feature extraction and model retraining
    Forecast,
}

impl Stage {
    pub const ALL: [Stage; 4] = [Stage::Ingest, Stage::Validate, Stage::Load, Stage::Forecast];

    pub fn name(&self) -> &'static str {
        match self {
            Stage::Ingest => "INGEST",
            Stage::Validate => "VALIDATE",
            Stage::Load => "LOAD",
            Stage::Forecast => "FORECAST",
        }
    }
}

/// Per-stage run status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum StageStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Retrying,
}

/// Overall run state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RunState {
    Pending,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

/// What started the run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RunTrigger {
    Manual,
    Scheduled,
    /// Forecast-only run (skips ingest/validate/load)
    Retrain,
}

/// Record counts accumulated across stages
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct RunCounters {
    pub fetched: usize,
    pub accepted: usize,
    pub rejected: usize,
    pub deduplicated: usize,
    pub inserted: usize,
    pub superseded: usize,
    pub unchanged: usize,
}

/// One recorded stage failure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunError {
    pub stage: Stage,
    pub message: String,
    pub occurred_at: DateTime<Utc>,
}

/// Per-stage statuses of a run
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct StageStatuses {
    pub ingest: StageStatus,
    pub validate: StageStatus,
    pub load: StageStatus,
    pub forecast: StageStatus,
}

impl Default for StageStatuses {
    fn default() -> Self {
        Self {
            ingest: StageStatus::Pending,
            validate: StageStatus::Pending,
            load: StageStatus::Pending,
            forecast: StageStatus::Pending,
        }
    }
}

impl StageStatuses {
    pub fn get(&self, stage: Stage) -> StageStatus {
        match stage {
            Stage::Ingest => self.ingest,
            Stage::Validate => self.validate,
            Stage::Load => self.load,
            Stage::Forecast => self.forecast,
        }
    }

    pub fn set(&mut self, stage: Stage, status: StageStatus) {
        match stage {
            Stage::Ingest => self.ingest = status,
            Stage::Validate => self.validate = status,
            Stage::Load => self.load = status,
            Stage::Forecast => self.forecast = status,
        }
    }
}

/// One domain pipeline run (in-memory state, persisted per transition)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainRun {
    pub run_id: Uuid,
    pub domain: String,
    pub trigger: RunTrigger,
    pub state: RunState,
    pub stages: StageStatuses,
    pub counters: RunCounters,
    pub errors: Vec<RunError>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl DomainRun {
    pub fn new(domain: impl Into<String>, trigger: RunTrigger) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            domain: domain.into(),
            trigger,
            state: RunState::Pending,
            stages: StageStatuses::default(),
            counters: RunCounters::default(),
            errors: Vec::new(),
            started_at: Utc::now(),
            ended_at: None,
        }
    }

    /// Transition the overall run state; terminal states stamp `ended_at`
    pub fn transition_to(&mut self, new_state: RunState) {
        self.state = new_state;
        if self.is_terminal() {
            self.ended_at = Some(Utc::now());
        }
    }

    pub fn set_stage(&mut self, stage: Stage, status: StageStatus) {
        self.stages.set(stage, status);
    }

    pub fn add_error(&mut self, stage: Stage, message: impl Into<String>) {
        self.errors.push(RunError {
            stage,
            message: message.into(),
            occurred_at: Utc::now(),
        });
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self.state,
            RunState::Succeeded | RunState::Failed | RunState::Cancelled
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_run_is_pending_with_pending_stages() {
        let run = DomainRun::new("dre_lancamentos", RunTrigger::Manual);
        assert_eq!(run.state, RunState::Pending);
        for stage in Stage::ALL {
            assert_eq!(run.stages.get(stage), StageStatus::Pending);
        }
        assert!(run.ended_at.is_none());
    }

    #[test]
    fn terminal_transition_stamps_end_time() {
        let mut run = DomainRun::new("base_clientes", RunTrigger::Scheduled);
        run.transition_to(RunState::Running);
        assert!(run.ended_at.is_none());

        run.transition_to(RunState::Succeeded);
        assert!(run.is_terminal());
        assert!(run.ended_at.is_some());
    }

    #[test]
    fn stage_statuses_update_independently() {
        let mut run = DomainRun::new("receita_doc", RunTrigger::Manual);
        run.set_stage(Stage::Ingest, StageStatus::Succeeded);
        run.set_stage(Stage::Validate, StageStatus::Retrying);
        assert_eq!(run.stages.get(Stage::Ingest), StageStatus::Succeeded);
        assert_eq!(run.stages.get(Stage::Validate), StageStatus::Retrying);
        assert_eq!(run.stages.get(Stage::Load), StageStatus::Pending);
    }
}
