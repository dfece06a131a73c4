//! Pipeline run persistence
//!
//! Run state is saved after every transition so `status` queries and
//! crash recovery always see the latest stage picture.

use crate::models::{DomainRun, RunCounters, RunError, RunState, RunTrigger};
use crate::models::run::StageStatuses;
use finflow_common::{Error, Result};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

/// Save (upsert) a run
pub async fn save_run(pool: &SqlitePool, run: &DomainRun) -> Result<()> {
    let trigger = serde_json::to_string(&run.trigger)
        .map_err(|e| Error::Internal(format!("Failed to serialize trigger: {}", e)))?;
    let state = serde_json::to_string(&run.state)
        .map_err(|e| Error::Internal(format!("Failed to serialize state: {}", e)))?;
    let stages = serde_json::to_string(&run.stages)
        .map_err(|e| Error::Internal(format!("Failed to serialize stages: {}", e)))?;
    let counters = serde_json::to_string(&run.counters)
        .map_err(|e| Error::Internal(format!("Failed to serialize counters: {}", e)))?;
    let errors = serde_json::to_string(&run.errors)
        .map_err(|e| Error::Internal(format!("Failed to serialize errors: {}", e)))?;

    sqlx::query(
        r#"
        INSERT INTO pipeline_runs
            (run_id, domain, run_trigger, state, stages, counters, errors, started_at, ended_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT (run_id) DO UPDATE SET
            state = excluded.state,
            stages = excluded.stages,
            counters = excluded.counters,
            errors = excluded.errors,
            ended_at = excluded.ended_at
        "#,
    )
    .bind(run.run_id.to_string())
    .bind(&run.domain)
    .bind(&trigger)
    .bind(&state)
    .bind(&stages)
    .bind(&counters)
    .bind(&errors)
    .bind(run.started_at.to_rfc3339())
    .bind(run.ended_at.map(|dt| dt.to_rfc3339()))
    .execute(pool)
    .await?;

    Ok(())
}

fn run_from(row: &sqlx::sqlite::SqliteRow) -> Result<DomainRun> {
    let run_id: String = row.get("run_id");
    let trigger: String = row.get("run_trigger");
    let state: String = row.get("state");
    let stages: String = row.get("stages");
    let counters: String = row.get("counters");
    let errors: String = row.get("errors");
    let started_at: String = row.get("started_at");
    let ended_at: Option<String> = row.get("ended_at");

    let trigger: RunTrigger = serde_json::from_str(&trigger)
        .map_err(|e| Error::Internal(format!("Failed to deserialize trigger: {}", e)))?;
    let state: RunState = serde_json::from_str(&state)
        .map_err(|e| Error::Internal(format!("Failed to deserialize state: {}", e)))?;
    let stages: StageStatuses = serde_json::from_str(&stages)
        .map_err(|e| Error::Internal(format!("Failed to deserialize stages: {}", e)))?;
    let counters: RunCounters = serde_json::from_str(&counters)
        .map_err(|e| Error::Internal(format!("Failed to deserialize counters: {}", e)))?;
    let errors: Vec<RunError> = serde_json::from_str(&errors)
        .map_err(|e| Error::Internal(format!("Failed to deserialize errors: {}", e)))?;

    Ok(DomainRun {
        run_id: Uuid::parse_str(&run_id)
            .map_err(|e| Error::Internal(format!("Invalid run id: {}", e)))?,
        domain: row.get("domain"),
        trigger,
        state,
        stages,
        counters,
        errors,
        started_at: super::parse_ts(&started_at)?,
        ended_at: ended_at.as_deref().map(super::parse_ts).transpose()?,
    })
}

/// Load a run by id
pub async fn load_run(pool: &SqlitePool, run_id: Uuid) -> Result<Option<DomainRun>> {
    let row = sqlx::query("SELECT * FROM pipeline_runs WHERE run_id = ?")
        .bind(run_id.to_string())
        .fetch_optional(pool)
        .await?;

    row.as_ref().map(run_from).transpose()
}

/// Most recent run for a domain
pub async fn latest_run(pool: &SqlitePool, domain: &str) -> Result<Option<DomainRun>> {
    let row = sqlx::query(
        "SELECT * FROM pipeline_runs WHERE domain = ? ORDER BY started_at DESC LIMIT 1",
    )
    .bind(domain)
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(run_from).transpose()
}

/// Recent runs for a domain, newest first
pub async fn recent_runs(pool: &SqlitePool, domain: &str, limit: i64) -> Result<Vec<DomainRun>> {
    let rows = sqlx::query(
        "SELECT * FROM pipeline_runs WHERE domain = ? ORDER BY started_at DESC LIMIT ?",
    )
    .bind(domain)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    rows.iter().map(run_from).collect()
}
