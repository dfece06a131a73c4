//! Forecast model artifact persistence
//!
//! Artifacts are retained historically: promotion marks the prior
//! Published row Superseded instead of deleting it, so every training
//! decision stays auditable.

use crate::models::{ArtifactStatus, EvalMetrics, ModelArtifact, ModelParams};
use finflow_common::{Error, Result};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

/// Persist a new artifact
pub async fn save_artifact(pool: &SqlitePool, artifact: &ModelArtifact) -> Result<()> {
    let status = serde_json::to_string(&artifact.status)
        .map_err(|e| Error::Internal(format!("Failed to serialize status: {}", e)))?;
    let params = serde_json::to_string(&artifact.params)
        .map_err(|e| Error::Internal(format!("Failed to serialize params: {}", e)))?;

    sqlx::query(
        r#"
        INSERT INTO forecast_models
            (artifact_id, domain, status, params, mape, mae, holdout_months,
             window_start, window_end, input_rows, input_hash, trained_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(artifact.artifact_id.to_string())
    .bind(&artifact.domain)
    .bind(&status)
    .bind(&params)
    .bind(artifact.metrics.mape)
    .bind(artifact.metrics.mae)
    .bind(artifact.metrics.holdout_months as i64)
    .bind(&artifact.window_start)
    .bind(&artifact.window_end)
    .bind(artifact.input_rows as i64)
    .bind(&artifact.input_hash)
    .bind(artifact.trained_at.to_rfc3339())
    .execute(pool)
    .await?;

    Ok(())
}

/// Demote the currently Published artifact (if any) to Superseded
pub async fn supersede_published(pool: &SqlitePool, domain: &str) -> Result<()> {
    let superseded = serde_json::to_string(&ArtifactStatus::Superseded)
        .map_err(|e| Error::Internal(format!("Failed to serialize status: {}", e)))?;
    let published = serde_json::to_string(&ArtifactStatus::Published)
        .map_err(|e| Error::Internal(format!("Failed to serialize status: {}", e)))?;

    sqlx::query("UPDATE forecast_models SET status = ? WHERE domain = ? AND status = ?")
        .bind(&superseded)
        .bind(domain)
        .bind(&published)
        .execute(pool)
        .await?;

    Ok(())
}

fn artifact_from(row: &sqlx::sqlite::SqliteRow) -> Result<ModelArtifact> {
    let artifact_id: String = row.get("artifact_id");
    let status: String = row.get("status");
    let params: String = row.get("params");
    let trained_at: String = row.get("trained_at");

    let status: ArtifactStatus = serde_json::from_str(&status)
        .map_err(|e| Error::Internal(format!("Failed to deserialize status: {}", e)))?;
    let params: ModelParams = serde_json::from_str(&params)
        .map_err(|e| Error::Internal(format!("Failed to deserialize params: {}", e)))?;

    Ok(ModelArtifact {
        artifact_id: Uuid::parse_str(&artifact_id)
            .map_err(|e| Error::Internal(format!("Invalid artifact id: {}", e)))?,
        domain: row.get("domain"),
        status,
        params,
        metrics: EvalMetrics {
            mape: row.get("mape"),
            mae: row.get("mae"),
            holdout_months: row.get::<i64, _>("holdout_months") as u32,
        },
        window_start: row.get("window_start"),
        window_end: row.get("window_end"),
        input_rows: row.get::<i64, _>("input_rows") as usize,
        input_hash: row.get("input_hash"),
        trained_at: super::parse_ts(&trained_at)?,
    })
}

/// Currently published artifact for a domain, if any
pub async fn published(pool: &SqlitePool, domain: &str) -> Result<Option<ModelArtifact>> {
    let status = serde_json::to_string(&ArtifactStatus::Published)
        .map_err(|e| Error::Internal(format!("Failed to serialize status: {}", e)))?;

    let row = sqlx::query("SELECT * FROM forecast_models WHERE domain = ? AND status = ?")
        .bind(domain)
        .bind(&status)
        .fetch_optional(pool)
        .await?;

    row.as_ref().map(artifact_from).transpose()
}

/// All artifacts for a domain, newest first (audit surface)
pub async fn list_artifacts(pool: &SqlitePool, domain: &str) -> Result<Vec<ModelArtifact>> {
    let rows = sqlx::query(
        "SELECT * FROM forecast_models WHERE domain = ? ORDER BY trained_at DESC",
    )
    .bind(domain)
    .fetch_all(pool)
    .await?;

    rows.iter().map(artifact_from).collect()
}
