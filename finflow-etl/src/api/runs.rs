//! Run dispatch and status endpoints
//!
//! POST endpoints spawn the run and return immediately; progress is
//! observable through GET /status, GET /runs and the SSE stream.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::db;
use crate::models::{DomainRun, RunTrigger};
use crate::{ApiError, ApiResult, AppState};

/// GET /status/:domain response
#[derive(Debug, Serialize)]
pub struct DomainStatus {
    pub domain: String,
    /// Latest run, if any
    pub latest_run: Option<DomainRun>,
    /// Last committed watermark (RFC3339)
    pub watermark: Option<String>,
    /// Currently valid dimensional rows
    pub current_rows: i64,
    /// Published model summary
    pub published_model: Option<PublishedModel>,
}

#[derive(Debug, Serialize)]
pub struct PublishedModel {
    pub artifact_id: Uuid,
    pub mape: f64,
    pub window_start: String,
    pub window_end: String,
    pub trained_at: String,
}

/// GET /status/:domain
pub async fn domain_status(
    State(state): State<AppState>,
    Path(domain): Path<String>,
) -> ApiResult<Json<DomainStatus>> {
    // Unknown domains 404 before touching storage
    state.settings.domain(&domain)?;

    let latest_run = db::runs::latest_run(&state.db, &domain).await?;
    let watermark = db::watermarks::get(&state.db, &domain)
        .await?
        .map(|w| w.value.to_rfc3339());
    let current_rows = db::warehouse::current_count(&state.db, &domain).await?;
    let published_model = db::artifacts::published(&state.db, &domain)
        .await?
        .map(|artifact| PublishedModel {
            artifact_id: artifact.artifact_id,
            mape: artifact.metrics.mape,
            window_start: artifact.window_start,
            window_end: artifact.window_end,
            trained_at: artifact.trained_at.to_rfc3339(),
        });

    Ok(Json(DomainStatus {
        domain,
        latest_run,
        watermark,
        current_rows,
        published_model,
    }))
}

/// GET /runs/:run_id
pub async fn get_run(
    State(state): State<AppState>,
    Path(run_id): Path<Uuid>,
) -> ApiResult<Json<DomainRun>> {
    let run = db::runs::load_run(&state.db, run_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Run {}", run_id)))?;
    Ok(Json(run))
}

/// POST /run/:domain - start a pipeline run
pub async fn start_run(
    State(state): State<AppState>,
    Path(domain): Path<String>,
) -> ApiResult<(StatusCode, Json<serde_json::Value>)> {
    dispatch(state, domain, RunTrigger::Manual).await
}

/// POST /retrain/:domain - start a forecast-only run
pub async fn start_retrain(
    State(state): State<AppState>,
    Path(domain): Path<String>,
) -> ApiResult<(StatusCode, Json<serde_json::Value>)> {
    dispatch(state, domain, RunTrigger::Retrain).await
}

async fn dispatch(
    state: AppState,
    domain: String,
    trigger: RunTrigger,
) -> ApiResult<(StatusCode, Json<serde_json::Value>)> {
    state.settings.domain(&domain)?;

    {
        let tokens = state.cancellation_tokens.read().await;
        if tokens.contains_key(&domain) {
            return Err(ApiError::Conflict(format!(
                "A run for {} is already in progress",
                domain
            )));
        }
    }

    let token = CancellationToken::new();
    state
        .cancellation_tokens
        .write()
        .await
        .insert(domain.clone(), token.clone());

    let orchestrator = state.orchestrator.clone();
    let tokens = state.cancellation_tokens.clone();
    let spawn_domain = domain.clone();
    tokio::spawn(async move {
        let result = orchestrator
            .run_domain(&spawn_domain, trigger, token)
            .await;
        tokens.write().await.remove(&spawn_domain);
        if let Err(e) = result {
            tracing::error!(domain = %spawn_domain, error = %e, "Dispatched run failed to start");
        }
    });

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({
            "domain": domain,
            "trigger": format!("{:?}", trigger),
            "status": "started",
        })),
    ))
}

/// DELETE /run/:domain - request cancellation between stages
pub async fn cancel_run(
    State(state): State<AppState>,
    Path(domain): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let tokens = state.cancellation_tokens.read().await;
    match tokens.get(&domain) {
        Some(token) => {
            token.cancel();
            Ok(Json(json!({ "domain": domain, "status": "cancelling" })))
        }
        None => Err(ApiError::NotFound(format!(
            "No run in progress for {}",
            domain
        ))),
    }
}

/// Build run routes
pub fn run_routes() -> Router<AppState> {
    Router::new()
        .route("/status/:domain", get(domain_status))
        .route("/runs/:run_id", get(get_run))
        .route("/run/:domain", post(start_run).delete(cancel_run))
        .route("/retrain/:domain", post(start_retrain))
}
