//! Read-only warehouse and governance query surface
//!
//! Downstream BI consumers read current rows and history here; the
//! write surface is the loader's alone. Rejection listings back the
//! governance review loop.

use axum::{
    extract::{Path, Query, State},
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use serde::Serialize;

use crate::db;
use crate::db::staging::RejectionEntry;
use crate::db::warehouse::DimensionalRow;
use crate::{ApiResult, AppState};

#[derive(Debug, Deserialize)]
pub struct ForecastQuery {
    /// Months to forecast past the training window
    #[serde(default = "default_horizon")]
    pub horizon: u32,
}

fn default_horizon() -> u32 {
    6
}

#[derive(Debug, Deserialize)]
pub struct RejectionQuery {
    #[serde(default = "default_limit")]
    pub limit: i64,
}

fn default_limit() -> i64 {
    100
}

#[derive(Debug, Serialize)]
pub struct ForecastResponse {
    pub domain: String,
    pub horizon: u32,
    /// (month, predicted total) pairs
    pub forecast: Vec<(String, f64)>,
}

/// GET /warehouse/:domain/current - currently valid rows
pub async fn current_rows(
    State(state): State<AppState>,
    Path(domain): Path<String>,
) -> ApiResult<Json<Vec<DimensionalRow>>> {
    state.settings.domain(&domain)?;
    let rows = db::warehouse::current_rows(&state.db, &domain).await?;
    Ok(Json(rows))
}

/// GET /warehouse/:domain/history/:key - full version history of a
/// business key
pub async fn key_history(
    State(state): State<AppState>,
    Path((domain, key)): Path<(String, String)>,
) -> ApiResult<Json<Vec<DimensionalRow>>> {
    state.settings.domain(&domain)?;
    let rows = db::warehouse::history(&state.db, &domain, &key).await?;
    Ok(Json(rows))
}

/// GET /forecast/:domain?horizon=N - point forecast from the published
/// model
pub async fn forecast(
    State(state): State<AppState>,
    Path(domain): Path<String>,
    Query(query): Query<ForecastQuery>,
) -> ApiResult<Json<ForecastResponse>> {
    state.settings.domain(&domain)?;
    let forecast = state
        .orchestrator
        .forecast_pipeline()
        .predict_series(&domain, query.horizon)
        .await?;
    Ok(Json(ForecastResponse {
        domain,
        horizon: query.horizon,
        forecast,
    }))
}

/// GET /rejections/:domain?limit=N - itemized rejections for review
pub async fn rejections(
    State(state): State<AppState>,
    Path(domain): Path<String>,
    Query(query): Query<RejectionQuery>,
) -> ApiResult<Json<Vec<RejectionEntry>>> {
    state.settings.domain(&domain)?;
    let entries = db::staging::list_rejections(&state.db, &domain, query.limit).await?;
    Ok(Json(entries))
}

/// Build warehouse routes
pub fn warehouse_routes() -> Router<AppState> {
    Router::new()
        .route("/warehouse/:domain/current", get(current_rows))
        .route("/warehouse/:domain/history/:key", get(key_history))
        .route("/forecast/:domain", get(forecast))
        .route("/rejections/:domain", get(rejections))
}
