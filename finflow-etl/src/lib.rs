//! finflow-etl - governed financial pipeline engine
//!
//! Sequences ingestion, validation, warehouse loading and forecast
//! retraining per data domain under versioned schema governance.
//! Exposes the pipeline over a CLI and an HTTP status API.

pub mod adapters;
pub mod api;
pub mod db;
pub mod error;
pub mod forecast;
pub mod loader;
pub mod models;
pub mod orchestrator;
pub mod registry;
pub mod validate;

pub use crate::error::{ApiError, ApiResult};

use axum::Router;
use chrono::{DateTime, Utc};
use finflow_common::config::Settings;
use finflow_common::events::EventBus;
use orchestrator::PipelineOrchestrator;
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Warehouse database connection pool
    pub db: SqlitePool,
    /// Event bus for SSE broadcasting
    pub event_bus: EventBus,
    /// Orchestrator handle for run/retrain dispatch
    pub orchestrator: PipelineOrchestrator,
    /// Settings the service was started with
    pub settings: Arc<Settings>,
    /// Cancellation tokens for in-flight domain runs
    pub cancellation_tokens: Arc<RwLock<HashMap<String, CancellationToken>>>,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
}

impl AppState {
    pub fn new(db: SqlitePool, settings: Arc<Settings>, event_bus: EventBus) -> Self {
        let orchestrator =
            PipelineOrchestrator::new(db.clone(), settings.clone(), event_bus.clone());
        Self {
            db,
            event_bus,
            orchestrator,
            settings,
            cancellation_tokens: Arc::new(RwLock::new(HashMap::new())),
            startup_time: Utc::now(),
        }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    use axum::routing::get;

    Router::new()
        .merge(api::health::health_routes())
        .merge(api::runs::run_routes())
        .merge(api::warehouse::warehouse_routes())
        .route("/events", get(api::sse::event_stream))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}
