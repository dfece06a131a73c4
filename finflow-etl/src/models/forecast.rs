//! Forecast pipeline state machine and model artifacts
//!
//! Retraining progresses through:
//! IDLE → EXTRACTING → TRAINING → EVALUATING → PUBLISHED | FAILED
//!
//! A Failed evaluation is retained for audit and never served.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Forecast retraining state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ForecastState {
    Idle,
    /// Building the monthly feature series from warehouse facts
    Extracting,
    /// Fitting trend + seasonal parameters
    Training,
    /// Holdout comparison against the published model
    Evaluating,
    /// New model promoted
    Published,
    /// Evaluation below threshold or training impossible
    Failed,
}

/// Lifecycle status of a stored model artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ArtifactStatus {
    /// Currently served model (at most one per domain)
    Published,
    /// Evaluation missed the promotion threshold; kept for audit
    Failed,
    /// Previously published, replaced by a newer promotion
    Superseded,
}

/// Deterministic model parameters: least-squares linear trend plus mean
/// monthly seasonal offsets over detrended values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelParams {
    pub intercept: f64,
    pub slope: f64,
    /// Offset per calendar month, index 0 = January
    pub seasonal: [f64; 12],
}

/// Holdout evaluation metrics
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EvalMetrics {
    /// Mean absolute percentage error over the holdout months
    pub mape: f64,
    /// Mean absolute error over the holdout months
    pub mae: f64,
    pub holdout_months: u32,
}

/// Trained model plus training-window metadata, retained historically
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub artifact_id: Uuid,
    pub domain: String,
    pub status: ArtifactStatus,
    pub params: ModelParams,
    pub metrics: EvalMetrics,
    /// First month of the training window, `YYYY-MM`
    pub window_start: String,
    /// Last month of the training window, `YYYY-MM`
    pub window_end: String,
    /// Number of dimensional rows the series was derived from
    pub input_rows: usize,
    /// SHA-256 over the ordered feature series, for reproducibility audits
    pub input_hash: String,
    pub trained_at: DateTime<Utc>,
}

impl ModelArtifact {
    /// Point forecast for a month index offset from the window start
    /// (`t` continues the training index) and calendar month (1-12).
    pub fn predict(&self, t: f64, month: u32) -> f64 {
        let seasonal = self
            .params
            .seasonal
            .get((month.saturating_sub(1)) as usize % 12)
            .copied()
            .unwrap_or(0.0);
        self.params.intercept + self.params.slope * t + seasonal
    }
}
