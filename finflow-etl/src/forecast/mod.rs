//! Feature & forecast pipeline
//!
//! Per-domain retraining state machine:
//! IDLE → EXTRACTING → TRAINING → EVALUATING → PUBLISHED | FAILED
//!
//! Features are monthly totals of the contract's measure over the
//! currently valid dimensional rows, zero-filled across a fixed
//! trailing window so the same window always yields the same matrix.
//! Evaluation holds out the trailing months and compares MAPE against
//! the published model; promotion requires the configured minimum
//! improvement. Failed artifacts are retained for audit, never served.

pub mod model;

use crate::db;
use crate::models::{ArtifactStatus, EvalMetrics, ForecastState, ModelArtifact};
use chrono::Utc;
use finflow_common::config::ForecastConfig;
use finflow_common::events::{EventBus, PipelineEvent};
use finflow_common::{Error, Result};
use sha2::{Digest, Sha256};
use sqlx::SqlitePool;
use uuid::Uuid;

/// Result of one retraining pass
#[derive(Debug, Clone)]
pub struct RetrainOutcome {
    pub state: ForecastState,
    pub artifact: ModelArtifact,
    /// True when the new artifact replaced the published model
    pub promoted: bool,
}

pub struct ForecastPipeline {
    pool: SqlitePool,
    config: ForecastConfig,
    event_bus: EventBus,
}

impl ForecastPipeline {
    pub fn new(pool: SqlitePool, config: ForecastConfig, event_bus: EventBus) -> Self {
        Self {
            pool,
            config,
            event_bus,
        }
    }

    /// Run one retraining pass for a domain.
    ///
    /// Fails with InvalidInput when the warehouse holds too little data
    /// to split a training window and a holdout.
    pub async fn retrain(&self, domain: &str) -> Result<RetrainOutcome> {
        let mut state = ForecastState::Idle;

        // EXTRACTING
        state = self.transition(domain, state, ForecastState::Extracting);
        let series = self.feature_series(domain).await?;

        let holdout_len = self.config.holdout_months as usize;
        if series.len() < holdout_len + 2 {
            self.transition(domain, state, ForecastState::Failed);
            return Err(Error::InvalidInput(format!(
                "{}: {} months of data, need at least {} to train and evaluate",
                domain,
                series.len(),
                holdout_len + 2
            )));
        }

        // TRAINING
        state = self.transition(domain, state, ForecastState::Training);
        let split = series.len() - holdout_len;
        let (train, holdout) = series.split_at(split);

        let train_values: Vec<f64> = train.iter().map(|(_, v)| *v).collect();
        let start_month0 = month0_of(&train[0].0)?;
        let params = model::fit(&train_values, start_month0);

        // EVALUATING
        state = self.transition(domain, state, ForecastState::Evaluating);
        let holdout_actual: Vec<f64> = holdout.iter().map(|(_, v)| *v).collect();
        let holdout_predicted: Vec<f64> = holdout
            .iter()
            .enumerate()
            .map(|(i, (ym, _))| {
                let month0 = month0_of(ym).unwrap_or(0);
                model::predict(&params, (split + i) as f64, month0)
            })
            .collect();

        let metrics = EvalMetrics {
            mape: model::mape(&holdout_actual, &holdout_predicted),
            mae: model::mae(&holdout_actual, &holdout_predicted),
            holdout_months: self.config.holdout_months,
        };

        let input_rows = db::warehouse::measured_count(&self.pool, domain).await? as usize;
        let mut artifact = ModelArtifact {
            artifact_id: Uuid::new_v4(),
            domain: domain.to_string(),
            status: ArtifactStatus::Failed,
            params,
            metrics,
            window_start: series.first().map(|(ym, _)| ym.clone()).unwrap_or_default(),
            window_end: series.last().map(|(ym, _)| ym.clone()).unwrap_or_default(),
            input_rows,
            input_hash: hash_series(&series),
            trained_at: Utc::now(),
        };

        let published = db::artifacts::published(&self.pool, domain).await?;
        let promoted = match &published {
            None => true,
            Some(current) => beats(
                metrics.mape,
                current.metrics.mape,
                self.config.min_improvement_pct,
            ),
        };

        if promoted {
            artifact.status = ArtifactStatus::Published;
            db::artifacts::supersede_published(&self.pool, domain).await?;
            db::artifacts::save_artifact(&self.pool, &artifact).await?;
            self.transition(domain, state, ForecastState::Published);
            self.event_bus.emit_lossy(PipelineEvent::ModelPromoted {
                domain: domain.to_string(),
                artifact_id: artifact.artifact_id,
                mape: metrics.mape,
                timestamp: Utc::now(),
            });
            tracing::info!(
                domain = %domain,
                artifact_id = %artifact.artifact_id,
                mape = metrics.mape,
                "Forecast model promoted"
            );
            Ok(RetrainOutcome {
                state: ForecastState::Published,
                artifact,
                promoted: true,
            })
        } else {
            let published_mape = published
                .as_ref()
                .map(|a| a.metrics.mape)
                .unwrap_or(f64::INFINITY);
            db::artifacts::save_artifact(&self.pool, &artifact).await?;
            self.transition(domain, state, ForecastState::Failed);
            self.event_bus.emit_lossy(PipelineEvent::ModelRejected {
                domain: domain.to_string(),
                artifact_id: artifact.artifact_id,
                mape: metrics.mape,
                published_mape,
                timestamp: Utc::now(),
            });
            tracing::warn!(
                domain = %domain,
                mape = metrics.mape,
                published_mape,
                threshold_pct = self.config.min_improvement_pct,
                "Retrained model below improvement threshold, keeping published model"
            );
            Ok(RetrainOutcome {
                state: ForecastState::Failed,
                artifact,
                promoted: false,
            })
        }
    }

    /// Monthly feature series over the trailing window, zero-filled so
    /// missing months don't shift the index.
    async fn feature_series(&self, domain: &str) -> Result<Vec<(String, f64)>> {
        let observed = db::warehouse::monthly_series(&self.pool, domain).await?;
        let last = match observed.last() {
            Some((ym, _)) => ym.clone(),
            None => return Ok(Vec::new()),
        };

        let window = self.config.window_months as i64;
        let end_index = month_index(&last)?;
        let start_index = end_index - (window - 1);

        let mut filled = Vec::with_capacity(window as usize);
        for index in start_index..=end_index {
            let ym = index_to_ym(index);
            let value = observed
                .iter()
                .find(|(m, _)| *m == ym)
                .map(|(_, v)| *v)
                .unwrap_or(0.0);
            filled.push((ym, value));
        }

        // Leading zero-months before the first observation carry no
        // signal; trim them but keep the window tail intact.
        let first_observed = observed.first().map(|(ym, _)| ym.clone()).unwrap_or(last);
        let first_index = month_index(&first_observed)?.max(start_index);
        let skip = (first_index - start_index) as usize;
        Ok(filled.split_off(skip))
    }

    /// Forecast `horizon` months past the published model's window
    pub async fn predict_series(
        &self,
        domain: &str,
        horizon: u32,
    ) -> Result<Vec<(String, f64)>> {
        let artifact = db::artifacts::published(&self.pool, domain)
            .await?
            .ok_or_else(|| Error::NotFound(format!("No published model for {}", domain)))?;

        let start_index = month_index(&artifact.window_start)?;
        let end_index = month_index(&artifact.window_end)?;
        let train_len = (end_index - start_index + 1) as f64;

        let mut forecast = Vec::with_capacity(horizon as usize);
        for i in 0..horizon as i64 {
            let index = end_index + 1 + i;
            let ym = index_to_ym(index);
            let month0 = (index.rem_euclid(12)) as usize;
            let value = model::predict(&artifact.params, train_len + i as f64, month0);
            forecast.push((ym, value));
        }
        Ok(forecast)
    }

    fn transition(
        &self,
        domain: &str,
        from: ForecastState,
        to: ForecastState,
    ) -> ForecastState {
        tracing::debug!(domain = %domain, from = ?from, to = ?to, "Forecast state transition");
        to
    }
}

/// Promotion test: new model must improve published MAPE by at least
/// `min_improvement_pct` percent (relative).
fn beats(new_mape: f64, published_mape: f64, min_improvement_pct: f64) -> bool {
    if !published_mape.is_finite() {
        return new_mape.is_finite();
    }
    if published_mape <= f64::EPSILON {
        return false;
    }
    let improvement = (published_mape - new_mape) / published_mape * 100.0;
    improvement >= min_improvement_pct
}

/// Months since year 0 for a `YYYY-MM` key
fn month_index(ym: &str) -> Result<i64> {
    let (year, month) = ym
        .split_once('-')
        .ok_or_else(|| Error::Internal(format!("Bad month key: '{}'", ym)))?;
    let year: i64 = year
        .parse()
        .map_err(|_| Error::Internal(format!("Bad month key: '{}'", ym)))?;
    let month: i64 = month
        .parse()
        .map_err(|_| Error::Internal(format!("Bad month key: '{}'", ym)))?;
    if !(1..=12).contains(&month) {
        return Err(Error::Internal(format!("Bad month key: '{}'", ym)));
    }
    Ok(year * 12 + (month - 1))
}

/// Calendar month (0 = January) of a `YYYY-MM` key
fn month0_of(ym: &str) -> Result<usize> {
    Ok(month_index(ym)?.rem_euclid(12) as usize)
}

fn index_to_ym(index: i64) -> String {
    format!("{:04}-{:02}", index.div_euclid(12), index.rem_euclid(12) + 1)
}

/// SHA-256 over the ordered feature series for reproducibility audits
fn hash_series(series: &[(String, f64)]) -> String {
    let mut hasher = Sha256::new();
    for (ym, value) in series {
        hasher.update(ym.as_bytes());
        hasher.update(b"=");
        hasher.update(value.to_bits().to_be_bytes());
        hasher.update(b";");
    }
    format!("{:x}", hasher.finalize())
}
