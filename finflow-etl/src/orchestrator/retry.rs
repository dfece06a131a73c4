//! Stage retry logic
//!
//! Bounded exponential backoff around one pipeline stage. Only errors
//! the taxonomy marks retryable are retried; everything else fails the
//! stage immediately. Every retry is announced on the event bus so the
//! status surface shows RETRYING rather than a silent stall.

use crate::models::Stage;
use chrono::Utc;
use finflow_common::config::RetryConfig;
use finflow_common::events::{EventBus, PipelineEvent};
use finflow_common::Result;
use std::time::Duration;
use uuid::Uuid;

/// Run `operation` with the configured retry policy.
///
/// # Arguments
/// * `run_id` / `domain` / `stage` - identity for logging and events
/// * `policy` - attempts and backoff bounds
/// * `operation` - async closure performing the stage work
pub async fn retry_stage<F, Fut, T>(
    run_id: Uuid,
    domain: &str,
    stage: Stage,
    policy: &RetryConfig,
    event_bus: &EventBus,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let mut backoff_ms = policy.base_delay_ms.max(1);
    let max_attempts = policy.max_attempts.max(1);

    for attempt in 1..=max_attempts {
        match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    tracing::info!(
                        domain = %domain,
                        stage = stage.name(),
                        attempt,
                        "Stage succeeded after retry"
                    );
                }
                return Ok(result);
            }
            Err(err) if err.is_retryable() && attempt < max_attempts => {
                tracing::warn!(
                    domain = %domain,
                    stage = stage.name(),
                    attempt,
                    backoff_ms,
                    error = %err,
                    "Stage failed with retryable error, backing off"
                );
                event_bus.emit_lossy(PipelineEvent::StageRetrying {
                    run_id,
                    domain: domain.to_string(),
                    stage: stage.name().to_string(),
                    attempt,
                    backoff_ms,
                    error: err.to_string(),
                    timestamp: Utc::now(),
                });

                tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                backoff_ms = (backoff_ms * 2).min(policy.max_delay_ms);
            }
            Err(err) => {
                tracing::error!(
                    domain = %domain,
                    stage = stage.name(),
                    attempt,
                    error = %err,
                    "Stage failed"
                );
                return Err(err);
            }
        }
    }

    unreachable!("retry loop returns on the final attempt")
}
