//! Scheduling: explicit timer events feeding the orchestrator
//!
//! Cron-like triggers are modeled as messages on an mpsc channel, not
//! as background tasks mutating state directly. Timer tasks only send
//! `TriggerCommand`s; the scheduler loop owns all run dispatch, so
//! every run (manual or scheduled) enters through the same path.

use super::PipelineOrchestrator;
use crate::models::RunTrigger;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// One scheduling event for the orchestrator loop
#[derive(Debug, Clone)]
pub struct TriggerCommand {
    pub domain: String,
    pub trigger: RunTrigger,
}

/// Spawn interval timers for every domain with a poll or retrain
/// schedule. Each tick sends a command; nothing runs from the timer
/// task itself.
pub fn spawn_timers(
    orchestrator: &PipelineOrchestrator,
    tx: mpsc::Sender<TriggerCommand>,
    shutdown: CancellationToken,
) {
    for domain in &orchestrator.settings.domains {
        if let Some(minutes) = domain.poll_minutes {
            spawn_interval(
                tx.clone(),
                shutdown.clone(),
                domain.name.clone(),
                RunTrigger::Scheduled,
                minutes,
            );
        }
        if let Some(minutes) = domain.retrain_minutes {
            spawn_interval(
                tx.clone(),
                shutdown.clone(),
                domain.name.clone(),
                RunTrigger::Retrain,
                minutes,
            );
        }
    }
}

fn spawn_interval(
    tx: mpsc::Sender<TriggerCommand>,
    shutdown: CancellationToken,
    domain: String,
    trigger: RunTrigger,
    minutes: u64,
) {
    tokio::spawn(async move {
        let period = Duration::from_secs(minutes.max(1) * 60);
        let mut interval = tokio::time::interval(period);
        // The immediate first tick would race startup; skip it.
        interval.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::debug!(domain = %domain, trigger = ?trigger, "Timer stopped");
                    return;
                }
                _ = interval.tick() => {
                    tracing::debug!(domain = %domain, trigger = ?trigger, "Schedule tick");
                    if tx.send(TriggerCommand { domain: domain.clone(), trigger }).await.is_err() {
                        return; // scheduler loop gone
                    }
                }
            }
        }
    });
}

/// Consume trigger commands and dispatch domain runs.
///
/// Runs are spawned so a slow domain never delays another domain's
/// trigger; the per-domain claim inside the orchestrator refuses
/// overlapping runs of the same domain.
pub async fn run_scheduler(
    orchestrator: PipelineOrchestrator,
    mut rx: mpsc::Receiver<TriggerCommand>,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                tracing::info!("Scheduler shutting down");
                return;
            }
            command = rx.recv() => {
                let Some(command) = command else { return };
                let orchestrator = orchestrator.clone();
                let token = shutdown.child_token();
                tokio::spawn(async move {
                    match orchestrator.run_domain(&command.domain, command.trigger, token).await {
                        Ok(run) => {
                            tracing::debug!(
                                domain = %command.domain,
                                run_id = %run.run_id,
                                state = ?run.state,
                                "Scheduled run finished"
                            );
                        }
                        Err(e) => {
                            // Overlapping schedule ticks land here; the
                            // in-flight run already covers the work.
                            tracing::warn!(
                                domain = %command.domain,
                                error = %e,
                                "Scheduled run not started"
                            );
                        }
                    }
                });
            }
        }
    }
}
