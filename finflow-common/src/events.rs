//! Event types for the finflow event system
//!
//! Every stage boundary, watermark move and model decision is broadcast
//! as a [`PipelineEvent`] on the [`EventBus`]. Consumers (SSE clients,
//! tests) subscribe; emission never blocks pipeline progress.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// finflow event types
///
/// Events are broadcast via EventBus and serialized for SSE transmission.
/// All events use this central enum for type safety and exhaustive matching.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PipelineEvent {
    /// A domain run started
    RunStarted {
        run_id: Uuid,
        domain: String,
        trigger: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A pipeline stage started executing
    StageStarted {
        run_id: Uuid,
        domain: String,
        stage: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A pipeline stage finished successfully
    StageCompleted {
        run_id: Uuid,
        domain: String,
        stage: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A stage failed with a retryable error and will run again
    StageRetrying {
        run_id: Uuid,
        domain: String,
        stage: String,
        attempt: u32,
        backoff_ms: u64,
        error: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Validation finished; counts cover the whole batch
    ValidationCompleted {
        run_id: Uuid,
        domain: String,
        accepted: usize,
        rejected: usize,
        deduplicated: usize,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// The loader committed a chunk and advanced the domain watermark
    WatermarkAdvanced {
        domain: String,
        watermark: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A retrained model beat the published one and was promoted
    ModelPromoted {
        domain: String,
        artifact_id: Uuid,
        mape: f64,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A retrained model missed the improvement threshold; the
    /// published model stays active
    ModelRejected {
        domain: String,
        artifact_id: Uuid,
        mape: f64,
        published_mape: f64,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A domain run finished successfully
    RunCompleted {
        run_id: Uuid,
        domain: String,
        inserted: usize,
        superseded: usize,
        rejected: usize,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A domain run failed after retries were exhausted
    RunFailed {
        run_id: Uuid,
        domain: String,
        stage: String,
        error: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A domain run was cancelled between stages
    RunCancelled {
        run_id: Uuid,
        domain: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },
}

impl PipelineEvent {
    /// Event type name for SSE event framing
    pub fn event_type(&self) -> &'static str {
        match self {
            PipelineEvent::RunStarted { .. } => "RunStarted",
            PipelineEvent::StageStarted { .. } => "StageStarted",
            PipelineEvent::StageCompleted { .. } => "StageCompleted",
            PipelineEvent::StageRetrying { .. } => "StageRetrying",
            PipelineEvent::ValidationCompleted { .. } => "ValidationCompleted",
            PipelineEvent::WatermarkAdvanced { .. } => "WatermarkAdvanced",
            PipelineEvent::ModelPromoted { .. } => "ModelPromoted",
            PipelineEvent::ModelRejected { .. } => "ModelRejected",
            PipelineEvent::RunCompleted { .. } => "RunCompleted",
            PipelineEvent::RunFailed { .. } => "RunFailed",
            PipelineEvent::RunCancelled { .. } => "RunCancelled",
        }
    }

    /// Domain the event refers to
    pub fn domain(&self) -> &str {
        match self {
            PipelineEvent::RunStarted { domain, .. }
            | PipelineEvent::StageStarted { domain, .. }
            | PipelineEvent::StageCompleted { domain, .. }
            | PipelineEvent::StageRetrying { domain, .. }
            | PipelineEvent::ValidationCompleted { domain, .. }
            | PipelineEvent::WatermarkAdvanced { domain, .. }
            | PipelineEvent::ModelPromoted { domain, .. }
            | PipelineEvent::ModelRejected { domain, .. }
            | PipelineEvent::RunCompleted { domain, .. }
            | PipelineEvent::RunFailed { domain, .. }
            | PipelineEvent::RunCancelled { domain, .. } => domain,
        }
    }
}

/// Broadcast bus for pipeline events
///
/// Cloneable handle over a tokio broadcast channel. Subscribers receive
/// events emitted after subscription; slow subscribers drop the oldest
/// buffered events.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<PipelineEvent>,
}

impl EventBus {
    /// Create a new EventBus with the given channel capacity
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.tx.subscribe()
    }

    /// Emit an event, ignoring the no-subscriber case.
    ///
    /// Pipeline progress never depends on someone listening.
    pub fn emit_lossy(&self, event: PipelineEvent) {
        if let Err(e) = self.tx.send(event) {
            tracing::trace!("No subscribers for event: {}", e.0.event_type());
        }
    }

    /// Current subscriber count
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_receive_emitted_events() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();

        bus.emit_lossy(PipelineEvent::WatermarkAdvanced {
            domain: "base_clientes".to_string(),
            watermark: "2025-06-01T00:00:00Z".to_string(),
            timestamp: chrono::Utc::now(),
        });

        let event = rx.recv().await.unwrap();
        assert_eq!(event.event_type(), "WatermarkAdvanced");
        assert_eq!(event.domain(), "base_clientes");
    }

    #[test]
    fn emit_without_subscribers_does_not_panic() {
        let bus = EventBus::new(4);
        bus.emit_lossy(PipelineEvent::RunCancelled {
            run_id: Uuid::new_v4(),
            domain: "receita_doc".to_string(),
            timestamp: chrono::Utc::now(),
        });
        assert_eq!(bus.subscriber_count(), 0);
    }
}
