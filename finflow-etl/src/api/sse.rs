//! Server-Sent Events stream of pipeline progress
//!
//! Streams every PipelineEvent to connected clients with heartbeat
//! keep-alives. Operators watch this during long multi-domain runs.

use crate::AppState;
use axum::{
    extract::{Query, State},
    response::sse::{Event, Sse},
};
use futures::stream::Stream;
use serde::Deserialize;
use std::convert::Infallible;
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Deserialize)]
pub struct EventStreamQuery {
    /// Restrict the stream to one domain
    pub domain: Option<String>,
}

/// GET /events - SSE stream of pipeline events
pub async fn event_stream(
    State(state): State<AppState>,
    Query(query): Query<EventStreamQuery>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    info!(domain = ?query.domain, "New SSE client connected");

    let mut rx = state.event_bus.subscribe();
    let domain_filter = query.domain;

    let stream = async_stream::stream! {
        loop {
            tokio::select! {
                // Heartbeat every 15 seconds
                _ = tokio::time::sleep(Duration::from_secs(15)) => {
                    yield Ok(Event::default().comment("heartbeat"));
                }

                event = rx.recv() => {
                    let Ok(event) = event else { continue };

                    if let Some(wanted) = &domain_filter {
                        if event.domain() != wanted {
                            continue;
                        }
                    }

                    let event_type = event.event_type();
                    match serde_json::to_string(&event) {
                        Ok(event_json) => {
                            debug!("SSE: broadcasting {}", event_type);
                            yield Ok(Event::default()
                                .event(event_type)
                                .data(event_json));
                        }
                        Err(e) => {
                            warn!("SSE: failed to serialize {}: {}", event_type, e);
                        }
                    }
                }
            }
        }
    };

    Sse::new(stream).keep_alive(
        axum::response::sse::KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("heartbeat"),
    )
}
