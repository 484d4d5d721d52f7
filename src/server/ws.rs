use axum::{
    extract::{
        Query, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt, stream::SplitSink, stream::SplitStream};
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

use forge_common::ProjectId;

use super::api::SharedState;
use crate::orchestrator::ForgeEvent;

/// How often to send WebSocket Ping frames.
const PING_INTERVAL: Duration = Duration::from_secs(30);

/// How long to wait for a Pong response before considering the connection dead.
const PONG_TIMEOUT: Duration = Duration::from_secs(60);

/// `GET /ws?project_id=N` limits the feed to one project.
#[derive(Debug, Default, Deserialize)]
pub struct FeedFilter {
    #[serde(default)]
    pub project_id: Option<ProjectId>,
}

impl FeedFilter {
    fn accepts(&self, event: &ForgeEvent) -> bool {
        self.project_id
            .is_none_or(|project_id| event.project_id() == project_id)
    }
}

// ── WebSocket handler ────────────────────────────────────────────────

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<SharedState>,
    Query(filter): Query<FeedFilter>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, filter))
}

async fn handle_socket(socket: WebSocket, state: SharedState, filter: FeedFilter) {
    let client_id = Uuid::new_v4();
    let rx = state.orchestrator.lock().await.subscribe();
    debug!(%client_id, project_id = ?filter.project_id, "websocket client connected");

    let (sender, receiver) = socket.split();
    run_socket_loop(sender, receiver, rx, &filter).await;
    debug!(%client_id, "websocket client disconnected");
}

/// Core WebSocket loop with ping/pong keepalive.
///
/// Combines event forwarding, client message receiving, and periodic
/// ping/pong health checking into a single select loop. If no Pong is
/// received within [`PONG_TIMEOUT`] after a Ping is sent, the connection
/// is considered dead and the loop exits.
async fn run_socket_loop(
    mut sender: SplitSink<WebSocket, Message>,
    mut receiver: SplitStream<WebSocket>,
    mut rx: broadcast::Receiver<ForgeEvent>,
    filter: &FeedFilter,
) {
    let mut ping_interval = tokio::time::interval(PING_INTERVAL);
    // The first tick completes immediately; consume it so the first real
    // ping fires after PING_INTERVAL has elapsed.
    ping_interval.tick().await;

    let mut last_pong = Instant::now();
    let mut awaiting_pong = false;

    loop {
        tokio::select! {
            _ = ping_interval.tick() => {
                if awaiting_pong && last_pong.elapsed() > PONG_TIMEOUT {
                    break;
                }
                if sender.send(Message::Ping(Default::default())).await.is_err() {
                    break;
                }
                awaiting_pong = true;
            }

            result = rx.recv() => {
                match result {
                    Ok(event) => {
                        if !filter.accepts(&event) {
                            continue;
                        }
                        let Some(json) = encode(&event) else { continue };
                        if sender.send(Message::Text(json.into())).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!(skipped, "websocket client lagging, events dropped");
                        continue;
                    }
                }
            }

            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Pong(_))) => {
                        last_pong = Instant::now();
                        awaiting_pong = false;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    // Text, Binary and Ping from the client are ignored.
                    Some(Ok(_)) => {}
                    Some(Err(_)) => break,
                }
            }
        }
    }

    // Best-effort close frame
    let _ = sender.send(Message::Close(None)).await;
}

fn encode(event: &ForgeEvent) -> Option<String> {
    match serde_json::to_string(event) {
        Ok(json) => Some(json),
        Err(e) => {
            warn!(error = %e, "failed to serialize event");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use forge_common::JobState;

    fn state_change(project_id: ProjectId) -> ForgeEvent {
        ForgeEvent::JobStateChanged {
            project_id,
            job_id: 1,
            from: JobState::Created,
            to: JobState::Running,
            reason: None,
        }
    }

    #[test]
    fn test_unfiltered_feed_accepts_everything() {
        let filter = FeedFilter::default();
        assert!(filter.accepts(&state_change(1)));
        assert!(filter.accepts(&ForgeEvent::ProjectDeleted { project_id: 7 }));
    }

    #[test]
    fn test_project_filter() {
        let filter = FeedFilter {
            project_id: Some(2),
        };
        assert!(filter.accepts(&state_change(2)));
        assert!(!filter.accepts(&state_change(3)));
    }

    #[test]
    fn test_encode_produces_tagged_json() {
        let json = encode(&state_change(4)).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["type"], "JobStateChanged");
        assert_eq!(value["data"]["project_id"], 4);
    }

    #[tokio::test]
    async fn test_broadcast_channel_delivers_to_subscribers() {
        let (tx, mut rx) = broadcast::channel(16);
        crate::orchestrator::broadcast_event(&tx, state_change(1));
        let received = rx.recv().await.unwrap();
        assert_eq!(received.project_id(), 1);
    }
}
