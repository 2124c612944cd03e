//! Live event stream for one session.
//!
//! `GET /ws/sessions/{id}?lanes=events,deltas` joins the session's group on
//! the requested lanes (both when omitted) and forwards every envelope as a
//! JSON text frame `{lane, event}`. Client frames other than ping and close
//! are ignored.

use super::api::ApiError;
use super::AppState;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;

use crate::events::{EventEnvelope, Lane, LaneFrame, Subscription};
use crate::persistence::traits::validate_session_id;

#[derive(Debug, Default, Deserialize)]
pub struct StreamQuery {
    pub lanes: Option<String>,
}

/// Parse a comma-separated lane list. Empty or missing selects every lane.
pub fn parse_lanes(raw: Option<&str>) -> Result<Vec<Lane>, String> {
    let Some(raw) = raw.filter(|r| !r.trim().is_empty()) else {
        return Ok(Lane::ALL.to_vec());
    };
    let mut lanes = Vec::new();
    for part in raw.split(',') {
        let lane = Lane::from_str_opt(part).ok_or_else(|| format!("unknown lane: {}", part.trim()))?;
        if !lanes.contains(&lane) {
            lanes.push(lane);
        }
    }
    Ok(lanes)
}

pub fn encode_frame(envelope: &EventEnvelope) -> serde_json::Result<String> {
    serde_json::to_string(&LaneFrame {
        lane: envelope.lane(),
        event: envelope,
    })
}

/// GET /ws/sessions/{id}
pub async fn handle_session_socket(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Query(query): Query<StreamQuery>,
    ws: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    validate_session_id(&session_id).map_err(|e| ApiError::BadRequest(e.to_string()))?;
    let lanes = parse_lanes(query.lanes.as_deref()).map_err(ApiError::BadRequest)?;

    let subscription = state.hub.subscribe(&session_id, &lanes);
    Ok(ws.on_upgrade(move |socket| stream_events(socket, state, subscription)))
}

async fn stream_events(socket: WebSocket, state: AppState, mut subscription: Subscription) {
    let session_id = subscription.session_id.clone();
    let subscriber = subscription.id;
    tracing::info!(session_id = %session_id, subscriber, "Event stream opened");

    let (mut ws_tx, mut ws_rx) = socket.split();

    loop {
        tokio::select! {
            envelope = subscription.recv() => {
                let Some(envelope) = envelope else { break };
                let json = match encode_frame(&envelope) {
                    Ok(json) => json,
                    Err(e) => {
                        tracing::warn!(session_id = %session_id, error = %e, "Failed to encode event frame");
                        continue;
                    }
                };
                if ws_tx.send(Message::Text(json.into())).await.is_err() {
                    break;
                }
            }
            incoming = ws_rx.next() => {
                match incoming {
                    Some(Ok(Message::Ping(data))) => {
                        if ws_tx.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::debug!(session_id = %session_id, error = %e, "WebSocket receive error");
                        break;
                    }
                }
            }
        }
    }

    let dropped = subscription.dropped_count();
    state.hub.unsubscribe(&session_id, subscriber);
    tracing::info!(session_id = %session_id, subscriber, dropped, "Event stream closed");
}
