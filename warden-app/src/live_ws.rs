//! WebSocket live channel for dashboard observers.
//!
//! Observers connect to `/ws`, then send text intents: `join:dashboard` to
//! receive every participant update and alert, or `watch:participant:<id>`
//! for one participant's updates. Frames the observer's rooms don't cover
//! are filtered here, at the connection; a lagging observer loses the oldest
//! frames rather than back-pressuring any producer.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use tokio::sync::broadcast::error::RecvError;
use tracing::debug;
use warden_core::live::RoomMembership;

use crate::routes::AppState;

pub async fn ws_handler(State(state): State<AppState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(state, socket))
}

async fn handle_socket(state: AppState, mut socket: WebSocket) {
    let mut frames = state.fabric.subscribe();
    let mut rooms = RoomMembership::default();
    debug!("Observer connected");

    loop {
        tokio::select! {
            frame = frames.recv() => match frame {
                Ok(frame) => {
                    if !rooms.wants(&frame.room) {
                        continue;
                    }
                    if socket.send(Message::Text(frame.payload.to_string().into())).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(missed)) => {
                    state.fabric.note_dropped(missed);
                    debug!(missed = missed, "Observer lagging, frames dropped");
                }
                Err(RecvError::Closed) => break,
            },
            inbound = socket.recv() => match inbound {
                Some(Ok(Message::Text(text))) => {
                    match rooms.apply_intent(text.as_str()) {
                        Some(room) => {
                            debug!(room = %room, "Observer joined room");
                            let ack = serde_json::json!({ "frame": "joined", "room": room });
                            if socket.send(Message::Text(ack.to_string().into())).await.is_err() {
                                break;
                            }
                        }
                        None => debug!(intent = %text.as_str(), "Ignoring unknown intent"),
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!(error = %e, "Observer socket error");
                    break;
                }
            },
        }
    }
    debug!("Observer disconnected");
}
