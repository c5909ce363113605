// =============================================================================
// WebSocket Handler — Push-based arena state updates
// =============================================================================
//
// Clients connect to `/ws?token=<jwt>` (or send `Authorization: Bearer`, but
// browsers cannot set arbitrary headers on the upgrade request) and receive:
//   1. An immediate catch-up snapshot — the `Broadcaster`'s last published
//      blob — on connect.
//   2. Every subsequent blob the scheduler publishes after a bot's turn.
//
// Grounded on the teacher's `api/ws.rs` push/recv `tokio::select!` loop,
// generalized from a single polled `state_version` counter to subscribing
// directly to the `Broadcaster`'s `tokio::sync::broadcast` channel (C9).
// =============================================================================

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use tracing::{debug, info, warn};

use crate::auth::AuthUser;
use crate::state::AppState;

pub async fn handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    actor: AuthUser,
) -> impl IntoResponse {
    info!(user_id = %actor.user_id, "websocket connection accepted — upgrading");
    ws.on_upgrade(move |socket| handle_connection(socket, state))
}

async fn handle_connection(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();
    let mut updates = state.broadcaster.subscribe();

    let catch_up = state.broadcaster.current();
    if !catch_up.is_null() {
        if let Ok(json) = serde_json::to_string(&catch_up) {
            if sender.send(Message::Text(json.into())).await.is_err() {
                return;
            }
        }
    }

    loop {
        tokio::select! {
            update = updates.recv() => {
                match update {
                    Ok(blob) => {
                        match serde_json::to_string(&blob) {
                            Ok(json) => {
                                if sender.send(Message::Text(json.into())).await.is_err() {
                                    debug!("websocket send failed — disconnecting");
                                    break;
                                }
                            }
                            Err(e) => warn!(error = %e, "failed to serialize arena state blob"),
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "websocket client lagged behind broadcast — disconnecting");
                        break;
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }

            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) => {
                        info!("websocket close frame received — disconnecting");
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(error = %e, "websocket receive error — disconnecting");
                        break;
                    }
                    None => break,
                }
            }
        }
    }
}
