//! Events WebSocket
//!
//! Streams daemon events (container status, init progress, monitor
//! notifications such as `queue_empty`) to observers as JSON text frames.

use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::broadcast::error::RecvError;
use tracing::debug;

use crate::router::middleware::auth::validate_token;
use crate::router::AppState;

#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    pub token: String,
}

pub async fn events_ws(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(query): Query<EventsQuery>,
) -> Response {
    ws.on_upgrade(move |socket| handle_events(socket, state, query))
}

async fn handle_events(socket: WebSocket, state: AppState, query: EventsQuery) {
    let (mut sender, mut receiver) = socket.split();

    if validate_token(&state.config.jwt_secret, &query.token).is_err() {
        let _ = sender
            .send(Message::Close(Some(CloseFrame {
                code: 4401,
                reason: "unauthorized".into(),
            })))
            .await;
        return;
    }

    let mut events = state.bus.subscribe();

    loop {
        tokio::select! {
            event = events.recv() => {
                match event {
                    Ok(event) => {
                        let Ok(payload) = serde_json::to_string(&event) else { continue };
                        if sender.send(Message::Text(payload)).await.is_err() {
                            break;
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        debug!("events websocket lagged, skipped {}", skipped);
                    }
                    Err(RecvError::Closed) => break,
                }
            }

            incoming = receiver.next() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(_)) => break,
                    _ => {}
                }
            }
        }
    }
}
