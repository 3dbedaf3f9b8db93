//! Terminal WebSocket
//!
//! Binary frames in both directions: client binary frames are PTY stdin,
//! server binary frames are raw PTY output. A text frame whose first byte
//! is U+0001 carries a JSON control message (currently resize). The client
//! authenticates with a query token because browsers cannot set headers on
//! WebSocket upgrades.

use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocket},
        Path, Query, State, WebSocketUpgrade,
    },
    response::Response,
};
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::router::middleware::auth::validate_token;
use crate::router::AppState;

/// Leading byte marking a JSON control frame.
const CONTROL_MARKER: char = '\u{1}';

#[derive(Debug, Deserialize)]
pub struct TerminalQuery {
    pub token: String,
    #[serde(default)]
    pub session: Option<String>,
    #[serde(default)]
    pub cols: Option<u16>,
    #[serde(default)]
    pub rows: Option<u16>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ControlMessage {
    Resize { cols: u16, rows: u16 },
}

pub async fn terminal_ws(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(container_id): Path<String>,
    Query(query): Query<TerminalQuery>,
) -> Response {
    ws.on_upgrade(move |socket| handle_terminal(socket, state, container_id, query))
}

async fn handle_terminal(
    socket: WebSocket,
    state: AppState,
    container_id: String,
    query: TerminalQuery,
) {
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

    // Resolve the container and its engine id
    let record = match state.orchestrator.get(&container_id).await {
        Ok(record) => record,
        Err(_) => {
            let _ = sender
                .send(Message::Close(Some(CloseFrame {
                    code: 4404,
                    reason: "container not found".into(),
                })))
                .await;
            return;
        }
    };
    let Some(docker_id) = record.docker_id.clone() else {
        let _ = sender
            .send(Message::Close(Some(CloseFrame {
                code: 4409,
                reason: "container has no engine container".into(),
            })))
            .await;
        return;
    };

    let cols = query.cols.unwrap_or(120);
    let rows = query.rows.unwrap_or(30);

    // Join an existing session or create one
    let session = match &query.session {
        Some(session_id) => state.pty.get(session_id),
        None => state
            .pty
            .find_or_create(&container_id, &docker_id, cols, rows)
            .await
            .ok(),
    };
    let Some(session) = session else {
        let _ = sender
            .send(Message::Close(Some(CloseFrame {
                code: 4404,
                reason: "pty session unavailable".into(),
            })))
            .await;
        return;
    };

    let handle = session.attach();
    let client_id = handle.client_id;
    let mut output_rx = handle.rx;

    info!(
        "Terminal client {} attached to session {} (container {})",
        client_id, session.id, record.name
    );

    loop {
        tokio::select! {
            // PTY output (history replay first, then live bytes)
            output = output_rx.recv() => {
                match output {
                    Some(bytes) => {
                        if sender.send(Message::Binary(bytes.to_vec())).await.is_err() {
                            break;
                        }
                    }
                    None => {
                        // Evicted as a slow client, or the session closed
                        let _ = sender
                            .send(Message::Close(Some(CloseFrame {
                                code: 4410,
                                reason: "session closed".into(),
                            })))
                            .await;
                        break;
                    }
                }
            }

            // Client input
            incoming = receiver.next() => {
                match incoming {
                    Some(Ok(Message::Binary(data))) => {
                        if let Err(e) = session.write(Bytes::from(data)).await {
                            debug!("stdin write failed: {}", e);
                            break;
                        }
                    }
                    Some(Ok(Message::Text(text))) => {
                        if let Some(control) = text.strip_prefix(CONTROL_MARKER) {
                            match serde_json::from_str::<ControlMessage>(control) {
                                Ok(ControlMessage::Resize { cols, rows }) => {
                                    if let Err(e) = state.pty.resize(&session.id, cols, rows).await {
                                        warn!("resize failed: {}", e);
                                    }
                                }
                                Err(e) => debug!("bad control frame: {}", e),
                            }
                        } else if let Err(e) = session.write(Bytes::from(text.into_bytes())).await {
                            debug!("stdin write failed: {}", e);
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!("terminal websocket error: {}", e);
                        break;
                    }
                }
            }
        }
    }

    session.detach(client_id);
    info!(
        "Terminal client {} detached from session {}",
        client_id, session.id
    );
}
