//! WebSocket push endpoint.

use std::{fmt::Display, sync::Arc, time::Duration};

use axum::{
    extract::{
        Query, State, WebSocketUpgrade,
        ws::{CloseFrame, Message, WebSocket, close_code},
    },
    response::Response,
};
use futures::{Sink, SinkExt, StreamExt};
use serde::Deserialize;

use crate::{
    gate::{AuthenticatedAttempt, HandshakeGate},
    protocol::{CLOSE_UNAUTHORIZED, ClientFrame},
    registry::{ConnectionId, ConnectionRegistry, ConnectionState, Mailbox},
};

/// WebSocket handler state.
#[derive(Clone)]
pub struct WsState {
    pub registry: Arc<ConnectionRegistry>,
    pub gate: Arc<HandshakeGate>,
}

impl WsState {
    /// Create new WebSocket state.
    #[must_use]
    pub const fn new(registry: Arc<ConnectionRegistry>, gate: Arc<HandshakeGate>) -> Self {
        Self { registry, gate }
    }
}

/// Handshake query parameters.
#[derive(Debug, Default, Deserialize)]
pub struct WsQuery {
    pub token: Option<String>,
}

/// WebSocket upgrade handler.
///
/// The token is checked before the upgrade completes; a refused attempt is
/// closed with code 4001 and never sees an application message.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    State(state): State<WsState>,
) -> Response {
    tracing::trace!(state = ?ConnectionState::Pending, "WebSocket connection attempt");
    match state.gate.check(query.token.as_deref()).await {
        Ok(attempt) => ws.on_upgrade(move |socket| handle_socket(socket, attempt, state)),
        Err(e) => {
            tracing::warn!("Rejecting WebSocket connection: {e}");
            ws.on_upgrade(reject)
        }
    }
}

async fn reject(mut socket: WebSocket) {
    let frame = CloseFrame {
        code: CLOSE_UNAUTHORIZED,
        reason: String::new().into(),
    };
    let _ = socket.send(Message::Close(Some(frame))).await;
}

async fn handle_socket(mut socket: WebSocket, attempt: AuthenticatedAttempt, state: WsState) {
    tracing::trace!(
        session = attempt.session(),
        state = ?attempt.state(),
        "WebSocket upgraded"
    );
    let admission = match state.registry.add(attempt) {
        Ok(admission) => admission,
        Err(e) => {
            tracing::warn!("Failed to admit WebSocket connection: {e}");
            let frame = CloseFrame {
                code: close_code::AWAY,
                reason: String::new().into(),
            };
            let _ = socket.send(Message::Close(Some(frame))).await;
            return;
        }
    };
    let id = admission.id;
    let (sender, mut receiver) = socket.split();

    let mut send_task = tokio::spawn(write_loop(
        id,
        sender,
        admission.mailbox,
        Arc::clone(&state.registry),
    ));

    loop {
        let msg = tokio::select! {
            _ = &mut send_task => break,
            msg = receiver.next() => msg,
        };
        match msg {
            Some(Ok(Message::Text(text))) => match ClientFrame::parse(text.as_str()) {
                ClientFrame::Ping => {
                    if !admission.replier.pong() {
                        tracing::debug!(%id, "Keepalive reply queue full, dropping pong");
                    }
                }
                ClientFrame::Unrecognized => {
                    tracing::debug!(%id, "Ignoring unrecognized client frame");
                }
            },
            Some(Ok(Message::Close(_))) | None => break,
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                tracing::debug!(%id, "WebSocket read error: {e}");
                break;
            }
        }
    }

    state.registry.remove(id);
    send_task.abort();
    tracing::info!(%id, session = %admission.session, "WebSocket connection closed");
}

/// Drain `mailbox` into `sink` until the connection leaves the registry.
///
/// A failed or timed-out write evicts the connection.
pub(crate) async fn write_loop<S>(
    id: ConnectionId,
    mut sink: S,
    mut mailbox: Mailbox,
    registry: Arc<ConnectionRegistry>,
) where
    S: Sink<Message> + Unpin,
    S::Error: Display,
{
    let send_timeout = registry.config().send_timeout;

    while let Some(frame) = mailbox.recv().await {
        match tokio::time::timeout(send_timeout, sink.send(Message::Text(frame))).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::debug!(%id, "WebSocket write failed: {e}");
                registry.remove(id);
                return;
            }
            Err(_) => {
                tracing::warn!(%id, "WebSocket write timed out after {send_timeout:?}");
                registry.remove(id);
                return;
            }
        }
    }

    let frame = CloseFrame {
        code: close_code::AWAY,
        reason: String::new().into(),
    };
    let _ = tokio::time::timeout(
        send_timeout.min(Duration::from_secs(1)),
        sink.send(Message::Close(Some(frame))),
    )
    .await;
}

/// Create the WebSocket router, serving `/api/ws`.
///
/// # Example
/// ```ignore
/// let app = Router::new().merge(create_ws_router(WsState::new(registry, gate)));
/// ```
#[must_use]
pub fn create_ws_router(state: WsState) -> axum::Router {
    axum::Router::new()
        .route("/api/ws", axum::routing::get(ws_handler))
        .with_state(state)
}
