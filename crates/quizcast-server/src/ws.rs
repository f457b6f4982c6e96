//! `WebSocket` endpoint for live results.
//!
//! Clients connect to `GET /api/ws/results`. Each connection is admitted
//! into the [`ConnectionRegistry`](quizcast_core::ConnectionRegistry)
//! and then runs one loop that multiplexes three sources:
//!
//! - frames from the client (`subscribe`, `unsubscribe`, `heartbeat`,
//!   protocol pongs), handled in receipt order
//! - frames queued for it by the broadcaster and the liveness monitor
//! - the close signal raised when the monitor evicts it
//!
//! The connection is removed from the registry when the loop ends, however
//! it ends.

use std::ops::ControlFlow;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket};
use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::{State, WebSocketUpgrade};
use axum::response::{IntoResponse, Response};
use quizcast_core::{ConnectionHandle, OutboundFrame};
use quizcast_types::{ClientMessage, ConnectionId, HeartbeatAck, QuizId, ServerMessage};
use tracing::{debug, info, warn};

use crate::error::ApiError;
use crate::state::AppState;

/// Upgrade to a `WebSocket` unless the registry is already full. The
/// capacity check runs before the upgrade headers are looked at.
///
/// # Route
///
/// `GET /api/ws/results`
pub async fn ws_results(
    State(state): State<Arc<AppState>>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let max = state.registry.max_connections();
    if state.registry.size().await >= max {
        warn!(max, "Rejecting WebSocket upgrade, registry full");
        return ApiError::ConnectionLimit { max }.into_response();
    }
    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => return rejection.into_response(),
    };
    ws.on_upgrade(move |socket| handle_ws(socket, state))
        .into_response()
}

/// Run one connection from admission to removal.
async fn handle_ws(mut socket: WebSocket, state: Arc<AppState>) {
    let (handle, mut inbox) = ConnectionHandle::channel(state.outbound_queue_capacity);
    let id = handle.id();

    if let Err(e) = state.registry.admit(handle).await {
        warn!(connection_id = %id, error = %e, "Admission lost after upgrade");
        let frame = CloseFrame {
            code: close_code::AGAIN,
            reason: "maximum connections reached".into(),
        };
        if let Err(e) = socket.send(Message::Close(Some(frame))).await {
            debug!(connection_id = %id, error = %e, "Failed to send close frame");
        }
        return;
    }
    let total = state.registry.size().await;
    info!(
        connection_id = %id,
        total,
        max = state.registry.max_connections(),
        "WebSocket connection established"
    );

    let close = Arc::clone(&inbox.close);
    loop {
        tokio::select! {
            () = close.notified() => {
                debug!(connection_id = %id, "Connection evicted");
                if let Err(e) = socket.send(Message::Close(None)).await {
                    debug!(connection_id = %id, error = %e, "Failed to send close frame");
                }
                break;
            }
            frame = inbox.outbound.recv() => {
                let Some(frame) = frame else { break };
                let msg = match frame {
                    OutboundFrame::Text(text) => Message::Text(text.as_ref().into()),
                    OutboundFrame::Ping => Message::Ping(Bytes::new()),
                };
                if socket.send(msg).await.is_err() {
                    debug!(connection_id = %id, "WebSocket client disconnected (send failed)");
                    break;
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        if handle_client_text(&mut socket, &state, id, text.as_str())
                            .await
                            .is_break()
                        {
                            break;
                        }
                    }
                    Some(Ok(Message::Pong(_))) => {
                        state.registry.touch(id).await;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        state.registry.touch(id).await;
                        if socket.send(Message::Pong(data)).await.is_err() {
                            debug!(connection_id = %id, "WebSocket client gone (pong failed)");
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        debug!(connection_id = %id, "WebSocket client disconnected");
                        break;
                    }
                    Some(Err(e)) => {
                        debug!(connection_id = %id, error = %e, "WebSocket error");
                        break;
                    }
                    Some(Ok(Message::Binary(_))) => {}
                }
            }
        }
    }

    state.registry.remove(id).await;
    let total = state.registry.size().await;
    info!(connection_id = %id, total, "WebSocket connection closed");
}

/// Handle one text frame from the client. Breaks when the socket is gone.
async fn handle_client_text(
    socket: &mut WebSocket,
    state: &AppState,
    id: ConnectionId,
    text: &str,
) -> ControlFlow<()> {
    let message = match ClientMessage::parse(text) {
        Ok(message) => message,
        Err(e) => {
            debug!(connection_id = %id, error = %e, "Ignoring client frame");
            return ControlFlow::Continue(());
        }
    };

    match message {
        ClientMessage::Subscribe { quiz_id } => {
            state.registry.set_subscription(id, Some(quiz_id)).await;
            debug!(connection_id = %id, %quiz_id, "Subscribed");
            send_current_results(socket, state, id, quiz_id).await
        }
        ClientMessage::Unsubscribe => {
            state.registry.set_subscription(id, None).await;
            debug!(connection_id = %id, "Unsubscribed");
            ControlFlow::Continue(())
        }
        ClientMessage::Heartbeat => {
            state.registry.touch(id).await;
            let ack = ServerMessage::HeartbeatAck(HeartbeatAck {
                timestamp: state.registry.clock().now(),
            });
            send_message(socket, id, &ack).await
        }
    }
}

/// Send the quiz's current tally once, so a new subscriber does not wait
/// for the next vote.
async fn send_current_results(
    socket: &mut WebSocket,
    state: &AppState,
    id: ConnectionId,
    quiz_id: QuizId,
) -> ControlFlow<()> {
    match state.aggregator.compute(quiz_id).await {
        Ok(Some(results)) => {
            send_message(socket, id, &ServerMessage::ResultUpdate(results)).await
        }
        Ok(None) => {
            debug!(connection_id = %id, %quiz_id, "Subscribed to unknown quiz");
            ControlFlow::Continue(())
        }
        Err(e) => {
            warn!(
                connection_id = %id,
                %quiz_id,
                error = %e,
                "Failed to load initial results"
            );
            ControlFlow::Continue(())
        }
    }
}

async fn send_message(
    socket: &mut WebSocket,
    id: ConnectionId,
    message: &ServerMessage,
) -> ControlFlow<()> {
    let json = match message.to_json() {
        Ok(json) => json,
        Err(e) => {
            warn!(
                connection_id = %id,
                kind = %message.kind(),
                error = %e,
                "Failed to serialize message"
            );
            return ControlFlow::Continue(());
        }
    };
    if socket.send(Message::Text(json.into())).await.is_err() {
        debug!(connection_id = %id, "WebSocket client disconnected (send failed)");
        return ControlFlow::Break(());
    }
    ControlFlow::Continue(())
}
