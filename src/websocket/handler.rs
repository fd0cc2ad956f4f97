use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    extract::{
        ws::{CloseFrame, Message, Utf8Bytes, WebSocket},
        State, WebSocketUpgrade,
    },
    http::HeaderMap,
    response::Response,
};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use crate::metrics::SessionMetrics;
use crate::server::AppState;
use crate::session::{CloseCode, Session};

use super::auth::{authenticate, AuthHeader};
use super::message::{ClientMessage, Frame, ServerMessage};

/// Upper bound on writing the close frame during teardown
const CLOSE_FRAME_TIMEOUT: Duration = Duration::from_secs(2);

/// WebSocket upgrade handler
#[tracing::instrument(name = "ws.upgrade", skip_all)]
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Response {
    let auth = AuthHeader::from_headers(&headers);
    ws.on_upgrade(move |socket| handle_socket(socket, state, auth))
}

/// Run one connection from Hello to teardown
#[tracing::instrument(
    name = "ws.connection",
    skip_all,
    fields(otel.kind = "server")
)]
async fn handle_socket(socket: WebSocket, state: AppState, auth: AuthHeader) {
    let config = &state.settings.websocket;
    let (session, outbound) = Session::new(
        config.heartbeat_timeout(),
        state.projector.clone(),
        &state.shutdown,
    );
    let started = Instant::now();
    SessionMetrics::record_opened();

    tracing::info!(session_id = %session.id(), "WebSocket connection established");

    // The outbound queue is empty here, so Hello is always sequence 0
    let _ = session
        .send_message(ServerMessage::Hello {
            heartbeat_interval_ms: config.heartbeat_interval_ms,
        })
        .await;

    let (sink, stream) = socket.split();

    let writer = tokio::spawn(write_loop(sink, outbound, session.clone(), state.clone()));
    let reader = tokio::spawn(read_loop(stream, session.clone(), state.clone(), auth));

    if let Err(e) = writer.await {
        tracing::error!(session_id = %session.id(), error = %e, "Writer task failed");
        session.close_with_error(CloseCode::GoingAway);
    }
    let _ = reader.await;

    let code = session.close_code().unwrap_or(CloseCode::GoingAway);
    let duration = started.elapsed().as_secs_f64();
    SessionMetrics::record_closed(code.code(), duration);

    tracing::info!(
        session_id = %session.id(),
        user_id = ?session.user_id(),
        close_code = code.code(),
        duration_secs = duration,
        "WebSocket connection closed"
    );
}

/// Sole writer of the socket. Owns the heartbeat timer and performs teardown.
async fn write_loop(
    mut sink: SplitSink<WebSocket, Message>,
    mut outbound: mpsc::Receiver<Frame>,
    session: Arc<Session>,
    state: AppState,
) {
    let timeout = session.heartbeat_timeout();
    let heartbeat = tokio::time::sleep(timeout);
    tokio::pin!(heartbeat);

    loop {
        tokio::select! {
            biased;
            _ = session.cancelled() => break,
            _ = session.heartbeat_received() => {
                heartbeat.as_mut().reset(tokio::time::Instant::now() + timeout);
            }
            frame = outbound.recv() => {
                let Some(frame) = frame else { break };
                let text = match frame.to_json() {
                    Ok(text) => text,
                    Err(e) => {
                        tracing::error!(error = %e, "Failed to serialize frame");
                        continue;
                    }
                };
                tokio::select! {
                    biased;
                    _ = session.cancelled() => break,
                    sent = sink.send(Message::Text(text.into())) => match sent {
                        Ok(()) => SessionMetrics::record_frame_sent(),
                        Err(e) => {
                            tracing::debug!(session_id = %session.id(), error = %e, "WebSocket write failed");
                            session.close_with_error(CloseCode::GoingAway);
                            break;
                        }
                    },
                }
            }
            _ = &mut heartbeat => {
                tracing::info!(session_id = %session.id(), "Heartbeat timeout");
                session.close_with_error(CloseCode::Timeout);
            }
        }
    }

    // Process shutdown cancels the token without recording a code
    session.close_with_error(CloseCode::GoingAway);
    let code = session.close_code().unwrap_or(CloseCode::GoingAway);

    let close = Message::Close(Some(CloseFrame {
        code: code.code(),
        reason: Utf8Bytes::from_static(code.reason()),
    }));
    let _ = tokio::time::timeout(CLOSE_FRAME_TIMEOUT, async {
        let _ = sink.send(close).await;
        let _ = sink.close().await;
    })
    .await;
    outbound.close();

    if let Some(user_id) = session.user_id() {
        state.hub_manager.unregister(user_id, session.id());
    }
    for channel in session.subscriptions() {
        state.hub.unsubscribe(&channel, &session);
    }

    tracing::debug!(session_id = %session.id(), close_code = %code, "Session torn down");
}

/// Reads client frames until the connection ends or the session closes.
async fn read_loop(
    mut stream: SplitStream<WebSocket>,
    session: Arc<Session>,
    state: AppState,
    auth: AuthHeader,
) {
    match auth {
        AuthHeader::Bearer(token) => authenticate_or_close(&state, &session, &token).await,
        AuthHeader::Malformed => {
            session.close_with_error(CloseCode::MissingAuthorization);
            return;
        }
        AuthHeader::Absent => {}
    }

    loop {
        let message = tokio::select! {
            biased;
            _ = session.cancelled() => return,
            message = stream.next() => message,
        };

        let close = match message {
            None => Some(CloseCode::Normal),
            Some(Err(e)) => {
                tracing::debug!(session_id = %session.id(), error = %e, "WebSocket receive error");
                Some(CloseCode::GoingAway)
            }
            Some(Ok(Message::Text(text))) => handle_text(&state, &session, text.as_str()).await,
            Some(Ok(Message::Binary(_))) => Some(CloseCode::Unsupported),
            Some(Ok(Message::Close(_))) => Some(CloseCode::Normal),
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => None,
        };

        if let Some(code) = close {
            session.close_with_error(code);
            return;
        }
    }
}

async fn handle_text(state: &AppState, session: &Arc<Session>, text: &str) -> Option<CloseCode> {
    let message = match ClientMessage::decode(text) {
        Ok(message) => message,
        Err(e) => {
            tracing::debug!(session_id = %session.id(), error = %e, "Malformed client frame");
            return Some(CloseCode::Unsupported);
        }
    };

    match message {
        ClientMessage::Heartbeat => {
            session.record_heartbeat();
            SessionMetrics::record_heartbeat();
            let _ = session.send_message(ServerMessage::HeartbeatAck).await;
        }
        ClientMessage::Authenticate { token } => {
            authenticate_or_close(state, session, &token).await;
        }
        ClientMessage::Unexpected(op) => {
            tracing::debug!(session_id = %session.id(), op = ?op, "Ignoring server-only opcode");
        }
    }

    None
}

async fn authenticate_or_close(state: &AppState, session: &Arc<Session>, token: &str) {
    tokio::select! {
        biased;
        _ = session.cancelled() => {}
        result = authenticate(state, session, token) => {
            if let Err(code) = result {
                session.close_with_error(code);
            }
        }
    }
}
