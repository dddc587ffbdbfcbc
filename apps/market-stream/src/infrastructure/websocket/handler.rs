//! WebSocket Connection Handler
//!
//! Each accepted socket is split into a reader loop, which feeds text
//! frames to a `ControlSession`, and a writer task, which drains the
//! connection's outbound queue onto the socket. Transport pings are
//! answered by the WebSocket layer itself.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade, close_code};
use axum::response::Response;
use futures::SinkExt;
use futures::stream::{SplitSink, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::application::services::{ControlSession, Registration, RegistryError};
use crate::domain::connection::ConnectionId;
use crate::domain::protocol::ServerMessage;
use crate::infrastructure::http::AppState;

/// How long the writer may take to flush after the reader stops.
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Upgrade an HTTP request to a streaming WebSocket connection.
pub async fn stream_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    ws.on_upgrade(move |socket| serve_connection(socket, state))
}

/// Run one connection to completion.
///
/// Registers the connection, dispatches inbound frames until the client
/// leaves, the transport fails or the server shuts down, then unregisters.
pub async fn serve_connection(socket: WebSocket, state: Arc<AppState>) {
    let Registration { id, outbound } = match state.registry().register() {
        Ok(registration) => registration,
        Err(e) => {
            reject(socket, &e).await;
            return;
        }
    };

    let (sink, mut stream) = socket.split();
    let cancel = state.shutdown().child_token();

    let mut writer = tokio::spawn(write_loop(id, sink, outbound, cancel.clone()));
    let mut session = ControlSession::new(id, Arc::clone(state.registry()));

    tracing::info!(connection_id = %id, "Client connected");

    loop {
        let frame = tokio::select! {
            () = cancel.cancelled() => break,
            frame = stream.next() => frame,
        };

        match frame {
            Some(Ok(Message::Text(text))) => {
                if !session.handle_text(text.as_str()).is_open() {
                    break;
                }
            }
            Some(Ok(Message::Binary(_))) => {
                if !session.reject_binary().is_open() {
                    break;
                }
            }
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
            Some(Ok(Message::Close(_))) | None => break,
            Some(Err(e)) => {
                tracing::debug!(connection_id = %id, error = %e, "WebSocket receive failed");
                break;
            }
        }
    }

    tracing::debug!(
        connection_id = %id,
        state = session.state().as_str(),
        "Reader stopped"
    );

    // Unregistering drops the outbound sender, so the writer flushes what
    // is queued and exits.
    session.close();

    if tokio::time::timeout(WRITER_DRAIN_TIMEOUT, &mut writer)
        .await
        .is_err()
    {
        writer.abort();
    }

    tracing::info!(connection_id = %id, "Client disconnected");
}

/// Drain the outbound queue onto the socket.
async fn write_loop(
    id: ConnectionId,
    mut sink: SplitSink<WebSocket, Message>,
    mut outbound: mpsc::Receiver<ServerMessage>,
    cancel: CancellationToken,
) {
    let mut going_away = false;

    loop {
        let frame = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                going_away = true;
                break;
            }
            message = outbound.recv() => {
                let Some(message) = message else { break };
                match message.to_json() {
                    Ok(json) => Message::Text(json.into()),
                    Err(e) => {
                        tracing::warn!(connection_id = %id, error = %e, "Failed to encode message");
                        continue;
                    }
                }
            }
        };

        if let Err(e) = sink.send(frame).await {
            tracing::debug!(connection_id = %id, error = %e, "WebSocket send failed");
            cancel.cancel();
            return;
        }
    }

    let close = going_away.then(|| CloseFrame {
        code: close_code::AWAY,
        reason: "server shutting down".into(),
    });
    let _ = sink.send(Message::Close(close)).await;
    let _ = sink.close().await;
}

/// Refuse a connection the registry could not admit.
async fn reject(mut socket: WebSocket, error: &RegistryError) {
    tracing::warn!(error = %error, "Rejecting WebSocket connection");
    let frame = CloseFrame {
        code: close_code::AGAIN,
        reason: error.to_string().into(),
    };
    let _ = socket.send(Message::Close(Some(frame))).await;
}
