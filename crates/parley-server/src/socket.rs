//! WebSocket transport loop for one client.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message as WsMessage, WebSocket};
use futures::{SinkExt, StreamExt};
use parley_core::ConnectionId;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

use crate::connection::ClientConnection;
use crate::handler::{ConnectionHandler, RelayContext};

/// Drive one WebSocket until the peer goes away, the writer fails, or the
/// server shuts down. Every exit path ends in the same teardown.
pub async fn handle_ws_connection(socket: WebSocket, ctx: RelayContext, shutdown: CancellationToken) {
    let (tx, mut rx) = mpsc::channel::<Arc<String>>(ctx.config.max_send_queue.max(1));
    let connection = Arc::new(ClientConnection::new(ConnectionId::new(), tx));
    let conn_id = connection.id.clone();
    let heartbeat = Duration::from_secs(ctx.config.heartbeat_interval_secs.max(1));
    let handler = Arc::new(ConnectionHandler::new(ctx, connection));
    info!(conn_id = %conn_id, "websocket client connected");

    let (mut ws_tx, mut ws_rx) = socket.split();

    // Writer: drain the send queue and keep the socket alive with pings.
    let writer_id = conn_id.clone();
    let mut writer = tokio::spawn(async move {
        let mut ping_interval = tokio::time::interval(heartbeat);
        ping_interval.tick().await;

        loop {
            tokio::select! {
                msg = rx.recv() => {
                    let Some(text) = msg else { break };
                    if ws_tx.send(WsMessage::Text(text.as_str().into())).await.is_err() {
                        break;
                    }
                }
                _ = ping_interval.tick() => {
                    if ws_tx.send(WsMessage::Ping(Default::default())).await.is_err() {
                        break;
                    }
                    trace!(conn_id = %writer_id, "sent ping");
                }
            }
        }
        let _ = ws_tx.close().await;
    });

    let reader_handler = Arc::clone(&handler);
    let mut reader = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_rx.next().await {
            match msg {
                WsMessage::Text(text) => reader_handler.handle_text(text.as_str()),
                WsMessage::Binary(data) => reader_handler.handle_binary(data.len()),
                WsMessage::Close(_) => break,
                WsMessage::Ping(_) | WsMessage::Pong(_) => {}
            }
        }
    });

    let (reason, writer_done, reader_done) = tokio::select! {
        _ = &mut writer => ("writer closed", true, false),
        _ = &mut reader => ("peer closed", false, true),
        _ = shutdown.cancelled() => ("server shutdown", false, false),
    };
    debug!(conn_id = %conn_id, reason, "websocket loop ended");

    // No frame may be in flight once teardown starts.
    if !reader_done {
        reader.abort();
        let _ = reader.await;
    }
    handler.teardown();
    drop(handler);
    // Let the writer flush what is already queued before it goes.
    if !writer_done && tokio::time::timeout(WRITER_DRAIN, &mut writer).await.is_err() {
        writer.abort();
    }
}

const WRITER_DRAIN: Duration = Duration::from_secs(1);
