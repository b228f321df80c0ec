//! WebSocket session lifecycle. Handles a single connected client from
//! upgrade through disconnect.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::ws::{CloseFrame, Message, WebSocket, close_code};
use futures::{SinkExt, StreamExt};
use metrics::{counter, gauge, histogram};
use tokio::sync::mpsc;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::config::ServerConfig;
use crate::metrics::{
    WS_CONNECTION_DURATION_SECONDS, WS_CONNECTIONS_ACTIVE, WS_CONNECTIONS_TOTAL,
    WS_DISCONNECTIONS_TOTAL,
};
use crate::registry::Registry;

use super::connection::{ClientConnection, ConnectionId};
use super::dispatcher::Dispatcher;
use super::heartbeat::{HeartbeatResult, run_heartbeat};

/// Run a WebSocket session for an upgraded client.
///
/// 1. Spawns the writer task (outbound queue, pings, final close frame)
/// 2. Spawns the heartbeat monitor
/// 3. Feeds inbound frames to the [`Dispatcher`] until the socket ends or
///    `shutdown` (or the connection's own token) is cancelled
/// 4. Always runs the dispatcher's close transition before returning
#[instrument(skip_all, fields(conn_id = %id))]
pub async fn run_session(
    socket: WebSocket,
    id: ConnectionId,
    registry: Arc<Registry>,
    config: Arc<ServerConfig>,
    shutdown: CancellationToken,
) {
    let (mut ws_tx, mut ws_rx) = socket.split();

    let (send_tx, mut send_rx) = mpsc::channel::<Arc<String>>(config.send_queue_capacity);
    let cancel = shutdown.child_token();
    let connection = Arc::new(ClientConnection::new(id, send_tx, cancel.clone()));

    info!("client connected");
    counter!(WS_CONNECTIONS_TOTAL).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).increment(1.0);

    let heartbeat = {
        let conn = Arc::clone(&connection);
        let cancel = cancel.clone();
        let interval = config.heartbeat_interval();
        let timeout = config.heartbeat_timeout();
        tokio::spawn(async move {
            if run_heartbeat(Arc::clone(&conn), interval, timeout, cancel).await
                == HeartbeatResult::TimedOut
            {
                warn!(
                    conn_id = %conn.id,
                    silent = ?conn.last_seen_elapsed(),
                    "client unresponsive, disconnecting"
                );
                conn.disconnect();
            }
        })
    };

    let writer = {
        let cancel = cancel.clone();
        let send_timeout = config.send_timeout();
        let ping_every = config.heartbeat_interval();
        tokio::spawn(async move {
            let mut ping_interval = time::interval(ping_every);
            // Skip the immediate first tick
            let _ = ping_interval.tick().await;

            loop {
                let frame = tokio::select! {
                    () = cancel.cancelled() => break,
                    msg = send_rx.recv() => match msg {
                        Some(text) => Message::Text(text.as_str().into()),
                        None => break,
                    },
                    _ = ping_interval.tick() => Message::Ping(Bytes::new()),
                };
                match time::timeout(send_timeout, ws_tx.send(frame)).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        debug!(error = %e, "socket write failed");
                        cancel.cancel();
                        break;
                    }
                    Err(_) => {
                        warn!(timeout = ?send_timeout, "socket write timed out");
                        cancel.cancel();
                        break;
                    }
                }
            }

            let close = Message::Close(Some(CloseFrame {
                code: close_code::NORMAL,
                reason: "".into(),
            }));
            // The peer may already be gone.
            let _ = time::timeout(send_timeout, ws_tx.send(close)).await;
        })
    };

    let mut dispatcher = Dispatcher::new(
        Arc::clone(&connection),
        Arc::clone(&registry),
        config.max_name_chars,
    );

    loop {
        let frame = tokio::select! {
            () = cancel.cancelled() => {
                debug!("session cancelled");
                break;
            }
            frame = ws_rx.next() => frame,
        };
        match frame {
            Some(Ok(Message::Text(text))) => {
                connection.mark_alive();
                let outcome = dispatcher.on_text(text.as_str());
                debug!(?outcome, "text frame handled");
            }
            Some(Ok(Message::Binary(data))) => {
                connection.mark_alive();
                dispatcher.on_binary(data.len());
            }
            Some(Ok(Message::Ping(_))) => {
                connection.mark_alive();
                dispatcher.on_ping();
            }
            Some(Ok(Message::Pong(_))) => connection.mark_alive(),
            Some(Ok(Message::Close(frame))) => {
                debug!(code = frame.as_ref().map(|f| f.code), "client sent close frame");
                break;
            }
            Some(Err(e)) => {
                debug!(error = %e, "socket read failed");
                break;
            }
            None => break,
        }
    }

    dispatcher.on_close();
    cancel.cancel();
    let _ = writer.await;
    let _ = heartbeat.await;

    info!(
        dropped = connection.drop_count(),
        duration = ?connection.age(),
        "client disconnected"
    );
    counter!(WS_DISCONNECTIONS_TOTAL).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).decrement(1.0);
    histogram!(WS_CONNECTION_DURATION_SECONDS).record(connection.age().as_secs_f64());
}
