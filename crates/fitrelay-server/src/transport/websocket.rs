//! WebSocket listener using tokio-tungstenite.
//!
//! Each accepted socket becomes one relay connection. Text frames carry
//! JSON envelopes in both directions.

use crate::relay::RelayHandle;
use fitrelay_core::{decode_frame, encode_envelope, Envelope, RelayError, RelayResult};
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

/// A browser or pose-analysis client that completed the WebSocket upgrade.
pub struct WebSocketConnection {
    pub ws_stream: tokio_tungstenite::WebSocketStream<TcpStream>,
    pub remote_addr: SocketAddr,
}

/// Messages up to this multiple of `max_frame_bytes` are read and then
/// dropped by the session loop; anything larger fails the socket.
const HARD_LIMIT_FACTOR: usize = 4;

fn socket_config(max_frame_bytes: usize) -> WebSocketConfig {
    let hard_limit = max_frame_bytes.saturating_mul(HARD_LIMIT_FACTOR);
    let mut config = WebSocketConfig::default();
    config.max_message_size = Some(hard_limit);
    config.max_frame_size = Some(hard_limit);
    config
}

/// Bind the signaling port and upgrade accepted sockets in the background.
///
/// The bind happens before this returns, so a taken port is reported to the
/// caller. Upgraded connections arrive on the returned channel; failed
/// handshakes are logged and skipped.
pub async fn start_listener(
    bind_addr: SocketAddr,
    max_frame_bytes: usize,
) -> RelayResult<mpsc::Receiver<WebSocketConnection>> {
    let listener = TcpListener::bind(bind_addr)
        .await
        .map_err(|e| RelayError::Transport(format!("WS bind failed on {bind_addr}: {e}")))?;
    info!(addr = %bind_addr, "WebSocket listener started");

    let (tx, rx) = mpsc::channel::<WebSocketConnection>(64);
    let config = socket_config(max_frame_bytes);
    tokio::spawn(async move {
        loop {
            let (stream, remote_addr) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    error!(error = %e, "TCP accept failed");
                    continue;
                }
            };
            let tx = tx.clone();
            tokio::spawn(async move {
                let ws_stream =
                    match tokio_tungstenite::accept_async_with_config(stream, Some(config)).await {
                        Ok(ws_stream) => ws_stream,
                        Err(e) => {
                            warn!(remote = %remote_addr, error = %e, "WebSocket upgrade failed");
                            return;
                        }
                    };
                debug!(remote = %remote_addr, "WebSocket upgrade complete");
                let conn = WebSocketConnection {
                    ws_stream,
                    remote_addr,
                };
                if tx.send(conn).await.is_err() {
                    debug!(remote = %remote_addr, "server stopped accepting clients");
                }
            });
        }
    });

    Ok(rx)
}

/// Helper: send an envelope as a text frame.
pub async fn ws_send_envelope(
    ws: &mut tokio_tungstenite::WebSocketStream<TcpStream>,
    envelope: &Envelope,
) -> RelayResult<()> {
    let text = encode_envelope(envelope)?;
    ws.send(Message::Text(text.into()))
        .await
        .map_err(|e| RelayError::Transport(format!("WS send failed: {e}")))
}

/// Helper: receive the next text message from a WebSocket.
///
/// Returns `None` if the connection is closed. Binary frames are ignored.
pub async fn ws_recv_text(
    ws: &mut tokio_tungstenite::WebSocketStream<TcpStream>,
) -> RelayResult<Option<String>> {
    loop {
        match ws.next().await {
            Some(Ok(Message::Text(text))) => return Ok(Some(text.as_str().to_owned())),
            Some(Ok(Message::Close(_))) => return Ok(None),
            Some(Ok(Message::Ping(payload))) => {
                let _ = ws.send(Message::Pong(payload)).await;
            }
            Some(Ok(_)) => continue,
            Some(Err(e)) => {
                return Err(RelayError::Transport(format!("WS recv failed: {e}")));
            }
            None => return Ok(None),
        }
    }
}

/// Run one WebSocket connection until either side closes.
///
/// Inbound frames go to the relay in arrival order; envelopes queued for
/// this connection are written out as they arrive. The relay is always told
/// about the close, whatever ended the loop.
pub async fn serve_connection(
    mut conn: WebSocketConnection,
    relay: RelayHandle,
    max_frame_bytes: usize,
) -> RelayResult<()> {
    let remote = conn.remote_addr;
    let (conn_id, mut outbound) = relay.open().await?;
    info!(remote = %remote, conn_id, "WebSocket client connected");

    let result = session_loop(&mut conn, &relay, conn_id, &mut outbound, max_frame_bytes).await;

    relay.close(conn_id).await?;
    let _ = conn.ws_stream.close(None).await;
    info!(remote = %remote, conn_id, "WebSocket client disconnected");
    result
}

async fn session_loop(
    conn: &mut WebSocketConnection,
    relay: &RelayHandle,
    conn_id: u64,
    outbound: &mut mpsc::Receiver<Envelope>,
    max_frame_bytes: usize,
) -> RelayResult<()> {
    loop {
        tokio::select! {
            queued = outbound.recv() => {
                match queued {
                    Some(envelope) => {
                        if let Err(e) = ws_send_envelope(&mut conn.ws_stream, &envelope).await {
                            warn!(conn_id, event = %envelope.event, error = %e, "delivery failed");
                            return Err(e);
                        }
                    }
                    None => {
                        debug!(conn_id, "relay released connection");
                        return Ok(());
                    }
                }
            }

            received = ws_recv_text(&mut conn.ws_stream) => {
                match received {
                    Ok(Some(text)) => {
                        if text.len() > max_frame_bytes {
                            warn!(conn_id, len = text.len(), max = max_frame_bytes, "frame too large, dropping");
                            continue;
                        }
                        match decode_frame(&text) {
                            Ok(envelope) => relay.frame(conn_id, envelope).await?,
                            Err(e) => warn!(conn_id, error = %e, "dropping undecodable frame"),
                        }
                    }
                    Ok(None) => {
                        debug!(conn_id, "WebSocket closed by peer");
                        return Ok(());
                    }
                    Err(e) => {
                        debug!(conn_id, error = %e, "WebSocket session ended");
                        return Ok(());
                    }
                }
            }
        }
    }
}
