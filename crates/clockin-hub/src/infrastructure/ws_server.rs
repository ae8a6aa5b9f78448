//! WebSocket server: accept loop and per-connection tasks.
//!
//! This module is responsible for:
//!
//! 1. Binding a TCP listener on the configured address.
//! 2. Accepting incoming TCP connections from browsers.
//! 3. Upgrading each connection to a WebSocket session.
//! 4. Running two tasks per session:
//!    - **Reader**: JSON text frames → [`ClientMsg`] → [`ClockHub::handle`],
//!      with the direct replies pushed onto the session's outbound queue.
//!    - **Writer**: drains the outbound queue (direct replies and channel
//!      broadcasts alike) into WebSocket frames, and sends a keepalive ping
//!      every `ping_interval`.
//! 5. Disconnecting the subscriber from the hub when either task ends or the
//!    broadcaster flags it as unresponsive.
//! 6. Stopping the accept loop when the `running` flag is cleared.
//!
//! # Why one queue for both replies and broadcasts?
//!
//! Only the writer task touches the WebSocket sink, so frames never interleave
//! and no lock is needed around it.  The queue is bounded: a browser that
//! stops reading fills it, the broadcaster's delivery timeout fires, and the
//! session is closed instead of buffering without limit.

use std::net::SocketAddr;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use anyhow::Context;
use clockin_core::{decode_client_msg, encode_server_envelope, ProtocolError, ServerEnvelope, ServerMsg};
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{interval_at, timeout, Instant};
use tokio_tungstenite::{
    accept_async,
    tungstenite::{Error as WsError, Message as WsMessage},
};
use tracing::{debug, error, info, warn};

use crate::application::{ChannelSink, ClockHub, Subscriber};
use crate::domain::config::HubConfig;

/// How often the accept loop wakes up to check the `running` flag.
const ACCEPT_POLL: Duration = Duration::from_millis(200);

// ── Public API ────────────────────────────────────────────────────────────────

/// Builds the hub, binds `config.ws_bind_addr` and serves until `running` is
/// cleared.
///
/// # Errors
///
/// Returns an error if the configuration is invalid or the listener cannot be
/// bound (for example the port is already in use).
pub async fn run_server(config: HubConfig, running: Arc<AtomicBool>) -> anyhow::Result<()> {
    let addr = config.ws_bind_addr;
    let hub = Arc::new(ClockHub::new(config).context("invalid hub configuration")?);

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind WebSocket listener on {addr}"))?;
    info!("clock-in hub listening on {addr}");

    serve(listener, hub, running).await
}

/// Runs the accept loop on an already bound listener.
///
/// Split out from [`run_server`] so tests can bind port 0 and learn the
/// address before serving.
///
/// # Errors
///
/// Currently always returns `Ok(())`; accept errors are logged and skipped.
pub async fn serve(listener: TcpListener, hub: Arc<ClockHub>, running: Arc<AtomicBool>) -> anyhow::Result<()> {
    loop {
        if !running.load(Ordering::Relaxed) {
            info!("shutdown flag set; stopping accept loop");
            break;
        }

        match timeout(ACCEPT_POLL, listener.accept()).await {
            Ok(Ok((stream, peer_addr))) => {
                debug!("new connection from {peer_addr}");
                let hub = Arc::clone(&hub);
                tokio::spawn(async move {
                    handle_session(stream, peer_addr, hub).await;
                });
            }
            Ok(Err(e)) => {
                // Transient (e.g. out of file descriptors); keep serving.
                error!("accept error: {e}");
            }
            Err(_) => {}
        }
    }

    hub.shutdown();
    Ok(())
}

// ── Per-session handler ───────────────────────────────────────────────────────

async fn handle_session(stream: TcpStream, peer_addr: SocketAddr, hub: Arc<ClockHub>) {
    match run_session(stream, peer_addr, hub).await {
        Ok(()) => info!("session {peer_addr} closed"),
        Err(e) => warn!("session {peer_addr} closed with error: {e:#}"),
    }
}

/// Runs one browser session from handshake to disconnect.
///
/// # Errors
///
/// Returns an error if the WebSocket handshake fails.
async fn run_session(stream: TcpStream, peer_addr: SocketAddr, hub: Arc<ClockHub>) -> anyhow::Result<()> {
    let ws_stream = accept_async(stream)
        .await
        .with_context(|| format!("WebSocket handshake failed with {peer_addr}"))?;
    let (mut ws_tx, mut ws_rx) = ws_stream.split();

    let (sink, mut outbound) = ChannelSink::bounded(hub.config().outbound_capacity);
    let subscriber = hub.connect(Arc::new(sink));
    info!(subscriber = %subscriber.id(), "session {peer_addr} established");

    // ── Writer: outbound queue + keepalive → WebSocket ─────────────────────────
    let ping_interval = hub.config().ping_interval;
    let mut writer = tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + ping_interval, ping_interval);
        loop {
            let frame = tokio::select! {
                envelope = outbound.recv() => {
                    let Some(envelope) = envelope else { break };
                    match encode_server_envelope(&envelope) {
                        Ok(text) => WsMessage::Text(text),
                        Err(e) => {
                            error!("session {peer_addr}: {e}");
                            continue;
                        }
                    }
                }
                _ = ticker.tick() => WsMessage::Ping(Vec::new()),
            };
            if let Err(e) = ws_tx.send(frame).await {
                debug!("session {peer_addr}: send failed: {e}");
                break;
            }
        }
        let _ = ws_tx.close().await;
    });

    // ── Reader: WebSocket → hub ────────────────────────────────────────────────
    let reader_hub = Arc::clone(&hub);
    let reader_sub = Arc::clone(&subscriber);
    let reply_timeout = hub.config().delivery_timeout;
    let mut reader = tokio::spawn(async move {
        loop {
            let text = match ws_rx.next().await {
                Some(Ok(WsMessage::Text(text))) => text,
                Some(Ok(WsMessage::Binary(_))) => {
                    warn!("session {peer_addr}: unexpected binary frame (ignored)");
                    continue;
                }
                Some(Ok(WsMessage::Close(_))) => {
                    debug!("session {peer_addr}: close frame received");
                    break;
                }
                Some(Ok(_)) => continue,
                Some(Err(WsError::ConnectionClosed | WsError::Protocol(_))) | None => {
                    debug!("session {peer_addr}: stream ended");
                    break;
                }
                Some(Err(e)) => {
                    warn!("session {peer_addr}: WebSocket error: {e}");
                    break;
                }
            };

            let replies = match decode_client_msg(&text) {
                Ok(msg) => reader_hub.handle(&reader_sub, msg).await,
                Err(e) => {
                    warn!("session {peer_addr}: {e}");
                    vec![bad_frame_reply(&e)]
                }
            };
            if !send_replies(&reader_sub, replies, reply_timeout).await {
                break;
            }
        }
    });

    let reader_done = tokio::select! {
        _ = &mut reader => {
            debug!("session {peer_addr}: reader ended");
            true
        }
        _ = &mut writer => {
            debug!("session {peer_addr}: writer ended");
            false
        }
        _ = subscriber.closed() => {
            warn!("session {peer_addr}: closed as unresponsive");
            false
        }
    };
    reader.abort();
    writer.abort();
    if !reader_done {
        // The reader may still be inside a join on another worker thread.
        let _ = reader.await;
    }
    hub.disconnect(&subscriber).await;
    Ok(())
}

/// Queues direct replies.  Returns `false` if the session should end.
async fn send_replies(subscriber: &Subscriber, replies: Vec<ServerMsg>, limit: Duration) -> bool {
    for reply in replies {
        let envelope = Arc::new(ServerEnvelope::direct(reply));
        match timeout(limit, subscriber.deliver(envelope)).await {
            Ok(Ok(())) => {}
            Ok(Err(_)) | Err(_) => return false,
        }
    }
    true
}

fn bad_frame_reply(error: &ProtocolError) -> ServerMsg {
    match error {
        ProtocolError::FrameTooLarge { max, .. } => {
            ServerMsg::error(format!("message exceeds {max} bytes"))
        }
        other => ServerMsg::error(other.to_string()),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
