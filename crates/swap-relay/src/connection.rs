use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::{Arc, MutexGuard, PoisonError};
use std::time::Instant;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::time::{interval, Duration};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::{HeaderValue, StatusCode};
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, info, warn};

use swap_common::message::{Body, Message};
use swap_common::types::{MESSAGE_KINDS, SIGNALING_PATH, SUBPROTOCOL};
use swap_common::validate::validate_shape;
use swap_common::{ErrorKind, SecurityCaps};

use crate::directory::{Directory, PeerClose};
use crate::error::RelayError;
use crate::metrics::{counters, gauges, histograms};
use crate::router::ConnHandle;
use crate::server::ServerState;

type WsSink<S> = SplitSink<WebSocketStream<S>, WsMessage>;
type WsRecv<S> = SplitStream<WebSocketStream<S>>;

/// Per-connection context. The source id binds on the first message and
/// follows a re-register to a different identity.
struct ConnCtx {
    source_id: Option<String>,
    connected_at: Instant,
    deliver_tx: mpsc::Sender<String>,
}

fn lock_directory(state: &ServerState) -> MutexGuard<'_, Directory> {
    state
        .directory
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
}

/// Upgrades the stream, enforcing the signaling path and the
/// `3gpp.SWAP.v1` subprotocol, then drives the message loop until the
/// peer disconnects.
///
/// # Errors
///
/// Returns an error when the upgrade fails or the transport breaks.
pub async fn handle_connection<S>(
    stream: S,
    peer_addr: SocketAddr,
    state: Arc<ServerState>,
) -> Result<(), RelayError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let ws_config = WebSocketConfig {
        max_message_size: Some(state.config.max_message_bytes),
        max_frame_size: Some(state.config.max_message_bytes),
        ..WebSocketConfig::default()
    };

    let callback = |req: &Request, mut resp: Response| {
        if req.uri().path() != SIGNALING_PATH {
            let mut err = ErrorResponse::new(Some("unknown signaling path".to_string()));
            *err.status_mut() = StatusCode::NOT_FOUND;
            return Err(err);
        }
        let offered = req
            .headers()
            .get("sec-websocket-protocol")
            .and_then(|v| v.to_str().ok())
            .is_some_and(|protos| protos.split(',').map(str::trim).any(|p| p == SUBPROTOCOL));
        if !offered {
            let mut err =
                ErrorResponse::new(Some(format!("subprotocol {SUBPROTOCOL} required")));
            *err.status_mut() = StatusCode::BAD_REQUEST;
            return Err(err);
        }
        resp.headers_mut().insert(
            "sec-websocket-protocol",
            HeaderValue::from_static(SUBPROTOCOL),
        );
        Ok(resp)
    };

    let ws_stream =
        tokio_tungstenite::accept_hdr_async_with_config(stream, callback, Some(ws_config))
            .await
            .map_err(RelayError::WebSocket)?;

    let (mut ws_tx, mut ws_rx) = ws_stream.split();
    let (deliver_tx, mut deliver_rx) = mpsc::channel::<String>(256);

    let mut ctx = ConnCtx {
        source_id: None,
        connected_at: Instant::now(),
        deliver_tx,
    };

    gauges::inc_connections_active();
    debug!(peer = %peer_addr, "signaling connection established");

    let result = run_message_loop(&mut ws_tx, &mut ws_rx, &mut deliver_rx, &state, &mut ctx).await;

    if let Some(source_id) = ctx.source_id.take() {
        teardown_endpoint(&state, &source_id, ctx.connected_at);
    }
    gauges::dec_connections_active();
    result
}

/// Drives the select loop: inbound frames, deliveries destined for this
/// endpoint, and keepalive pings with an idle timeout.
async fn run_message_loop<S>(
    ws_tx: &mut WsSink<S>,
    ws_rx: &mut WsRecv<S>,
    deliver_rx: &mut mpsc::Receiver<String>,
    state: &Arc<ServerState>,
    ctx: &mut ConnCtx,
) -> Result<(), RelayError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut ping_interval = interval(Duration::from_secs(state.config.ping_interval));
    let idle_timeout = Duration::from_secs(state.config.idle_timeout);
    let mut last_activity = Instant::now();

    loop {
        tokio::select! {
            msg = ws_rx.next() => {
                last_activity = Instant::now();
                match msg {
                    Some(Ok(WsMessage::Text(raw))) => {
                        let start = Instant::now();
                        process_message(&raw, state, ctx, ws_tx).await?;
                        histograms::dispatch_latency_seconds(start.elapsed().as_secs_f64());
                    }
                    Some(Ok(WsMessage::Binary(_))) => {
                        counters::errors_total("framing");
                        send_error(ws_tx, state, ctx, 0, ErrorKind::MessageMalformatted,
                            "frames must be UTF-8 text").await?;
                    }
                    Some(Ok(WsMessage::Ping(data))) => {
                        if let Err(e) = ws_tx.send(WsMessage::Pong(data)).await {
                            debug!("failed to send pong: {}", e);
                        }
                    }
                    Some(Ok(WsMessage::Close(_))) | None => return Ok(()),
                    Some(Err(e)) => return Err(RelayError::WebSocket(e)),
                    _ => {}
                }
            }
            Some(data) = deliver_rx.recv() => {
                last_activity = Instant::now();
                ws_tx.send(WsMessage::Text(data)).await.map_err(RelayError::WebSocket)?;
            }
            _ = ping_interval.tick() => {
                if last_activity.elapsed() >= idle_timeout {
                    debug!("idle timeout reached, closing connection");
                    return Ok(());
                }
                if let Err(e) = ws_tx.send(WsMessage::Ping(Vec::new())).await {
                    debug!("failed to send ping: {}", e);
                }
            }
        }
    }
}

/// Parse → unpack envelope → validate → bind route → dispatch. Every
/// failure is answered on this connection; none aborts the loop.
async fn process_message<S>(
    raw: &str,
    state: &Arc<ServerState>,
    ctx: &mut ConnCtx,
    ws_tx: &mut WsSink<S>,
) -> Result<(), RelayError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let Ok(mut value) = serde_json::from_str::<Value>(raw) else {
        counters::errors_total("framing");
        return send_error(
            ws_tx,
            state,
            ctx,
            0,
            ErrorKind::MessageMalformatted,
            "message is not valid JSON",
        )
        .await;
    };

    let message_id = value.get("message_id").and_then(Value::as_u64).unwrap_or(0);

    if value.get("security").is_some() {
        match &state.keys {
            Some(keys) => {
                if let Err(e) = keys.unprotect(&mut value) {
                    counters::errors_total("envelope");
                    return send_error(
                        ws_tx,
                        state,
                        ctx,
                        message_id,
                        ErrorKind::MessageMalformatted,
                        e.to_string(),
                    )
                    .await;
                }
            }
            None => {
                counters::errors_total("envelope");
                return send_error(
                    ws_tx,
                    state,
                    ctx,
                    message_id,
                    ErrorKind::Unauthorized,
                    "security envelope is not enabled on this relay",
                )
                .await;
            }
        }
    }

    let outcome = validate_shape(&value);
    if !outcome.valid {
        let unknown_kind = value
            .get("message_type")
            .and_then(Value::as_str)
            .is_some_and(|k| !MESSAGE_KINDS.contains(&k));
        let kind = if unknown_kind {
            ErrorKind::MessageUnknown
        } else {
            ErrorKind::MessageMalformatted
        };
        counters::errors_total("schema");
        return send_error(ws_tx, state, ctx, message_id, kind, outcome.errors.join("; ")).await;
    }

    let message = match Message::from_value(value.clone()) {
        Ok(m) => m,
        Err(e) => {
            counters::errors_total("schema");
            return send_error(ws_tx, state, ctx, message_id, e.error_kind(), e.to_string()).await;
        }
    };

    bind_route(state, ctx, &message.source_id);
    dispatch(state, ctx, ws_tx, value, message).await
}

/// Records `source_id → transport` in the routing table, displacing any
/// earlier binding for the same id.
fn bind_route(state: &ServerState, ctx: &mut ConnCtx, source_id: &str) {
    if ctx.source_id.as_deref() == Some(source_id) {
        return;
    }
    if let Some(old) = ctx.source_id.take() {
        state.router.remove_if(&old, ctx.connected_at);
    }
    let handle = ConnHandle {
        tx: ctx.deliver_tx.clone(),
        source_id: source_id.to_string(),
        connected_at: ctx.connected_at,
    };
    if let Some(old_handle) = state.router.insert(source_id, handle) {
        drop(old_handle);
    }
    ctx.source_id = Some(source_id.to_string());
}

async fn dispatch<S>(
    state: &Arc<ServerState>,
    ctx: &ConnCtx,
    ws_tx: &mut WsSink<S>,
    value: Value,
    message: Message,
) -> Result<(), RelayError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    match &message.body {
        Body::Register {
            criteria,
            capabilities,
        } => {
            {
                let mut dir = lock_directory(state);
                dir.record_message(&message.source_id, message.message_id);
                dir.register(
                    &message.source_id,
                    criteria.clone(),
                    capabilities.unwrap_or_default(),
                );
            }
            info!(
                source_id = %message.source_id,
                criteria = criteria.len(),
                "endpoint registered"
            );
            send_ack(ws_tx, state, ctx, &message).await
        }
        Body::Connect { criteria, .. } => {
            let selection = {
                let mut dir = lock_directory(state);
                dir.record_message(&message.source_id, message.message_id);
                let mut matches = dir.matcher.find_matches(criteria);
                matches.retain(|id| id != &message.source_id);
                dir.matcher.select(&matches).map(|target| {
                    dir.put_pending(&message.source_id, &target, message.message_id);
                    let caps = dir.capabilities_of(&target);
                    (target, caps)
                })
            };
            let Some((target, caps)) = selection else {
                counters::errors_total("routing");
                return send_error(
                    ws_tx,
                    state,
                    ctx,
                    message.message_id,
                    ErrorKind::TargetUnknown,
                    "no registered endpoint matched the criteria",
                )
                .await;
            };
            if forward(state, &target, caps, &value)? {
                debug!(from = %message.source_id, to = %target, "connect forwarded");
                send_ack(ws_tx, state, ctx, &message).await
            } else {
                lock_directory(state).take_pending(&message.source_id);
                counters::errors_total("routing");
                send_error(
                    ws_tx,
                    state,
                    ctx,
                    message.message_id,
                    ErrorKind::TargetUnknown,
                    format!("selected endpoint `{target}` is gone"),
                )
                .await
            }
        }
        Body::Accept { target, .. } => {
            if state.router.get(target).is_none() {
                lock_directory(state).record_message(&message.source_id, message.message_id);
                counters::errors_total("routing");
                return send_error(
                    ws_tx,
                    state,
                    ctx,
                    message.message_id,
                    ErrorKind::TargetUnknown,
                    format!("no transport for `{target}`"),
                )
                .await;
            }
            let (caps, session_count) = {
                let mut dir = lock_directory(state);
                dir.record_message(&message.source_id, message.message_id);
                dir.take_pending(target);
                dir.sessions.create(&message.source_id, target);
                (dir.capabilities_of(target), dir.sessions.len())
            };
            gauges::set_sessions_active(session_count);
            if forward(state, target, caps, &value)? {
                info!(a = %message.source_id, b = %target, "session created");
                send_ack(ws_tx, state, ctx, &message).await
            } else {
                let count = {
                    let mut dir = lock_directory(state);
                    dir.sessions.remove(&message.source_id, target);
                    dir.sessions.len()
                };
                gauges::set_sessions_active(count);
                counters::errors_total("routing");
                send_error(
                    ws_tx,
                    state,
                    ctx,
                    message.message_id,
                    ErrorKind::TargetUnknown,
                    format!("no transport for `{target}`"),
                )
                .await
            }
        }
        Body::Reject { target, .. } => {
            let caps = {
                let mut dir = lock_directory(state);
                dir.record_message(&message.source_id, message.message_id);
                dir.take_pending(target);
                dir.capabilities_of(target)
            };
            forward_or_error(state, ctx, ws_tx, &message, target, caps, &value).await
        }
        Body::Update { target, .. } | Body::Application { target, .. } => {
            let caps = {
                let mut dir = lock_directory(state);
                dir.record_message(&message.source_id, message.message_id);
                dir.capabilities_of(target)
            };
            forward_or_error(state, ctx, ws_tx, &message, target, caps, &value).await
        }
        Body::Close { target } => {
            let (caps, session_count) = {
                let mut dir = lock_directory(state);
                dir.record_message(&message.source_id, message.message_id);
                dir.sessions.remove(&message.source_id, target);
                (dir.capabilities_of(target), dir.sessions.len())
            };
            gauges::set_sessions_active(session_count);
            if state.router.get(target).is_some() {
                let _ = forward(state, target, caps, &value)?;
            }
            info!(a = %message.source_id, b = %target, "session closed");
            send_ack(ws_tx, state, ctx, &message).await
        }
        Body::Response { .. } => {
            lock_directory(state).record_message(&message.source_id, message.message_id);
            debug!(source_id = %message.source_id, "response received; nothing to do");
            Ok(())
        }
    }
}

async fn forward_or_error<S>(
    state: &Arc<ServerState>,
    ctx: &ConnCtx,
    ws_tx: &mut WsSink<S>,
    message: &Message,
    target: &str,
    caps: SecurityCaps,
    value: &Value,
) -> Result<(), RelayError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    if forward(state, target, caps, value)? {
        send_ack(ws_tx, state, ctx, message).await
    } else {
        counters::errors_total("routing");
        send_error(
            ws_tx,
            state,
            ctx,
            message.message_id,
            ErrorKind::TargetUnknown,
            format!("no transport for `{target}`"),
        )
        .await
    }
}

/// Forwards a plaintext wire object to a target endpoint, re-applying
/// the envelope when the target negotiated it. The original `source_id`
/// and `message_id` pass through verbatim; only `security` may differ.
fn forward(
    state: &ServerState,
    target: &str,
    caps: SecurityCaps,
    value: &Value,
) -> Result<bool, RelayError> {
    let Some(handle) = state.router.get(target) else {
        return Ok(false);
    };
    let mut out = value.clone();
    if let Some(keys) = &state.keys {
        keys.protect(&mut out, caps)?;
    }
    let text = serde_json::to_string(&out)?;
    match handle.tx.try_send(text) {
        Ok(()) => {
            counters::messages_relayed_total();
            Ok(true)
        }
        Err(mpsc::error::TrySendError::Full(_)) => {
            counters::messages_dropped_total("backpressure");
            warn!(target = %target, "deliver queue full, dropping message");
            Ok(true)
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {
            counters::messages_dropped_total("offline");
            state.router.remove_if(target, handle.connected_at);
            Ok(false)
        }
    }
}

async fn send_ack<S>(
    ws_tx: &mut WsSink<S>,
    state: &ServerState,
    ctx: &ConnCtx,
    request: &Message,
) -> Result<(), RelayError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let ack = Message::response(
        state.relay_id.clone(),
        state.relay_msg_ids.next(),
        request.message_id,
        200,
        "ok",
        None,
    );
    send_to_endpoint(ws_tx, state, ctx, &ack).await
}

async fn send_error<S>(
    ws_tx: &mut WsSink<S>,
    state: &ServerState,
    ctx: &ConnCtx,
    response_to: u64,
    kind: ErrorKind,
    detail: impl Into<String>,
) -> Result<(), RelayError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let problem = kind.problem(detail);
    let status = problem.status;
    let response = Message::response(
        state.relay_id.clone(),
        state.relay_msg_ids.next(),
        response_to,
        status,
        kind.title(),
        Some(problem),
    );
    send_to_endpoint(ws_tx, state, ctx, &response).await
}

/// Writes a relay-authored message on this connection, protected per
/// the endpoint's advertised capabilities.
async fn send_to_endpoint<S>(
    ws_tx: &mut WsSink<S>,
    state: &ServerState,
    ctx: &ConnCtx,
    message: &Message,
) -> Result<(), RelayError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut value = message.to_value()?;
    if let Some(keys) = &state.keys {
        if let Some(source_id) = ctx.source_id.as_deref() {
            let caps = lock_directory(state).capabilities_of(source_id);
            keys.protect(&mut value, caps)?;
        }
    }
    let text = serde_json::to_string(&value)?;
    ws_tx
        .send(WsMessage::Text(text))
        .await
        .map_err(RelayError::WebSocket)
}

/// Removes every trace of a disconnected endpoint — registration,
/// matcher entry, sessions, routing-table binding — in one critical
/// section, then notifies each surviving peer with a `close` authored
/// by the disconnected endpoint.
fn teardown_endpoint(state: &ServerState, source_id: &str, connected_at: Instant) {
    let closures = {
        let mut dir = lock_directory(state);
        let closures = dir.remove_endpoint(source_id);
        state.router.remove_if(source_id, connected_at);
        gauges::set_sessions_active(dir.sessions.len());
        closures
    };
    for PeerClose {
        peer,
        caps,
        message,
    } in closures
    {
        let Some(handle) = state.router.get(&peer) else {
            continue;
        };
        let Ok(mut value) = message.to_value() else {
            continue;
        };
        if let Some(keys) = &state.keys {
            if keys.protect(&mut value, caps).is_err() {
                debug!(peer = %peer, "failed to protect synthesized close");
                continue;
            }
        }
        if let Ok(text) = serde_json::to_string(&value) {
            if handle.tx.try_send(text).is_err() {
                counters::messages_dropped_total("offline");
            }
        }
    }
    info!(source_id = %source_id, "endpoint disconnected");
}
