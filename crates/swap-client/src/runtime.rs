use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::{interval, timeout};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use swap_common::ids::{generate_source_id, MessageIdCounter};
use swap_common::message::{Body, Capabilities, Criterion, Message};
use swap_common::types::SUBPROTOCOL;
use swap_common::{ErrorKind, KeyMaterial, ProblemDetails};

use crate::backoff::ExponentialBackoff;
use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::events::SwapEvent;
use crate::pending::PendingResponses;
use crate::state::{allows_send, apply, SignalingState, StateEvent};

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, WsMessage>;
type WsRecv = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// Connection status of the relay link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnStatus {
    /// Not connected to the relay.
    Disconnected,
    /// TCP/TLS connection or WebSocket upgrade in progress.
    Connecting,
    /// Upgraded and ready to exchange messages.
    Connected,
}

/// The fields of a `response` resolved to a pending request.
#[derive(Debug, Clone)]
pub struct ResponseBody {
    /// The request's message id.
    pub response_to: u64,
    /// HTTP-style status code.
    pub status: u16,
    /// Human-readable outcome.
    pub reason: String,
    /// Problem details for non-2xx statuses.
    pub error: Option<ProblemDetails>,
}

struct Command {
    message_id: u64,
    value: Value,
}

#[derive(Debug)]
enum RunError {
    Fatal(ClientError),
    Transient(ClientError),
}

/// Task-side connection state.
struct Connection {
    config: Arc<ClientConfig>,
    source_id: String,
    msg_ids: Arc<MessageIdCounter>,
    state: Arc<Mutex<SignalingState>>,
    events_tx: broadcast::Sender<SwapEvent>,
    status_tx: watch::Sender<ConnStatus>,
    keys: Option<KeyMaterial>,
    pending: Arc<PendingResponses>,
    sessions: HashSet<String>,
}

impl Connection {
    fn apply_event(&self, event: StateEvent) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(next) = apply(*state, event) {
            *state = next;
        }
    }

    fn emit(&self, event: SwapEvent) {
        if self.events_tx.send(event).is_err() {
            debug!("event dropped: no active subscribers");
        }
    }
}

/// Handle to the SWAP client runtime.
///
/// Cloning is cheap; all clones share one relay link, one signaling
/// state machine, and one event stream. Dropping the last clone shuts
/// the connection task down cleanly.
#[derive(Clone)]
pub struct SwapClient {
    source_id: String,
    cmd_tx: mpsc::Sender<Command>,
    state: Arc<Mutex<SignalingState>>,
    events_tx: broadcast::Sender<SwapEvent>,
    status_rx: watch::Receiver<ConnStatus>,
    msg_ids: Arc<MessageIdCounter>,
    pending: Arc<PendingResponses>,
    config: Arc<ClientConfig>,
}

impl SwapClient {
    /// Spawns the connection manager and returns the handle. The link
    /// is established in the background; sends issued before it opens
    /// are queued and flushed in order.
    #[must_use]
    pub fn connect(config: ClientConfig) -> Self {
        let config = Arc::new(config);
        let source_id = generate_source_id(&config.source_id_prefix);
        let msg_ids = Arc::new(MessageIdCounter::new());
        let state = Arc::new(Mutex::new(SignalingState::Idle));
        let (events_tx, _) = broadcast::channel(64);
        let (status_tx, status_rx) = watch::channel(ConnStatus::Disconnected);
        let (cmd_tx, cmd_rx) = mpsc::channel(256);
        let pending = Arc::new(PendingResponses::new());

        let keys = if config.security.enabled {
            config.security.shared_secret.as_deref().map(KeyMaterial::new)
        } else {
            None
        };

        let conn = Connection {
            config: Arc::clone(&config),
            source_id: source_id.clone(),
            msg_ids: Arc::clone(&msg_ids),
            state: Arc::clone(&state),
            events_tx: events_tx.clone(),
            status_tx,
            keys,
            pending: Arc::clone(&pending),
            sessions: HashSet::new(),
        };
        tokio::spawn(connection_manager(conn, cmd_rx));

        Self {
            source_id,
            cmd_tx,
            state,
            events_tx,
            status_rx,
            msg_ids,
            pending,
            config,
        }
    }

    /// This endpoint's source identifier.
    #[must_use]
    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    /// Current signaling state.
    #[must_use]
    pub fn state(&self) -> SignalingState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current link status.
    #[must_use]
    pub fn status(&self) -> ConnStatus {
        self.status_rx.borrow().clone()
    }

    /// Subscribes to the typed event stream.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SwapEvent> {
        self.events_tx.subscribe()
    }

    /// Registers this endpoint's criteria, advertising the configured
    /// security capabilities.
    ///
    /// # Errors
    ///
    /// See [`request`](Self::request) failure modes.
    pub async fn register(&self, criteria: Vec<Criterion>) -> Result<ResponseBody, ClientError> {
        let caps = self.config.security.caps();
        let capabilities = caps.any().then_some(Capabilities { security: caps });
        self.request(Body::Register {
            criteria,
            capabilities,
        })
        .await
    }

    /// Requests a peer match and delivers an SDP offer.
    ///
    /// # Errors
    ///
    /// [`ClientError::Rejected`] with a `target_unknown` problem when no
    /// registered endpoint matches.
    pub async fn connect_to(
        &self,
        offer: impl Into<String>,
        criteria: Vec<Criterion>,
    ) -> Result<ResponseBody, ClientError> {
        self.request(Body::Connect {
            offer: offer.into(),
            criteria,
        })
        .await
    }

    /// Accepts an offer from `target` with an SDP answer.
    ///
    /// # Errors
    ///
    /// See [`request`](Self::request) failure modes.
    pub async fn accept(
        &self,
        target: impl Into<String>,
        answer: impl Into<String>,
    ) -> Result<ResponseBody, ClientError> {
        self.request(Body::Accept {
            target: target.into(),
            answer: answer.into(),
        })
        .await
    }

    /// Declines an offer from `target`.
    ///
    /// # Errors
    ///
    /// See [`request`](Self::request) failure modes.
    pub async fn reject(
        &self,
        target: impl Into<String>,
        reason: impl Into<String>,
    ) -> Result<ResponseBody, ClientError> {
        self.request(Body::Reject {
            target: target.into(),
            reason: reason.into(),
        })
        .await
    }

    /// Sends an SDP control update within the session.
    ///
    /// # Errors
    ///
    /// See [`request`](Self::request) failure modes.
    pub async fn update(
        &self,
        target: impl Into<String>,
        sdp: impl Into<String>,
    ) -> Result<ResponseBody, ClientError> {
        self.request(Body::Update {
            target: target.into(),
            sdp: sdp.into(),
        })
        .await
    }

    /// Tears down the session with `target`.
    ///
    /// # Errors
    ///
    /// See [`request`](Self::request) failure modes.
    pub async fn close(&self, target: impl Into<String>) -> Result<ResponseBody, ClientError> {
        self.request(Body::Close {
            target: target.into(),
        })
        .await
    }

    /// Sends an application-defined payload to `target`.
    ///
    /// # Errors
    ///
    /// See [`request`](Self::request) failure modes.
    pub async fn application(
        &self,
        target: impl Into<String>,
        kind: impl Into<String>,
        value: Value,
    ) -> Result<ResponseBody, ClientError> {
        self.request(Body::Application {
            target: target.into(),
            kind: kind.into(),
            value,
        })
        .await
    }

    fn apply_event(&self, event: StateEvent) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(next) = apply(*state, event) {
            *state = next;
        }
    }

    /// Sends a request and awaits the correlated `response`.
    ///
    /// # Errors
    ///
    /// [`ClientError::InvalidState`] when the state machine forbids the
    /// kind (the transport is not touched), [`ClientError::Timeout`]
    /// when no response arrives in time, [`ClientError::Disconnected`]
    /// when the link died mid-flight, and [`ClientError::Rejected`] for
    /// a non-2xx response.
    async fn request(&self, body: Body) -> Result<ResponseBody, ClientError> {
        let kind = body.kind();
        {
            let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            if !allows_send(*state, kind) {
                return Err(ClientError::InvalidState {
                    state: *state,
                    kind,
                });
            }
        }
        let message_id = self.msg_ids.next();
        let message = Message::new(self.source_id.clone(), message_id, body);
        let value = message.to_value()?;

        // Transitions taken at send time so inbound answers find the
        // machine already advanced.
        match kind {
            "connect" => self.apply_event(StateEvent::Connect),
            "close" => self.apply_event(StateEvent::Close),
            _ => {}
        }

        let ack_rx = self.pending.register(message_id);
        if self
            .cmd_tx
            .send(Command { message_id, value })
            .await
            .is_err()
        {
            // The connection task is gone; complete the entry ourselves.
            self.pending
                .resolve(message_id, Err(ClientError::Disconnected));
        }

        let result = match timeout(self.config.request_timeout, ack_rx).await {
            Err(_) => {
                // Expiry removes the entry.
                self.pending.resolve(message_id, Err(ClientError::Timeout));
                Err(ClientError::Timeout)
            }
            Ok(Err(_)) => Err(ClientError::Disconnected),
            Ok(Ok(outcome)) => outcome,
        };

        match (kind, &result) {
            ("connect", Err(_)) => self.apply_event(StateEvent::Reject),
            ("accept", Ok(_)) => self.apply_event(StateEvent::Accept),
            ("reject", Ok(_)) => self.apply_event(StateEvent::Reject),
            ("close", Ok(_)) => self.apply_event(StateEvent::Closed),
            _ => {}
        }
        result
    }
}

/// Top-level connection loop with automatic reconnection and backoff.
async fn connection_manager(mut conn: Connection, mut cmd_rx: mpsc::Receiver<Command>) {
    let mut backoff = ExponentialBackoff::new(
        Duration::from_millis(conn.config.reconnect.initial_delay_ms),
        Duration::from_millis(conn.config.reconnect.max_delay_ms),
        conn.config.reconnect.backoff_factor,
        conn.config.reconnect.max_attempts,
    );

    loop {
        conn.status_tx.send_replace(ConnStatus::Connecting);

        match connect_and_run(&mut conn, &mut cmd_rx).await {
            Ok(()) => {
                info!("client connection closed cleanly");
                conn.status_tx.send_replace(ConnStatus::Disconnected);
                break;
            }
            Err(RunError::Fatal(e)) => {
                warn!(error = %e, "fatal client error, not retrying");
                conn.emit(SwapEvent::Error {
                    detail: e.to_string(),
                });
                conn.status_tx.send_replace(ConnStatus::Disconnected);
                break;
            }
            Err(RunError::Transient(e)) => {
                let was_connected = *conn.status_tx.borrow() == ConnStatus::Connected;
                warn!(error = %e, "relay link lost");
                conn.status_tx.send_replace(ConnStatus::Disconnected);
                if was_connected {
                    backoff.reset();
                }
            }
        }

        if backoff.exhausted() {
            conn.emit(SwapEvent::Error {
                detail: "reconnect attempts exhausted".to_string(),
            });
            break;
        }
        let delay = backoff.next_delay();
        info!(
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            "reconnecting"
        );
        tokio::time::sleep(delay).await;
    }
}

async fn connect_and_run(
    conn: &mut Connection,
    cmd_rx: &mut mpsc::Receiver<Command>,
) -> Result<(), RunError> {
    let mut req = conn
        .config
        .url
        .as_str()
        .into_client_request()
        .map_err(|e| RunError::Fatal(ClientError::WebSocket(e)))?;
    req.headers_mut().insert(
        "Sec-WebSocket-Protocol",
        SUBPROTOCOL.parse().expect("valid header value"),
    );

    let (ws, _) = match timeout(
        conn.config.connect_timeout,
        tokio_tungstenite::connect_async(req),
    )
    .await
    {
        Err(_) => return Err(RunError::Transient(ClientError::Timeout)),
        Ok(Err(e)) => return Err(RunError::Transient(ClientError::WebSocket(e))),
        Ok(Ok(pair)) => pair,
    };
    let (mut ws_tx, mut ws_rx) = ws.split();

    conn.status_tx.send_replace(ConnStatus::Connected);
    info!(source_id = %conn.source_id, "connected to relay");

    let result = run_session(conn, cmd_rx, &mut ws_tx, &mut ws_rx).await;
    // Transport closes cancel every in-flight request.
    conn.pending.fail_all(|| ClientError::Disconnected);
    result
}

async fn run_session(
    conn: &mut Connection,
    cmd_rx: &mut mpsc::Receiver<Command>,
    ws_tx: &mut WsSink,
    ws_rx: &mut WsRecv,
) -> Result<(), RunError> {
    let mut ping_interval = interval(conn.config.keepalive_interval);

    loop {
        tokio::select! {
            msg = ws_rx.next() => {
                let msg = match msg {
                    None => return Err(RunError::Transient(ClientError::Disconnected)),
                    Some(Err(e)) => return Err(RunError::Transient(ClientError::WebSocket(e))),
                    Some(Ok(m)) => m,
                };
                match msg {
                    WsMessage::Text(raw) => {
                        handle_inbound(conn, ws_tx, &raw).await?;
                    }
                    WsMessage::Ping(data) => {
                        ws_tx.send(WsMessage::Pong(data)).await
                            .map_err(|e| RunError::Transient(ClientError::WebSocket(e)))?;
                    }
                    WsMessage::Close(_) => {
                        return Err(RunError::Transient(ClientError::Disconnected));
                    }
                    _ => {}
                }
            }
            cmd = cmd_rx.recv() => {
                let Some(cmd) = cmd else { return Ok(()) };
                send_command(conn, ws_tx, cmd).await?;
            }
            _ = ping_interval.tick() => {
                ws_tx.send(WsMessage::Ping(Vec::new())).await
                    .map_err(|e| RunError::Transient(ClientError::WebSocket(e)))?;
            }
        }
    }
}

async fn send_command(conn: &Connection, ws_tx: &mut WsSink, cmd: Command) -> Result<(), RunError> {
    let Command {
        message_id,
        mut value,
    } = cmd;

    if let Some(keys) = &conn.keys {
        if let Err(e) = keys.protect(&mut value, conn.config.security.caps()) {
            conn.pending
                .resolve(message_id, Err(ClientError::Envelope(e)));
            return Ok(());
        }
    }
    let text = match serde_json::to_string(&value) {
        Ok(t) => t,
        Err(e) => {
            conn.pending
                .resolve(message_id, Err(ClientError::Serialize(e)));
            return Ok(());
        }
    };
    match ws_tx.send(WsMessage::Text(text)).await {
        Ok(()) => Ok(()),
        Err(e) => {
            conn.pending
                .resolve(message_id, Err(ClientError::Disconnected));
            Err(RunError::Transient(ClientError::WebSocket(e)))
        }
    }
}

/// Demultiplexes one inbound frame: responses resolve the correlation
/// table, everything else drives the state machine and the event stream.
async fn handle_inbound(
    conn: &mut Connection,
    ws_tx: &mut WsSink,
    raw: &str,
) -> Result<(), RunError> {
    let Ok(mut value) = serde_json::from_str::<Value>(raw) else {
        debug!("ignoring unparseable frame");
        return Ok(());
    };
    let message_id = value.get("message_id").and_then(Value::as_u64).unwrap_or(0);

    if value.get("security").is_some() {
        let outcome = match &conn.keys {
            Some(keys) => keys.unprotect(&mut value).map_err(|e| e.to_string()),
            None => Err("no shared secret configured".to_string()),
        };
        if let Err(detail) = outcome {
            warn!(error = %detail, "inbound envelope unpack failed");
            conn.emit(SwapEvent::Error {
                detail: detail.clone(),
            });
            return reply_malformatted(conn, ws_tx, message_id, detail).await;
        }
    }

    let message = match Message::from_value(value) {
        Ok(m) => m,
        Err(e) => {
            debug!(error = %e, "ignoring malformed inbound message");
            return Ok(());
        }
    };

    let source_id = message.source_id;
    match message.body {
        Body::Response {
            response_to,
            status,
            reason,
            error,
        } => {
            let outcome = if (200..300).contains(&status) {
                Ok(ResponseBody {
                    response_to,
                    status,
                    reason,
                    error,
                })
            } else {
                Err(ClientError::Rejected {
                    status,
                    problem: error,
                })
            };
            if !conn.pending.resolve(response_to, outcome) {
                debug!(response_to, "response with no pending request");
            }
        }
        Body::Connect { offer, .. } => {
            conn.apply_event(StateEvent::AcceptIncoming);
            conn.emit(SwapEvent::Connect { offer, source_id });
        }
        Body::Accept { answer, .. } => {
            conn.apply_event(StateEvent::Accept);
            conn.sessions.insert(source_id.clone());
            conn.emit(SwapEvent::Accept { answer, source_id });
        }
        Body::Reject { reason, .. } => {
            conn.apply_event(StateEvent::Reject);
            conn.emit(SwapEvent::Reject { reason, source_id });
        }
        Body::Update { sdp, .. } => {
            conn.emit(SwapEvent::Update { sdp, source_id });
        }
        Body::Close { .. } => {
            conn.apply_event(StateEvent::Close);
            conn.apply_event(StateEvent::Closed);
            conn.sessions.remove(&source_id);
            conn.emit(SwapEvent::Close { source_id });
        }
        Body::Application { kind, value, .. } => {
            conn.emit(SwapEvent::Application {
                kind,
                value,
                source_id,
            });
        }
        Body::Register { .. } => {
            debug!("unexpected register from relay");
        }
    }
    Ok(())
}

/// Answers an undecodable secured message with `message_malformatted`,
/// as the envelope contract requires.
async fn reply_malformatted(
    conn: &Connection,
    ws_tx: &mut WsSink,
    response_to: u64,
    detail: String,
) -> Result<(), RunError> {
    let kind = ErrorKind::MessageMalformatted;
    let problem = kind.problem(detail);
    let status = problem.status;
    let msg = Message::response(
        conn.source_id.clone(),
        conn.msg_ids.next(),
        response_to,
        status,
        kind.title(),
        Some(problem),
    );
    let mut value = match msg.to_value() {
        Ok(v) => v,
        Err(e) => {
            debug!(error = %e, "failed to build error response");
            return Ok(());
        }
    };
    if let Some(keys) = &conn.keys {
        if let Err(e) = keys.protect(&mut value, conn.config.security.caps()) {
            debug!(error = %e, "failed to protect error response");
            return Ok(());
        }
    }
    match serde_json::to_string(&value) {
        Ok(text) => ws_tx
            .send(WsMessage::Text(text))
            .await
            .map_err(|e| RunError::Transient(ClientError::WebSocket(e))),
        Err(e) => {
            debug!(error = %e, "failed to serialize error response");
            Ok(())
        }
    }
}
