use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use swap_common::ids::generate_source_id;
use swap_common::types::{SIGNALING_PATH, SUBPROTOCOL};
use swap_common::KeyMaterial;
use swap_relay::config::RelayConfig;
use swap_relay::ServerState;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

pub fn test_config(listen: SocketAddr) -> RelayConfig {
    RelayConfig {
        listen,
        health_addr: "127.0.0.1:0".parse().unwrap(),
        use_tls: false,
        tls_cert_file: None,
        tls_key_file: None,
        security_enabled: false,
        shared_secret: None,
        max_conns: 1000,
        max_message_bytes: 1_048_576,
        ping_interval: 30,
        idle_timeout: 120,
    }
}

async fn spawn_server(config: RelayConfig) -> (SocketAddr, Arc<ServerState>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let mut config = config;
    config.listen = addr;
    let state = Arc::new(ServerState::new(config));

    let state_clone = state.clone();
    tokio::spawn(async move {
        if let Err(e) = swap_relay::run(listener, state_clone).await {
            eprintln!("server error in test: {e}");
        }
    });

    tokio::time::sleep(Duration::from_millis(50)).await;
    (addr, state)
}

pub async fn start_server() -> (SocketAddr, Arc<ServerState>) {
    spawn_server(test_config("127.0.0.1:0".parse().unwrap())).await
}

pub async fn start_secured_server(secret: &str) -> (SocketAddr, Arc<ServerState>) {
    let mut config = test_config("127.0.0.1:0".parse().unwrap());
    config.security_enabled = true;
    config.shared_secret = Some(secret.to_string());
    spawn_server(config).await
}

pub struct TestClient {
    pub ws_tx: SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>,
    pub ws_rx: SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>,
    pub source_id: String,
    pub keys: Option<KeyMaterial>,
    next_id: u64,
}

impl TestClient {
    pub async fn connect(addr: &SocketAddr, tag: &str) -> Self {
        let url = format!("ws://{addr}{SIGNALING_PATH}");
        let mut req = url.into_client_request().unwrap();
        req.headers_mut()
            .insert("Sec-WebSocket-Protocol", SUBPROTOCOL.parse().unwrap());
        let (ws, _) = tokio_tungstenite::connect_async(req).await.unwrap();
        let (ws_tx, ws_rx) = ws.split();

        Self {
            ws_tx,
            ws_rx,
            source_id: generate_source_id(tag),
            keys: None,
            next_id: 0,
        }
    }

    pub async fn connect_secured(addr: &SocketAddr, tag: &str, secret: &str) -> Self {
        let mut client = Self::connect(addr, tag).await;
        client.keys = Some(KeyMaterial::new(secret));
        client
    }

    pub fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    pub fn envelope(&self, kind: &str, message_id: u64) -> Value {
        json!({
            "version": 1,
            "source_id": self.source_id,
            "message_id": message_id,
            "message_type": kind
        })
    }

    pub fn build(&mut self, kind: &str, payload: Value) -> Value {
        let id = self.next_id();
        let mut msg = self.envelope(kind, id);
        let obj = msg.as_object_mut().unwrap();
        for (k, v) in payload.as_object().unwrap() {
            obj.insert(k.clone(), v.clone());
        }
        msg
    }

    pub async fn send_value(&mut self, value: &Value) {
        self.ws_tx
            .send(Message::Text(serde_json::to_string(value).unwrap()))
            .await
            .unwrap();
    }

    pub async fn send_text(&mut self, text: &str) {
        self.ws_tx
            .send(Message::Text(text.to_string()))
            .await
            .unwrap();
    }

    /// Sends a message of the given kind; returns its message id.
    pub async fn send(&mut self, kind: &str, payload: Value) -> u64 {
        let msg = self.build(kind, payload);
        let id = msg["message_id"].as_u64().unwrap();
        self.send_value(&msg).await;
        id
    }

    /// Registers with the given criteria (and optional capabilities),
    /// asserting the relay acks with 200.
    pub async fn register(&mut self, criteria: Value, capabilities: Option<Value>) -> u64 {
        let mut payload = json!({ "criteria": criteria });
        if let Some(caps) = capabilities {
            payload["capabilities"] = caps;
        }
        let id = self.send("register", payload).await;
        let ack = self.recv_response().await;
        assert_eq!(ack["status"], 200, "register ack: {ack}");
        assert_eq!(ack["response_to"], id);
        id
    }

    /// Receives the next raw data frame without unprotecting it.
    pub async fn recv_raw(&mut self) -> Value {
        loop {
            let msg = tokio::time::timeout(Duration::from_secs(5), self.ws_rx.next())
                .await
                .expect("timeout waiting for frame")
                .unwrap()
                .unwrap();
            match msg {
                Message::Text(text) => return serde_json::from_str(&text).unwrap(),
                Message::Ping(_) | Message::Pong(_) => {}
                other => panic!("expected text frame, got {other:?}"),
            }
        }
    }

    /// Receives the next message, unprotecting it when keys are set.
    pub async fn recv_msg(&mut self) -> Value {
        let mut value = self.recv_raw().await;
        if value.get("security").is_some() {
            let keys = self.keys.as_ref().expect("secured frame without keys");
            keys.unprotect(&mut value).expect("envelope unpack");
        }
        value
    }

    pub async fn recv_msg_timeout(&mut self, timeout: Duration) -> Option<Value> {
        tokio::time::timeout(timeout, self.recv_msg()).await.ok()
    }

    /// Receives the next `response` message, skipping other kinds.
    pub async fn recv_response(&mut self) -> Value {
        loop {
            let msg = self.recv_msg().await;
            if msg["message_type"] == "response" {
                return msg;
            }
        }
    }

    /// Receives the next non-`response` message.
    pub async fn recv_forwarded(&mut self) -> Value {
        loop {
            let msg = self.recv_msg().await;
            if msg["message_type"] != "response" {
                return msg;
            }
        }
    }
}
