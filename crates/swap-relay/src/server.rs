use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;
use tracing::{error, info, warn};

use swap_common::ids::{generate_source_id, MessageIdCounter};
use swap_common::KeyMaterial;

use crate::config::RelayConfig;
use crate::connection::handle_connection;
use crate::directory::Directory;
use crate::error::RelayError;
use crate::router::Router;

/// Shared state for the relay server.
pub struct ServerState {
    /// Routing table from source id to connection handle.
    pub router: Router,
    /// Registrations, matcher, sessions, and pending connects.
    pub directory: Mutex<Directory>,
    /// Runtime configuration.
    pub config: RelayConfig,
    /// Envelope key material; `None` when security is disabled.
    pub keys: Option<KeyMaterial>,
    /// Source id the relay authors responses with.
    pub relay_id: String,
    /// Message-id counter for relay-authored messages.
    pub relay_msg_ids: MessageIdCounter,
}

impl ServerState {
    /// Builds server state from a validated configuration.
    #[must_use]
    pub fn new(config: RelayConfig) -> Self {
        let keys = if config.security_enabled {
            config.shared_secret.as_deref().map(KeyMaterial::new)
        } else {
            None
        };
        Self {
            router: Router::new(),
            directory: Mutex::new(Directory::new()),
            config,
            keys,
            relay_id: generate_source_id("relay"),
            relay_msg_ids: MessageIdCounter::new(),
        }
    }
}

/// Runs the plain-TCP accept loop.
///
/// # Errors
///
/// Returns an error if the accept loop encounters an I/O failure.
pub async fn run(listener: TcpListener, state: Arc<ServerState>) -> Result<(), RelayError> {
    let local_addr = listener.local_addr().map_err(RelayError::Io)?;
    info!("relay listening on {}", local_addr);

    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                if state.router.len() >= state.config.max_conns {
                    warn!("max connections reached, rejecting {}", addr);
                    drop(stream);
                    continue;
                }
                let state = Arc::clone(&state);
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, addr, state).await {
                        tracing::debug!("connection from {} closed: {}", addr, e);
                    }
                });
            }
            Err(e) => {
                error!("failed to accept connection: {}", e);
            }
        }
    }
}

/// Runs the accept loop with TLS termination.
///
/// # Errors
///
/// Returns an error if the accept loop encounters an I/O failure.
/// Individual handshake failures close only that connection.
pub async fn run_tls(
    listener: TcpListener,
    acceptor: TlsAcceptor,
    state: Arc<ServerState>,
) -> Result<(), RelayError> {
    let local_addr = listener.local_addr().map_err(RelayError::Io)?;
    info!("relay listening on {} (tls)", local_addr);

    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                if state.router.len() >= state.config.max_conns {
                    warn!("max connections reached, rejecting {}", addr);
                    drop(stream);
                    continue;
                }
                let state = Arc::clone(&state);
                let acceptor = acceptor.clone();
                tokio::spawn(async move {
                    let tls_stream = match acceptor.accept(stream).await {
                        Ok(s) => s,
                        Err(e) => {
                            tracing::debug!("tls handshake with {} failed: {}", addr, e);
                            return;
                        }
                    };
                    if let Err(e) = handle_connection(tls_stream, addr, state).await {
                        tracing::debug!("connection from {} closed: {}", addr, e);
                    }
                });
            }
            Err(e) => {
                error!("failed to accept connection: {}", e);
            }
        }
    }
}
