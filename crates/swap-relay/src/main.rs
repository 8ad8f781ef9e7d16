#![forbid(unsafe_code)]

use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use swap_relay::config::{Args, RelayConfig};
use swap_relay::metrics::start_health_server;
use swap_relay::tls::load_tls_acceptor;
use swap_relay::{run, run_tls, ServerState};
use tokio::net::TcpListener;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let args = Args::parse();
    let config: RelayConfig = args.into();

    if let Err(e) = config.validate() {
        anyhow::bail!("configuration error: {}", e);
    }

    let acceptor = if config.use_tls {
        match (&config.tls_cert_file, &config.tls_key_file) {
            (Some(cert), Some(key)) => Some(load_tls_acceptor(cert, key)?),
            _ => anyhow::bail!("USE_TLS requires TLS_CERT_FILE and TLS_KEY_FILE"),
        }
    } else {
        None
    };

    let state = Arc::new(ServerState::new(config.clone()));
    if state.keys.is_some() {
        info!("security envelope enabled");
    } else if config.security_enabled {
        warn!("security requested but no shared secret; envelope disabled");
    }
    info!(relay_id = %state.relay_id, "relay identity generated");

    let listener = TcpListener::bind(config.listen).await?;
    info!("bound to {}", config.listen);

    tokio::spawn({
        let state = Arc::clone(&state);
        async move {
            if let Err(e) = start_health_server(config.health_addr, state).await {
                warn!("health server error: {}", e);
            }
        }
    });

    let serve = async {
        match acceptor {
            Some(acceptor) => run_tls(listener, acceptor, state).await,
            None => run(listener, state).await,
        }
    };

    tokio::select! {
        result = serve => {
            if let Err(e) = result {
                tracing::error!("server error: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("received shutdown signal");
        }
    }

    Ok(())
}
