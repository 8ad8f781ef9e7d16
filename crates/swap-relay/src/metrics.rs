use axum::extract::State;
use axum::{http::StatusCode, response::Json, routing::get, Router};
use metrics_exporter_prometheus::PrometheusBuilder;
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::{Arc, PoisonError};

use crate::server::ServerState;

/// Health check response.
#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    #[serde(rename = "registeredEndpoints")]
    registered_endpoints: usize,
    #[serde(rename = "activeSessions")]
    active_sessions: usize,
}

/// Starts the HTTP sidecar serving `/health` and `/metrics`.
///
/// # Errors
///
/// Returns an error if installing the Prometheus recorder or binding the
/// listener fails.
pub async fn start_health_server(
    addr: SocketAddr,
    state: Arc<ServerState>,
) -> anyhow::Result<()> {
    let handle = PrometheusBuilder::new().install_recorder()?;

    let app = Router::new()
        .route(
            "/metrics",
            get(move || {
                let h = handle.clone();
                async move { h.render() }
            }),
        )
        .route("/health", get(health_handler))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("health server listening on {}", addr);
    axum::serve(listener, app).await?;
    Ok(())
}

/// Health handler — reports registration and session counts.
async fn health_handler(
    State(state): State<Arc<ServerState>>,
) -> (StatusCode, Json<HealthResponse>) {
    let (registered, sessions) = {
        let dir = state
            .directory
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        (dir.registered_count(), dir.sessions.len())
    };
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "ok",
            registered_endpoints: registered,
            active_sessions: sessions,
        }),
    )
}

/// Connection and session gauges.
pub mod gauges {
    /// Increment the active connections gauge.
    pub fn inc_connections_active() {
        metrics::gauge!("swap_connections_active").increment(1.0);
    }

    /// Decrement the active connections gauge.
    pub fn dec_connections_active() {
        metrics::gauge!("swap_connections_active").decrement(1.0);
    }

    /// Set the active sessions gauge to the current table size.
    pub fn set_sessions_active(count: usize) {
        #[allow(clippy::cast_precision_loss)]
        metrics::gauge!("swap_sessions_active").set(count as f64);
    }
}

/// Event counters.
pub mod counters {
    /// Increment the relayed-messages counter.
    pub fn messages_relayed_total() {
        metrics::counter!("swap_messages_relayed_total").increment(1);
    }

    /// Increment the dropped-messages counter with the given reason label.
    pub fn messages_dropped_total(reason: &'static str) {
        metrics::counter!("swap_messages_dropped_total", "reason" => reason).increment(1);
    }

    /// Increment the error counter with the given taxonomy label.
    pub fn errors_total(kind: &'static str) {
        metrics::counter!("swap_errors_total", "kind" => kind).increment(1);
    }
}

/// Latency histograms.
pub mod histograms {
    /// Record a dispatch latency observation in seconds.
    pub fn dispatch_latency_seconds(value: f64) {
        metrics::histogram!("swap_dispatch_latency_seconds").record(value);
    }
}
