use clap::Parser;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;

/// Parses a boolean flag that also accepts `1`/`0` (environment style).
fn parse_flag(raw: &str) -> Result<bool, String> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" => Ok(true),
        "" | "0" | "false" | "no" => Ok(false),
        other => Err(format!("expected a boolean, got `{other}`")),
    }
}

/// CLI arguments for the relay server.
#[derive(Parser, Debug, Clone)]
#[command(name = "swap-relay")]
#[command(about = "SWAP v1 signaling relay")]
#[command(version)]
pub struct Args {
    /// Port for the signaling endpoint.
    #[arg(long, default_value = "8080", env = "PORT")]
    pub port: u16,
    /// Bind address for the signaling listener.
    #[arg(long, default_value = "0.0.0.0", env = "SWAP_BIND_ADDR")]
    pub bind: IpAddr,
    /// Socket address for the health and metrics endpoint.
    #[arg(long, default_value = "127.0.0.1:9090", env = "SWAP_HEALTH_ADDR")]
    pub health_addr: SocketAddr,
    /// Terminate TLS on the signaling listener.
    #[arg(long, default_value = "false", env = "USE_TLS", value_parser = parse_flag)]
    pub use_tls: bool,
    /// Path to the PEM certificate chain.
    #[arg(long, env = "TLS_CERT_FILE")]
    pub tls_cert_file: Option<PathBuf>,
    /// Path to the PEM private key.
    #[arg(long, env = "TLS_KEY_FILE")]
    pub tls_key_file: Option<PathBuf>,
    /// Path to a PEM CA bundle (accepted for deployment parity).
    #[arg(long, env = "TLS_CA_FILE")]
    pub tls_ca_file: Option<PathBuf>,
    /// Enable the hop-by-hop security envelope.
    #[arg(long, default_value = "false", env = "SWAP_SECURITY_ENABLED", value_parser = parse_flag)]
    pub security_enabled: bool,
    /// Shared secret for envelope key derivation.
    #[arg(long, env = "SWAP_SHARED_SECRET")]
    pub shared_secret: Option<String>,
    /// Maximum total concurrent connections.
    #[arg(long, default_value = "100000", env = "SWAP_MAX_CONNS")]
    pub max_conns: usize,
    /// Maximum WebSocket message size in bytes.
    #[arg(long, default_value = "1048576", env = "SWAP_MAX_MESSAGE_BYTES")]
    pub max_message_bytes: usize,
    /// Interval between WebSocket pings in seconds.
    #[arg(long, default_value = "30", env = "SWAP_PING_INTERVAL")]
    pub ping_interval: u64,
    /// Connection idle timeout in seconds.
    #[arg(long, default_value = "120", env = "SWAP_IDLE_TIMEOUT")]
    pub idle_timeout: u64,
}

/// Runtime configuration derived from [`Args`].
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Socket address of the signaling listener.
    pub listen: SocketAddr,
    /// Socket address for the health and metrics endpoint.
    pub health_addr: SocketAddr,
    /// Terminate TLS on the signaling listener.
    pub use_tls: bool,
    /// Path to the PEM certificate chain.
    pub tls_cert_file: Option<PathBuf>,
    /// Path to the PEM private key.
    pub tls_key_file: Option<PathBuf>,
    /// Enable the hop-by-hop security envelope.
    pub security_enabled: bool,
    /// Shared secret for envelope key derivation.
    pub shared_secret: Option<String>,
    /// Maximum total concurrent connections.
    pub max_conns: usize,
    /// Maximum WebSocket message size in bytes.
    pub max_message_bytes: usize,
    /// Interval between WebSocket pings in seconds.
    pub ping_interval: u64,
    /// Connection idle timeout in seconds.
    pub idle_timeout: u64,
}

impl RelayConfig {
    /// Validates that configuration values are within acceptable bounds.
    ///
    /// # Errors
    ///
    /// Returns a description of the first violated constraint.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_conns == 0 {
            return Err("max_conns must be greater than 0".to_string());
        }
        if self.max_conns > 1_000_000 {
            return Err("max_conns exceeds reasonable limit (1,000,000)".to_string());
        }

        if self.max_message_bytes < 1024 {
            return Err("max_message_bytes must be at least 1024".to_string());
        }
        if self.max_message_bytes > 16 * 1024 * 1024 {
            return Err("max_message_bytes exceeds reasonable limit (16 MiB)".to_string());
        }

        if self.ping_interval == 0 {
            return Err("ping_interval must be greater than 0".to_string());
        }
        if self.ping_interval > 3600 {
            return Err("ping_interval exceeds reasonable limit (3600 seconds)".to_string());
        }

        if self.idle_timeout == 0 {
            return Err("idle_timeout must be greater than 0".to_string());
        }
        if self.idle_timeout > 86_400 {
            return Err("idle_timeout exceeds reasonable limit (86400 seconds / 1 day)".to_string());
        }

        if self.use_tls && (self.tls_cert_file.is_none() || self.tls_key_file.is_none()) {
            return Err("USE_TLS requires TLS_CERT_FILE and TLS_KEY_FILE".to_string());
        }

        if self.security_enabled
            && self
                .shared_secret
                .as_deref()
                .map_or(true, str::is_empty)
        {
            return Err("SWAP_SECURITY_ENABLED requires a nonempty SWAP_SHARED_SECRET".to_string());
        }
        Ok(())
    }
}

impl From<Args> for RelayConfig {
    fn from(args: Args) -> Self {
        Self {
            listen: SocketAddr::new(args.bind, args.port),
            health_addr: args.health_addr,
            use_tls: args.use_tls,
            tls_cert_file: args.tls_cert_file,
            tls_key_file: args.tls_key_file,
            security_enabled: args.security_enabled,
            shared_secret: args.shared_secret,
            max_conns: args.max_conns,
            max_message_bytes: args.max_message_bytes,
            ping_interval: args.ping_interval,
            idle_timeout: args.idle_timeout,
        }
    }
}
