//! Core type definitions and protocol constants for SWAP v1.

/// Wire protocol version carried in every message.
pub const PROTOCOL_VERSION: u64 = 1;

/// WebSocket subprotocol tag. The relay rejects connections that do not
/// offer it.
pub const SUBPROTOCOL: &str = "3gpp.SWAP.v1";

/// URL path of the signaling endpoint.
pub const SIGNALING_PATH: &str = "/3gpp-swap/v1";

/// Minimum length of a source identifier (and of a `target` field).
pub const MIN_SOURCE_ID_LEN: usize = 10;

/// The eight message kinds, as they appear in `message_type`.
pub const MESSAGE_KINDS: [&str; 8] = [
    "register",
    "response",
    "connect",
    "accept",
    "reject",
    "update",
    "close",
    "application",
];

/// Recognized criterion type tags.
///
/// The matcher treats tags and values opaquely; these constants exist so
/// endpoints agree on spelling.
pub mod criterion_type {
    /// IPv4 address selector.
    pub const IPV4: &str = "ipv4";
    /// IPv6 address selector.
    pub const IPV6: &str = "ipv6";
    /// Fully qualified domain name selector.
    pub const FQDN: &str = "fqdn";
    /// Service name selector.
    pub const SERVICE: &str = "service";
    /// User identity selector.
    pub const USER: &str = "user";
    /// Edge application server selector.
    pub const EAS: &str = "eas";
    /// Application identifier selector.
    pub const APP: &str = "app";
    /// Location selector.
    pub const LOCATION: &str = "location";
    /// Quality-of-service selector.
    pub const QOS: &str = "qos";
    /// Processing capability selector.
    pub const PROCESSING: &str = "processing";
}
