use serde_json::Value;

/// Typed events produced by the inbound demultiplexer.
///
/// Subscribe with [`crate::SwapClient::subscribe`]; every subscriber
/// receives every event.
#[derive(Debug, Clone)]
pub enum SwapEvent {
    /// An incoming offer from a matched peer.
    Connect {
        /// Opaque SDP offer body.
        offer: String,
        /// The offering endpoint.
        source_id: String,
    },
    /// The peer accepted our offer.
    Accept {
        /// Opaque SDP answer body.
        answer: String,
        /// The accepting endpoint.
        source_id: String,
    },
    /// The peer declined our offer.
    Reject {
        /// Human-readable reason.
        reason: String,
        /// The rejecting endpoint.
        source_id: String,
    },
    /// An SDP control update within a session.
    Update {
        /// Opaque SDP body.
        sdp: String,
        /// The updating endpoint.
        source_id: String,
    },
    /// The session peer closed, or the relay reported its disconnect.
    Close {
        /// The closing endpoint.
        source_id: String,
    },
    /// An application-defined payload.
    Application {
        /// Application-defined type label.
        kind: String,
        /// Application-defined value.
        value: Value,
        /// The sending endpoint.
        source_id: String,
    },
    /// A local protocol or transport error.
    Error {
        /// Human-readable description.
        detail: String,
    },
}
