//! JSEP-style per-client signaling state machine.
//!
//! Transitions form a partial function of (state, event); undefined
//! pairs leave the state unchanged. Outbound sends are gated by state so
//! a disallowed send fails locally without touching the transport.

/// Signaling states of a client endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SignalingState {
    /// No offer in flight and no session.
    #[default]
    Idle,
    /// An offer has been sent or received; awaiting accept or reject.
    Connecting,
    /// A session is established.
    Connected,
    /// A close has been issued; awaiting completion.
    Closing,
}

/// Events driving state transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateEvent {
    /// An offer was sent.
    Connect,
    /// An offer arrived from a peer.
    AcceptIncoming,
    /// The offer was accepted (sent or received).
    Accept,
    /// The offer was rejected (sent or received).
    Reject,
    /// An SDP update within the session.
    Update,
    /// A close was issued or received.
    Close,
    /// The close completed.
    Closed,
}

/// The transition function. Returns `None` for undefined pairs.
#[must_use]
pub fn apply(state: SignalingState, event: StateEvent) -> Option<SignalingState> {
    use SignalingState::{Closing, Connected, Connecting, Idle};
    use StateEvent::{Accept, AcceptIncoming, Close, Closed, Connect, Reject, Update};

    match (state, event) {
        (Idle, Connect | AcceptIncoming) => Some(Connecting),
        (Connecting, Accept) => Some(Connected),
        (Connecting, Reject) => Some(Idle),
        (Connected, Update) => Some(Connected),
        (Connected, Close) => Some(Closing),
        (Closing, Closed) => Some(Idle),
        _ => None,
    }
}

/// Whether the given message kind may be sent from the given state.
#[must_use]
pub fn allows_send(state: SignalingState, kind: &str) -> bool {
    match state {
        SignalingState::Idle => matches!(kind, "register" | "connect"),
        SignalingState::Connecting => matches!(
            kind,
            "accept" | "reject" | "update" | "close" | "application" | "response"
        ),
        SignalingState::Connected => {
            matches!(kind, "update" | "close" | "application" | "response")
        }
        SignalingState::Closing => kind == "response",
    }
}
