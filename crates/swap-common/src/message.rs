//! SWAP message model: the shared envelope and the eight message kinds.
//!
//! Wire messages are JSON objects. Incoming bytes are handled as
//! [`serde_json::Value`] until the security envelope is unpacked and the
//! shape validated; the factory here then builds the typed value.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::envelope::SecurityEnvelope;
use crate::problem::{ErrorKind, ProblemDetails};
use crate::types::{MESSAGE_KINDS, PROTOCOL_VERSION};

/// A capability or selector advertised by an endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Criterion {
    /// Descriptive tag, e.g. `service` or `qos`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Opaque value; only equality of its canonical JSON matters.
    pub value: Value,
}

impl Criterion {
    /// Builds a criterion from a tag and any JSON-convertible value.
    pub fn new(kind: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            kind: kind.into(),
            value: value.into(),
        }
    }
}

/// Security envelope support advertised in `register`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityCaps {
    /// The endpoint accepts HMAC-signed messages.
    #[serde(default)]
    pub integrity: bool,
    /// The endpoint accepts AES-GCM encrypted payloads.
    #[serde(default)]
    pub encryption: bool,
}

impl SecurityCaps {
    /// True when at least one protection is supported.
    #[must_use]
    pub const fn any(self) -> bool {
        self.integrity || self.encryption
    }
}

/// Endpoint capabilities advertised in `register`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    /// Hop-by-hop security envelope support.
    #[serde(default)]
    pub security: SecurityCaps,
}

/// Kind tag and payload fields of a message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "message_type", rename_all = "lowercase")]
pub enum Body {
    /// Advertise criteria and capabilities to the relay.
    Register {
        /// Ordered criteria set describing this endpoint.
        criteria: Vec<Criterion>,
        /// Optional capability advertisement.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        capabilities: Option<Capabilities>,
    },
    /// Answer to an earlier request, correlated by message id.
    Response {
        /// The `message_id` being answered; 0 when no request existed.
        response_to: u64,
        /// HTTP-style status code.
        status: u16,
        /// Human-readable outcome.
        reason: String,
        /// Problem details accompanying a non-2xx status.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<ProblemDetails>,
    },
    /// Request a peer match and deliver an SDP offer.
    Connect {
        /// Opaque SDP offer body.
        offer: String,
        /// Criteria the matched peer must satisfy.
        criteria: Vec<Criterion>,
    },
    /// Accept an offer with an SDP answer.
    Accept {
        /// Source id of the offering endpoint.
        target: String,
        /// Opaque SDP answer body.
        answer: String,
    },
    /// Decline an offer.
    Reject {
        /// Source id of the offering endpoint.
        target: String,
        /// Human-readable reason.
        reason: String,
    },
    /// Further SDP control update within a session.
    Update {
        /// Source id of the session peer.
        target: String,
        /// Opaque SDP body.
        sdp: String,
    },
    /// Tear down a session.
    Close {
        /// Source id of the session peer.
        target: String,
    },
    /// Application-defined payload relayed verbatim.
    Application {
        /// Source id of the session peer.
        target: String,
        /// Application-defined type label.
        #[serde(rename = "type")]
        kind: String,
        /// Application-defined value.
        value: Value,
    },
}

impl Body {
    /// The `message_type` literal for this body.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Register { .. } => "register",
            Self::Response { .. } => "response",
            Self::Connect { .. } => "connect",
            Self::Accept { .. } => "accept",
            Self::Reject { .. } => "reject",
            Self::Update { .. } => "update",
            Self::Close { .. } => "close",
            Self::Application { .. } => "application",
        }
    }

    /// The `target` field, for kinds that carry one.
    #[must_use]
    pub fn target(&self) -> Option<&str> {
        match self {
            Self::Accept { target, .. }
            | Self::Reject { target, .. }
            | Self::Update { target, .. }
            | Self::Close { target }
            | Self::Application { target, .. } => Some(target),
            _ => None,
        }
    }
}

/// Error building a typed message from a parsed object.
#[derive(Debug, Error)]
pub enum MessageError {
    /// `message_type` is missing or not a string.
    #[error("missing message_type")]
    MissingType,
    /// `message_type` is not one of the eight known kinds.
    #[error("unknown message_type `{0}`")]
    UnknownType(String),
    /// The object does not match the kind's shape.
    #[error("malformed message: {0}")]
    Malformed(#[from] serde_json::Error),
}

impl MessageError {
    /// The relay error kind this failure maps to.
    #[must_use]
    pub const fn error_kind(&self) -> ErrorKind {
        match self {
            Self::UnknownType(_) => ErrorKind::MessageUnknown,
            Self::MissingType | Self::Malformed(_) => ErrorKind::MessageMalformatted,
        }
    }
}

/// A complete wire message: envelope fields plus kind payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Protocol version; always 1 on the wire.
    pub version: u64,
    /// Sender identity, length ≥ 10.
    pub source_id: String,
    /// Strictly increasing per-source id; positive.
    pub message_id: u64,
    /// Kind tag and payload, flattened into the object.
    #[serde(flatten)]
    pub body: Body,
    /// Hop-by-hop security envelope, when negotiated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security: Option<SecurityEnvelope>,
}

impl Message {
    /// Builds a message with the current protocol version and no envelope.
    pub fn new(source_id: impl Into<String>, message_id: u64, body: Body) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            source_id: source_id.into(),
            message_id,
            body,
            security: None,
        }
    }

    /// Builds a `register` message.
    pub fn register(
        source_id: impl Into<String>,
        message_id: u64,
        criteria: Vec<Criterion>,
        capabilities: Option<Capabilities>,
    ) -> Self {
        Self::new(
            source_id,
            message_id,
            Body::Register {
                criteria,
                capabilities,
            },
        )
    }

    /// Builds a `response` message.
    pub fn response(
        source_id: impl Into<String>,
        message_id: u64,
        response_to: u64,
        status: u16,
        reason: impl Into<String>,
        error: Option<ProblemDetails>,
    ) -> Self {
        Self::new(
            source_id,
            message_id,
            Body::Response {
                response_to,
                status,
                reason: reason.into(),
                error,
            },
        )
    }

    /// Builds a `connect` message.
    pub fn connect(
        source_id: impl Into<String>,
        message_id: u64,
        offer: impl Into<String>,
        criteria: Vec<Criterion>,
    ) -> Self {
        Self::new(
            source_id,
            message_id,
            Body::Connect {
                offer: offer.into(),
                criteria,
            },
        )
    }

    /// Builds an `accept` message.
    pub fn accept(
        source_id: impl Into<String>,
        message_id: u64,
        target: impl Into<String>,
        answer: impl Into<String>,
    ) -> Self {
        Self::new(
            source_id,
            message_id,
            Body::Accept {
                target: target.into(),
                answer: answer.into(),
            },
        )
    }

    /// Builds a `reject` message.
    pub fn reject(
        source_id: impl Into<String>,
        message_id: u64,
        target: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::new(
            source_id,
            message_id,
            Body::Reject {
                target: target.into(),
                reason: reason.into(),
            },
        )
    }

    /// Builds an `update` message.
    pub fn update(
        source_id: impl Into<String>,
        message_id: u64,
        target: impl Into<String>,
        sdp: impl Into<String>,
    ) -> Self {
        Self::new(
            source_id,
            message_id,
            Body::Update {
                target: target.into(),
                sdp: sdp.into(),
            },
        )
    }

    /// Builds a `close` message.
    pub fn close(
        source_id: impl Into<String>,
        message_id: u64,
        target: impl Into<String>,
    ) -> Self {
        Self::new(
            source_id,
            message_id,
            Body::Close {
                target: target.into(),
            },
        )
    }

    /// Builds an `application` message.
    pub fn application(
        source_id: impl Into<String>,
        message_id: u64,
        target: impl Into<String>,
        kind: impl Into<String>,
        value: Value,
    ) -> Self {
        Self::new(
            source_id,
            message_id,
            Body::Application {
                target: target.into(),
                kind: kind.into(),
                value,
            },
        )
    }

    /// Builds a typed message from a parsed object, switching on
    /// `message_type`.
    ///
    /// # Errors
    ///
    /// [`MessageError::UnknownType`] for a kind outside the eight
    /// literals, [`MessageError::MissingType`] when the tag is absent,
    /// and [`MessageError::Malformed`] when the shape does not match.
    pub fn from_value(value: Value) -> Result<Self, MessageError> {
        let kind = value
            .get("message_type")
            .and_then(Value::as_str)
            .ok_or(MessageError::MissingType)?;
        if !MESSAGE_KINDS.contains(&kind) {
            return Err(MessageError::UnknownType(kind.to_string()));
        }
        Ok(serde_json::from_value(value)?)
    }

    /// Serializes the message to a wire object.
    ///
    /// # Errors
    ///
    /// Propagates the (practically unreachable) serialization failure.
    pub fn to_value(&self) -> serde_json::Result<Value> {
        serde_json::to_value(self)
    }

    /// The `message_type` literal of this message.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        self.body.kind()
    }

    /// The `target` field, for kinds that carry one.
    #[must_use]
    pub fn target(&self) -> Option<&str> {
        self.body.target()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validate::validate_shape;
    use serde_json::json;

    fn sid(tag: &str) -> String {
        format!("{tag}-0123456789abcdef")
    }

    #[test]
    fn register_round_trips_through_wire_object() {
        let msg = Message::register(
            sid("a"),
            1,
            vec![Criterion::new("service", "video-call")],
            Some(Capabilities {
                security: SecurityCaps {
                    integrity: true,
                    encryption: false,
                },
            }),
        );
        let value = msg.to_value().unwrap();
        assert_eq!(value["message_type"], "register");
        assert_eq!(value["version"], 1);
        assert_eq!(value["criteria"][0]["type"], "service");
        let back = Message::from_value(value).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn factory_rejects_unknown_kind() {
        let value = json!({
            "version": 1,
            "source_id": sid("a"),
            "message_id": 1,
            "message_type": "subscribe"
        });
        let err = Message::from_value(value).unwrap_err();
        assert!(matches!(err, MessageError::UnknownType(_)));
        assert_eq!(err.error_kind(), ErrorKind::MessageUnknown);
    }

    #[test]
    fn factory_rejects_missing_kind() {
        let value = json!({"version": 1, "source_id": sid("a"), "message_id": 1});
        assert!(matches!(
            Message::from_value(value),
            Err(MessageError::MissingType)
        ));
    }

    #[test]
    fn every_factory_output_passes_shape_validation() {
        let a = sid("a");
        let b = sid("b");
        let messages = vec![
            Message::register(&a, 1, vec![Criterion::new("service", "x")], None),
            Message::response(&a, 2, 1, 200, "ok", None),
            Message::connect(&a, 3, "v=0..o", vec![Criterion::new("qos", "high")]),
            Message::accept(&a, 4, &b, "v=0..a"),
            Message::reject(&a, 5, &b, "busy"),
            Message::update(&a, 6, &b, "v=0..u"),
            Message::close(&a, 7, &b),
            Message::application(&a, 8, &b, "chat", json!({"text": "hi"})),
        ];
        for msg in messages {
            let value = msg.to_value().unwrap();
            let outcome = validate_shape(&value);
            assert!(outcome.valid, "{}: {:?}", msg.kind(), outcome.errors);
        }
    }

    #[test]
    fn application_value_is_preserved_verbatim() {
        let msg = Message::application(
            sid("a"),
            1,
            sid("b"),
            "telemetry",
            json!({"nested": [1, 2, {"k": null}]}),
        );
        let value = msg.to_value().unwrap();
        assert_eq!(value["value"]["nested"][2]["k"], Value::Null);
        assert_eq!(value["type"], "telemetry");
    }

    #[test]
    fn response_error_field_round_trips() {
        let problem = ErrorKind::TargetUnknown.problem("no endpoint matched");
        let msg = Message::response(sid("relay"), 9, 4, 404, "target unknown", Some(problem));
        let value = msg.to_value().unwrap();
        assert!(value["error"]["type"]
            .as_str()
            .unwrap()
            .ends_with("target_unknown"));
        let back = Message::from_value(value).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn target_accessor_covers_targeted_kinds() {
        let b = sid("b");
        assert_eq!(Message::close(sid("a"), 1, &b).target(), Some(b.as_str()));
        assert_eq!(
            Message::register(sid("a"), 1, vec![], None).target(),
            None
        );
    }
}
