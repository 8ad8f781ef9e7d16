//! Problem Details error bodies and the predefined SWAP error kinds.

use serde::{Deserialize, Serialize};

/// Structured error body carried in `response` messages (RFC 9457 shape).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProblemDetails {
    /// Stable URL-form identifier of the error kind.
    #[serde(rename = "type")]
    pub kind: String,
    /// Short human-readable summary.
    pub title: String,
    /// HTTP-style status code.
    pub status: u16,
    /// Occurrence-specific explanation.
    pub detail: String,
}

/// Predefined relay error kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// `message_type` is not one of the eight known kinds.
    MessageUnknown,
    /// The message failed framing, envelope, or schema checks.
    MessageMalformatted,
    /// No registered endpoint matched the requested target or criteria.
    TargetUnknown,
    /// A security envelope was presented that this hop cannot accept.
    Unauthorized,
}

impl ErrorKind {
    /// Stable URN identifying this kind on the wire.
    #[must_use]
    pub const fn urn(self) -> &'static str {
        match self {
            Self::MessageUnknown => "urn:3gpp:swap:error:message_unknown",
            Self::MessageMalformatted => "urn:3gpp:swap:error:message_malformatted",
            Self::TargetUnknown => "urn:3gpp:swap:error:target_unknown",
            Self::Unauthorized => "urn:3gpp:swap:error:unauthorized",
        }
    }

    /// Documented status code for this kind.
    #[must_use]
    pub const fn status(self) -> u16 {
        match self {
            Self::MessageUnknown | Self::MessageMalformatted => 400,
            Self::TargetUnknown => 404,
            Self::Unauthorized => 401,
        }
    }

    /// Short title for this kind.
    #[must_use]
    pub const fn title(self) -> &'static str {
        match self {
            Self::MessageUnknown => "unknown message type",
            Self::MessageMalformatted => "malformed message",
            Self::TargetUnknown => "target unknown",
            Self::Unauthorized => "unauthorized",
        }
    }

    /// Builds a problem body with the given detail text.
    pub fn problem(self, detail: impl Into<String>) -> ProblemDetails {
        ProblemDetails {
            kind: self.urn().to_string(),
            title: self.title().to_string(),
            status: self.status(),
            detail: detail.into(),
        }
    }
}
