//! Pure shape validation for parsed SWAP messages.
//!
//! Validation runs in two passes: envelope coherence first, then either
//! the kind-specific plaintext fields or their sanctioned absence when
//! the `security` block carries ciphertext. No side effects, no I/O.

use serde_json::{Map, Value};

use crate::envelope::{ALG_NONE, ENC_AES_GCM, MAC_HMAC_SHA256};
use crate::types::{MESSAGE_KINDS, MIN_SOURCE_ID_LEN, PROTOCOL_VERSION};

/// Outcome of shape validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Validation {
    /// True when no constraint was violated.
    pub valid: bool,
    /// Human-readable descriptions of every violation found.
    pub errors: Vec<String>,
}

impl Validation {
    fn from_errors(errors: Vec<String>) -> Self {
        Self {
            valid: errors.is_empty(),
            errors,
        }
    }
}

/// Validates the envelope and kind-specific shape of a parsed message.
#[must_use]
pub fn validate_shape(msg: &Value) -> Validation {
    let mut errors = Vec::new();

    let Some(obj) = msg.as_object() else {
        return Validation::from_errors(vec!["message is not a JSON object".to_string()]);
    };

    match obj.get("version").and_then(Value::as_u64) {
        Some(v) if v == PROTOCOL_VERSION => {}
        _ => errors.push("version must be 1".to_string()),
    }

    let source_id = obj.get("source_id").and_then(Value::as_str);
    match source_id {
        Some(s) if s.len() >= MIN_SOURCE_ID_LEN => {}
        Some(_) => errors.push(format!(
            "source_id must be at least {MIN_SOURCE_ID_LEN} characters"
        )),
        None => errors.push("source_id must be a string".to_string()),
    }

    match obj.get("message_id") {
        Some(v) if v.as_u64().is_some_and(|n| n > 0) => {}
        _ => errors.push("message_id must be a positive integer".to_string()),
    }

    let Some(kind) = obj.get("message_type").and_then(Value::as_str) else {
        errors.push("message_type must be a string".to_string());
        return Validation::from_errors(errors);
    };
    if !MESSAGE_KINDS.contains(&kind) {
        errors.push(format!("unknown message_type `{kind}`"));
        return Validation::from_errors(errors);
    }

    let encrypted = match obj.get("security") {
        Some(sec) => check_envelope(sec, &mut errors),
        None => false,
    };

    if encrypted {
        // Payload fields are absorbed into ciphertext; only base fields
        // may remain at the top level.
        for key in obj.keys() {
            if !is_base_field(key) {
                errors.push(format!(
                    "field `{key}` must be absent when the payload is encrypted"
                ));
            }
        }
    } else {
        check_kind_fields(kind, obj, source_id, &mut errors);
        if kind != "response" && kind != "application" {
            for key in obj.keys() {
                if !field_allowed(kind, key) {
                    errors.push(format!("unknown field `{key}`"));
                }
            }
        }
    }

    Validation::from_errors(errors)
}

fn is_base_field(key: &str) -> bool {
    matches!(
        key,
        "version" | "source_id" | "message_id" | "message_type" | "security"
    )
}

/// Checks envelope coherence; returns whether it carries ciphertext.
fn check_envelope(sec: &Value, errors: &mut Vec<String>) -> bool {
    let Some(sec) = sec.as_object() else {
        errors.push("security must be an object".to_string());
        return false;
    };

    let enc = sec.get("enc").and_then(Value::as_str);
    let mac = sec.get("mac").and_then(Value::as_str);
    match enc {
        Some(ENC_AES_GCM | ALG_NONE) => {}
        _ => errors.push("security.enc must be `AES-GCM` or `none`".to_string()),
    }
    match mac {
        Some(MAC_HMAC_SHA256 | ALG_NONE) => {}
        _ => errors.push("security.mac must be `HMAC-SHA256` or `none`".to_string()),
    }
    if enc == Some(ALG_NONE) && mac == Some(ALG_NONE) {
        errors.push("security must sign, encrypt, or both".to_string());
    }

    let has_ciphertext = sec.get("ciphertext").is_some();
    let has_iv = sec.get("iv").is_some();
    if enc == Some(ENC_AES_GCM) {
        if !sec.get("ciphertext").is_some_and(Value::is_string) {
            errors.push("security.ciphertext must be a base64 string".to_string());
        }
        if !sec.get("iv").is_some_and(Value::is_string) {
            errors.push("security.iv must be a base64 string".to_string());
        }
    } else {
        if has_ciphertext {
            errors.push("security.ciphertext requires enc `AES-GCM`".to_string());
        }
        if has_iv {
            errors.push("security.iv requires enc `AES-GCM`".to_string());
        }
    }
    if mac == Some(MAC_HMAC_SHA256) {
        if !sec.get("signature").is_some_and(Value::is_string) {
            errors.push("security.signature must be a base64 string".to_string());
        }
    } else if sec.get("signature").is_some() {
        errors.push("security.signature requires mac `HMAC-SHA256`".to_string());
    }

    enc == Some(ENC_AES_GCM) && has_ciphertext
}

fn require_string(obj: &Map<String, Value>, field: &str, errors: &mut Vec<String>) {
    if !obj.get(field).is_some_and(Value::is_string) {
        errors.push(format!("{field} must be a string"));
    }
}

fn require_target(obj: &Map<String, Value>, source_id: Option<&str>, errors: &mut Vec<String>) {
    match obj.get("target").and_then(Value::as_str) {
        Some(t) if t.len() >= MIN_SOURCE_ID_LEN => {
            if source_id == Some(t) {
                errors.push("target must not equal source_id".to_string());
            }
        }
        Some(_) => errors.push(format!(
            "target must be at least {MIN_SOURCE_ID_LEN} characters"
        )),
        None => errors.push("target must be a string".to_string()),
    }
}

fn require_criteria(obj: &Map<String, Value>, errors: &mut Vec<String>) {
    let Some(items) = obj.get("criteria").and_then(Value::as_array) else {
        errors.push("criteria must be an array".to_string());
        return;
    };
    for (i, item) in items.iter().enumerate() {
        let Some(entry) = item.as_object() else {
            errors.push(format!("criteria[{i}] must be an object"));
            continue;
        };
        if !entry.get("type").is_some_and(Value::is_string) {
            errors.push(format!("criteria[{i}].type must be a string"));
        }
        if !entry.contains_key("value") {
            errors.push(format!("criteria[{i}].value is required"));
        }
    }
}

fn check_kind_fields(
    kind: &str,
    obj: &Map<String, Value>,
    source_id: Option<&str>,
    errors: &mut Vec<String>,
) {
    match kind {
        "register" => {
            require_criteria(obj, errors);
            if let Some(caps) = obj.get("capabilities") {
                check_capabilities(caps, errors);
            }
        }
        "response" => {
            if !obj.get("response_to").is_some_and(|v| v.as_u64().is_some()) {
                errors.push("response_to must be a non-negative integer".to_string());
            }
            if !obj.get("status").is_some_and(|v| v.as_u64().is_some()) {
                errors.push("status must be an integer".to_string());
            }
            require_string(obj, "reason", errors);
            if let Some(err) = obj.get("error") {
                if !err.is_object() {
                    errors.push("error must be an object".to_string());
                }
            }
        }
        "connect" => {
            require_string(obj, "offer", errors);
            require_criteria(obj, errors);
        }
        "accept" => {
            require_target(obj, source_id, errors);
            require_string(obj, "answer", errors);
        }
        "reject" => {
            require_target(obj, source_id, errors);
            require_string(obj, "reason", errors);
        }
        "update" => {
            require_target(obj, source_id, errors);
            require_string(obj, "sdp", errors);
        }
        "close" => {
            require_target(obj, source_id, errors);
        }
        "application" => {
            require_target(obj, source_id, errors);
            require_string(obj, "type", errors);
            if !obj.contains_key("value") {
                errors.push("value is required".to_string());
            }
        }
        _ => {}
    }
}

fn check_capabilities(caps: &Value, errors: &mut Vec<String>) {
    let Some(caps) = caps.as_object() else {
        errors.push("capabilities must be an object".to_string());
        return;
    };
    let Some(security) = caps.get("security") else {
        return;
    };
    let Some(security) = security.as_object() else {
        errors.push("capabilities.security must be an object".to_string());
        return;
    };
    for flag in ["integrity", "encryption"] {
        if let Some(v) = security.get(flag) {
            if !v.is_boolean() {
                errors.push(format!("capabilities.security.{flag} must be a boolean"));
            }
        }
    }
}

fn field_allowed(kind: &str, key: &str) -> bool {
    if is_base_field(key) {
        return true;
    }
    match kind {
        "register" => matches!(key, "criteria" | "capabilities"),
        "connect" => matches!(key, "offer" | "criteria"),
        "accept" => matches!(key, "target" | "answer"),
        "reject" => matches!(key, "target" | "reason"),
        "update" => matches!(key, "target" | "sdp"),
        "close" => key == "target",
        // response and application are extensible; not reached here.
        _ => true,
    }
}
