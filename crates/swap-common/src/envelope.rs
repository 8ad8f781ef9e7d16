//! Hop-by-hop security envelope: HMAC-SHA256 integrity and AES-256-GCM
//! payload confidentiality, negotiated per endpoint capability.
//!
//! Key derivation follows the SWAP v1 profile: the HMAC key is the raw
//! UTF-8 shared secret; the AES key is PBKDF2-SHA256 over the secret with
//! salt `"swap-v1:" + source_id`, 100 000 iterations, 256-bit output.
//! Keys are derived lazily on first use and cached per source.

use aes_gcm::aead::Aead;
use aes_gcm::{Aes256Gcm, Key, KeyInit, Nonce};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use hmac::{Hmac, Mac};
use pbkdf2::pbkdf2_hmac;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::Sha256;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use thiserror::Error;

use crate::canonical::canonical_json;
use crate::message::SecurityCaps;

type HmacSha256 = Hmac<Sha256>;

/// AES-GCM algorithm label on the wire.
pub const ENC_AES_GCM: &str = "AES-GCM";
/// HMAC-SHA256 algorithm label on the wire.
pub const MAC_HMAC_SHA256: &str = "HMAC-SHA256";
/// Label for an absent algorithm.
pub const ALG_NONE: &str = "none";

/// PBKDF2 iteration count for AES key derivation.
pub const PBKDF2_ITERATIONS: u32 = 100_000;

const KDF_SALT_PREFIX: &str = "swap-v1:";
const IV_LEN: usize = 12;

/// Envelope fields carried under the `security` key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityEnvelope {
    /// Payload encryption algorithm: `AES-GCM` or `none`.
    pub enc: String,
    /// Integrity algorithm: `HMAC-SHA256` or `none`.
    pub mac: String,
    /// Base64 AES-GCM ciphertext of the payload fields.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ciphertext: Option<String>,
    /// Base64 96-bit initialization vector.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iv: Option<String>,
    /// Base64 HMAC tag over the canonical form.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

/// Errors from envelope pack and unpack.
#[derive(Debug, Error)]
pub enum EnvelopeError {
    /// The message is not a JSON object.
    #[error("message is not a JSON object")]
    NotAnObject,
    /// A required field is absent.
    #[error("missing field `{0}`")]
    MissingField(&'static str),
    /// The `security` block does not match the envelope shape.
    #[error("malformed security envelope")]
    BadEnvelope,
    /// A base64 field failed to decode.
    #[error("invalid base64 in `{0}`")]
    BadBase64(&'static str),
    /// The IV is not 96 bits.
    #[error("invalid IV length {0}")]
    BadIvLength(usize),
    /// HMAC verification failed.
    #[error("signature verification failed")]
    BadSignature,
    /// AES-GCM encryption failed.
    #[error("payload encryption failed")]
    EncryptFailed,
    /// AES-GCM decryption failed.
    #[error("payload decryption failed")]
    DecryptFailed,
    /// The decrypted payload is not a JSON object.
    #[error("decrypted payload is not a JSON object")]
    BadPayload,
    /// The envelope names an algorithm this hop does not support.
    #[error("unsupported algorithm `{0}`")]
    UnsupportedAlgorithm(String),
}

fn is_base_field(key: &str) -> bool {
    matches!(
        key,
        "version" | "source_id" | "message_id" | "message_type" | "security"
    )
}

/// Shared-secret key material with a per-source AES key cache.
#[derive(Debug)]
pub struct KeyMaterial {
    secret: Vec<u8>,
    aes_keys: Mutex<HashMap<String, [u8; 32]>>,
}

impl KeyMaterial {
    /// Imports a shared secret. The HMAC key is the secret's raw UTF-8
    /// bytes; AES keys are derived per source on first use.
    #[must_use]
    pub fn new(shared_secret: &str) -> Self {
        Self {
            secret: shared_secret.as_bytes().to_vec(),
            aes_keys: Mutex::new(HashMap::new()),
        }
    }

    fn aes_key(&self, source_id: &str) -> [u8; 32] {
        let mut cache = self.aes_keys.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(key) = cache.get(source_id) {
            return *key;
        }
        let salt = format!("{KDF_SALT_PREFIX}{source_id}");
        let mut key = [0u8; 32];
        pbkdf2_hmac::<Sha256>(&self.secret, salt.as_bytes(), PBKDF2_ITERATIONS, &mut key);
        cache.insert(source_id.to_string(), key);
        key
    }

    fn hmac(&self) -> HmacSha256 {
        <HmacSha256 as Mac>::new_from_slice(&self.secret).expect("HMAC accepts any key length")
    }

    /// Applies the envelope to a plaintext wire object in place.
    ///
    /// Encryption moves every non-base field into AES-GCM ciphertext
    /// under a fresh IV; signing then computes HMAC over the canonical
    /// form with an empty `security.signature` placeholder and fills in
    /// the tag. A no-op when `caps` requests neither protection.
    ///
    /// # Errors
    ///
    /// Fails when the value is not an object, lacks `source_id`, or the
    /// cipher rejects the payload.
    pub fn protect(&self, msg: &mut Value, caps: SecurityCaps) -> Result<(), EnvelopeError> {
        if !caps.any() {
            return Ok(());
        }
        let source_id = msg
            .get("source_id")
            .and_then(Value::as_str)
            .ok_or(EnvelopeError::MissingField("source_id"))?
            .to_string();

        let mut envelope = SecurityEnvelope {
            enc: ALG_NONE.to_string(),
            mac: ALG_NONE.to_string(),
            ciphertext: None,
            iv: None,
            signature: None,
        };

        if caps.encryption {
            let obj = msg.as_object_mut().ok_or(EnvelopeError::NotAnObject)?;
            let payload_keys: Vec<String> = obj
                .keys()
                .filter(|k| !is_base_field(k))
                .cloned()
                .collect();
            let mut payload = Map::new();
            for key in payload_keys {
                if let Some(value) = obj.remove(&key) {
                    payload.insert(key, value);
                }
            }
            let plaintext =
                serde_json::to_vec(&Value::Object(payload)).map_err(|_| EnvelopeError::BadPayload)?;
            let key = self.aes_key(&source_id);
            let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key));
            let mut iv = [0u8; IV_LEN];
            OsRng.fill_bytes(&mut iv);
            let ciphertext = cipher
                .encrypt(Nonce::from_slice(&iv), plaintext.as_slice())
                .map_err(|_| EnvelopeError::EncryptFailed)?;
            envelope.enc = ENC_AES_GCM.to_string();
            envelope.ciphertext = Some(BASE64.encode(ciphertext));
            envelope.iv = Some(BASE64.encode(iv));
        }

        if caps.integrity {
            envelope.mac = MAC_HMAC_SHA256.to_string();
            envelope.signature = Some(String::new());
        }
        msg.as_object_mut()
            .ok_or(EnvelopeError::NotAnObject)?
            .insert(
                "security".to_string(),
                serde_json::to_value(&envelope).map_err(|_| EnvelopeError::BadEnvelope)?,
            );

        if caps.integrity {
            let mut mac = self.hmac();
            mac.update(canonical_json(msg).as_bytes());
            let tag = BASE64.encode(mac.finalize().into_bytes());
            msg["security"]["signature"] = Value::String(tag);
        }
        Ok(())
    }

    /// Verifies and decrypts a wire object in place, restoring the
    /// plaintext payload fields and stripping the `security` block.
    ///
    /// A no-op when no `security` key is present.
    ///
    /// # Errors
    ///
    /// [`EnvelopeError::BadSignature`] on a failed constant-time HMAC
    /// comparison; [`EnvelopeError::DecryptFailed`] and friends on any
    /// decryption or decoding failure.
    pub fn unprotect(&self, msg: &mut Value) -> Result<(), EnvelopeError> {
        let envelope: SecurityEnvelope = {
            let obj = msg.as_object().ok_or(EnvelopeError::NotAnObject)?;
            let Some(sec) = obj.get("security") else {
                return Ok(());
            };
            serde_json::from_value(sec.clone()).map_err(|_| EnvelopeError::BadEnvelope)?
        };

        match envelope.mac.as_str() {
            MAC_HMAC_SHA256 => {
                let sig_b64 = envelope
                    .signature
                    .as_deref()
                    .ok_or(EnvelopeError::MissingField("signature"))?;
                let sig = BASE64
                    .decode(sig_b64)
                    .map_err(|_| EnvelopeError::BadBase64("signature"))?;
                let mut check = msg.clone();
                check["security"]["signature"] = Value::String(String::new());
                let mut mac = self.hmac();
                mac.update(canonical_json(&check).as_bytes());
                mac.verify_slice(&sig)
                    .map_err(|_| EnvelopeError::BadSignature)?;
            }
            ALG_NONE => {}
            other => return Err(EnvelopeError::UnsupportedAlgorithm(other.to_string())),
        }

        match envelope.enc.as_str() {
            ENC_AES_GCM => {
                let ct_b64 = envelope
                    .ciphertext
                    .as_deref()
                    .ok_or(EnvelopeError::MissingField("ciphertext"))?;
                let iv_b64 = envelope
                    .iv
                    .as_deref()
                    .ok_or(EnvelopeError::MissingField("iv"))?;
                let ciphertext = BASE64
                    .decode(ct_b64)
                    .map_err(|_| EnvelopeError::BadBase64("ciphertext"))?;
                let iv = BASE64
                    .decode(iv_b64)
                    .map_err(|_| EnvelopeError::BadBase64("iv"))?;
                if iv.len() != IV_LEN {
                    return Err(EnvelopeError::BadIvLength(iv.len()));
                }
                let source_id = msg
                    .get("source_id")
                    .and_then(Value::as_str)
                    .ok_or(EnvelopeError::MissingField("source_id"))?
                    .to_string();
                let key = self.aes_key(&source_id);
                let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key));
                let plaintext = cipher
                    .decrypt(Nonce::from_slice(&iv), ciphertext.as_slice())
                    .map_err(|_| EnvelopeError::DecryptFailed)?;
                let payload: Value =
                    serde_json::from_slice(&plaintext).map_err(|_| EnvelopeError::BadPayload)?;
                let Value::Object(fields) = payload else {
                    return Err(EnvelopeError::BadPayload);
                };
                let obj = msg.as_object_mut().ok_or(EnvelopeError::NotAnObject)?;
                for (key, value) in fields {
                    if !is_base_field(&key) {
                        obj.insert(key, value);
                    }
                }
            }
            ALG_NONE => {}
            other => return Err(EnvelopeError::UnsupportedAlgorithm(other.to_string())),
        }

        if let Some(obj) = msg.as_object_mut() {
            obj.remove("security");
        }
        Ok(())
    }
}
