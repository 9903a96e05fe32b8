//! The HMAC signed-invocation scheme.
//!
//! Wire format of a key: `nk_<key_id>.<secret>` where `key_id` is the
//! key's uuid (simple form) and `secret` is 32 bytes of entropy,
//! base64url without padding. The server stores only
//! `sha256(key_id ":" secret)`; the cleartext travels with each signed
//! request and the hash comparison plus the HMAC check both run in
//! constant time.
//!
//! Canonicalization: the signed payload is the compact JSON serialization
//! of the envelope body; an absent body and an explicit JSON null both
//! canonicalize to the literal `null`. The signing message is
//! `payload || "." || decimal(timestamp_seconds)` and the signature is
//! base64(HMAC-SHA256(secret, message)).

use std::sync::Arc;

use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine;
use chrono::Utc;
use hmac::{Hmac, Mac};
use nimbus_core::{PlatformError, PlatformResult};
use nimbus_database::ApiKeyStore;
use nimbus_entities::functions;
use rand::RngCore;
use sha2::{Digest, Sha256};
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

/// Accepted clock skew between caller and platform.
pub const CLOCK_SKEW_SECONDS: i64 = 300;

const KEY_PREFIX: &str = "nk_";
const SECRET_BYTES: usize = 32;

/// Generate a fresh secret: 32 bytes of OS entropy, base64url.
pub fn generate_secret() -> String {
    let mut bytes = [0u8; SECRET_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// The presented form of a key, returned to the caller exactly once.
pub fn format_key(key_id: Uuid, secret: &str) -> String {
    format!("{KEY_PREFIX}{}.{secret}", key_id.simple())
}

/// Split a presented key into its id and cleartext secret.
pub fn parse_key(presented: &str) -> Option<(Uuid, &str)> {
    let rest = presented.strip_prefix(KEY_PREFIX)?;
    let (id, secret) = rest.split_once('.')?;
    let uuid = Uuid::parse_str(id).ok()?;
    if secret.is_empty() {
        return None;
    }
    Some((uuid, secret))
}

/// Salted hash stored for a secret.
pub fn hash_secret(key_id: Uuid, secret: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(key_id.simple().to_string().as_bytes());
    hasher.update(b":");
    hasher.update(secret.as_bytes());
    hex_encode(&hasher.finalize())
}

/// Canonical form of the signed payload.
pub fn canonical_payload(body: &serde_json::Value) -> String {
    serde_json::to_string(body).unwrap_or_else(|_| "null".to_string())
}

fn signing_message(payload: &str, timestamp: i64) -> Vec<u8> {
    let mut message = Vec::with_capacity(payload.len() + 24);
    message.extend_from_slice(payload.as_bytes());
    message.push(b'.');
    message.extend_from_slice(timestamp.to_string().as_bytes());
    message
}

/// Produce the signature a well-behaved client sends.
pub fn sign(secret: &str, payload: &str, timestamp: i64) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("hmac accepts any key length");
    mac.update(&signing_message(payload, timestamp));
    STANDARD.encode(mac.finalize().into_bytes())
}

/// Constant-time verification of a base64 signature.
pub fn verify_signature(secret: &str, payload: &str, timestamp: i64, provided: &str) -> bool {
    let Ok(decoded) = STANDARD.decode(provided) else {
        return false;
    };
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("hmac accepts any key length");
    mac.update(&signing_message(payload, timestamp));
    mac.verify_slice(&decoded).is_ok()
}

/// Constant-time equality for hash strings.
fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.bytes()
        .zip(b.bytes())
        .fold(0u8, |acc, (x, y)| acc | (x ^ y))
        == 0
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// The signed-request headers as received on the wire.
#[derive(Debug, Clone)]
pub struct SignedHeaders {
    pub api_key: String,
    pub signature: String,
    pub timestamp: i64,
}

/// Attached to the request context after verification.
#[derive(Debug, Clone)]
pub struct VerificationRecord {
    /// The key that authorized the call; absent on unsigned functions.
    pub key_id: Option<Uuid>,
    /// False when the function's `skip_signing` bypassed the check.
    pub signed: bool,
}

impl VerificationRecord {
    pub fn unsigned() -> Self {
        Self {
            key_id: None,
            signed: false,
        }
    }
}

/// Verifies `(signature, timestamp, key)` tuples against stored hashes.
pub struct SignatureVerifier {
    keys: Arc<ApiKeyStore>,
}

impl SignatureVerifier {
    pub fn new(keys: Arc<ApiKeyStore>) -> Self {
        Self { keys }
    }

    /// Verify a signed invocation of `function`.
    ///
    /// Functions with `skip_signing` bypass every check but the request
    /// is still marked unsigned so invocation logs reflect it.
    pub async fn verify(
        &self,
        function: &functions::Model,
        headers: Option<&SignedHeaders>,
        body: &serde_json::Value,
    ) -> PlatformResult<VerificationRecord> {
        if function.skip_signing {
            return Ok(VerificationRecord::unsigned());
        }

        let headers = headers.ok_or_else(|| {
            PlatformError::SignatureInvalid("missing signature headers".to_string())
        })?;

        let now = Utc::now().timestamp();
        if (now - headers.timestamp).abs() > CLOCK_SKEW_SECONDS {
            return Err(PlatformError::SignatureInvalid(
                "timestamp outside the accepted window".to_string(),
            ));
        }

        let (key_id, secret) = parse_key(&headers.api_key).ok_or_else(|| {
            PlatformError::SignatureInvalid("malformed api key".to_string())
        })?;

        let key = self
            .keys
            .find_by_uuid(key_id)
            .await
            .map_err(PlatformError::from)?
            .ok_or_else(|| PlatformError::SignatureInvalid("unknown api key".to_string()))?;

        if key.function_id != function.id {
            return Err(PlatformError::SignatureInvalid(
                "api key does not belong to this function".to_string(),
            ));
        }
        if !key.is_valid_at(Utc::now()) {
            return Err(PlatformError::SignatureInvalid(
                "api key is revoked or expired".to_string(),
            ));
        }

        if !constant_time_eq(&key.secret_hash, &hash_secret(key_id, secret)) {
            return Err(PlatformError::SignatureInvalid(
                "api key secret mismatch".to_string(),
            ));
        }

        let payload = canonical_payload(body);
        if !verify_signature(secret, &payload, headers.timestamp, &headers.signature) {
            return Err(PlatformError::SignatureInvalid(
                "signature mismatch".to_string(),
            ));
        }

        // Usage stamp is bookkeeping; it never delays or fails the call.
        let keys = self.keys.clone();
        tokio::spawn(async move {
            if let Err(e) = keys.touch_last_used(key_id).await {
                tracing::debug!(error = %e, "failed to stamp api key usage");
            }
        });

        Ok(VerificationRecord {
            key_id: Some(key_id),
            signed: true,
        })
    }
}
