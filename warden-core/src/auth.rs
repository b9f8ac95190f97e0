//! Bearer-token minting and verification for the dashboard surface.
//!
//! Tokens are `base64url(claims_json).hex(sha256(secret || claims_json))`,
//! carrying `{id, username, role, exp}` with a 12-hour default lifetime.
//! Signature comparison is constant time.

use crate::error::{WardenError, WardenResult};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenClaims {
    pub id: String,
    pub username: String,
    pub role: String,
    /// Expiry, epoch seconds.
    pub exp: i64,
}

pub struct TokenAuthority {
    secret: String,
    ttl_secs: i64,
}

impl TokenAuthority {
    pub fn new(secret: &str, ttl_secs: i64) -> Self {
        Self { secret: secret.to_string(), ttl_secs }
    }

    /// Mint a signed token. Returns `(token, expires_at_epoch_secs)`.
    pub fn mint(&self, username: &str, role: &str) -> WardenResult<(String, i64)> {
        if self.secret.is_empty() {
            return Err(WardenError::Internal("token secret not configured".into()));
        }
        let exp = chrono::Utc::now().timestamp() + self.ttl_secs;
        let claims = TokenClaims {
            id: uuid::Uuid::new_v4().to_string(),
            username: username.to_string(),
            role: role.to_string(),
            exp,
        };
        let payload = serde_json::to_string(&claims)?;
        let encoded = URL_SAFE_NO_PAD.encode(payload.as_bytes());
        let sig = self.sign(&payload);
        Ok((format!("{}.{}", encoded, sig), exp))
    }

    /// Verify a token's signature and expiry, returning its claims.
    pub fn verify(&self, token: &str) -> WardenResult<TokenClaims> {
        if self.secret.is_empty() {
            return Err(WardenError::Unauthenticated("token verification disabled".into()));
        }
        let (encoded, sig) = token
            .split_once('.')
            .ok_or_else(|| WardenError::Unauthenticated("malformed token".into()))?;
        let payload = URL_SAFE_NO_PAD
            .decode(encoded.as_bytes())
            .map_err(|_| WardenError::Unauthenticated("malformed token payload".into()))?;
        let payload = String::from_utf8(payload)
            .map_err(|_| WardenError::Unauthenticated("malformed token payload".into()))?;
        let expected = self.sign(&payload);
        if !constant_time_eq(sig.as_bytes(), expected.as_bytes()) {
            return Err(WardenError::Unauthenticated("bad token signature".into()));
        }
        let claims: TokenClaims = serde_json::from_str(&payload)
            .map_err(|_| WardenError::Unauthenticated("malformed token claims".into()))?;
        if claims.exp < chrono::Utc::now().timestamp() {
            return Err(WardenError::Unauthenticated("token expired".into()));
        }
        Ok(claims)
    }

    fn sign(&self, payload: &str) -> String {
        let mut h = Sha256::new();
        h.update(self.secret.as_bytes());
        h.update(payload.as_bytes());
        hex::encode(h.finalize())
    }
}

/// Check a submitted password against the configured admin credential, which
/// is either plaintext or `sha256:<hex>`.
pub fn verify_credential(submitted: &str, configured: &str) -> bool {
    if configured.is_empty() {
        return false;
    }
    if let Some(stored_hex) = configured.strip_prefix("sha256:") {
        let mut h = Sha256::new();
        h.update(submitted.as_bytes());
        let digest = hex::encode(h.finalize());
        constant_time_eq(digest.as_bytes(), stored_hex.to_ascii_lowercase().as_bytes())
    } else {
        constant_time_eq(submitted.as_bytes(), configured.as_bytes())
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}
