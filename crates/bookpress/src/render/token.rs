//! Short-lived render tokens.
//!
//! A token seals `(family id, subject, expiry)` with AES-256-GCM so the render
//! view can trust the claims without a database round-trip. Any modification
//! of the token fails authentication.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, Duration, Utc};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use crate::secrets::{self, key_from_secret, SecretError};

/// Nonce size for AES-256-GCM (96 bits).
const NONCE_SIZE: usize = 12;

/// What a token grants access to render.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum RenderSubject {
    Page { page_id: String },
    Cover,
}

impl RenderSubject {
    pub fn page(page_id: impl Into<String>) -> Self {
        RenderSubject::Page {
            page_id: page_id.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Claims {
    fam: String,
    sub: RenderSubject,
    exp: i64,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TokenError {
    #[error("Render token missing")]
    Missing,

    #[error("Render token is malformed")]
    Malformed,

    #[error("Render token failed authentication")]
    Tampered,

    #[error("Render token expired")]
    Expired,

    #[error("Render token was issued for a different family or subject")]
    SubjectMismatch,

    #[error("Failed to seal render token: {0}")]
    Seal(String),
}

/// Issues and verifies render tokens.
pub struct RenderTokenIssuer {
    cipher: Aes256Gcm,
}

impl RenderTokenIssuer {
    pub fn new(key: &[u8; secrets::KEY_LEN]) -> Result<Self, SecretError> {
        let cipher = Aes256Gcm::new_from_slice(key)
            .map_err(|e| SecretError::InvalidKey(format!("cipher init failed: {}", e)))?;
        Ok(Self { cipher })
    }

    /// Builds an issuer from a hex-encoded 32-byte secret.
    pub fn from_secret(secret: &SecretString) -> Result<Self, SecretError> {
        Self::new(&key_from_secret(secret)?)
    }

    /// Issues a token valid until `now + ttl`.
    pub fn issue(
        &self,
        family_id: &str,
        subject: RenderSubject,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<String, TokenError> {
        let claims = Claims {
            fam: family_id.to_string(),
            sub: subject,
            exp: (now + ttl).timestamp(),
        };
        let plaintext = serde_json::to_vec(&claims).map_err(|e| TokenError::Seal(e.to_string()))?;

        let nonce_bytes =
            secrets::random_bytes::<NONCE_SIZE>().map_err(|e| TokenError::Seal(e.to_string()))?;
        let ciphertext = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce_bytes), plaintext.as_slice())
            .map_err(|e| TokenError::Seal(e.to_string()))?;

        let mut sealed = nonce_bytes.to_vec();
        sealed.extend(ciphertext);
        Ok(URL_SAFE_NO_PAD.encode(sealed))
    }

    /// Verifies `token` grants `subject` within `family_id` at `now`.
    pub fn verify(
        &self,
        token: Option<&str>,
        family_id: &str,
        subject: &RenderSubject,
        now: DateTime<Utc>,
    ) -> Result<(), TokenError> {
        let token = token.filter(|t| !t.is_empty()).ok_or(TokenError::Missing)?;
        let sealed = URL_SAFE_NO_PAD
            .decode(token)
            .map_err(|_| TokenError::Malformed)?;
        if sealed.len() <= NONCE_SIZE {
            return Err(TokenError::Malformed);
        }

        let (nonce_bytes, ciphertext) = sealed.split_at(NONCE_SIZE);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|_| TokenError::Tampered)?;
        let claims: Claims =
            serde_json::from_slice(&plaintext).map_err(|_| TokenError::Malformed)?;

        if claims.fam != family_id || &claims.sub != subject {
            return Err(TokenError::SubjectMismatch);
        }
        if claims.exp <= now.timestamp() {
            return Err(TokenError::Expired);
        }
        Ok(())
    }
}
