//! Signed identity tokens: `base64url(header).base64url(claims).base64url(sig)`
//! signed by a managed key whose alias is named in `iss` as `kms/<alias>`.

use std::sync::Arc;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use relay_core::{ClockSource, Identity};
use serde_json::{Map, Value};

use crate::traits::KeyVerifier;

const ISSUER_PREFIX: &str = "kms/";

/// Claims consumed by verification and stripped from the identity.
const REGISTERED_CLAIMS: [&str; 7] = ["iss", "sub", "aud", "exp", "nbf", "iat", "jti"];

#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    #[error("token must have three dot-separated segments")]
    Malformed,
    #[error("invalid token header: {0}")]
    Header(#[from] jsonwebtoken::errors::Error),
    #[error("invalid token encoding: {0}")]
    Encoding(#[from] base64::DecodeError),
    #[error("invalid token claims: {0}")]
    Claims(#[from] serde_json::Error),
    #[error("unsupported token issuer: {0}")]
    UnsupportedIssuer(String),
    #[error("token signature does not verify")]
    BadSignature,
    #[error("token `exp` is not a number: {0}")]
    InvalidExpiry(Value),
    #[error("token expired at {exp}, now {now}")]
    Expired { exp: f64, now: u64 },
    #[error("key verification failed: {0}")]
    Verifier(#[source] anyhow::Error),
}

/// True when `value` looks like a signed token.
#[must_use]
pub fn is_token(value: &str) -> bool {
    let mut parts = value.split('.');
    parts.by_ref().take(3).filter(|p| !p.is_empty()).count() == 3 && parts.next().is_none()
}

/// Verifies signed identity tokens against managed keys.
pub struct TokenVerifier {
    keys: Arc<dyn KeyVerifier>,
    clock: Arc<dyn ClockSource>,
}

impl TokenVerifier {
    #[must_use]
    pub fn new(keys: Arc<dyn KeyVerifier>, clock: Arc<dyn ClockSource>) -> Self {
        Self { keys, clock }
    }

    /// Verifies `token` and returns the identity it carries.
    ///
    /// # Errors
    ///
    /// Returns `TokenError` for a malformed token, an issuer other than
    /// `kms/<alias>`, a signature the key rejects, or an `exp` that is not a
    /// number or lies in the past.
    pub async fn verify(&self, token: &str) -> Result<Identity, TokenError> {
        if !is_token(token) {
            return Err(TokenError::Malformed);
        }
        // Rejects unknown `alg` values and undecodable headers.
        let header = jsonwebtoken::decode_header(token)?;
        let (message, signature) = token.rsplit_once('.').ok_or(TokenError::Malformed)?;
        let claims_segment = message.split('.').nth(1).ok_or(TokenError::Malformed)?;

        let mut claims: Map<String, Value> =
            serde_json::from_slice(&URL_SAFE_NO_PAD.decode(claims_segment)?)?;
        let alias = claims
            .get("iss")
            .and_then(Value::as_str)
            .and_then(|iss| iss.strip_prefix(ISSUER_PREFIX))
            .filter(|alias| !alias.is_empty())
            .map(str::to_string)
            .ok_or_else(|| {
                TokenError::UnsupportedIssuer(
                    claims
                        .get("iss")
                        .map(ToString::to_string)
                        .unwrap_or_default(),
                )
            })?;

        let signature = URL_SAFE_NO_PAD.decode(signature)?;
        let valid = self
            .keys
            .verify(&alias, message.as_bytes(), &signature)
            .await
            .map_err(TokenError::Verifier)?;
        if !valid {
            tracing::warn!(alias = %alias, alg = ?header.alg, "token signature rejected");
            return Err(TokenError::BadSignature);
        }

        // NumericDate may be fractional or negative.
        if let Some(raw) = claims.get("exp") {
            let exp = raw
                .as_f64()
                .ok_or_else(|| TokenError::InvalidExpiry(raw.clone()))?;
            let now = self.clock.now_secs();
            #[allow(clippy::cast_precision_loss)]
            let expired = exp <= now as f64;
            if expired {
                return Err(TokenError::Expired { exp, now });
            }
        }

        for claim in REGISTERED_CLAIMS {
            claims.remove(claim);
        }
        Ok(serde_json::from_value(Value::Object(claims))?)
    }
}
