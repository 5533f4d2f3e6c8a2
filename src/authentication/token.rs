//! Signed session tokens.
//!
//! A session token is a compact HS256 JWT asserting `{sub, iss, iat, exp}`.
//! The token is the whole session: nothing is stored server-side, so logout
//! only clears the client copy and a token stays valid until `exp`.
//!
//! Verification pins the algorithm to HS256. A token whose header names any
//! other algorithm (e.g. ES256, RS256, `none`) is rejected before the
//! signature is looked at, even if it is otherwise well formed.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

/// Issuer embedded in every session token.
pub const ISSUER: &str = "Helios";

/// The only algorithm the gateway issues or accepts.
const ALGORITHM: Algorithm = Algorithm::HS256;

/// Session token errors.
#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    /// Signing failed (malformed key material).
    #[error("failed to sign session token: {0}")]
    Sign(#[source] jsonwebtoken::errors::Error),

    /// The token is malformed, badly signed, uses the wrong algorithm, or has expired.
    #[error("invalid session token: {0}")]
    Invalid(#[source] jsonwebtoken::errors::Error),

    /// The token's expiry is not after the current second.
    #[error("session token expired")]
    Expired,

    /// The signing secret is empty.
    #[error("session signing secret is empty")]
    EmptySecret,
}

/// Claims carried by a session token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionClaims {
    /// Subject: the authenticated user's email.
    pub sub: String,
    /// Issuer, always [`ISSUER`].
    pub iss: String,
    /// Issued-at (Unix seconds).
    pub iat: u64,
    /// Expiry (Unix seconds).
    pub exp: u64,
}

impl SessionClaims {
    /// Expiry as a [`SystemTime`].
    #[must_use]
    pub fn expires_at(&self) -> SystemTime {
        UNIX_EPOCH + Duration::from_secs(self.exp)
    }
}

/// Issue a session token for `subject` that expires at `expires_at`.
///
/// Identical inputs produce identical tokens except for the embedded `iat`.
pub fn issue(secret: &str, subject: &str, expires_at: SystemTime) -> Result<String, TokenError> {
    if secret.is_empty() {
        return Err(TokenError::EmptySecret);
    }

    let claims = SessionClaims {
        sub: subject.to_string(),
        iss: ISSUER.to_string(),
        iat: unix_secs(SystemTime::now()),
        exp: unix_secs(expires_at),
    };

    jsonwebtoken::encode(
        &Header::new(ALGORITHM),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(TokenError::Sign)
}

/// Verify `token` under `secret` and return its claims.
pub fn verify(secret: &str, token: &str) -> Result<SessionClaims, TokenError> {
    if secret.is_empty() {
        return Err(TokenError::EmptySecret);
    }

    let data = jsonwebtoken::decode::<SessionClaims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation(),
    )
    .map_err(TokenError::Invalid)?;

    // jsonwebtoken still accepts exp == now; a session is valid only while now < exp.
    if data.claims.exp <= unix_secs(SystemTime::now()) {
        return Err(TokenError::Expired);
    }

    Ok(data.claims)
}

/// `true` only for a well-formed, HS256-signed, unexpired token.
///
/// Every failure looks the same to the caller: an invalid token is
/// indistinguishable from an absent one.
#[must_use]
pub fn validate(secret: &str, token: &str) -> bool {
    verify(secret, token).is_ok()
}

fn validation() -> Validation {
    let mut v = Validation::new(ALGORITHM);
    v.leeway = 0;
    v.validate_exp = true;
    v.set_issuer(&[ISSUER]);
    v.set_required_spec_claims(&["exp", "sub", "iss"]);
    v
}

fn unix_secs(t: SystemTime) -> u64 {
    t.duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_secs()
}
