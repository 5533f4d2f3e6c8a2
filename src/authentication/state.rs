//! Redirect state codec.
//!
//! The OAuth2 `state` parameter carries the URI the user originally asked for,
//! so the callback can send them back there. By default it is the plain
//! standard-base64 encoding of that URI: reversible and unauthenticated, so
//! anyone can forge a post-login redirect target.
//!
//! With `identity.sign_state` enabled the encoded URI is followed by `.` and a
//! base64url HMAC-SHA256 tag keyed with the session signing secret, and a
//! state whose tag does not verify is rejected.

use base64::{
    Engine as _,
    engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD},
};
use hmac::{KeyInit, Mac};
use sha2::Sha256;

type HmacSha256 = hmac::Hmac<Sha256>;

/// Redirect-state decode failures.
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    /// The `state` query parameter was missing or empty.
    #[error("missing state parameter")]
    Missing,

    /// Not valid base64.
    #[error("state is not valid base64: {0}")]
    Encoding(#[from] base64::DecodeError),

    /// Decoded bytes are not UTF-8.
    #[error("state is not valid UTF-8")]
    Utf8,

    /// The HMAC tag is absent or does not match.
    #[error("state signature mismatch")]
    Signature,
}

/// Encodes and decodes the redirect state.
#[derive(Clone)]
pub struct StateCodec {
    key: Option<Vec<u8>>,
}

impl std::fmt::Debug for StateCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateCodec")
            .field("signed", &self.key.is_some())
            .finish()
    }
}

impl StateCodec {
    /// Plain base64 state.
    #[must_use]
    pub fn plain() -> Self {
        Self { key: None }
    }

    /// HMAC-bound state keyed with `secret`.
    #[must_use]
    pub fn signed(secret: &str) -> Self {
        Self {
            key: Some(secret.as_bytes().to_vec()),
        }
    }

    /// Encode the original request URI.
    #[must_use]
    pub fn encode(&self, uri: &str) -> String {
        let encoded = STANDARD.encode(uri.as_bytes());
        match self.key.as_deref().and_then(|key| sign(key, uri.as_bytes())) {
            Some(tag) => format!("{encoded}.{}", URL_SAFE_NO_PAD.encode(tag)),
            None => encoded,
        }
    }

    /// Recover the original request URI.
    pub fn decode(&self, state: &str) -> Result<String, StateError> {
        if state.is_empty() {
            return Err(StateError::Missing);
        }

        match &self.key {
            None => decode_uri(state),
            Some(key) => {
                // Standard base64 never contains '.', so the last one separates the tag.
                let (encoded, tag) = state.rsplit_once('.').ok_or(StateError::Signature)?;
                let uri = decode_uri(encoded)?;
                let tag = URL_SAFE_NO_PAD
                    .decode(tag)
                    .map_err(|_| StateError::Signature)?;

                let mut mac = HmacSha256::new_from_slice(key).map_err(|_| StateError::Signature)?;
                mac.update(uri.as_bytes());
                mac.verify_slice(&tag).map_err(|_| StateError::Signature)?;
                Ok(uri)
            }
        }
    }
}

fn decode_uri(encoded: &str) -> Result<String, StateError> {
    let bytes = STANDARD.decode(encoded)?;
    String::from_utf8(bytes).map_err(|_| StateError::Utf8)
}

fn sign(key: &[u8], data: &[u8]) -> Option<Vec<u8>> {
    let mut mac = HmacSha256::new_from_slice(key).ok()?;
    mac.update(data);
    Some(mac.finalize().into_bytes().to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_state_is_standard_base64_of_uri() {
        let codec = StateCodec::plain();
        assert_eq!(codec.encode("/dashboard"), STANDARD.encode("/dashboard"));
        assert_eq!(codec.decode(&codec.encode("/a?b=c")).unwrap(), "/a?b=c");
    }

    #[test]
    fn plain_state_rejects_non_base64() {
        let codec = StateCodec::plain();
        assert!(matches!(codec.decode("%%%"), Err(StateError::Encoding(_))));
        assert!(matches!(codec.decode(""), Err(StateError::Missing)));
    }

    #[test]
    fn plain_state_rejects_non_utf8() {
        let codec = StateCodec::plain();
        let state = STANDARD.encode([0xff, 0xfe]);
        assert!(matches!(codec.decode(&state), Err(StateError::Utf8)));
    }

    #[test]
    fn signed_state_round_trips() {
        let codec = StateCodec::signed("secret");
        let state = codec.encode("/reports?year=2024");
        assert!(state.contains('.'));
        assert_eq!(codec.decode(&state).unwrap(), "/reports?year=2024");
    }

    #[test]
    fn signed_state_rejects_forged_target() {
        let codec = StateCodec::signed("secret");
        let genuine = codec.encode("/home");
        let (_, tag) = genuine.rsplit_once('.').unwrap();
        let forged = format!("{}.{tag}", STANDARD.encode("/evil"));

        assert!(matches!(codec.decode(&forged), Err(StateError::Signature)));
    }

    #[test]
    fn signed_state_rejects_plain_state() {
        let codec = StateCodec::signed("secret");
        let plain = StateCodec::plain().encode("/home");
        assert!(codec.decode(&plain).is_err());
    }

    #[test]
    fn signed_state_rejects_other_key() {
        let state = StateCodec::signed("one").encode("/home");
        assert!(StateCodec::signed("two").decode(&state).is_err());
    }
}
