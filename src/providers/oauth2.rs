//! Shared OAuth2 authorization-code client.

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, warn};
use url::Url;

use super::{ProviderConfig, ProviderError, UserProfile};
use crate::{Error, Result};

/// Token endpoint response.
#[derive(Debug, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub id_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<u64>,
}

/// The subset of OIDC `id_token` claims used for identity.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct IdTokenClaims {
    #[serde(default)]
    pub sub: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub preferred_username: Option<String>,
}

/// Authorization-code client for one provider.
#[derive(Clone)]
pub struct OAuth2Client {
    http: Client,
    client_id: String,
    client_secret: String,
    auth_url: Url,
    token_url: Url,
    scopes: Vec<String>,
}

impl std::fmt::Debug for OAuth2Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuth2Client")
            .field("client_id", &self.client_id)
            .field("auth_url", &self.auth_url.as_str())
            .field("token_url", &self.token_url.as_str())
            .field("scopes", &self.scopes)
            .finish_non_exhaustive()
    }
}

impl OAuth2Client {
    /// Create a client. Both endpoints must be absolute URLs.
    pub fn new(
        http: Client,
        config: &ProviderConfig,
        auth_url: &str,
        token_url: &str,
        scopes: Vec<String>,
    ) -> Result<Self> {
        Ok(Self {
            http,
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            auth_url: parse_endpoint("auth_url", auth_url)?,
            token_url: parse_endpoint("token_url", token_url)?,
            scopes,
        })
    }

    /// Authorization endpoint URL with the code-flow parameters appended.
    #[must_use]
    pub fn authorize_url(&self, redirect_uri: &str, state: &str) -> String {
        let mut url = self.auth_url.clone();
        url.query_pairs_mut()
            .append_pair("response_type", "code")
            .append_pair("client_id", &self.client_id)
            .append_pair("redirect_uri", redirect_uri)
            .append_pair("scope", &self.scopes.join(" "))
            .append_pair("state", state);
        url.into()
    }

    /// Exchange an authorization code at the token endpoint.
    pub async fn exchange_code(
        &self,
        code: &str,
        redirect_uri: &str,
    ) -> std::result::Result<TokenResponse, ProviderError> {
        let params = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", redirect_uri),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
        ];

        let response = self
            .http
            .post(self.token_url.clone())
            .header(reqwest::header::ACCEPT, "application/json")
            .form(&params)
            .send()
            .await
            .map_err(|e| ProviderError::CodeExchange(format!("token request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            warn!(status = %status, "Token endpoint rejected authorization code");
            debug!(body = %body, "Token endpoint error body");
            return Err(ProviderError::CodeExchange(format!("HTTP {status}")));
        }

        response.json::<TokenResponse>().await.map_err(|e| {
            ProviderError::CodeExchange(format!("failed to parse token response: {e}"))
        })
    }

    /// Fetch the userinfo document with the access token.
    pub async fn fetch_profile(
        &self,
        profile_url: &str,
        access_token: &str,
    ) -> std::result::Result<UserProfile, ProviderError> {
        let response = self
            .http
            .get(profile_url)
            .bearer_auth(access_token)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| ProviderError::ProfileFetch(e.to_string()))?;

        if !response.status().is_success() {
            return Err(ProviderError::ProfileFetch(format!(
                "HTTP {}",
                response.status()
            )));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| ProviderError::ProfileFetch(e.to_string()))?;
        serde_json::from_slice::<UserProfile>(&body)
            .map_err(|e| ProviderError::ProfileDecode(e.to_string()))
    }
}

/// Decode the payload of an `id_token` without checking its signature.
///
/// Only used on tokens received directly from the provider's token endpoint
/// over TLS, never on tokens presented by clients.
pub fn decode_id_token(token: &str) -> std::result::Result<IdTokenClaims, ProviderError> {
    let mut parts = token.splitn(3, '.');
    let (Some(_header), Some(payload), Some(_signature)) = (parts.next(), parts.next(), parts.next())
    else {
        return Err(ProviderError::IdToken("not a compact JWT".to_string()));
    };

    let payload = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .map_err(|e| ProviderError::IdToken(format!("payload is not base64url: {e}")))?;

    serde_json::from_slice::<IdTokenClaims>(&payload)
        .map_err(|e| ProviderError::ProfileDecode(format!("id_token claims: {e}")))
}

/// Pull the `id_token` out of a token response and read its email.
///
/// `fallback_to_username` accepts `preferred_username` when `email` is absent,
/// which is how Azure AD reports the sign-in address for many accounts.
pub fn profile_from_id_token(
    response: &TokenResponse,
    fallback_to_username: bool,
) -> std::result::Result<UserProfile, ProviderError> {
    let token = response
        .id_token
        .as_deref()
        .ok_or_else(|| ProviderError::IdToken("token response has no id_token".to_string()))?;
    let claims = decode_id_token(token)?;

    let email = claims
        .email
        .filter(|e| !e.trim().is_empty())
        .or_else(|| {
            fallback_to_username
                .then_some(claims.preferred_username)
                .flatten()
        })
        .unwrap_or_default();

    UserProfile { email }.require_email()
}

fn parse_endpoint(what: &str, raw: &str) -> Result<Url> {
    Url::parse(raw).map_err(|e| Error::Config(format!("identity.oauth2.{what} '{raw}': {e}")))
}
