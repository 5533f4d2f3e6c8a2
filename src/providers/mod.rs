//! Identity providers.
//!
//! Every provider speaks the OAuth2 authorization-code flow through the
//! shared [`oauth2`] client and differs only in endpoints, scopes, and where
//! the email comes from (a userinfo call or the `id_token` claims). New
//! identity services are added as new [`IdentityProvider`] types.

pub mod auth0;
pub mod azure_ad;
pub mod google;
pub mod oauth2;
pub mod oidc;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

pub use auth0::Auth0Provider;
pub use azure_ad::AzureAdProvider;
pub use google::GoogleProvider;
pub use oidc::OidcProvider;

/// Provider-side failures during callback handling. All are fatal to the
/// request (500) and never to the process.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// The token endpoint rejected the code or could not be reached.
    #[error("error on code exchange: {0}")]
    CodeExchange(String),

    /// The userinfo endpoint failed.
    #[error("error getting user profile: {0}")]
    ProfileFetch(String),

    /// The profile response was not the expected JSON.
    #[error("cannot decode user profile: {0}")]
    ProfileDecode(String),

    /// The profile carries no email.
    #[error("no email found in user profile")]
    NoEmail,

    /// The token response carried no usable `id_token`.
    #[error("invalid id_token: {0}")]
    IdToken(String),

    /// The provider did not answer in time.
    #[error("identity provider did not respond within {0:?}")]
    Timeout(Duration),
}

/// Verified identity returned by a provider.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    /// User email; becomes the session subject.
    #[serde(default)]
    pub email: String,
}

impl UserProfile {
    /// Reject profiles with an empty email.
    pub fn require_email(self) -> std::result::Result<Self, ProviderError> {
        if self.email.trim().is_empty() {
            Err(ProviderError::NoEmail)
        } else {
            Ok(self)
        }
    }
}

/// What a provider needs from the callback request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackRequest {
    /// Authorization code from the `code` query parameter.
    pub code: String,
    /// The callback URL the code was issued for.
    pub redirect_uri: String,
}

/// Static provider settings, loaded once at startup.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct ProviderConfig {
    pub client_id: String,
    pub client_secret: String,
    pub auth_url: Option<String>,
    pub token_url: Option<String>,
    pub profile_url: Option<String>,
    /// Auth0 tenant domain, or the Azure AD tenant.
    pub domain: Option<String>,
    /// Overrides the provider's default scopes when non-empty.
    pub scopes: Vec<String>,
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("client_id", &self.client_id)
            .field("client_secret", &"[REDACTED]")
            .field("auth_url", &self.auth_url)
            .field("token_url", &self.token_url)
            .field("profile_url", &self.profile_url)
            .field("domain", &self.domain)
            .field("scopes", &self.scopes)
            .finish()
    }
}

impl ProviderConfig {
    pub(crate) fn scopes_or(&self, default: &[&str]) -> Vec<String> {
        if self.scopes.is_empty() {
            default.iter().map(ToString::to_string).collect()
        } else {
            self.scopes.clone()
        }
    }
}

/// Supported identity services.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Auth0,
    Google,
    #[serde(alias = "azure_ad")]
    AzureAd,
    Oidc,
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Auth0 => "auth0",
            Self::Google => "google",
            Self::AzureAd => "azuread",
            Self::Oidc => "oidc",
        })
    }
}

/// An OAuth2/OIDC identity service.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Authorization endpoint URL for a login redirect. `state` is embedded
    /// verbatim; the provider echoes it back on the callback.
    fn login_url(&self, callback_url: &str, state: &str) -> String;

    /// Exchange the callback's authorization code for the user's profile.
    async fn fetch_user(
        &self,
        request: &CallbackRequest,
    ) -> std::result::Result<UserProfile, ProviderError>;
}

/// Build the configured provider.
pub fn build(
    kind: ProviderKind,
    config: &ProviderConfig,
    http: reqwest::Client,
) -> Result<Arc<dyn IdentityProvider>> {
    let provider: Arc<dyn IdentityProvider> = match kind {
        ProviderKind::Auth0 => Arc::new(Auth0Provider::new(config, http)?),
        ProviderKind::Google => Arc::new(GoogleProvider::new(config, http)?),
        ProviderKind::AzureAd => Arc::new(AzureAdProvider::new(config, http)?),
        ProviderKind::Oidc => Arc::new(OidcProvider::new(config, http)?),
    };
    Ok(provider)
}

/// A configured endpoint the provider cannot work without.
pub(crate) fn required<'a>(
    value: Option<&'a String>,
    what: &str,
    kind: ProviderKind,
) -> Result<&'a str> {
    value
        .map(String::as_str)
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| {
            Error::Config(format!(
                "identity.oauth2.{what} is required for provider '{kind}'"
            ))
        })
}
