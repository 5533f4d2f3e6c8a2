//! Auth0.
//!
//! Endpoints derive from the tenant `domain` unless given explicitly; the
//! email comes from the `/userinfo` endpoint.

use async_trait::async_trait;
use tracing::debug;

use super::oauth2::OAuth2Client;
use super::{
    CallbackRequest, IdentityProvider, ProviderConfig, ProviderError, ProviderKind, UserProfile,
};
use crate::{Error, Result};

const DEFAULT_SCOPES: &[&str] = &["openid", "email"];

/// Auth0 tenant.
#[derive(Debug, Clone)]
pub struct Auth0Provider {
    oauth2: OAuth2Client,
    profile_url: String,
}

impl Auth0Provider {
    pub fn new(config: &ProviderConfig, http: reqwest::Client) -> Result<Self> {
        let base = config
            .domain
            .as_deref()
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .map(|d| {
                let d = d.trim_end_matches('/');
                if d.starts_with("http://") || d.starts_with("https://") {
                    d.to_string()
                } else {
                    format!("https://{d}")
                }
            });

        let endpoint = |explicit: &Option<String>, path: &str, what: &str| -> Result<String> {
            match (explicit, &base) {
                (Some(url), _) if !url.trim().is_empty() => Ok(url.clone()),
                (_, Some(base)) => Ok(format!("{base}{path}")),
                _ => Err(Error::Config(format!(
                    "identity.oauth2.{what} or identity.oauth2.domain is required for provider '{}'",
                    ProviderKind::Auth0
                ))),
            }
        };

        let auth_url = endpoint(&config.auth_url, "/authorize", "auth_url")?;
        let token_url = endpoint(&config.token_url, "/oauth/token", "token_url")?;
        let profile_url = endpoint(&config.profile_url, "/userinfo", "profile_url")?;

        Ok(Self {
            oauth2: OAuth2Client::new(
                http,
                config,
                &auth_url,
                &token_url,
                config.scopes_or(DEFAULT_SCOPES),
            )?,
            profile_url,
        })
    }
}

#[async_trait]
impl IdentityProvider for Auth0Provider {
    fn name(&self) -> &'static str {
        "auth0"
    }

    fn login_url(&self, callback_url: &str, state: &str) -> String {
        self.oauth2.authorize_url(callback_url, state)
    }

    async fn fetch_user(
        &self,
        request: &CallbackRequest,
    ) -> std::result::Result<UserProfile, ProviderError> {
        let token = self
            .oauth2
            .exchange_code(&request.code, &request.redirect_uri)
            .await?;
        debug!(provider = "auth0", "Authorization code exchanged");

        self.oauth2
            .fetch_profile(&self.profile_url, &token.access_token)
            .await?
            .require_email()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoints_derive_from_domain() {
        let config = ProviderConfig {
            client_id: "cid".into(),
            domain: Some("tenant.eu.auth0.com".into()),
            ..Default::default()
        };
        let provider = Auth0Provider::new(&config, reqwest::Client::new()).unwrap();

        assert_eq!(provider.profile_url, "https://tenant.eu.auth0.com/userinfo");
        let login = provider.login_url("https://gw/.oauth2/callback", "c3RhdGU=");
        assert!(login.starts_with("https://tenant.eu.auth0.com/authorize?"));
        assert!(login.contains("scope=openid+email"));
        assert!(login.contains("state=c3RhdGU%3D"));
    }

    #[test]
    fn explicit_endpoints_override_domain() {
        let config = ProviderConfig {
            domain: Some("tenant.auth0.com".into()),
            profile_url: Some("https://custom.example.com/me".into()),
            ..Default::default()
        };
        let provider = Auth0Provider::new(&config, reqwest::Client::new()).unwrap();
        assert_eq!(provider.profile_url, "https://custom.example.com/me");
    }

    #[test]
    fn domain_or_endpoints_required() {
        let err = Auth0Provider::new(&ProviderConfig::default(), reqwest::Client::new()).unwrap_err();
        assert!(err.to_string().contains("domain"));
    }
}
