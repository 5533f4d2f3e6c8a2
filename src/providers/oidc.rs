//! Generic OpenID Connect provider.
//!
//! Works with any standards-compliant issuer given its authorization and
//! token endpoints. With a `profile_url` the email comes from userinfo,
//! otherwise from the `id_token` claims.

use async_trait::async_trait;
use tracing::debug;

use super::oauth2::{self, OAuth2Client};
use super::{
    CallbackRequest, IdentityProvider, ProviderConfig, ProviderError, ProviderKind, UserProfile,
    required,
};
use crate::Result;

const DEFAULT_SCOPES: &[&str] = &["openid", "email"];

/// Generic OIDC issuer.
#[derive(Debug, Clone)]
pub struct OidcProvider {
    oauth2: OAuth2Client,
    profile_url: Option<String>,
}

impl OidcProvider {
    pub fn new(config: &ProviderConfig, http: reqwest::Client) -> Result<Self> {
        let auth_url = required(config.auth_url.as_ref(), "auth_url", ProviderKind::Oidc)?;
        let token_url = required(config.token_url.as_ref(), "token_url", ProviderKind::Oidc)?;

        Ok(Self {
            oauth2: OAuth2Client::new(
                http,
                config,
                auth_url,
                token_url,
                config.scopes_or(DEFAULT_SCOPES),
            )?,
            profile_url: config
                .profile_url
                .clone()
                .filter(|u| !u.trim().is_empty()),
        })
    }
}

#[async_trait]
impl IdentityProvider for OidcProvider {
    fn name(&self) -> &'static str {
        "oidc"
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
        debug!(provider = "oidc", userinfo = self.profile_url.is_some(), "Authorization code exchanged");

        match &self.profile_url {
            Some(url) => self
                .oauth2
                .fetch_profile(url, &token.access_token)
                .await?
                .require_email(),
            None => oauth2::profile_from_id_token(&token, false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ProviderConfig {
        ProviderConfig {
            client_id: "gateway".into(),
            client_secret: "secret".into(),
            auth_url: Some("https://sso.example.com/auth".into()),
            token_url: Some("https://sso.example.com/token".into()),
            scopes: vec!["openid".into(), "email".into(), "profile".into()],
            ..Default::default()
        }
    }

    #[test]
    fn configured_scopes_are_used() {
        let provider = OidcProvider::new(&config(), reqwest::Client::new()).unwrap();
        let login = provider.login_url("https://gw/.oauth2/callback", "s");
        assert!(login.contains("scope=openid+email+profile"));
        assert!(provider.profile_url.is_none());
    }

    #[test]
    fn token_url_is_required() {
        let mut config = config();
        config.token_url = None;
        let err = OidcProvider::new(&config, reqwest::Client::new()).unwrap_err();
        assert!(err.to_string().contains("token_url"));
    }
}
