//! Google accounts.

use async_trait::async_trait;
use tracing::debug;

use super::oauth2::OAuth2Client;
use super::{CallbackRequest, IdentityProvider, ProviderConfig, ProviderError, UserProfile};
use crate::Result;

const AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const PROFILE_URL: &str = "https://www.googleapis.com/oauth2/v2/userinfo";
const DEFAULT_SCOPES: &[&str] = &["email"];

/// Google OAuth2; email from the v2 userinfo endpoint.
#[derive(Debug, Clone)]
pub struct GoogleProvider {
    oauth2: OAuth2Client,
    profile_url: String,
}

impl GoogleProvider {
    pub fn new(config: &ProviderConfig, http: reqwest::Client) -> Result<Self> {
        let pick = |explicit: &Option<String>, default: &str| {
            explicit
                .as_deref()
                .filter(|u| !u.trim().is_empty())
                .unwrap_or(default)
                .to_string()
        };

        Ok(Self {
            oauth2: OAuth2Client::new(
                http,
                config,
                &pick(&config.auth_url, AUTH_URL),
                &pick(&config.token_url, TOKEN_URL),
                config.scopes_or(DEFAULT_SCOPES),
            )?,
            profile_url: pick(&config.profile_url, PROFILE_URL),
        })
    }
}

#[async_trait]
impl IdentityProvider for GoogleProvider {
    fn name(&self) -> &'static str {
        "google"
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
        debug!(provider = "google", "Authorization code exchanged");

        self.oauth2
            .fetch_profile(&self.profile_url, &token.access_token)
            .await?
            .require_email()
    }
}
