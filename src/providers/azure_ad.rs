//! Azure Active Directory (Microsoft identity platform v2).
//!
//! No userinfo call: the email is read from the `id_token` returned by the
//! token endpoint, falling back to `preferred_username`.

use async_trait::async_trait;
use tracing::debug;

use super::oauth2::{self, OAuth2Client};
use super::{CallbackRequest, IdentityProvider, ProviderConfig, ProviderError, UserProfile};
use crate::Result;

const LOGIN_HOST: &str = "https://login.microsoftonline.com";
const DEFAULT_TENANT: &str = "common";
const DEFAULT_SCOPES: &[&str] = &["openid", "email"];

/// Azure AD tenant (`domain`), or the multi-tenant `common` endpoint.
#[derive(Debug, Clone)]
pub struct AzureAdProvider {
    oauth2: OAuth2Client,
}

impl AzureAdProvider {
    pub fn new(config: &ProviderConfig, http: reqwest::Client) -> Result<Self> {
        let tenant = config
            .domain
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .unwrap_or(DEFAULT_TENANT);
        let base = format!("{LOGIN_HOST}/{tenant}/oauth2/v2.0");

        let auth_url = config
            .auth_url
            .clone()
            .unwrap_or_else(|| format!("{base}/authorize"));
        let token_url = config
            .token_url
            .clone()
            .unwrap_or_else(|| format!("{base}/token"));

        Ok(Self {
            oauth2: OAuth2Client::new(
                http,
                config,
                &auth_url,
                &token_url,
                config.scopes_or(DEFAULT_SCOPES),
            )?,
        })
    }
}

#[async_trait]
impl IdentityProvider for AzureAdProvider {
    fn name(&self) -> &'static str {
        "azuread"
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
        debug!(provider = "azuread", "Authorization code exchanged");

        oauth2::profile_from_id_token(&token, true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn common_tenant_by_default() {
        let provider =
            AzureAdProvider::new(&ProviderConfig::default(), reqwest::Client::new()).unwrap();
        let login = provider.login_url("https://gw/.oauth2/callback", "s");
        assert!(login.starts_with(
            "https://login.microsoftonline.com/common/oauth2/v2.0/authorize?"
        ));
        assert!(login.contains("scope=openid+email"));
    }

    #[test]
    fn tenant_from_domain() {
        let config = ProviderConfig {
            domain: Some("contoso.onmicrosoft.com".into()),
            ..Default::default()
        };
        let provider = AzureAdProvider::new(&config, reqwest::Client::new()).unwrap();
        assert!(
            provider
                .login_url("cb", "s")
                .starts_with("https://login.microsoftonline.com/contoso.onmicrosoft.com/")
        );
    }
}
