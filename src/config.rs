//! Configuration management

use std::{
    env,
    net::SocketAddr,
    path::{Path, PathBuf},
    time::Duration,
};

use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::providers::{self, ProviderConfig, ProviderKind};
use crate::{Error, Result};

/// Longest accepted `jwt.expires` (one year).
pub const MAX_SESSION_LIFETIME: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Listener settings
    pub server: ServerConfig,
    /// Backends routes may forward to
    pub upstreams: Vec<UpstreamConfig>,
    /// Host + path routing table
    pub routes: Vec<RouteConfig>,
    /// Identity provider used by auth-enabled routes
    pub identity: IdentityConfig,
    /// Session token settings
    pub jwt: JwtConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind
    pub listen_ip: String,
    /// Port to bind
    pub listen_port: u16,
    /// Request timeout, also applied to upstream and identity provider calls
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    /// Keep-alive idle timeout for pooled upstream connections
    #[serde(with = "humantime_serde")]
    pub idle_timeout: Duration,
    /// Upper bound on draining in-flight requests at shutdown
    #[serde(with = "humantime_serde")]
    pub shutdown_timeout: Duration,
    /// Serve HTTPS with these files; plain HTTP when absent
    pub tls_context: Option<TlsContext>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_ip: "0.0.0.0".to_string(),
            listen_port: 8443,
            timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(120),
            shutdown_timeout: Duration::from_secs(10),
            tls_context: None,
        }
    }
}

impl ServerConfig {
    /// Socket address built from `listen_ip` and `listen_port`.
    pub fn listen_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.listen_ip, self.listen_port)
            .parse()
            .or_else(|_| format!("[{}]:{}", self.listen_ip, self.listen_port).parse())
            .map_err(|e| {
                Error::Config(format!(
                    "Invalid server.listen_ip '{}': {e}",
                    self.listen_ip
                ))
            })
    }
}

/// Certificate and key, both PEM
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TlsContext {
    pub certificate_path: PathBuf,
    pub private_key_path: PathBuf,
}

/// A named backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    /// Name referenced by route paths
    pub name: String,
    /// Base URL; its path is prepended to forwarded request paths
    pub url: String,
    /// TCP connect timeout
    #[serde(with = "humantime_serde", default = "default_connect_timeout")]
    pub connect_timeout: Duration,
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(5)
}

/// Routes for one host
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RouteConfig {
    /// Host to match: exact, `*`, or `*.suffix`
    pub host: String,
    pub http: HttpConfig,
}

/// HTTP path table of a route
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub paths: Vec<PathConfig>,
}

/// A path prefix and what guards it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathConfig {
    /// Path prefix
    #[serde(default = "default_path")]
    pub path: String,
    /// Upstream name
    pub upstream: String,
    /// Require a session before forwarding
    #[serde(default)]
    pub auth_enabled: bool,
    /// Authorization rules; all must hold
    #[serde(default)]
    pub rules: Vec<String>,
}

fn default_path() -> String {
    "/".to_string()
}

/// Identity provider configuration
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    /// Which provider implementation to use
    pub provider: Option<ProviderKind>,
    pub client_id: String,
    pub client_secret: String,
    /// Endpoint overrides and provider-specific settings
    pub oauth2: OAuth2Config,
    /// Bind the redirect state with an HMAC over the signing secret
    pub sign_state: bool,
    /// Where logout sends the browser
    pub logout_redirect: String,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            provider: None,
            client_id: String::new(),
            client_secret: String::new(),
            oauth2: OAuth2Config::default(),
            sign_state: false,
            logout_redirect: "/".to_string(),
        }
    }
}

impl std::fmt::Debug for IdentityConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityConfig")
            .field("provider", &self.provider)
            .field("client_id", &self.client_id)
            .field("client_secret", &"[REDACTED]")
            .field("oauth2", &self.oauth2)
            .field("sign_state", &self.sign_state)
            .field("logout_redirect", &self.logout_redirect)
            .finish()
    }
}

impl IdentityConfig {
    /// Settings handed to the provider constructor.
    pub fn provider_config(&self) -> ProviderConfig {
        ProviderConfig {
            client_id: self.client_id.clone(),
            client_secret: self.client_secret.clone(),
            auth_url: self.oauth2.auth_url.clone(),
            token_url: self.oauth2.token_url.clone(),
            profile_url: self.oauth2.profile_url.clone(),
            domain: self.oauth2.domain.clone(),
            scopes: self.oauth2.scopes.clone(),
        }
    }
}

/// OAuth2 endpoints
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OAuth2Config {
    pub auth_url: Option<String>,
    pub token_url: Option<String>,
    pub profile_url: Option<String>,
    /// Auth0 tenant domain or Azure AD tenant
    pub domain: Option<String>,
    pub scopes: Vec<String>,
}

/// Session token configuration
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JwtConfig {
    /// HMAC signing secret
    #[serde(alias = "shared_secret")]
    pub secret: String,
    /// Session lifetime
    #[serde(with = "humantime_serde")]
    pub expires: Duration,
}

impl Default for JwtConfig {
    fn default() -> Self {
        Self {
            secret: String::new(),
            expires: Duration::from_secs(24 * 3600),
        }
    }
}

impl std::fmt::Debug for JwtConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtConfig")
            .field("secret", &"[REDACTED]")
            .field("expires", &self.expires)
            .finish()
    }
}

impl Config {
    /// Load configuration from file and environment, then validate it.
    ///
    /// `HELIOS_`-prefixed variables override file values, with `__`
    /// separating nesting levels (`HELIOS_JWT__SECRET`).
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new();

        if let Some(p) = path {
            if !p.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            figment = figment.merge(Yaml::file(p));
        }

        figment = figment.merge(Env::prefixed("HELIOS_").split("__"));

        let mut config: Self = figment
            .extract()
            .map_err(|e| Error::Config(e.to_string()))?;

        // Expand ${VAR} in secrets
        config.expand_env_vars()?;
        config.validate()?;

        Ok(config)
    }

    fn expand_env_vars(&mut self) -> Result<()> {
        let re = Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)(?::-([^}]*))?\}")
            .map_err(|e| Error::Internal(e.to_string()))?;

        self.identity.client_secret = Self::expand_string(&re, &self.identity.client_secret);
        self.jwt.secret = Self::expand_string(&re, &self.jwt.secret);
        Ok(())
    }

    fn expand_string(re: &Regex, value: &str) -> String {
        re.replace_all(value, |caps: &regex::Captures| {
            let var_name = &caps[1];
            let default = caps.get(2).map_or("", |m| m.as_str());
            env::var(var_name).unwrap_or_else(|_| default.to_string())
        })
        .into_owned()
    }

    /// Whether any route path requires a session.
    pub fn auth_required(&self) -> bool {
        self.routes
            .iter()
            .flat_map(|r| &r.http.paths)
            .any(|p| p.auth_enabled)
    }

    /// Look up an upstream by name.
    pub fn upstream(&self, name: &str) -> Option<&UpstreamConfig> {
        self.upstreams.iter().find(|u| u.name == name)
    }

    /// Reject configurations the gateway cannot start with.
    pub fn validate(&self) -> Result<()> {
        self.server.listen_addr()?;

        for upstream in &self.upstreams {
            let url = url::Url::parse(&upstream.url).map_err(|e| {
                Error::Config(format!(
                    "Upstream '{}' has an invalid url '{}': {e}",
                    upstream.name, upstream.url
                ))
            })?;
            if !matches!(url.scheme(), "http" | "https") {
                return Err(Error::Config(format!(
                    "Upstream '{}' url must be http or https, got '{}'",
                    upstream.name,
                    url.scheme()
                )));
            }
        }

        for route in &self.routes {
            if route.host.trim().is_empty() {
                return Err(Error::Config("Route with empty host".to_string()));
            }
            for path in &route.http.paths {
                if !path.path.starts_with('/') {
                    return Err(Error::Config(format!(
                        "Route '{}' path '{}' must start with '/'",
                        route.host, path.path
                    )));
                }
                if self.upstream(&path.upstream).is_none() {
                    return Err(Error::Config(format!(
                        "Upstream '{}' for route '{}{}' not found",
                        path.upstream, route.host, path.path
                    )));
                }
            }
        }

        if self.jwt.secret.is_empty() {
            return Err(Error::Config("jwt.secret must not be empty".to_string()));
        }
        if self.jwt.expires.is_zero() {
            return Err(Error::Config("jwt.expires must be positive".to_string()));
        }
        if self.jwt.expires > MAX_SESSION_LIFETIME {
            return Err(Error::Config(format!(
                "jwt.expires must not exceed {}s",
                MAX_SESSION_LIFETIME.as_secs()
            )));
        }

        if self.auth_required() {
            let Some(kind) = self.identity.provider else {
                return Err(Error::Config(
                    "identity.provider is required when a route has auth_enabled".to_string(),
                ));
            };
            if self.identity.client_id.trim().is_empty() {
                return Err(Error::Config(
                    "identity.client_id is required when a route has auth_enabled".to_string(),
                ));
            }
            // Constructing the provider checks its endpoints
            providers::build(
                kind,
                &self.identity.provider_config(),
                reqwest::Client::new(),
            )?;
        }

        Ok(())
    }
}

/// Duration (de)serialization: `"250ms"`, `"30s"`, `"5m"`, `"24h"`, or bare seconds.
pub mod humantime_serde {
    use std::time::Duration;

    use serde::{self, Deserialize, Deserializer, Serializer};

    /// Serialize Duration to a human-readable string (e.g., "30s")
    ///
    /// # Errors
    ///
    /// Returns a serialization error if the serializer fails.
    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if duration.subsec_millis() == 0 {
            serializer.serialize_str(&format!("{}s", duration.as_secs()))
        } else {
            serializer.serialize_str(&format!("{}ms", duration.as_millis()))
        }
    }

    /// Deserialize a human-readable duration string
    ///
    /// # Errors
    ///
    /// Returns a deserialization error if the string cannot be parsed as a duration.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        parse(s.trim()).map_err(serde::de::Error::custom)
    }

    pub(crate) fn parse(s: &str) -> Result<Duration, String> {
        let number = |n: &str| {
            n.trim()
                .parse::<u64>()
                .map_err(|e| format!("invalid duration '{s}': {e}"))
        };

        // "ms" before "s" and "m"
        if let Some(ms) = s.strip_suffix("ms") {
            number(ms).map(Duration::from_millis)
        } else if let Some(secs) = s.strip_suffix('s') {
            number(secs).map(Duration::from_secs)
        } else if let Some(mins) = s.strip_suffix('m') {
            number(mins).map(|m| Duration::from_secs(m.saturating_mul(60)))
        } else if let Some(hours) = s.strip_suffix('h') {
            number(hours).map(|h| Duration::from_secs(h.saturating_mul(3600)))
        } else {
            number(s).map(Duration::from_secs)
        }
    }
}
