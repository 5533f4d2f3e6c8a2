//! Helios Library
//!
//! Access gateway that sits in front of HTTP services.
//!
//! # Features
//!
//! - **Authentication**: OAuth2 / OpenID Connect login against Auth0, Google,
//!   Azure AD, or any OIDC issuer, kept as a signed session token
//! - **Authorization**: per-route rules in a small expression language, with
//!   a `network(ip, cidr)` predicate for address checks
//! - **Routing**: host and path-prefix routing to upstreams through a
//!   streaming reverse proxy
//! - **Production Ready**: TLS, graceful shutdown, structured logs

#![forbid(unsafe_code)]

pub mod authentication;
pub mod authorization;
pub mod cli;
pub mod config;
pub mod error;
pub mod gateway;
pub mod policy;
pub mod providers;

pub use error::{Error, Result};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::cli::LogFormat;

/// Server name reported in logs and the health endpoint
pub const SERVER_NAME: &str = concat!("Helios/", env!("CARGO_PKG_VERSION"));

/// Setup tracing/logging
pub fn setup_tracing(level: &str, format: LogFormat) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Json => subscriber
            .with(fmt::layer().json())
            .try_init()
            .map_err(|e| Error::Internal(e.to_string())),
        LogFormat::Text => subscriber
            .with(fmt::layer())
            .try_init()
            .map_err(|e| Error::Internal(e.to_string())),
    }
}
