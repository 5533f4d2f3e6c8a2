//! Error types for Helios

use std::io;

use thiserror::Error;

use crate::policy::PolicyError;

/// Result type alias for Helios
pub type Result<T> = std::result::Result<T, Error>;

/// Helios errors
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// A route's authorization rules failed to compile
    #[error("Policy error on route {route}: {source}")]
    Policy {
        /// Route description (`host` + path prefix)
        route: String,
        /// Underlying compile error
        #[source]
        source: PolicyError,
    },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Wrap a policy compile error with the route it belongs to
    pub fn policy(route: impl Into<String>, source: PolicyError) -> Self {
        Self::Policy {
            route: route.into(),
            source,
        }
    }
}
