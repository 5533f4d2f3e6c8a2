//! Host and path-prefix routing.
//!
//! Each configured path becomes its own [`Router`]: authentication (when
//! enabled), then authorization, then the proxy. The table picks the most
//! specific host pattern that has a matching path, and within it the longest
//! path prefix.

use std::cmp::Reverse;
use std::sync::Arc;

use axum::{
    Router,
    body::Body,
    extract::State,
    http::{Request, StatusCode},
    middleware,
    response::{IntoResponse, Response},
};
use tower::ServiceExt;
use tracing::debug;

use super::proxy::{self, Upstream};
use crate::authentication::{Authenticator, authentication_middleware};
use crate::authorization::{
    Policy, authorization_middleware,
    context::{normalize_host, request_host},
};

/// A host pattern from `routes[].host`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostPattern {
    /// `*`
    Any,
    /// `*.example.com`, stored as `.example.com`
    Suffix(String),
    /// Exact host, normalized
    Exact(String),
}

impl HostPattern {
    pub fn parse(pattern: &str) -> Self {
        let pattern = pattern.trim();
        if pattern == "*" {
            Self::Any
        } else if let Some(suffix) = pattern.strip_prefix('*') {
            Self::Suffix(normalize_host(suffix))
        } else {
            Self::Exact(normalize_host(pattern))
        }
    }

    /// Whether `host` (already normalized) matches.
    pub fn matches(&self, host: &str) -> bool {
        match self {
            Self::Any => true,
            Self::Suffix(suffix) => host.len() > suffix.len() && host.ends_with(suffix.as_str()),
            Self::Exact(exact) => host == exact,
        }
    }

    /// Exact hosts beat longer suffixes, which beat shorter ones and `*`.
    fn specificity(&self) -> (u8, usize) {
        match self {
            Self::Any => (0, 0),
            Self::Suffix(s) => (1, s.len()),
            Self::Exact(_) => (2, 0),
        }
    }
}

/// The middleware chain and upstream for one path prefix.
#[derive(Clone)]
pub struct PathRoute {
    prefix: String,
    router: Router,
}

impl PathRoute {
    pub fn new(
        prefix: impl Into<String>,
        upstream: Arc<Upstream>,
        policy: Arc<Policy>,
        authenticator: Option<Arc<Authenticator>>,
    ) -> Self {
        let mut router = Router::new()
            .fallback(proxy::forward)
            .with_state(upstream)
            .layer(middleware::from_fn_with_state(
                policy,
                authorization_middleware,
            ));

        // Added last so it runs first
        if let Some(auth) = authenticator {
            router = router.layer(middleware::from_fn_with_state(
                auth,
                authentication_middleware,
            ));
        }

        Self {
            prefix: prefix.into(),
            router,
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }
}

impl std::fmt::Debug for PathRoute {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PathRoute")
            .field("prefix", &self.prefix)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone)]
struct HostRoutes {
    pattern: HostPattern,
    /// Longest prefix first
    paths: Vec<PathRoute>,
}

/// All routes, built once at startup.
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    /// Most specific host first
    hosts: Vec<HostRoutes>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a path route under `host`. Repeated hosts share one entry.
    pub fn insert(&mut self, host: &str, route: PathRoute) {
        let pattern = HostPattern::parse(host);
        match self.hosts.iter_mut().find(|h| h.pattern == pattern) {
            Some(entry) => entry.paths.push(route),
            None => self.hosts.push(HostRoutes {
                pattern,
                paths: vec![route],
            }),
        }

        self.hosts
            .sort_by_key(|h| Reverse(h.pattern.specificity()));
        for entry in &mut self.hosts {
            entry.paths.sort_by_key(|p| Reverse(p.prefix.len()));
        }
    }

    pub fn len(&self) -> usize {
        self.hosts.iter().map(|h| h.paths.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }

    /// Find the route for a request host (as received) and path.
    pub fn lookup(&self, host: &str, path: &str) -> Option<&PathRoute> {
        let host = normalize_host(host);
        self.hosts
            .iter()
            .filter(|h| h.pattern.matches(&host))
            .find_map(|h| h.paths.iter().find(|p| path.starts_with(&p.prefix)))
    }
}

/// Fallback handler: hand the request to the matching route's chain.
pub async fn dispatch(State(table): State<Arc<RouteTable>>, request: Request<Body>) -> Response {
    let host = request_host(request.headers(), request.uri()).unwrap_or_default();

    let Some(route) = table.lookup(&host, request.uri().path()) else {
        debug!(host = %host, path = %request.uri().path(), "No route matched");
        return StatusCode::NOT_FOUND.into_response();
    };

    match route.router.clone().oneshot(request).await {
        Ok(response) => response,
        Err(never) => match never {},
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn route(prefix: &str) -> PathRoute {
        let upstream = Upstream::new(
            "app",
            "http://127.0.0.1:1",
            Duration::from_secs(1),
            Duration::from_secs(1),
            Duration::from_secs(1),
        )
        .unwrap();
        PathRoute::new(
            prefix,
            Arc::new(upstream),
            Arc::new(Policy::default()),
            None,
        )
    }

    #[test]
    fn host_patterns() {
        assert!(HostPattern::parse("*").matches("anything"));
        assert!(HostPattern::parse("*.example.com").matches("a.example.com"));
        assert!(!HostPattern::parse("*.example.com").matches("example.com"));
        assert!(HostPattern::parse("App.Example.com").matches("app.example.com"));
        assert!(!HostPattern::parse("app.example.com").matches("b.example.com"));
    }

    #[test]
    fn longest_prefix_wins() {
        let mut table = RouteTable::new();
        table.insert("a.example.com", route("/"));
        table.insert("a.example.com", route("/admin"));

        assert_eq!(
            table.lookup("a.example.com", "/admin/users").unwrap().prefix(),
            "/admin"
        );
        assert_eq!(table.lookup("a.example.com", "/home").unwrap().prefix(), "/");
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn host_match_ignores_port_and_case() {
        let mut table = RouteTable::new();
        table.insert("a.example.com", route("/"));
        assert!(table.lookup("A.Example.com:8443", "/").is_some());
        assert!(table.lookup("b.example.com", "/").is_none());
    }

    #[test]
    fn exact_host_beats_wildcards() {
        let mut table = RouteTable::new();
        table.insert("*", route("/any"));
        table.insert("*.example.com", route("/suffix"));
        table.insert("a.example.com", route("/exact"));

        // Most specific host with a matching path wins
        assert_eq!(table.lookup("a.example.com", "/exact").unwrap().prefix(), "/exact");
        assert_eq!(table.lookup("a.example.com", "/suffix").unwrap().prefix(), "/suffix");
        assert_eq!(table.lookup("other.org", "/any").unwrap().prefix(), "/any");
        assert!(table.lookup("other.org", "/suffix").is_none());
    }

    #[test]
    fn unmatched_path_is_none() {
        let mut table = RouteTable::new();
        table.insert("a.example.com", route("/api"));
        assert!(table.lookup("a.example.com", "/").is_none());
    }
}
