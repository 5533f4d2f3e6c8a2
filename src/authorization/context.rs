//! Request attribute extraction.

use std::net::SocketAddr;

use axum::{
    extract::ConnectInfo,
    http::{HeaderMap, Request, Uri, header},
};
use chrono::Utc;
use tracing::warn;

use crate::policy::RequestContext;

/// Build the policy context for `request`, stamped with the current time.
///
/// The client address comes from the connection (`ConnectInfo`). When it is
/// unavailable `request.ip` is empty rather than failing the request.
pub fn extract<B>(request: &Request<B>) -> RequestContext {
    let ip = match request.extensions().get::<ConnectInfo<SocketAddr>>() {
        Some(ConnectInfo(addr)) => addr.ip().to_canonical().to_string(),
        None => {
            warn!(uri = %request.uri(), "Client address unavailable, using empty request.ip");
            String::new()
        }
    };

    RequestContext {
        host: request_host(request.headers(), request.uri()).unwrap_or_default(),
        path: request
            .uri()
            .path_and_query()
            .map_or_else(|| request.uri().path().to_string(), ToString::to_string),
        ip,
        time: Utc::now(),
    }
}

/// The `Host` header, or the URI authority for HTTP/2 requests.
pub fn request_host(headers: &HeaderMap, uri: &Uri) -> Option<String> {
    headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .map(ToString::to_string)
        .or_else(|| uri.authority().map(|a| a.as_str().to_string()))
}

/// Host without port, lower-cased, for route matching.
pub fn normalize_host(host: &str) -> String {
    let host = host.trim();
    let without_port = if let Some(rest) = host.strip_prefix('[') {
        // [v6]:port
        rest.split_once(']').map_or(host, |(addr, _)| addr)
    } else {
        match host.rsplit_once(':') {
            Some((name, port)) if !name.contains(':') && port.bytes().all(|b| b.is_ascii_digit()) => {
                name
            }
            _ => host,
        }
    };
    without_port.trim_end_matches('.').to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;

    #[test]
    fn extracts_host_path_and_ip() {
        let mut request = Request::builder()
            .uri("/admin/users?page=2")
            .header("host", "a.example.com:8443")
            .body(Body::empty())
            .unwrap();
        request
            .extensions_mut()
            .insert(ConnectInfo("10.1.2.3:51000".parse::<SocketAddr>().unwrap()));

        let before = Utc::now();
        let ctx = extract(&request);

        assert_eq!(ctx.host, "a.example.com:8443");
        assert_eq!(ctx.path, "/admin/users?page=2");
        assert_eq!(ctx.ip, "10.1.2.3");
        assert!(ctx.time >= before);
    }

    #[test]
    fn ipv6_client_address_has_no_brackets_or_port() {
        let mut request = Request::builder().uri("/").body(Body::empty()).unwrap();
        request
            .extensions_mut()
            .insert(ConnectInfo("[2001:db8::7]:443".parse::<SocketAddr>().unwrap()));
        assert_eq!(extract(&request).ip, "2001:db8::7");
    }

    #[test]
    fn ipv4_mapped_client_is_reported_as_ipv4() {
        let mut request = Request::builder().uri("/").body(Body::empty()).unwrap();
        request
            .extensions_mut()
            .insert(ConnectInfo("[::ffff:10.0.0.5]:443".parse::<SocketAddr>().unwrap()));
        assert_eq!(extract(&request).ip, "10.0.0.5");
    }

    #[test]
    fn missing_client_address_gives_empty_ip() {
        let request = Request::builder()
            .uri("/x")
            .header("host", "h")
            .body(Body::empty())
            .unwrap();
        let ctx = extract(&request);
        assert_eq!(ctx.ip, "");
        assert_eq!(ctx.host, "h");
    }

    #[test]
    fn authority_used_when_host_header_absent() {
        let request = Request::builder()
            .uri("https://h2.example.com/p")
            .body(Body::empty())
            .unwrap();
        assert_eq!(extract(&request).host, "h2.example.com");
        assert_eq!(extract(&request).path, "/p");
    }

    #[test]
    fn host_normalization() {
        assert_eq!(normalize_host("App.Example.com:8443"), "app.example.com");
        assert_eq!(normalize_host("app.example.com."), "app.example.com");
        assert_eq!(normalize_host("[::1]:8080"), "::1");
        assert_eq!(normalize_host("10.0.0.1"), "10.0.0.1");
    }
}
