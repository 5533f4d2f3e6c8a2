//! Streaming reverse proxy to an upstream.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{HeaderMap, HeaderName, HeaderValue, Request, StatusCode, header},
    response::{IntoResponse, Response},
};
use tracing::{debug, warn};
use url::Url;

use crate::authentication::SessionClaims;
use crate::authorization::context::request_host;
use crate::{Error, Result};

/// Header carrying the authenticated subject to the upstream
pub const USER_HEADER: &str = "x-helios-user";

/// Connection-scoped headers never forwarded in either direction
static HOP_BY_HOP: [HeaderName; 8] = [
    header::CONNECTION,
    HeaderName::from_static("keep-alive"),
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

/// A named backend and the client used to reach it.
#[derive(Debug, Clone)]
pub struct Upstream {
    name: String,
    base: Url,
    client: reqwest::Client,
    tls: bool,
}

impl Upstream {
    /// `timeout` bounds the whole exchange; `idle_timeout` applies to pooled
    /// connections.
    pub fn new(
        name: impl Into<String>,
        url: &str,
        connect_timeout: Duration,
        timeout: Duration,
        idle_timeout: Duration,
    ) -> Result<Self> {
        let name = name.into();
        let base = Url::parse(url)
            .map_err(|e| Error::Config(format!("Cannot parse upstream '{name}' url: {e}")))?;

        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .timeout(timeout)
            .pool_idle_timeout(idle_timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()?;

        Ok(Self {
            name,
            base,
            client,
            tls: false,
        })
    }

    /// Whether the gateway itself serves HTTPS, for `X-Forwarded-Proto`.
    pub fn with_tls(mut self, tls: bool) -> Self {
        self.tls = tls;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Upstream URL for a request path and query: the base path is joined
    /// with the request path.
    pub fn target(&self, path: &str, query: Option<&str>) -> Url {
        let mut url = self.base.clone();
        let base_path = self.base.path().trim_end_matches('/');
        url.set_path(&format!("{base_path}{path}"));
        url.set_query(query);
        url
    }
}

/// Fallback handler of every route: forward to the upstream.
pub async fn forward(State(upstream): State<Arc<Upstream>>, request: Request<Body>) -> Response {
    let (parts, body) = request.into_parts();
    let target = upstream.target(parts.uri.path(), parts.uri.query());

    let client_ip = parts
        .extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_canonical().to_string());
    let user = parts
        .extensions
        .get::<SessionClaims>()
        .map(|claims| claims.sub.clone());
    let scheme = if upstream.tls { "https" } else { "http" };
    let host = request_host(&parts.headers, &parts.uri);

    let mut headers = parts.headers.clone();
    strip_hop_by_hop(&mut headers);
    headers.remove(header::HOST);
    headers.remove(USER_HEADER);
    append_forwarded(&mut headers, client_ip.as_deref(), host.as_deref(), scheme);
    if let Some(user) = user.and_then(|u| HeaderValue::from_str(&u).ok()) {
        headers.insert(USER_HEADER, user);
    }

    debug!(
        upstream = %upstream.name,
        method = %parts.method,
        target = %target,
        "Proxying request"
    );

    let result = upstream
        .client
        .request(parts.method.clone(), target)
        .headers(headers)
        .body(reqwest::Body::wrap_stream(body.into_data_stream()))
        .send()
        .await;

    match result {
        Ok(response) => stream_response(response),
        Err(e) if e.is_timeout() => {
            warn!(upstream = %upstream.name, error = %e, "Upstream timed out");
            StatusCode::GATEWAY_TIMEOUT.into_response()
        }
        Err(e) => {
            warn!(upstream = %upstream.name, error = %e, "Upstream request failed");
            StatusCode::BAD_GATEWAY.into_response()
        }
    }
}

fn stream_response(response: reqwest::Response) -> Response {
    let status = response.status();
    let mut headers = response.headers().clone();
    strip_hop_by_hop(&mut headers);

    let mut out = Body::from_stream(response.bytes_stream()).into_response();
    *out.status_mut() = status;
    *out.headers_mut() = headers;
    out
}

/// Remove hop-by-hop headers, including any named in `Connection`.
fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let listed: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();

    for name in HOP_BY_HOP.iter().chain(&listed) {
        headers.remove(name);
    }
}

fn append_forwarded(
    headers: &mut HeaderMap,
    client_ip: Option<&str>,
    host: Option<&str>,
    proto: &str,
) {
    if let Some(ip) = client_ip {
        let value = match headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
        {
            Some(prior) if !prior.trim().is_empty() => format!("{prior}, {ip}"),
            _ => ip.to_string(),
        };
        if let Ok(value) = HeaderValue::from_str(&value) {
            headers.insert("x-forwarded-for", value);
        }
    }

    if let Some(host) = host.and_then(|h| HeaderValue::from_str(h).ok()) {
        headers.insert("x-forwarded-host", host);
    }
    if let Ok(proto) = HeaderValue::from_str(proto) {
        headers.insert("x-forwarded-proto", proto);
    }
}
