//! Authentication gate for protected routes.
//!
//! Flow:
//! 1. A request carrying a valid session token (the `Helios-Jwt-Assertion`
//!    header, else the `Helios_Authorization` cookie) passes through with its
//!    [`SessionClaims`] attached as a request extension.
//! 2. Anything else is answered with `307` to the identity provider's login
//!    page, carrying this gateway's callback URL and the original request URI
//!    as `state`.
//! 3. The provider sends the browser to [`CALLBACK_PATH`]; the code is
//!    exchanged for a profile, a session token is minted and set as a cookie,
//!    and the browser is sent back (`302`) to the original URI.
//!
//! [`LOGOUT_PATH`] expires the cookie. There is no server-side session to
//! clear, so a copied token stays valid until it expires.

pub mod state;
pub mod token;

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, HeaderValue, Request, StatusCode, Uri, header},
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use time::OffsetDateTime;
use tracing::{debug, error, info, warn};

use crate::authorization::context::request_host;
use crate::providers::{CallbackRequest, IdentityProvider, ProviderError};

pub use state::{StateCodec, StateError};
pub use token::SessionClaims;

/// Cookie carrying the session token.
pub const COOKIE_NAME: &str = "Helios_Authorization";

/// Header carrying the session token; wins over the cookie.
pub const HEADER_NAME: &str = "Helios-Jwt-Assertion";

/// OAuth2 redirect target, served on every host.
pub const CALLBACK_PATH: &str = "/.oauth2/callback";

/// Clears the session cookie.
pub const LOGOUT_PATH: &str = "/.oauth2/logout";

const DEFAULT_CALLBACK_TIMEOUT: Duration = Duration::from_secs(30);

/// Authentication state shared by all routes. Built once at startup.
pub struct Authenticator {
    provider: Arc<dyn IdentityProvider>,
    secret: String,
    expiration: Duration,
    state: StateCodec,
    callback_timeout: Duration,
    tls: bool,
    logout_redirect: String,
}

impl std::fmt::Debug for Authenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Authenticator")
            .field("provider", &self.provider.name())
            .field("expiration", &self.expiration)
            .field("state", &self.state)
            .field("callback_timeout", &self.callback_timeout)
            .field("tls", &self.tls)
            .field("logout_redirect", &self.logout_redirect)
            .finish_non_exhaustive()
    }
}

impl Authenticator {
    /// Create an authenticator issuing tokens signed with `secret` that
    /// live for `expiration`.
    pub fn new(
        provider: Arc<dyn IdentityProvider>,
        secret: impl Into<String>,
        expiration: Duration,
    ) -> Self {
        Self {
            provider,
            secret: secret.into(),
            expiration,
            state: StateCodec::plain(),
            callback_timeout: DEFAULT_CALLBACK_TIMEOUT,
            tls: false,
            logout_redirect: "/".to_string(),
        }
    }

    /// Bind the redirect state to the signing secret with an HMAC.
    #[must_use]
    pub fn with_signed_state(mut self, enabled: bool) -> Self {
        self.state = if enabled {
            StateCodec::signed(&self.secret)
        } else {
            StateCodec::plain()
        };
        self
    }

    /// Upper bound for the provider's code exchange and profile fetch.
    #[must_use]
    pub fn with_callback_timeout(mut self, timeout: Duration) -> Self {
        self.callback_timeout = timeout;
        self
    }

    /// The listener terminates TLS; callback URLs default to `https`.
    #[must_use]
    pub fn with_tls(mut self, tls: bool) -> Self {
        self.tls = tls;
        self
    }

    /// Where logout sends the browser.
    #[must_use]
    pub fn with_logout_redirect(mut self, to: impl Into<String>) -> Self {
        self.logout_redirect = to.into();
        self
    }

    /// Verify the request's session token, if any.
    pub fn authenticate(&self, headers: &HeaderMap) -> Option<SessionClaims> {
        let token = extract_token(headers)?;
        match token::verify(&self.secret, &token) {
            Ok(claims) => Some(claims),
            Err(e) => {
                debug!(error = %e, "Rejected session token");
                None
            }
        }
    }

    /// This gateway's callback URL as seen by the browser.
    pub fn callback_url(&self, headers: &HeaderMap, uri: &Uri) -> String {
        let scheme = headers
            .get("x-forwarded-proto")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .unwrap_or(if self.tls { "https" } else { "http" });
        let host = request_host(headers, uri).unwrap_or_default();
        format!("{scheme}://{host}{CALLBACK_PATH}")
    }

    /// Redirect to the provider's login page, remembering `uri` in `state`.
    pub fn challenge(&self, headers: &HeaderMap, uri: &Uri) -> Response {
        let original = uri
            .path_and_query()
            .map_or("/", axum::http::uri::PathAndQuery::as_str);
        let state = self.state.encode(original);
        let login_url = self
            .provider
            .login_url(&self.callback_url(headers, uri), &state);

        debug!(provider = self.provider.name(), uri = %original, "Redirecting to identity provider");
        Redirect::temporary(&login_url).into_response()
    }

    /// Complete the login: exchange the code, mint a token, set the cookie
    /// and send the browser back to where it started.
    pub async fn complete_login(&self, headers: &HeaderMap, uri: &Uri) -> Response {
        let params = CallbackParams::parse(uri);

        if let Some(err) = &params.error {
            warn!(
                provider = self.provider.name(),
                error = %err,
                description = params.error_description.as_deref().unwrap_or(""),
                "Identity provider returned an error"
            );
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }

        let destination = match self.state.decode(params.state.as_deref().unwrap_or("")) {
            Ok(destination) => local_destination(destination),
            Err(e) => {
                error!(error = %e, "Cannot decode redirect state");
                return StatusCode::INTERNAL_SERVER_ERROR.into_response();
            }
        };
        let Ok(location) = HeaderValue::try_from(destination) else {
            error!("Redirect state is not a valid Location header value");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        };

        let Some(code) = params.code.filter(|c| !c.is_empty()) else {
            error!(provider = self.provider.name(), "Callback without authorization code");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        };

        let request = CallbackRequest {
            code,
            redirect_uri: self.callback_url(headers, uri),
        };
        let fetched = tokio::time::timeout(self.callback_timeout, self.provider.fetch_user(&request))
            .await
            .unwrap_or(Err(ProviderError::Timeout(self.callback_timeout)));
        let profile = match fetched {
            Ok(profile) => profile,
            Err(e) => {
                error!(provider = self.provider.name(), error = %e, "Login failed");
                return StatusCode::INTERNAL_SERVER_ERROR.into_response();
            }
        };

        let Some((expires_at, cookie_expiry)) = session_expiry(self.expiration) else {
            error!(expires = ?self.expiration, "Session expiry out of range");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        };
        let session = match token::issue(&self.secret, &profile.email, expires_at) {
            Ok(session) => session,
            Err(e) => {
                error!(error = %e, "Cannot issue session token");
                return StatusCode::INTERNAL_SERVER_ERROR.into_response();
            }
        };

        info!(provider = self.provider.name(), user = %profile.email, "User logged in");

        let cookie = Cookie::build((COOKIE_NAME, session))
            .path("/")
            .secure(true)
            .http_only(true)
            .same_site(SameSite::Lax)
            .expires(cookie_expiry);
        let jar = CookieJar::new().add(cookie);

        (StatusCode::FOUND, jar, [(header::LOCATION, location)]).into_response()
    }

    /// Expire the session cookie and redirect to the logout page.
    pub fn logout(&self) -> Response {
        let removal = Cookie::build((COOKIE_NAME, ""))
            .path("/")
            .secure(true)
            .http_only(true)
            .max_age(time::Duration::ZERO)
            .expires(OffsetDateTime::UNIX_EPOCH);
        let jar = CookieJar::new().add(removal);

        (
            StatusCode::FOUND,
            jar,
            [(header::LOCATION, self.logout_redirect.clone())],
        )
            .into_response()
    }
}

/// Session token from the request: the header if present, else the cookie.
///
/// A malformed cookie header counts as no credential.
pub fn extract_token(headers: &HeaderMap) -> Option<String> {
    if let Some(value) = headers.get(HEADER_NAME) {
        return value
            .to_str()
            .ok()
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(ToString::to_string);
    }

    CookieJar::from_headers(headers)
        .get(COOKIE_NAME)
        .map(|c| c.value().to_string())
        .filter(|v| !v.is_empty())
}

/// Gate a route behind a valid session.
pub async fn authentication_middleware(
    State(auth): State<Arc<Authenticator>>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    match auth.authenticate(request.headers()) {
        Some(claims) => {
            debug!(user = %claims.sub, path = %request.uri().path(), "Authenticated request");
            request.extensions_mut().insert(claims);
            next.run(request).await
        }
        None => auth.challenge(request.headers(), request.uri()),
    }
}

/// `GET /.oauth2/callback`
pub async fn callback_handler(
    State(auth): State<Arc<Authenticator>>,
    request: Request<Body>,
) -> Response {
    auth.complete_login(request.headers(), request.uri()).await
}

/// `GET /.oauth2/logout`
pub async fn logout_handler(State(auth): State<Arc<Authenticator>>) -> Response {
    auth.logout()
}

#[derive(Debug, Default)]
struct CallbackParams {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

impl CallbackParams {
    fn parse(uri: &Uri) -> Self {
        let mut params = Self::default();
        let Some(query) = uri.query() else {
            return params;
        };
        for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
            let slot = match key.as_ref() {
                "code" => &mut params.code,
                "state" => &mut params.state,
                "error" => &mut params.error,
                "error_description" => &mut params.error_description,
                _ => continue,
            };
            slot.get_or_insert_with(|| value.into_owned());
        }
        params
    }
}

/// Only same-origin paths are accepted as post-login destinations.
/// Token and cookie expiry `lifetime` from now, if both are representable.
fn session_expiry(lifetime: Duration) -> Option<(SystemTime, OffsetDateTime)> {
    let expires_at = SystemTime::now().checked_add(lifetime)?;
    let secs = expires_at.duration_since(UNIX_EPOCH).ok()?.as_secs();
    let cookie_expiry = OffsetDateTime::from_unix_timestamp(i64::try_from(secs).ok()?).ok()?;
    Some((expires_at, cookie_expiry))
}

fn local_destination(destination: String) -> String {
    let local = destination.starts_with('/')
        && !destination.starts_with("//")
        && !destination.starts_with("/\\");
    if local {
        destination
    } else {
        warn!(destination = %destination, "Ignoring non-local redirect target in state");
        "/".to_string()
    }
}
