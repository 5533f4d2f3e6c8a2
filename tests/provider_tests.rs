//! Identity provider tests against a local OAuth2 server
//!
//! Runs the real providers over HTTP:
//! - Code exchange at the token endpoint
//! - Userinfo fetch and decode
//! - `id_token` claims (Azure AD)
//! - A full login through the gateway callback

use std::collections::HashMap;
use std::net::SocketAddr;

use axum::{
    Form, Json, Router,
    body::Body,
    http::{HeaderMap, Request, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use pretty_assertions::assert_eq;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tower::ServiceExt;

use helios::authentication::token;
use helios::config::Config;
use helios::gateway::Gateway;
use helios::providers::{
    Auth0Provider, AzureAdProvider, CallbackRequest, GoogleProvider, IdentityProvider,
    OidcProvider, ProviderConfig, ProviderError,
};

const CLIENT_ID: &str = "helios-test";
const CLIENT_SECRET: &str = "client-secret";
const REDIRECT_URI: &str = "https://gw.example.com/.oauth2/callback";

fn id_token(claims: &Value) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"RS256","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
    format!("{header}.{payload}.c2lnbmF0dXJl")
}

/// Token endpoint: the authorization code picks the outcome.
async fn token_endpoint(Form(form): Form<HashMap<String, String>>) -> Response {
    let field = |name: &str| form.get(name).map(String::as_str);
    if field("grant_type") != Some("authorization_code")
        || field("client_id") != Some(CLIENT_ID)
        || field("client_secret") != Some(CLIENT_SECRET)
        || field("redirect_uri") != Some(REDIRECT_URI)
    {
        return (StatusCode::UNAUTHORIZED, Json(json!({"error": "invalid_client"})))
            .into_response();
    }

    let grant = |access_token: &str, id_token: Option<String>| {
        Json(json!({
            "access_token": access_token,
            "token_type": "Bearer",
            "expires_in": 3600,
            "id_token": id_token,
        }))
        .into_response()
    };

    match field("code").unwrap_or_default() {
        "good" => grant(
            "at-good",
            Some(id_token(&json!({"sub": "1", "email": "alice@example.com"}))),
        ),
        "no-email" => grant("at-no-email", None),
        "broken-profile" => grant("at-broken", None),
        "profile-down" => grant("at-down", None),
        "username-only" => grant(
            "at-username",
            Some(id_token(&json!({"sub": "2", "preferred_username": "bob@corp.example"}))),
        ),
        "no-id-token" => grant("at-good", None),
        _ => (StatusCode::BAD_REQUEST, Json(json!({"error": "invalid_grant"}))).into_response(),
    }
}

/// Userinfo endpoint: the bearer token picks the outcome.
async fn userinfo_endpoint(headers: HeaderMap) -> Response {
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .unwrap_or_default();

    match bearer {
        "at-good" => Json(json!({"sub": "1", "email": "alice@example.com"})).into_response(),
        "at-no-email" => Json(json!({"sub": "3"})).into_response(),
        "at-broken" => "<html>not json</html>".into_response(),
        "at-down" => StatusCode::SERVICE_UNAVAILABLE.into_response(),
        _ => StatusCode::UNAUTHORIZED.into_response(),
    }
}

async fn spawn_identity_server() -> SocketAddr {
    let app = Router::new()
        .route("/token", post(token_endpoint))
        .route("/userinfo", get(userinfo_endpoint));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

fn provider_config(idp: SocketAddr) -> ProviderConfig {
    ProviderConfig {
        client_id: CLIENT_ID.to_string(),
        client_secret: CLIENT_SECRET.to_string(),
        auth_url: Some(format!("http://{idp}/authorize")),
        token_url: Some(format!("http://{idp}/token")),
        profile_url: Some(format!("http://{idp}/userinfo")),
        ..Default::default()
    }
}

fn callback(code: &str) -> CallbackRequest {
    CallbackRequest {
        code: code.to_string(),
        redirect_uri: REDIRECT_URI.to_string(),
    }
}

async fn oidc() -> OidcProvider {
    let idp = spawn_identity_server().await;
    OidcProvider::new(&provider_config(idp), reqwest::Client::new()).unwrap()
}

#[tokio::test]
async fn userinfo_email_becomes_profile() {
    let provider = oidc().await;
    let profile = provider.fetch_user(&callback("good")).await.unwrap();
    assert_eq!(profile.email, "alice@example.com");
}

#[tokio::test]
async fn rejected_code_is_code_exchange_error() {
    let provider = oidc().await;
    let err = provider.fetch_user(&callback("expired")).await.unwrap_err();
    assert!(matches!(err, ProviderError::CodeExchange(_)), "{err}");
    assert!(err.to_string().contains("400"));
}

#[tokio::test]
async fn wrong_client_secret_is_code_exchange_error() {
    let idp = spawn_identity_server().await;
    let mut config = provider_config(idp);
    config.client_secret = "wrong".to_string();
    let provider = OidcProvider::new(&config, reqwest::Client::new()).unwrap();

    let err = provider.fetch_user(&callback("good")).await.unwrap_err();
    assert!(matches!(err, ProviderError::CodeExchange(_)), "{err}");
}

#[tokio::test]
async fn unreachable_token_endpoint_is_code_exchange_error() {
    let config = ProviderConfig {
        token_url: Some("http://127.0.0.1:1/token".to_string()),
        auth_url: Some("http://127.0.0.1:1/authorize".to_string()),
        ..provider_config("127.0.0.1:1".parse().unwrap())
    };
    let provider = OidcProvider::new(&config, reqwest::Client::new()).unwrap();

    let err = provider.fetch_user(&callback("good")).await.unwrap_err();
    assert!(matches!(err, ProviderError::CodeExchange(_)), "{err}");
}

#[tokio::test]
async fn failing_userinfo_is_profile_fetch_error() {
    let provider = oidc().await;
    let err = provider.fetch_user(&callback("profile-down")).await.unwrap_err();
    assert!(matches!(err, ProviderError::ProfileFetch(_)), "{err}");
}

#[tokio::test]
async fn non_json_userinfo_is_profile_decode_error() {
    let provider = oidc().await;
    let err = provider.fetch_user(&callback("broken-profile")).await.unwrap_err();
    assert!(matches!(err, ProviderError::ProfileDecode(_)), "{err}");
}

#[tokio::test]
async fn userinfo_without_email_is_rejected() {
    let provider = oidc().await;
    let err = provider.fetch_user(&callback("no-email")).await.unwrap_err();
    assert!(matches!(err, ProviderError::NoEmail), "{err}");
}

#[tokio::test]
async fn oidc_without_userinfo_reads_id_token() {
    let idp = spawn_identity_server().await;
    let mut config = provider_config(idp);
    config.profile_url = None;
    let provider = OidcProvider::new(&config, reqwest::Client::new()).unwrap();

    let profile = provider.fetch_user(&callback("good")).await.unwrap();
    assert_eq!(profile.email, "alice@example.com");
}

#[tokio::test]
async fn google_and_auth0_use_userinfo() {
    let idp = spawn_identity_server().await;
    let config = provider_config(idp);

    let google = GoogleProvider::new(&config, reqwest::Client::new()).unwrap();
    assert_eq!(
        google.fetch_user(&callback("good")).await.unwrap().email,
        "alice@example.com"
    );
    assert!(matches!(
        google.fetch_user(&callback("no-email")).await,
        Err(ProviderError::NoEmail)
    ));

    let auth0 = Auth0Provider::new(&config, reqwest::Client::new()).unwrap();
    assert_eq!(
        auth0.fetch_user(&callback("good")).await.unwrap().email,
        "alice@example.com"
    );
    assert!(matches!(
        auth0.fetch_user(&callback("broken-profile")).await,
        Err(ProviderError::ProfileDecode(_))
    ));
}

#[tokio::test]
async fn azure_reads_id_token_claims() {
    let idp = spawn_identity_server().await;
    let provider = AzureAdProvider::new(&provider_config(idp), reqwest::Client::new()).unwrap();

    let profile = provider.fetch_user(&callback("good")).await.unwrap();
    assert_eq!(profile.email, "alice@example.com");

    let profile = provider.fetch_user(&callback("username-only")).await.unwrap();
    assert_eq!(profile.email, "bob@corp.example");

    let err = provider.fetch_user(&callback("no-id-token")).await.unwrap_err();
    assert!(matches!(err, ProviderError::IdToken(_)), "{err}");

    let err = provider.fetch_user(&callback("expired")).await.unwrap_err();
    assert!(matches!(err, ProviderError::CodeExchange(_)), "{err}");
}

fn gateway_config(idp: SocketAddr) -> Config {
    let yaml = format!(
        r#"
upstreams:
  - name: app
    url: "http://127.0.0.1:1"
routes:
  - host: "gw.example.com"
    http:
      paths:
        - path: "/"
          upstream: app
          auth_enabled: true
server:
  tls_context:
    certificate_path: /unused/cert.pem
    private_key_path: /unused/key.pem
identity:
  provider: oidc
  client_id: "{CLIENT_ID}"
  client_secret: "{CLIENT_SECRET}"
  oauth2:
    auth_url: "http://{idp}/authorize"
    token_url: "http://{idp}/token"
    profile_url: "http://{idp}/userinfo"
jwt:
  secret: "gateway-secret"
"#
    );
    serde_yaml::from_str(&yaml).unwrap()
}

async fn gateway_callback(router: &Router, code: &str) -> Response {
    let state = "L2Rhc2hib2FyZA%3D%3D";
    let request = Request::builder()
        .uri(format!("/.oauth2/callback?code={code}&state={state}"))
        .header(header::HOST, "gw.example.com")
        .body(Body::empty())
        .unwrap();
    router.clone().oneshot(request).await.unwrap()
}

#[tokio::test]
async fn gateway_login_through_real_provider() {
    let idp = spawn_identity_server().await;
    let router = Gateway::new(gateway_config(idp)).unwrap().router();

    let response = gateway_callback(&router, "good").await;
    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(response.headers()[header::LOCATION], "/dashboard");

    let set_cookie = response.headers()[header::SET_COOKIE].to_str().unwrap();
    let session = set_cookie
        .split(';')
        .next()
        .and_then(|pair| pair.strip_prefix("Helios_Authorization="))
        .unwrap();
    assert_eq!(
        token::verify("gateway-secret", session).unwrap().sub,
        "alice@example.com"
    );
}

#[tokio::test]
async fn gateway_provider_failures_are_500_without_cookie() {
    let idp = spawn_identity_server().await;
    let router = Gateway::new(gateway_config(idp)).unwrap().router();

    for code in ["expired", "profile-down", "broken-profile", "no-email"] {
        let response = gateway_callback(&router, code).await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR, "{code}");
        assert!(response.headers().get(header::SET_COOKIE).is_none(), "{code}");
        let body = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
        assert!(body.is_empty(), "{code}: {body:?}");
    }
}
