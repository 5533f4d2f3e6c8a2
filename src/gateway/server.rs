//! Gateway server

use std::collections::HashMap;
use std::future::IntoFuture;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{Router, routing::get};
use axum_server::tls_rustls::RustlsConfig;
use tokio::net::TcpListener;
use tokio::signal;
use tower_http::{catch_panic::CatchPanicLayer, trace::TraceLayer};
use tracing::{info, warn};

use super::proxy::Upstream;
use super::routes::{PathRoute, RouteTable, dispatch};
use crate::authentication::{
    Authenticator, CALLBACK_PATH, LOGOUT_PATH, callback_handler, logout_handler,
};
use crate::authorization::Policy;
use crate::config::{Config, TlsContext};
use crate::providers::{self, IdentityProvider};
use crate::{Error, Result, SERVER_NAME};

/// Health endpoint, answered on every host without authentication
pub const HEALTH_PATH: &str = "/.helios/health";

/// Helios gateway server
pub struct Gateway {
    /// Configuration
    config: Config,
    /// Fully assembled application
    router: Router,
    /// Number of path routes
    routes: usize,
}

impl Gateway {
    /// Build the gateway with the configured identity provider.
    pub fn new(config: Config) -> Result<Self> {
        let provider = match config.identity.provider {
            Some(kind) if config.auth_required() => {
                let http = reqwest::Client::builder()
                    .timeout(config.server.timeout)
                    .build()?;
                Some(providers::build(
                    kind,
                    &config.identity.provider_config(),
                    http,
                )?)
            }
            _ => None,
        };

        Self::with_provider(config, provider)
    }

    /// Build the gateway around an already constructed provider.
    ///
    /// Fails on an unknown upstream, an unparsable upstream URL, a rule that
    /// does not compile, or an auth-enabled route without a provider.
    pub fn with_provider(
        config: Config,
        provider: Option<Arc<dyn IdentityProvider>>,
    ) -> Result<Self> {
        let tls = config.server.tls_context.is_some();

        let authenticator = provider.map(|provider| {
            info!(provider = provider.name(), "Identity provider configured");
            Arc::new(
                Authenticator::new(provider, config.jwt.secret.clone(), config.jwt.expires)
                    .with_signed_state(config.identity.sign_state)
                    .with_callback_timeout(config.server.timeout)
                    .with_tls(tls)
                    .with_logout_redirect(config.identity.logout_redirect.clone()),
            )
        });

        let mut upstreams = HashMap::new();
        for up in &config.upstreams {
            let upstream = Upstream::new(
                &up.name,
                &up.url,
                up.connect_timeout,
                config.server.timeout,
                config.server.idle_timeout,
            )?
            .with_tls(tls);
            upstreams.insert(up.name.clone(), Arc::new(upstream));
        }

        let mut table = RouteTable::new();
        for route in &config.routes {
            for path in &route.http.paths {
                let name = format!("{}{}", route.host, path.path);

                let upstream = upstreams.get(&path.upstream).cloned().ok_or_else(|| {
                    Error::Config(format!(
                        "Upstream '{}' for route '{name}' not found",
                        path.upstream
                    ))
                })?;

                let policy = Policy::compile(&path.rules).map_err(|e| Error::policy(&name, e))?;

                let auth = if path.auth_enabled {
                    let auth = authenticator.clone().ok_or_else(|| {
                        Error::Config(format!(
                            "Route '{name}' has auth_enabled but no identity provider is configured"
                        ))
                    })?;
                    Some(auth)
                } else {
                    None
                };

                info!(
                    route = %name,
                    upstream = %upstream.name(),
                    auth = path.auth_enabled,
                    rules = policy.len(),
                    "Registered route"
                );
                table.insert(
                    &route.host,
                    PathRoute::new(&path.path, upstream, Arc::new(policy), auth),
                );
            }
        }

        if table.is_empty() {
            warn!("No routes configured, every request except health will be answered 404");
        }
        let routes = table.len();
        let router = create_router(table, authenticator);

        Ok(Self {
            config,
            router,
            routes,
        })
    }

    /// The assembled application.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Number of path routes registered.
    pub fn route_count(&self) -> usize {
        self.routes
    }

    /// Run until SIGINT / SIGTERM, then drain for at most `shutdown_timeout`.
    pub async fn run(self) -> Result<()> {
        let addr = self.config.server.listen_addr()?;
        let app = self
            .router
            .into_make_service_with_connect_info::<SocketAddr>();
        let drain = self.config.server.shutdown_timeout;

        info!("============================================================");
        info!("{SERVER_NAME}");
        info!("============================================================");
        info!(routes = self.routes, upstreams = self.config.upstreams.len(), "Routing table ready");
        if !self.config.auth_required() {
            warn!("AUTHENTICATION disabled - no route has auth_enabled");
        }

        match &self.config.server.tls_context {
            Some(TlsContext {
                certificate_path,
                private_key_path,
            }) => {
                let tls_config = RustlsConfig::from_pem_file(certificate_path, private_key_path)
                    .await
                    .map_err(|e| Error::Config(format!("TLS config error: {e}")))?;

                let handle = axum_server::Handle::new();
                let shutdown = handle.clone();
                tokio::spawn(async move {
                    shutdown_signal().await;
                    shutdown.graceful_shutdown(Some(drain));
                });

                info!(addr = %addr, "Listening (https)");
                axum_server::bind_rustls(addr, tls_config)
                    .handle(handle)
                    .serve(app)
                    .await
                    .map_err(|e| Error::Internal(format!("Server error: {e}")))?;
            }
            None => {
                let listener = TcpListener::bind(addr).await?;
                info!(addr = %addr, "Listening (http)");

                let (shutdown_tx, mut shutdown_rx) = tokio::sync::broadcast::channel::<()>(1);
                let server = axum::serve(listener, app)
                    .with_graceful_shutdown(async move {
                        let _ = shutdown_rx.recv().await;
                    })
                    .into_future();
                tokio::pin!(server);

                tokio::select! {
                    result = &mut server => {
                        return result.map_err(|e| Error::Internal(e.to_string()));
                    }
                    () = shutdown_signal() => {
                        let _ = shutdown_tx.send(());
                    }
                }

                match tokio::time::timeout(drain, server).await {
                    Ok(result) => result.map_err(|e| Error::Internal(e.to_string()))?,
                    Err(_) => warn!(timeout = ?drain, "Shutdown timed out, dropping open connections"),
                }
            }
        }

        Ok(())
    }
}

/// Callback, logout and health on every host, then the route table.
fn create_router(table: RouteTable, authenticator: Option<Arc<Authenticator>>) -> Router {
    let mut router = Router::new().route(HEALTH_PATH, get(health_handler));

    if let Some(auth) = authenticator {
        router = router.merge(
            Router::new()
                .route(CALLBACK_PATH, get(callback_handler))
                .route(LOGOUT_PATH, get(logout_handler))
                .with_state(auth),
        );
    }

    router
        .fallback(dispatch)
        .with_state(Arc::new(table))
        .layer(CatchPanicLayer::new())
        .layer(TraceLayer::new_for_http())
}

async fn health_handler() -> &'static str {
    "ok"
}

/// Shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Shutdown signal received");
}
