//! Helios - identity-aware access gateway
//!
//! OAuth2/OIDC login and rule-based authorization in front of HTTP upstreams.

use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};

use helios::{
    cli::{Cli, Command},
    config::Config,
    gateway::Gateway,
    setup_tracing,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Setup tracing
    if let Err(e) = setup_tracing(&cli.log_level, cli.log_format) {
        eprintln!("Failed to setup tracing: {e}");
        return ExitCode::FAILURE;
    }

    // Only one rustls provider is compiled in; ignore "already installed"
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

    match cli.command {
        Some(Command::Check) => run_check(&cli),
        Some(Command::Serve) | None => run_server(&cli).await,
    }
}

fn load_config(cli: &Cli) -> Option<Config> {
    match Config::load(cli.config.as_deref()) {
        Ok(mut config) => {
            // Apply CLI overrides
            if let Some(port) = cli.port {
                config.server.listen_port = port;
            }
            Some(config)
        }
        Err(e) => {
            error!("Failed to load configuration: {e}");
            None
        }
    }
}

/// Load, validate, and build everything `serve` would, without binding.
fn run_check(cli: &Cli) -> ExitCode {
    let Some(config) = load_config(cli) else {
        return ExitCode::FAILURE;
    };

    let upstreams = config.upstreams.len();
    let auth = config.auth_required();
    let provider = config.identity.provider;

    match Gateway::new(config) {
        Ok(gateway) => {
            println!("Configuration OK");
            println!("  Upstreams: {upstreams}");
            println!("  Routes:    {}", gateway.route_count());
            match provider {
                Some(kind) if auth => println!("  Identity:  {kind}"),
                _ => println!("  Identity:  none (no route has auth_enabled)"),
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Configuration invalid: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run_server(cli: &Cli) -> ExitCode {
    let Some(config) = load_config(cli) else {
        return ExitCode::FAILURE;
    };

    info!(
        version = env!("CARGO_PKG_VERSION"),
        port = config.server.listen_port,
        upstreams = config.upstreams.len(),
        tls = config.server.tls_context.is_some(),
        "Starting Helios"
    );

    let gateway = match Gateway::new(config) {
        Ok(g) => g,
        Err(e) => {
            error!("Failed to create gateway: {e}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = gateway.run().await {
        error!("Gateway error: {e}");
        return ExitCode::FAILURE;
    }

    info!("Gateway shutdown complete");
    ExitCode::SUCCESS
}
