//! Command-line interface

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

/// Helios - authenticating, policy-enforcing reverse proxy
#[derive(Parser, Debug)]
#[command(name = "helios")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short, long, env = "HELIOS_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Port to listen on (overrides server.listen_port)
    #[arg(short, long, env = "HELIOS_PORT")]
    pub port: Option<u16>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(
        long,
        default_value = "info",
        env = "HELIOS_LOG_LEVEL",
        global = true
    )]
    pub log_level: String,

    /// Log format
    #[arg(
        long,
        value_enum,
        default_value_t = LogFormat::Text,
        env = "HELIOS_LOG_FORMAT",
        global = true
    )]
    pub log_format: LogFormat,

    /// Subcommand (optional - defaults to server mode)
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Log output format
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the gateway server (default)
    Serve,

    /// Validate the configuration and compile every route's rules
    Check,
}
