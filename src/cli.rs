//! Command-line interface

use clap::Parser;

/// Authenticating, cost-metering reverse proxy for LLM HTTP APIs
#[derive(Parser, Debug)]
#[command(name = "aipipe-gateway")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Host to bind to
    #[arg(long, env = "BIND_HOST")]
    pub host: Option<String>,

    /// Port to listen on
    #[arg(short, long, env = "BIND_PORT")]
    pub port: Option<u16>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "AIPIPE_LOG_LEVEL")]
    pub log_level: String,

    /// Log format (text, json)
    #[arg(long, env = "AIPIPE_LOG_FORMAT")]
    pub log_format: Option<String>,
}
