//! AIPipe Gateway — authenticating, cost-metering reverse proxy for LLM
//! HTTP APIs.

use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};

use aipipe_gateway::{cli::Cli, config::Config, gateway::Gateway, setup_tracing};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = setup_tracing(&cli.log_level, cli.log_format.as_deref()) {
        eprintln!("failed to set up tracing: {e}");
        return ExitCode::FAILURE;
    }

    let config = match Config::load() {
        Ok(mut config) => {
            if let Some(port) = cli.port {
                config.bind_port = port;
            }
            if let Some(ref host) = cli.host {
                config.bind_host = host.clone();
            }
            config
        }
        Err(e) => {
            error!("failed to load configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    info!(
        version = env!("CARGO_PKG_VERSION"),
        host = %config.bind_host,
        port = config.bind_port,
        "starting aipipe-gateway"
    );

    let gateway = match Gateway::new(config).await {
        Ok(g) => g,
        Err(e) => {
            error!("failed to initialize gateway: {e}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = gateway.run().await {
        error!("gateway error: {e}");
        return ExitCode::FAILURE;
    }

    info!("gateway shutdown complete");
    ExitCode::SUCCESS
}
