//! Gateway server — process-level wiring: build the shared state (token
//! service, cost ledger, provider registry), bind a listener, and serve the
//! router with graceful shutdown on `SIGINT`/`SIGTERM`.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::signal;
use tracing::info;

use super::router::{AppState, create_router};
use crate::config::Config;
use crate::ledger::CostLedger;
use crate::provider::ProviderRegistry;
use crate::token::{JwksCache, TokenService};
use crate::{Error, Result};

/// The AIPipe gateway server.
pub struct Gateway {
    config: Config,
    state: Arc<AppState>,
}

impl Gateway {
    /// Build the gateway: connect the cost ledger, construct the token
    /// service and provider registry, and assemble shared state.
    ///
    /// # Errors
    ///
    /// Returns an error if the ledger's database connection or schema
    /// migration fails.
    pub async fn new(config: Config) -> Result<Self> {
        let ledger = CostLedger::connect(&config.ledger_database_url).await?;
        let tokens = TokenService::new(config.aipipe_secret.clone());
        let providers = ProviderRegistry::with_defaults();
        let jwks = JwksCache::new();
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| Error::Internal(format!("failed to build HTTP client: {e}")))?;

        let state = Arc::new(AppState {
            config: config.clone(),
            tokens,
            ledger,
            providers,
            jwks,
            http,
        });

        Ok(Self { config, state })
    }

    /// Bind the configured address and serve until a shutdown signal
    /// arrives.
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be bound or the server
    /// encounters an unrecoverable I/O error.
    pub async fn run(self) -> Result<()> {
        let addr: SocketAddr = format!("{}:{}", self.config.bind_host, self.config.bind_port)
            .parse()
            .map_err(|e| Error::Internal(format!("invalid bind address: {e}")))?;

        let app = create_router(Arc::clone(&self.state));
        let listener = TcpListener::bind(addr).await.map_err(|e| Error::Internal(format!("failed to bind {addr}: {e}")))?;

        info!(%addr, "aipipe-gateway listening");

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .map_err(|e| Error::Internal(format!("server error: {e}")))
    }
}

/// Wait for `Ctrl+C` or, on Unix, `SIGTERM`.
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("shutdown signal received");
}
