//! AIPipe Gateway
//!
//! An authenticating, cost-metering reverse proxy fronting OpenAI-,
//! OpenRouter- and Gemini-shaped LLM HTTP APIs. A caller presents a
//! short-lived bearer token tied to a verified email (or an upstream-native
//! provider key); the gateway forwards the request, measures the resulting
//! token usage, converts it to a dollar cost, debits the caller's daily
//! ledger, and returns the upstream response bit-for-bit, streaming
//! preserved.
//!
//! # Modules
//!
//! - [`token`]: mints/verifies the gateway's own HS256 identity tokens and
//!   verifies inbound third-party OIDC credentials.
//! - [`budget`]: the email → `(limit, days)` policy lookup used at
//!   admission time.
//! - [`pricing`]: static rate cards and cost calculators for the OpenAI-
//!   and Gemini-shaped adapters.
//! - [`provider`]: the adapter contract, plus the OpenAI, OpenRouter,
//!   Gemini and similarity-engine implementations of it.
//! - [`sse`]: the byte-level Server-Sent-Events splitter used to meter
//!   streaming responses without buffering them.
//! - [`ledger`]: the single-writer, per-`(email, date)` cost accumulator.
//! - [`gateway`]: the end-to-end HTTP server and request pipeline.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod budget;
pub mod cli;
pub mod config;
pub mod error;
pub mod gateway;
pub mod ledger;
pub mod pricing;
pub mod provider;
pub mod sse;
pub mod token;

pub use error::{Error, Result};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Set up tracing, matching the CLI's `--log-level`/`--log-format` flags.
///
/// # Errors
///
/// Returns an error if a subscriber is already installed for this process.
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    let result = match format {
        Some("json") => subscriber.with(fmt::layer().json()).try_init(),
        _ => subscriber.with(fmt::layer()).try_init(),
    };

    result.map_err(|e| Error::Internal(format!("failed to install tracing subscriber: {e}")))
}
