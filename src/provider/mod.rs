//! Provider adapter model — the uniform contract each upstream shape
//! (OpenAI, OpenRouter, Gemini, the similarity engine) implements.
//!
//! Every adapter exposes the same three capabilities the pipeline drives:
//! `transform` (rewrite the inbound request into either an upstream fetch
//! spec or a direct JSON result), `cost` (turn canonicalised usage into
//! dollars), and `parse` (extract `{model, usage}` from one JSON event,
//! whether that event is a whole response body or a single SSE frame).

pub mod gemini;
pub mod openai;
pub mod openrouter;
pub mod similarity;

use async_trait::async_trait;
use axum::http::{HeaderMap, Method};
use bytes::Bytes;
use serde_json::Value;

use crate::config::Config;
use crate::error::Result;
use crate::pricing::Usage;

/// The inbound request as seen by an adapter's `transform`: already
/// stripped of the gateway's own routing prefix, still carrying the raw
/// method/headers/body the client sent.
pub struct IncomingRequest<'a> {
    /// Path suffix after the provider prefix, including any query string.
    pub path: &'a str,
    /// HTTP method.
    pub method: Method,
    /// Client-sent headers (not yet filtered of hop-by-hop fields — the
    /// pipeline does that after `transform` returns a [`ProxySpec`]).
    pub headers: &'a HeaderMap,
    /// Raw request body.
    pub body: &'a Bytes,
    /// `true` when the caller presented a native upstream key rather than
    /// an identity token — adapters use this to decide whether to add
    /// attribution headers, skip the pricing gate, etc.
    pub native: bool,
    /// The native key itself, when `native` is `true`.
    pub native_key: Option<&'a str>,
}

/// An upstream fetch the pipeline should issue on the adapter's behalf.
pub struct ProxySpec {
    /// Fully-qualified upstream URL.
    pub url: String,
    /// Headers to send upstream (already adapter-rewritten; the pipeline
    /// still strips hop-by-hop fields before the fetch).
    pub headers: HeaderMap,
    /// Request body to send upstream.
    pub body: Bytes,
}

/// A direct JSON result the adapter produced itself, bypassing an upstream
/// fetch entirely (used by the similarity engine).
pub struct DirectResult {
    /// The JSON value returned verbatim to the client.
    pub body: Value,
    /// Model id to meter against, if any.
    pub model: Option<String>,
    /// Usage to meter, if any.
    pub usage: Option<Usage>,
}

/// What `transform` decided to do with the inbound request.
pub enum TransformOutcome {
    /// Forward upstream; the pipeline will fetch `spec` and classify the
    /// response itself.
    Proxy(ProxySpec),
    /// Serve this JSON directly; the pipeline meters and returns it
    /// without touching any upstream.
    Direct(DirectResult),
}

/// `{model, usage}` extracted from one JSON event — a whole response body,
/// or a single SSE `data:` frame.
#[derive(Debug, Clone, Default)]
pub struct ParsedEvent {
    /// Model id, if the event carried one.
    pub model: Option<String>,
    /// Canonicalised usage counters, if the event carried any.
    pub usage: Option<Usage>,
}

/// Context `cost_async` gets beyond `{model, usage}` — the original request
/// path/body and server config, for adapters whose price resolution needs a
/// network lookup or a provider-specific side-call (OpenRouter's live model
/// directory, Gemini's `:countTokens` fallback).
pub struct CostContext<'a> {
    /// The upstream-bound request path (provider suffix, with query).
    pub req_path: &'a str,
    /// The original (already adapter-rewritten) request body.
    pub req_body: &'a Bytes,
    /// Server configuration, for adapters that need to issue a side-call.
    pub env: &'a Config,
}

/// The provider adapter contract.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// The route segment this adapter is registered under (`openai`,
    /// `openrouter`, `gemini`, `similarity`).
    fn name(&self) -> &'static str;

    /// Rewrite `req` into either an upstream fetch or a direct result.
    ///
    /// # Errors
    ///
    /// Returns an [`crate::Error`] that the pipeline forwards verbatim to
    /// the client (e.g. `400` for an unpriced model).
    async fn transform(&self, req: &IncomingRequest<'_>, env: &Config) -> Result<TransformOutcome>;

    /// Compute the dollar cost of `usage` against `model`'s rate card.
    /// Missing usage costs zero. An unknown model also costs zero — the
    /// model-pricing gate in `transform` is what rejects unknown models
    /// for identity-token requests; by the time `cost` runs the request
    /// has already been allowed through (e.g. a native-key request).
    fn cost(&self, model: Option<&str>, usage: Option<&Usage>) -> f64;

    /// Compute cost the way [`Self::cost`] does, but allowed to suspend —
    /// for adapters whose price resolution needs a network round trip.
    /// Defaults to the synchronous calculator; only OpenRouter (live model
    /// directory) and Gemini (`:countTokens` side-call fallback) override
    /// this.
    async fn cost_async(&self, model: Option<&str>, usage: Option<&Usage>, ctx: &CostContext<'_>) -> f64 {
        let _ = ctx;
        self.cost(model, usage)
    }

    /// Extract `{model, usage}` from one parsed JSON event, canonicalising
    /// provider-specific field names.
    fn parse(&self, event: &Value) -> ParsedEvent;
}

/// Registry of adapters by route name.
#[derive(Default)]
pub struct ProviderRegistry {
    adapters: std::collections::HashMap<&'static str, std::sync::Arc<dyn ProviderAdapter>>,
}

impl ProviderRegistry {
    /// Build the registry with the three upstream shapes and the
    /// similarity engine registered.
    #[must_use]
    pub fn with_defaults() -> Self {
        let mut reg = Self::default();
        reg.register(std::sync::Arc::new(openai::OpenAiAdapter));
        reg.register(std::sync::Arc::new(openrouter::OpenRouterAdapter::new()));
        reg.register(std::sync::Arc::new(gemini::GeminiAdapter));
        reg.register(std::sync::Arc::new(similarity::SimilarityAdapter));
        reg
    }

    /// Register an adapter under its own name.
    pub fn register(&mut self, adapter: std::sync::Arc<dyn ProviderAdapter>) {
        self.adapters.insert(adapter.name(), adapter);
    }

    /// Look up an adapter by route name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<std::sync::Arc<dyn ProviderAdapter>> {
        self.adapters.get(name).cloned()
    }
}

/// Strip hop-by-hop and platform-injected headers before an upstream fetch,
/// per the gateway pipeline's header-filtering step.
#[must_use]
pub fn strip_hop_by_hop(headers: &HeaderMap) -> HeaderMap {
    const DROP: &[&str] = &["content-length", "host", "connection", "accept-encoding"];
    let mut out = HeaderMap::new();
    for (name, value) in headers {
        let lower = name.as_str().to_ascii_lowercase();
        if DROP.contains(&lower.as_str()) || lower.starts_with("cf-") {
            continue;
        }
        out.insert(name.clone(), value.clone());
    }
    out
}

/// Strip headers the gateway must not forward back to the client.
#[must_use]
pub fn strip_response_headers(headers: &HeaderMap) -> HeaderMap {
    const DROP: &[&str] = &["transfer-encoding", "connection", "content-security-policy"];
    let mut out = HeaderMap::new();
    for (name, value) in headers {
        if DROP.contains(&name.as_str().to_ascii_lowercase().as_str()) {
            continue;
        }
        out.insert(name.clone(), value.clone());
    }
    out
}
