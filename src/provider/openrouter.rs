//! OpenRouter-shaped adapter: request attribution headers for identity
//! callers, a live model-price directory instead of a static rate table.

use async_trait::async_trait;
use axum::http::{HeaderMap, HeaderValue};
use bytes::Bytes;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;

use super::{CostContext, IncomingRequest, ParsedEvent, ProviderAdapter, ProxySpec, TransformOutcome};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::pricing::Usage;

/// Canonical OpenRouter API origin.
pub const BASE_URL: &str = "https://openrouter.ai/api";
const MODELS_URL: &str = "https://openrouter.ai/api/v1/models";

/// Per-model OpenRouter rate card, in dollars per token (not per million —
/// OpenRouter's directory quotes per-token rates directly).
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenRouterRate {
    /// Dollars per prompt token.
    pub prompt: f64,
    /// Dollars per completion token.
    pub completion: f64,
    /// Flat dollars per request.
    pub request: f64,
    /// Dollars per image token.
    pub image: f64,
    /// Dollars per internal-reasoning token.
    pub internal_reasoning: f64,
}

/// A per-process lazy cache of the OpenRouter models list. A lookup miss
/// triggers a full refetch that replaces the whole cache — simple,
/// infrequent, and tolerant of staleness for an infrequently-changing
/// price list.
pub struct ModelDirectory {
    cache: RwLock<HashMap<String, OpenRouterRate>>,
    http: reqwest::Client,
}

impl ModelDirectory {
    /// Build an empty directory; the first lookup populates it.
    #[must_use]
    pub fn new() -> Self {
        Self {
            cache: RwLock::new(HashMap::new()),
            http: reqwest::Client::new(),
        }
    }

    /// Look up `model`'s rate card, refetching the whole directory once on
    /// a cache miss.
    pub async fn rate_for(&self, model: &str) -> Option<OpenRouterRate> {
        if let Some(rate) = self.cache.read().get(model).copied() {
            return Some(rate);
        }
        if let Err(e) = self.refresh().await {
            tracing::warn!(error = %e, "failed to refresh OpenRouter model directory");
            return None;
        }
        self.cache.read().get(model).copied()
    }

    async fn refresh(&self) -> Result<()> {
        let body: Value = self.http.get(MODELS_URL).send().await?.json().await?;
        let mut fresh = HashMap::new();

        if let Some(items) = body.get("data").and_then(Value::as_array) {
            for item in items {
                let Some(id) = item.get("id").and_then(Value::as_str) else {
                    continue;
                };
                let pricing = item.get("pricing").cloned().unwrap_or(Value::Null);
                let rate = OpenRouterRate {
                    prompt: parse_rate(&pricing, "prompt"),
                    completion: parse_rate(&pricing, "completion"),
                    request: parse_rate(&pricing, "request"),
                    image: parse_rate(&pricing, "image"),
                    internal_reasoning: parse_rate(&pricing, "internal_reasoning"),
                };
                fresh.insert(id.to_string(), rate);
            }
        }

        *self.cache.write() = fresh;
        Ok(())
    }
}

impl Default for ModelDirectory {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_rate(pricing: &Value, key: &str) -> f64 {
    pricing
        .get(key)
        .and_then(Value::as_str)
        .and_then(|s| s.parse::<f64>().ok())
        .unwrap_or(0.0)
}

/// The OpenRouter-shaped adapter.
pub struct OpenRouterAdapter {
    directory: ModelDirectory,
}

impl OpenRouterAdapter {
    /// Build an adapter with an empty, lazily-populated model directory.
    #[must_use]
    pub fn new() -> Self {
        Self {
            directory: ModelDirectory::new(),
        }
    }
}

impl Default for OpenRouterAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProviderAdapter for OpenRouterAdapter {
    fn name(&self) -> &'static str {
        "openrouter"
    }

    async fn transform(&self, req: &IncomingRequest<'_>, env: &Config) -> Result<TransformOutcome> {
        // Start from the client's own headers so anything provider-specific
        // the caller sent reaches upstream unmolested; only authorization,
        // attribution and content-type are ours to rewrite.
        let mut headers = req.headers.clone();

        let auth_value = if req.native {
            req.native_key.unwrap_or_default().to_string()
        } else {
            let key = env
                .openrouter_api_key
                .as_deref()
                .ok_or_else(|| Error::Internal("server has no OpenRouter API key configured".to_string()))?;
            key.to_string()
        };
        headers.insert(
            axum::http::header::AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {auth_value}"))
                .map_err(|e| Error::Internal(format!("invalid upstream auth header: {e}")))?,
        );

        if !req.native {
            headers.insert("HTTP-Referer", HeaderValue::from_static("https://aipipe.gateway"));
            headers.insert("X-Title", HeaderValue::from_static("AIPipe Gateway"));
        }
        headers.insert(axum::http::header::CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let url = format!("{BASE_URL}{}", req.path);

        Ok(TransformOutcome::Proxy(ProxySpec {
            url,
            headers,
            body: req.body.clone(),
        }))
    }

    fn cost(&self, _model: Option<&str>, _usage: Option<&Usage>) -> f64 {
        // OpenRouter's rate card can only be resolved by a network lookup
        // against the live model directory — see `cost_async`, which the
        // pipeline calls instead of this method for every adapter.
        0.0
    }

    async fn cost_async(&self, model: Option<&str>, usage: Option<&Usage>, _ctx: &CostContext<'_>) -> f64 {
        let (Some(model), Some(usage)) = (model, usage) else {
            return 0.0;
        };
        let Some(rate) = self.directory.rate_for(model).await else {
            return 0.0;
        };

        usage.prompt_tokens as f64 * rate.prompt
            + usage.completion_tokens as f64 * rate.completion
            + usage.reasoning_tokens as f64 * rate.internal_reasoning
            + usage.image_tokens as f64 * rate.image
            + rate.request
    }

    fn parse(&self, event: &Value) -> ParsedEvent {
        let model = event.get("model").and_then(Value::as_str).map(str::to_string);
        let usage = event.get("usage").map(parse_usage);
        ParsedEvent { model, usage }
    }
}

/// Canonicalise an OpenRouter usage object (OpenAI-style, augmented with
/// optional reasoning/image token detail).
pub fn parse_usage(usage: &Value) -> Usage {
    let prompt_tokens = usage.get("prompt_tokens").and_then(Value::as_u64).unwrap_or(0);
    let completion_tokens = usage.get("completion_tokens").and_then(Value::as_u64).unwrap_or(0);

    let details = usage.get("completion_tokens_details");
    let reasoning_tokens = details
        .and_then(|d| d.get("reasoning_tokens"))
        .and_then(Value::as_u64)
        .unwrap_or(0);
    let image_tokens = details
        .and_then(|d| d.get("image_tokens"))
        .and_then(Value::as_u64)
        .unwrap_or(0);

    Usage {
        prompt_tokens,
        completion_tokens,
        reasoning_tokens,
        image_tokens,
        ..Usage::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parse_usage_reads_reasoning_and_image_tokens() {
        let usage = parse_usage(&json!({
            "prompt_tokens": 500,
            "completion_tokens": 200,
            "completion_tokens_details": { "reasoning_tokens": 50, "image_tokens": 3 },
        }));
        assert_eq!(usage.reasoning_tokens, 50);
        assert_eq!(usage.image_tokens, 3);
    }

    #[test]
    fn parse_rate_defaults_to_zero_for_missing_key() {
        let pricing = json!({ "prompt": "0.000001" });
        assert_eq!(parse_rate(&pricing, "completion"), 0.0);
        assert!((parse_rate(&pricing, "prompt") - 0.000_001).abs() < 1e-12);
    }

    fn test_config() -> Config {
        Config {
            aipipe_secret: "secret".to_string(),
            openrouter_api_key: Some("sk-or-server-key".to_string()),
            openai_api_key: None,
            gemini_api_key: None,
            admin_emails: String::new(),
            bind_host: "127.0.0.1".to_string(),
            bind_port: 0,
            ledger_database_url: "sqlite::memory:".to_string(),
            oidc_jwks_uri: "https://example.invalid/certs".to_string(),
        }
    }

    #[tokio::test]
    async fn client_headers_survive_alongside_rewritten_auth_and_attribution() {
        let adapter = OpenRouterAdapter::new();
        let env = test_config();
        let body = Bytes::from_static(br#"{"model":"openai/gpt-4o"}"#);
        let mut headers = HeaderMap::new();
        headers.insert("x-custom-client-header", HeaderValue::from_static("kept"));
        let req = IncomingRequest {
            path: "/v1/chat/completions",
            method: axum::http::Method::POST,
            headers: &headers,
            body: &body,
            native: false,
            native_key: None,
        };

        let outcome = adapter.transform(&req, &env).await.unwrap();
        let TransformOutcome::Proxy(spec) = outcome else {
            panic!("expected a proxy spec");
        };
        assert_eq!(spec.headers.get("x-custom-client-header").unwrap(), "kept");
        assert_eq!(spec.headers.get(axum::http::header::AUTHORIZATION).unwrap(), "Bearer sk-or-server-key");
        assert_eq!(spec.headers.get("HTTP-Referer").unwrap(), "https://aipipe.gateway");
    }
}
