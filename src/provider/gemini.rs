//! Gemini-shaped adapter: `Authorization: Bearer` is rewritten to
//! `x-goog-api-key`, and `:embedContent` calls that come back without a
//! usage block are metered via a `:countTokens` side-call.

use async_trait::async_trait;
use axum::http::{HeaderMap, HeaderValue, Method};
use serde_json::Value;

use super::{CostContext, IncomingRequest, ParsedEvent, ProviderAdapter, ProxySpec, TransformOutcome};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::pricing::{self, ModelRate, Usage};

/// Canonical Gemini API origin.
pub const BASE_URL: &str = "https://generativelanguage.googleapis.com";

/// The Gemini-shaped adapter.
pub struct GeminiAdapter;

impl GeminiAdapter {
    /// Look up `model`'s rate card.
    #[must_use]
    pub fn rate_for(model: &str) -> Option<ModelRate> {
        pricing::GEMINI_RATES.get(model).copied()
    }
}

/// Extract the model id from a Gemini path of the form
/// `.../models/<model>:<operation>`, falling back to a `model` field in the
/// body if the path doesn't carry one.
fn model_from_path_or_body(path: &str, body: &Value) -> Option<String> {
    if let Some(segment) = path.rsplit("/models/").next() {
        if let Some(model) = segment.split(':').next() {
            if !model.is_empty() && model != segment {
                return Some(model.to_string());
            }
        }
    }
    body.get("model").and_then(Value::as_str).map(str::to_string)
}

#[async_trait]
impl ProviderAdapter for GeminiAdapter {
    fn name(&self) -> &'static str {
        "gemini"
    }

    async fn transform(&self, req: &IncomingRequest<'_>, env: &Config) -> Result<TransformOutcome> {
        let body: Value = if req.body.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(req.body).unwrap_or(Value::Null)
        };

        let model = model_from_path_or_body(req.path, &body);

        // The model-pricing gate only applies to POST JSON requests — a GET
        // such as listing models has no model to price.
        if !req.native && req.method == Method::POST {
            let Some(model) = model.as_deref() else {
                return Err(Error::BadRequest("request has no identifiable Gemini model".to_string()));
            };
            if Self::rate_for(model).is_none() {
                return Err(Error::BadRequest(format!("Model {model} pricing unknown")));
            }
        }

        let api_key = if req.native {
            req.native_key.unwrap_or_default().to_string()
        } else {
            env.gemini_api_key
                .clone()
                .ok_or_else(|| Error::Internal("server has no Gemini API key configured".to_string()))?
        };

        // Start from the client's own headers so anything provider-specific
        // the caller sent passes through untouched; `authorization` is
        // removed (not just overwritten) since the rewrite target is a
        // different header name and the client's bearer token must not
        // reach Gemini.
        let mut headers = req.headers.clone();
        headers.remove(axum::http::header::AUTHORIZATION);
        headers.insert(
            "x-goog-api-key",
            HeaderValue::from_str(&api_key).map_err(|e| Error::Internal(format!("invalid Gemini API key: {e}")))?,
        );
        headers.insert(axum::http::header::CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let url = format!("{BASE_URL}{}", req.path);

        Ok(TransformOutcome::Proxy(ProxySpec {
            url,
            headers,
            body: req.body.clone(),
        }))
    }

    fn cost(&self, model: Option<&str>, usage: Option<&Usage>) -> f64 {
        let (Some(model), Some(usage)) = (model, usage) else {
            return 0.0;
        };
        Self::rate_for(model).map_or(0.0, |rate| pricing::cost(&rate, usage))
    }

    async fn cost_async(&self, model: Option<&str>, usage: Option<&Usage>, ctx: &CostContext<'_>) -> f64 {
        if usage.is_some() {
            return self.cost(model, usage);
        }
        if !ctx.req_path.contains(":embedContent") {
            return 0.0;
        }

        let model = model_from_path_or_body(ctx.req_path, &serde_json::from_slice(ctx.req_body).unwrap_or(Value::Null));
        let Some(model) = model else {
            return 0.0;
        };
        let Some(api_key) = ctx.env.gemini_api_key.as_deref() else {
            return 0.0;
        };

        let count_path = ctx.req_path.replace(":embedContent", ":countTokens");
        let client = reqwest::Client::new();
        let Ok(resp) = client
            .post(format!("{BASE_URL}{count_path}"))
            .header("x-goog-api-key", api_key)
            .header(axum::http::header::CONTENT_TYPE, "application/json")
            .body(ctx.req_body.clone())
            .send()
            .await
        else {
            return 0.0;
        };
        let body: Value = resp.json().await.unwrap_or(Value::Null);
        let total_tokens = body.get("totalTokens").and_then(Value::as_u64).unwrap_or(0);

        let side_call_usage = Usage {
            prompt_tokens: total_tokens,
            ..Usage::default()
        };
        Self::rate_for(&model).map_or(0.0, |rate| pricing::cost(&rate, &side_call_usage))
    }

    fn parse(&self, event: &Value) -> ParsedEvent {
        let model = event
            .get("modelVersion")
            .and_then(Value::as_str)
            .or_else(|| event.get("model").and_then(Value::as_str))
            .map(str::to_string);

        let usage = event.get("usageMetadata").map(parse_usage_metadata);

        ParsedEvent { model, usage }
    }
}

/// Canonicalise Gemini's `usageMetadata` object: `promptTokenCount` →
/// `prompt_tokens`, `candidatesTokenCount` (or `tokenCount`) →
/// `completion_tokens`.
pub fn parse_usage_metadata(meta: &Value) -> Usage {
    let prompt_tokens = meta.get("promptTokenCount").and_then(Value::as_u64).unwrap_or(0);
    let completion_tokens = meta
        .get("candidatesTokenCount")
        .or_else(|| meta.get("tokenCount"))
        .and_then(Value::as_u64)
        .unwrap_or(0);

    Usage {
        prompt_tokens,
        completion_tokens,
        ..Usage::default()
    }
}
