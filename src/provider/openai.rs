//! OpenAI-shaped adapter: canonical OpenAI Chat Completions / Embeddings
//! API surface, also reused verbatim by the similarity engine.

use async_trait::async_trait;
use axum::http::{HeaderMap, HeaderValue, Method};
use bytes::Bytes;
use serde_json::Value;

use super::{IncomingRequest, ParsedEvent, ProviderAdapter, ProxySpec, TransformOutcome};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::pricing::{self, ModelRate, Usage};

/// Canonical OpenAI API origin.
pub const BASE_URL: &str = "https://api.openai.com";

/// The OpenAI-shaped adapter.
pub struct OpenAiAdapter;

impl OpenAiAdapter {
    /// Look up `model`'s rate card.
    #[must_use]
    pub fn rate_for(model: &str) -> Option<ModelRate> {
        pricing::OPENAI_RATES.get(model).copied()
    }
}

#[async_trait]
impl ProviderAdapter for OpenAiAdapter {
    fn name(&self) -> &'static str {
        "openai"
    }

    async fn transform(&self, req: &IncomingRequest<'_>, env: &Config) -> Result<TransformOutcome> {
        let mut body: Value = if req.body.is_empty() {
            Value::Object(serde_json::Map::new())
        } else {
            serde_json::from_slice(req.body).map_err(|e| Error::BadRequest(format!("invalid JSON body: {e}")))?
        };

        let model = body.get("model").and_then(Value::as_str).map(str::to_string);

        // The model-pricing gate only applies to POST bodies that declare a
        // model (chat completions, embeddings, ...) — a GET such as
        // `/v1/models` has no body and no model to price.
        if !req.native && req.method == Method::POST {
            let Some(model) = model.as_deref() else {
                return Err(Error::BadRequest("request body must declare a model".to_string()));
            };
            if Self::rate_for(model).is_none() {
                return Err(Error::BadRequest(format!("Model {model} pricing unknown")));
            }
        }

        let is_streaming = body.get("stream").and_then(Value::as_bool).unwrap_or(false);
        if is_streaming && req.path.trim_end_matches('/').ends_with("/chat/completions") {
            if let Some(obj) = body.as_object_mut() {
                let stream_options = obj
                    .entry("stream_options")
                    .or_insert_with(|| Value::Object(serde_json::Map::new()));
                if let Some(opts) = stream_options.as_object_mut() {
                    opts.insert("include_usage".to_string(), Value::Bool(true));
                }
            }
        }

        // Start from the client's own headers (hop-by-hop fields are
        // filtered out later, by the pipeline) so anything provider-specific
        // the caller sent (e.g. `OpenAI-Beta`) reaches upstream unmolested;
        // only `authorization`/`content-type` are ours to rewrite.
        let mut headers = req.headers.clone();
        let auth_value = if req.native {
            req.native_key.unwrap_or_default().to_string()
        } else {
            let key = env
                .openai_api_key
                .as_deref()
                .ok_or_else(|| Error::Internal("server has no OpenAI API key configured".to_string()))?;
            key.to_string()
        };
        headers.insert(
            axum::http::header::AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {auth_value}"))
                .map_err(|e| Error::Internal(format!("invalid upstream auth header: {e}")))?,
        );
        headers.insert(axum::http::header::CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let url = format!("{BASE_URL}{}", req.path);
        let body = Bytes::from(serde_json::to_vec(&body)?);

        Ok(TransformOutcome::Proxy(ProxySpec { url, headers, body }))
    }

    fn cost(&self, model: Option<&str>, usage: Option<&Usage>) -> f64 {
        let (Some(model), Some(usage)) = (model, usage) else {
            return 0.0;
        };
        Self::rate_for(model).map_or(0.0, |rate| pricing::cost(&rate, usage))
    }

    fn parse(&self, event: &Value) -> ParsedEvent {
        // Some harnesses wrap the upstream payload in an outer envelope;
        // unwrap it transparently if present.
        let event = event.get("response").unwrap_or(event);

        let model = event.get("model").and_then(Value::as_str).map(str::to_string);
        let usage = event.get("usage").map(parse_usage);

        ParsedEvent { model, usage }
    }
}

/// Canonicalise an OpenAI-shaped `usage` object into [`Usage`].
pub fn parse_usage(usage: &Value) -> Usage {
    let prompt_tokens = usage.get("prompt_tokens").and_then(Value::as_u64).unwrap_or(0);
    let completion_tokens = usage.get("completion_tokens").and_then(Value::as_u64).unwrap_or(0);

    let audio_prompt_tokens = usage
        .get("prompt_tokens_details")
        .and_then(|d| d.get("audio_tokens"))
        .and_then(Value::as_u64)
        .unwrap_or(0);
    let audio_completion_tokens = usage
        .get("completion_tokens_details")
        .and_then(|d| d.get("audio_tokens"))
        .and_then(Value::as_u64)
        .unwrap_or(0);

    Usage {
        prompt_tokens,
        completion_tokens,
        audio_prompt_tokens,
        audio_completion_tokens,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parse_usage_reads_canonical_fields() {
        let usage = parse_usage(&json!({ "prompt_tokens": 10, "completion_tokens": 5 }));
        assert_eq!(usage.prompt_tokens, 10);
        assert_eq!(usage.completion_tokens, 5);
    }

    #[test]
    fn parse_usage_reads_audio_modality_detail() {
        let usage = parse_usage(&json!({
            "prompt_tokens": 100,
            "completion_tokens": 0,
            "prompt_tokens_details": { "audio_tokens": 80 },
        }));
        assert_eq!(usage.audio_prompt_tokens, 80);
    }

    #[test]
    fn parse_unwraps_response_envelope() {
        let adapter = OpenAiAdapter;
        let event = json!({ "response": { "model": "gpt-4.1-nano", "usage": { "prompt_tokens": 1, "completion_tokens": 1 } } });
        let parsed = adapter.parse(&event);
        assert_eq!(parsed.model.as_deref(), Some("gpt-4.1-nano"));
        assert!(parsed.usage.is_some());
    }

    #[test]
    fn cost_matches_rate_card_weighted_sum() {
        let adapter = OpenAiAdapter;
        let usage = Usage { prompt_tokens: 10, completion_tokens: 5, ..Usage::default() };
        let cost = adapter.cost(Some("gpt-4.1-nano"), Some(&usage));
        let rate = OpenAiAdapter::rate_for("gpt-4.1-nano").unwrap();
        let expected = pricing::cost(&rate, &usage);
        assert!((cost - expected).abs() < 1e-12);
    }

    #[test]
    fn cost_is_zero_without_usage() {
        let adapter = OpenAiAdapter;
        assert_eq!(adapter.cost(Some("gpt-4.1-nano"), None), 0.0);
    }

    fn test_config() -> Config {
        Config {
            aipipe_secret: "secret".to_string(),
            openrouter_api_key: None,
            openai_api_key: Some("sk-server-key".to_string()),
            gemini_api_key: None,
            admin_emails: String::new(),
            bind_host: "127.0.0.1".to_string(),
            bind_port: 0,
            ledger_database_url: "sqlite::memory:".to_string(),
            oidc_jwks_uri: "https://example.invalid/certs".to_string(),
        }
    }

    #[tokio::test]
    async fn get_request_with_no_model_bypasses_the_pricing_gate() {
        let adapter = OpenAiAdapter;
        let env = test_config();
        let empty = Bytes::new();
        let headers = HeaderMap::new();
        let req = IncomingRequest {
            path: "/v1/models",
            method: axum::http::Method::GET,
            headers: &headers,
            body: &empty,
            native: false,
            native_key: None,
        };

        let outcome = adapter.transform(&req, &env).await.unwrap();
        assert!(matches!(outcome, TransformOutcome::Proxy(_)));
    }

    #[tokio::test]
    async fn post_request_with_unpriced_model_is_still_rejected() {
        let adapter = OpenAiAdapter;
        let env = test_config();
        let body = Bytes::from_static(br#"{"model":"no-such-model"}"#);
        let headers = HeaderMap::new();
        let req = IncomingRequest {
            path: "/v1/chat/completions",
            method: axum::http::Method::POST,
            headers: &headers,
            body: &body,
            native: false,
            native_key: None,
        };

        let err = adapter.transform(&req, &env).await.unwrap_err();
        assert!(matches!(err, Error::BadRequest(_)));
    }
}
