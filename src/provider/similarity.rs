//! Similarity engine: a direct-result adapter. Embeds a set of strings via
//! the OpenAI-shaped embeddings endpoint and returns a cosine-similarity
//! matrix instead of forwarding a single upstream response.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};

use super::openai::{self, BASE_URL};
use super::{DirectResult, IncomingRequest, ParsedEvent, ProviderAdapter, TransformOutcome};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::pricing::Usage;

const DEFAULT_MODEL: &str = "text-embedding-3-small";
const DEFAULT_PRECISION: usize = 5;

/// One item of `docs`/`topics`: either a bare string or `{type, value}`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum DocItem {
    Bare(String),
    Tagged { value: String },
}

impl DocItem {
    fn into_string(self) -> String {
        match self {
            Self::Bare(s) | Self::Tagged { value: s } => s,
        }
    }
}

#[derive(Debug, Deserialize)]
struct SimilarityRequest {
    docs: Vec<DocItem>,
    #[serde(default)]
    topics: Option<Vec<DocItem>>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    precision: Option<usize>,
}

/// The similarity engine adapter.
pub struct SimilarityAdapter;

#[async_trait]
impl ProviderAdapter for SimilarityAdapter {
    fn name(&self) -> &'static str {
        "similarity"
    }

    async fn transform(&self, req: &IncomingRequest<'_>, env: &Config) -> Result<TransformOutcome> {
        let parsed: SimilarityRequest =
            serde_json::from_slice(req.body).map_err(|e| Error::BadRequest(format!("invalid similarity request: {e}")))?;

        if parsed.docs.is_empty() {
            return Err(Error::BadRequest("docs must be a non-empty array".to_string()));
        }

        let model = parsed.model.clone().unwrap_or_else(|| DEFAULT_MODEL.to_string());
        let precision = parsed.precision.unwrap_or(DEFAULT_PRECISION);

        let doc_strings: Vec<String> = parsed.docs.into_iter().map(DocItem::into_string).collect();
        let topic_strings: Option<Vec<String>> = parsed.topics.map(|t| t.into_iter().map(DocItem::into_string).collect());

        let mut input = doc_strings.clone();
        if let Some(topics) = &topic_strings {
            input.extend(topics.iter().cloned());
        }

        let auth_value = if req.native {
            req.native_key.unwrap_or_default().to_string()
        } else {
            env.openai_api_key
                .clone()
                .ok_or_else(|| Error::Internal("server has no OpenAI API key configured".to_string()))?
        };

        let client = reqwest::Client::new();
        let response: Value = client
            .post(format!("{BASE_URL}/v1/embeddings"))
            .bearer_auth(&auth_value)
            .json(&json!({ "model": model, "input": input }))
            .send()
            .await?
            .json()
            .await?;

        let embeddings = response
            .get("data")
            .and_then(Value::as_array)
            .ok_or_else(|| Error::Internal("embeddings response missing data array".to_string()))?;

        let vectors: Vec<Vec<f64>> = embeddings
            .iter()
            .map(|item| {
                item.get("embedding")
                    .and_then(Value::as_array)
                    .map(|v| v.iter().filter_map(Value::as_f64).collect())
                    .unwrap_or_default()
            })
            .collect();

        let doc_count = doc_strings.len();
        let (doc_vectors, topic_vectors): (&[Vec<f64>], &[Vec<f64>]) = if topic_strings.is_some() {
            vectors.split_at(doc_count)
        } else {
            (&vectors[..], &vectors[..])
        };

        let matrix = cosine_matrix(doc_vectors, topic_vectors, precision);

        let usage = response.get("usage").map(openai::parse_usage);

        let body = json!({
            "model": model,
            "similarity": matrix,
            "usage": { "prompt_tokens": usage.map(|u| u.prompt_tokens).unwrap_or(0) },
        });

        Ok(TransformOutcome::Direct(DirectResult { body, model: Some(model), usage }))
    }

    fn cost(&self, model: Option<&str>, usage: Option<&Usage>) -> f64 {
        let (Some(model), Some(usage)) = (model, usage) else {
            return 0.0;
        };
        super::openai::OpenAiAdapter::rate_for(model).map_or(0.0, |rate| crate::pricing::cost(&rate, usage))
    }

    fn parse(&self, event: &Value) -> ParsedEvent {
        let model = event.get("model").and_then(Value::as_str).map(str::to_string);
        let usage = event.get("usage").map(openai::parse_usage);
        ParsedEvent { model, usage }
    }
}

/// Cosine similarity between two vectors. Returns `0.0` for a zero vector
/// rather than dividing by zero.
fn cosine(a: &[f64], b: &[f64]) -> f64 {
    let dot: f64 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f64 = a.iter().map(|x| x * x).sum::<f64>().sqrt();
    let norm_b: f64 = b.iter().map(|x| x * x).sum::<f64>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

fn round_to(value: f64, precision: usize) -> f64 {
    let factor = 10f64.powi(i32::try_from(precision).unwrap_or(5));
    (value * factor).round() / factor
}

fn cosine_matrix(docs: &[Vec<f64>], targets: &[Vec<f64>], precision: usize) -> Vec<Vec<f64>> {
    docs.iter()
        .map(|d| targets.iter().map(|t| round_to(cosine(d, t), precision)).collect())
        .collect()
}
