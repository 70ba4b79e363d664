//! Static, read-only pricing tables for the OpenAI- and Gemini-shaped
//! adapters, plus the shared cost-calculation helpers both shapes use.
//!
//! The OpenRouter shape does not use this module — its prices come from the
//! provider's live `/api/v1/models` directory (see
//! [`crate::provider::openrouter`]), not a static table.

use std::collections::HashMap;
use std::sync::LazyLock;

/// Per-model rate card. All rates are dollars per one million tokens.
#[derive(Debug, Clone, Copy, Default)]
pub struct ModelRate {
    /// Text input rate.
    pub input: f64,
    /// Text output rate.
    pub output: f64,
    /// Audio input rate, for transcribe/audio-preview models.
    pub audio_input: Option<f64>,
    /// Audio output rate, for audio-preview models.
    pub audio_output: Option<f64>,
}

/// Canonicalised usage counters, after provider-specific field renaming.
#[derive(Debug, Clone, Copy, Default)]
pub struct Usage {
    /// Text (or unspecified-modality) prompt tokens.
    pub prompt_tokens: u64,
    /// Text (or unspecified-modality) completion tokens.
    pub completion_tokens: u64,
    /// Audio prompt tokens, if the upstream reported modality detail.
    pub audio_prompt_tokens: u64,
    /// Audio completion tokens, if the upstream reported modality detail.
    pub audio_completion_tokens: u64,
    /// Reasoning tokens (OpenRouter `completion_tokens_details.reasoning_tokens`).
    pub reasoning_tokens: u64,
    /// Image tokens (OpenRouter `completion_tokens_details.image_tokens`).
    pub image_tokens: u64,
}

/// Compute the dollar cost of `usage` against `rate`. Missing audio rates
/// are treated as zero cost for that modality rather than an error — the
/// pricing table simply doesn't distinguish that model's audio tokens.
#[must_use]
pub fn cost(rate: &ModelRate, usage: &Usage) -> f64 {
    let mut total = (usage.prompt_tokens as f64) * rate.input / 1_000_000.0
        + (usage.completion_tokens as f64) * rate.output / 1_000_000.0;

    if usage.audio_prompt_tokens > 0 {
        if let Some(r) = rate.audio_input {
            total += (usage.audio_prompt_tokens as f64) * r / 1_000_000.0;
        }
    }
    if usage.audio_completion_tokens > 0 {
        if let Some(r) = rate.audio_output {
            total += (usage.audio_completion_tokens as f64) * r / 1_000_000.0;
        }
    }

    total
}

/// OpenAI-shaped model rate card. Prices as published at time of writing;
/// an operator updates this table to track upstream price changes — it is
/// an opaque, read-only mapping loaded at process start, not runtime data.
pub static OPENAI_RATES: LazyLock<HashMap<&'static str, ModelRate>> = LazyLock::new(|| {
    HashMap::from([
        (
            "gpt-4.1",
            ModelRate { input: 2.00, output: 8.00, ..ModelRate::default() },
        ),
        (
            "gpt-4.1-mini",
            ModelRate { input: 0.40, output: 1.60, ..ModelRate::default() },
        ),
        (
            "gpt-4.1-nano",
            ModelRate { input: 0.10, output: 0.40, ..ModelRate::default() },
        ),
        (
            "gpt-4o",
            ModelRate { input: 2.50, output: 10.00, ..ModelRate::default() },
        ),
        (
            "gpt-4o-mini",
            ModelRate { input: 0.15, output: 0.60, ..ModelRate::default() },
        ),
        (
            "gpt-4o-transcribe",
            ModelRate {
                input: 2.50,
                output: 10.00,
                audio_input: Some(6.00),
                audio_output: None,
            },
        ),
        (
            "gpt-4o-audio-preview",
            ModelRate {
                input: 2.50,
                output: 10.00,
                audio_input: Some(40.00),
                audio_output: Some(80.00),
            },
        ),
        (
            "text-embedding-3-small",
            ModelRate { input: 0.02, output: 0.0, ..ModelRate::default() },
        ),
        (
            "text-embedding-3-large",
            ModelRate { input: 0.13, output: 0.0, ..ModelRate::default() },
        ),
    ])
});

/// Gemini-shaped model rate card.
pub static GEMINI_RATES: LazyLock<HashMap<&'static str, ModelRate>> = LazyLock::new(|| {
    HashMap::from([
        (
            "gemini-2.0-flash",
            ModelRate { input: 0.10, output: 0.40, ..ModelRate::default() },
        ),
        (
            "gemini-2.0-flash-lite",
            ModelRate { input: 0.075, output: 0.30, ..ModelRate::default() },
        ),
        (
            "gemini-1.5-pro",
            ModelRate { input: 1.25, output: 5.00, ..ModelRate::default() },
        ),
        (
            "text-embedding-004",
            ModelRate { input: 0.0, output: 0.0, ..ModelRate::default() },
        ),
    ])
});

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cost_is_zero_for_zero_usage() {
        let rate = ModelRate { input: 2.0, output: 8.0, ..ModelRate::default() };
        assert_eq!(cost(&rate, &Usage::default()), 0.0);
    }

    #[test]
    fn cost_sums_input_and_output_at_per_million_rate() {
        let rate = ModelRate { input: 2.0, output: 8.0, ..ModelRate::default() };
        let usage = Usage {
            prompt_tokens: 10,
            completion_tokens: 5,
            ..Usage::default()
        };
        let expected = 10.0 * 2.0 / 1_000_000.0 + 5.0 * 8.0 / 1_000_000.0;
        assert!((cost(&rate, &usage) - expected).abs() < 1e-12);
    }

    #[test]
    fn audio_tokens_cost_zero_when_rate_card_has_no_audio_rate() {
        let rate = ModelRate { input: 2.0, output: 8.0, ..ModelRate::default() };
        let usage = Usage {
            audio_prompt_tokens: 100,
            ..Usage::default()
        };
        assert_eq!(cost(&rate, &usage), 0.0);
    }
}
