//! Token Usage and Pricing
//!
//! Cost accounting for progress reporting. Providers that know their pricing
//! expose it through `TextProvider::pricing`; word counts are converted to
//! token estimates when the provider reports none.

use serde::{Deserialize, Serialize};

// ============================================================================
// Token Usage
// ============================================================================

/// Token usage for a request/response
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Number of input/prompt tokens
    pub input_tokens: u32,
    /// Number of output/completion tokens
    pub output_tokens: u32,
}

impl TokenUsage {
    pub fn new(input_tokens: u32, output_tokens: u32) -> Self {
        Self {
            input_tokens,
            output_tokens,
        }
    }

    /// Total tokens used
    pub fn total(&self) -> u32 {
        self.input_tokens + self.output_tokens
    }

    /// Add another usage to this one
    pub fn add(&mut self, other: &TokenUsage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
    }
}

/// Rough token estimate from a word count (≈ 4 tokens per 3 words).
pub fn estimate_tokens(words: usize) -> u32 {
    ((words * 4) / 3) as u32
}

// ============================================================================
// Provider Pricing
// ============================================================================

/// Pricing information for a provider/model combination
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderPricing {
    pub provider_id: String,
    pub model_id: String,
    /// Cost per 1 million input tokens in USD
    pub input_cost_per_million: f64,
    /// Cost per 1 million output tokens in USD
    pub output_cost_per_million: f64,
    /// Whether the model is free (e.g. local inference)
    pub is_free: bool,
}

impl ProviderPricing {
    /// Pricing for a free model (e.g. local inference)
    pub fn free(provider_id: &str, model_id: &str) -> Self {
        Self {
            provider_id: provider_id.to_string(),
            model_id: model_id.to_string(),
            input_cost_per_million: 0.0,
            output_cost_per_million: 0.0,
            is_free: true,
        }
    }

    pub fn per_million(
        provider_id: &str,
        model_id: &str,
        input_cost: f64,
        output_cost: f64,
    ) -> Self {
        Self {
            provider_id: provider_id.to_string(),
            model_id: model_id.to_string(),
            input_cost_per_million: input_cost,
            output_cost_per_million: output_cost,
            is_free: false,
        }
    }

    /// Calculate cost for given token usage
    pub fn calculate_cost(&self, usage: &TokenUsage) -> f64 {
        if self.is_free {
            return 0.0;
        }
        let input_cost = (usage.input_tokens as f64 / 1_000_000.0) * self.input_cost_per_million;
        let output_cost = (usage.output_tokens as f64 / 1_000_000.0) * self.output_cost_per_million;
        input_cost + output_cost
    }
}
