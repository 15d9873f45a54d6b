//! Text Provider Trait
//!
//! Black-box capability for sending a prompt to an external AI provider and
//! receiving a raw response. Implementations live outside this crate; the
//! pipeline only sees this trait and the classified error taxonomy.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::cost::ProviderPricing;
use super::response::RawOutput;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Error, Debug, Clone)]
pub enum ProviderError {
    #[error("Rate limited: retry after {retry_after_secs} seconds")]
    RateLimited { retry_after_secs: u64 },

    #[error("Request timed out")]
    Timeout,

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Provider error: {0}")]
    Unknown(String),
}

impl ProviderError {
    /// Human-readable next step for terminal error reporting.
    pub fn recommendation(&self) -> &'static str {
        match self {
            ProviderError::RateLimited { .. } => {
                "Rate limit hit — check provider keys and quotas, or slow the request pace"
            }
            ProviderError::Timeout => {
                "Provider timed out — raise the timeout or reduce the requested length"
            }
            ProviderError::Auth(_) => "Authentication failed — verify the provider API key",
            ProviderError::InvalidRequest(_) => {
                "The provider rejected the request — check model id and prompt size"
            }
            ProviderError::Api { .. } => {
                "Provider API error — check the provider status page and retry later"
            }
            ProviderError::Network(_) => "Network failure — check connectivity and retry",
            ProviderError::Unknown(_) => "Unclassified provider failure — inspect the logs",
        }
    }
}

pub type Result<T> = std::result::Result<T, ProviderError>;

// ============================================================================
// Request
// ============================================================================

/// A single generation request sent to a provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderRequest {
    pub prompt: String,
    /// Hard deadline for the call; the engine also enforces this externally.
    pub timeout_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

impl ProviderRequest {
    pub fn new(prompt: impl Into<String>, timeout_ms: u64) -> Self {
        Self {
            prompt: prompt.into(),
            timeout_ms,
            temperature: None,
            max_tokens: None,
        }
    }

    pub fn with_temperature(mut self, temp: f32) -> Self {
        self.temperature = Some(temp);
        self
    }

    pub fn with_max_tokens(mut self, max: u32) -> Self {
        self.max_tokens = Some(max);
        self
    }
}

// ============================================================================
// Provider Trait
// ============================================================================

/// External AI text-generation capability.
#[async_trait]
pub trait TextProvider: Send + Sync {
    /// Stable provider identifier (e.g. "openrouter")
    fn id(&self) -> &str;

    /// Human-readable provider name
    fn name(&self) -> &str;

    /// Model identifier requests are routed to
    fn model(&self) -> &str;

    /// Send a prompt and return the raw, unvalidated response.
    async fn invoke(&self, request: ProviderRequest) -> Result<RawOutput>;

    /// Pricing for cost accounting, if known.
    fn pricing(&self) -> Option<ProviderPricing> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ProviderError::RateLimited {
            retry_after_secs: 30,
        };
        assert!(err.to_string().contains("30"));

        let err = ProviderError::Api {
            status: 503,
            message: "overloaded".to_string(),
        };
        assert!(err.to_string().contains("503"));
        assert!(err.to_string().contains("overloaded"));
    }

    #[test]
    fn test_recommendations_are_actionable() {
        let errors = [
            ProviderError::RateLimited { retry_after_secs: 1 },
            ProviderError::Timeout,
            ProviderError::Auth("bad key".into()),
            ProviderError::Unknown("?".into()),
        ];
        for err in errors {
            assert!(!err.recommendation().is_empty());
        }
    }

    #[test]
    fn test_request_builder() {
        let request = ProviderRequest::new("write a chapter", 5_000)
            .with_temperature(0.8)
            .with_max_tokens(2_048);
        assert_eq!(request.timeout_ms, 5_000);
        assert_eq!(request.temperature, Some(0.8));
        assert_eq!(request.max_tokens, Some(2_048));
    }
}
