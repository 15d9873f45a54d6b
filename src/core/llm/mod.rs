//! Provider Abstraction Module
//!
//! Black-box interface to external AI text providers:
//! - `provider`: the `TextProvider` trait, request type, and classified errors
//! - `response`: the tagged union of known provider response shapes
//! - `cost`: token usage accounting and per-model pricing

pub mod cost;
pub mod provider;
pub mod response;

pub use cost::{estimate_tokens, ProviderPricing, TokenUsage};
pub use provider::{ProviderError, ProviderRequest, Result, TextProvider};
pub use response::{ChapterRecord, ChatChoice, ChatMessage, ChatPayload, ContentBlock, RawOutput};
