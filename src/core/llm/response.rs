//! Provider Response Shapes
//!
//! Providers return text wrapped in one of a small set of known shapes.
//! `RawOutput` models them as an explicit tagged union with a `Raw` fallback
//! for shapes no variant claims, so downstream code dispatches on variants
//! instead of probing fields.

use serde::{Deserialize, Serialize};

// ============================================================================
// Shape Variants
// ============================================================================

/// A `{type, text}` content block, as returned by block-style APIs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentBlock {
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub block_type: Option<String>,
    pub text: String,
}

/// A pre-structured chapter record supplied by an upstream producer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChapterRecord {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chapter: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

/// One choice inside a chat-completion payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatChoice {
    pub message: ChatMessage,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    pub content: String,
}

/// A chat-completion payload (`choices[0].message.content`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatPayload {
    pub choices: Vec<ChatChoice>,
}

// ============================================================================
// RawOutput
// ============================================================================

/// The opaque result of one generation attempt or an externally supplied
/// producer output. Untagged deserialization tries the most specific shape
/// first; anything unclaimed lands in `Raw`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawOutput {
    /// Pre-structured list of chapter records
    Chapters(Vec<ChapterRecord>),
    /// List of `{type, text}` blocks
    Blocks(Vec<ContentBlock>),
    /// Nested `choices[0].message.content` payload
    Chat(ChatPayload),
    /// Plain text (may itself embed a structured record)
    Text(String),
    /// Unrecognized shape, kept verbatim
    Raw(serde_json::Value),
}

impl RawOutput {
    pub fn text(content: impl Into<String>) -> Self {
        RawOutput::Text(content.into())
    }

    /// Classify an arbitrary JSON value into the closest known shape.
    /// Values no specific variant claims land in `Raw`.
    pub fn from_value(value: serde_json::Value) -> Self {
        serde_json::from_value(value.clone()).unwrap_or(RawOutput::Raw(value))
    }
}

impl From<String> for RawOutput {
    fn from(s: String) -> Self {
        RawOutput::Text(s)
    }
}

impl From<&str> for RawOutput {
    fn from(s: &str) -> Self {
        RawOutput::Text(s.to_string())
    }
}
