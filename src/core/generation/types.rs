//! Generation Types
//!
//! Book specs, chapter drafts, attempt outcomes, progress events,
//! cancellation, and the terminal error type for a generation run.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::llm::{ProviderError, TokenUsage};
use crate::core::validation::IssueCode;

// ============================================================================
// Book Spec
// ============================================================================

/// Externally supplied mandate for one chapter: a required title and/or
/// outline that overrides whatever the generation step would invent.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChapterDirective {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outline: Option<String>,
}

/// What to generate: identity, prompt template, word target, and optional
/// per-chapter structural directives (index 0 = chapter 1).
///
/// Template placeholders: `{chapter}`, `{total_chapters}`, `{target_words}`,
/// `{title}`, `{outline}`, `{context}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookSpec {
    pub title: String,
    pub author: String,
    pub prompt_template: String,
    /// Target word count for the whole book
    pub total_word_target: usize,
    #[serde(default)]
    pub directives: Vec<ChapterDirective>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
}

impl BookSpec {
    pub fn new(title: impl Into<String>, author: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            author: author.into(),
            prompt_template: String::new(),
            total_word_target: 0,
            directives: Vec::new(),
            temperature: None,
        }
    }

    pub fn with_template(mut self, template: impl Into<String>) -> Self {
        self.prompt_template = template.into();
        self
    }

    pub fn with_word_target(mut self, words: usize) -> Self {
        self.total_word_target = words;
        self
    }

    pub fn with_directives(mut self, directives: Vec<ChapterDirective>) -> Self {
        self.directives = directives;
        self
    }

    pub fn directive_for(&self, chapter: u32) -> Option<&ChapterDirective> {
        self.directives.get((chapter as usize).saturating_sub(1))
    }
}

// ============================================================================
// Chapter Draft and States
// ============================================================================

/// Lifecycle of one chapter inside the generation loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChapterState {
    Pending,
    Generating,
    Validating,
    Retrying,
    Accepted,
    Failed,
}

/// An accepted chapter, before compilation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChapterDraft {
    pub number: u32,
    pub title: String,
    pub content: String,
    pub word_count: usize,
    pub usage: TokenUsage,
    /// Attempts it took to produce this draft (first try included)
    pub attempts: u32,
}

/// Ephemeral record of one try for one chapter.
#[derive(Debug, Clone)]
pub struct GenerationAttempt {
    pub index: u32,
    pub failure: Option<FailureCause>,
}

/// Explicit outcome of a single generation attempt.
#[derive(Debug)]
pub enum AttemptOutcome {
    Accepted(ChapterDraft),
    /// Failed, worth retrying
    Retry(FailureCause),
    /// Failed in a way more attempts cannot fix
    Fatal(FailureCause),
}

// ============================================================================
// Failure Causes
// ============================================================================

/// The underlying reason an attempt (or a whole chapter) failed.
#[derive(Debug, Clone)]
pub enum FailureCause {
    Provider(ProviderError),
    InvalidContent { codes: Vec<IssueCode>, detail: String },
}

impl std::fmt::Display for FailureCause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureCause::Provider(err) => write!(f, "provider error: {err}"),
            FailureCause::InvalidContent { codes, detail } => {
                write!(f, "content rejected ({codes:?}): {detail}")
            }
        }
    }
}

impl FailureCause {
    /// Human-readable next step for terminal error reporting.
    pub fn recommendation(&self) -> String {
        match self {
            FailureCause::Provider(err) => err.recommendation().to_string(),
            FailureCause::InvalidContent { codes, .. } => {
                if codes.contains(&IssueCode::RepetitiveContent) {
                    "Repetitive content — adjust the sampling temperature or switch models"
                        .to_string()
                } else if codes.contains(&IssueCode::ErrorAsContent) {
                    "The provider returned an error message as content — check provider status"
                        .to_string()
                } else {
                    "Content failed quality checks — refine the prompt or raise the word target"
                        .to_string()
                }
            }
        }
    }
}

/// Terminal error for a generation run. `ChapterFailed` carries the chapters
/// completed before the failure so the caller can decide whether to salvage
/// them into a partial book; the engine itself only raises.
#[derive(Error, Debug)]
pub enum GenerationError {
    #[error("Chapter {chapter} failed after {attempts} attempts: {cause}")]
    ChapterFailed {
        chapter: u32,
        attempts: u32,
        cause: FailureCause,
        completed: Vec<ChapterDraft>,
    },

    #[error("Outline generation failed after {attempts} attempts: {cause}")]
    OutlineFailed { attempts: u32, cause: FailureCause },
}

impl GenerationError {
    pub fn recommendation(&self) -> String {
        match self {
            GenerationError::ChapterFailed { cause, .. }
            | GenerationError::OutlineFailed { cause, .. } => cause.recommendation(),
        }
    }
}

pub type Result<T> = std::result::Result<T, GenerationError>;

// ============================================================================
// Progress Events
// ============================================================================

/// Status of the producing node, as reported to the progress sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Queued,
    Processing,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ChapterProgress {
    pub current: u32,
    pub total: u32,
}

/// One progress event. Events for chapter `i` are always emitted before
/// events for chapter `i + 1`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressEvent {
    /// Identifies the generation run this event belongs to
    pub run_id: String,
    /// Identifies the producing node within the run
    pub node_id: String,
    pub status: NodeStatus,
    pub progress_percent: f32,
    pub tokens: u32,
    pub words: usize,
    pub cost_usd: f64,
    pub chapter: ChapterProgress,
}

/// Consumer of progress events. Implementations must never block the
/// generation loop and must tolerate repeated invocation.
pub trait ProgressSink: Send + Sync {
    fn emit(&self, event: ProgressEvent);
}

/// Discards all events.
pub struct NullSink;

impl ProgressSink for NullSink {
    fn emit(&self, _event: ProgressEvent) {}
}

/// Forwards events over a bounded tokio channel without blocking; events are
/// dropped when the receiver falls behind.
pub struct ChannelSink {
    tx: tokio::sync::mpsc::Sender<ProgressEvent>,
}

impl ChannelSink {
    pub fn new(tx: tokio::sync::mpsc::Sender<ProgressEvent>) -> Self {
        Self { tx }
    }
}

impl ProgressSink for ChannelSink {
    fn emit(&self, event: ProgressEvent) {
        if let Err(err) = self.tx.try_send(event) {
            tracing::debug!("Progress event dropped: {err}");
        }
    }
}

// ============================================================================
// Cancellation
// ============================================================================

/// Cooperative cancellation flag. The generation loop polls it before each
/// provider call and after each completed chapter; an in-flight call is
/// awaited and its result discarded.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

// ============================================================================
// Run Results
// ============================================================================

/// Aggregate statistics for one generation run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenerationStats {
    pub chapters_completed: u32,
    pub chapters_requested: u32,
    pub attempts_total: u32,
    pub usage: TokenUsage,
    pub cost_usd: f64,
}

/// The outcome of a generation run that did not fail terminally.
#[derive(Debug, Clone)]
pub struct GenerationRun {
    pub drafts: Vec<ChapterDraft>,
    /// True when cancellation stopped the run before all chapters completed
    pub stopped: bool,
    pub stats: GenerationStats,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_token_flips_once() {
        let token = CancelToken::new();
        assert!(!token.is_cancelled());
        let clone = token.clone();
        clone.cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_directive_lookup_is_one_based() {
        let spec = BookSpec::new("T", "A").with_directives(vec![
            ChapterDirective {
                title: Some("First".into()),
                outline: None,
            },
            ChapterDirective {
                title: Some("Second".into()),
                outline: None,
            },
        ]);
        assert_eq!(
            spec.directive_for(1).and_then(|d| d.title.as_deref()),
            Some("First")
        );
        assert_eq!(
            spec.directive_for(2).and_then(|d| d.title.as_deref()),
            Some("Second")
        );
        assert!(spec.directive_for(3).is_none());
    }

    #[test]
    fn test_chapter_failed_display_names_chapter_and_cause() {
        let err = GenerationError::ChapterFailed {
            chapter: 4,
            attempts: 3,
            cause: FailureCause::Provider(ProviderError::Timeout),
            completed: Vec::new(),
        };
        let msg = err.to_string();
        assert!(msg.contains("Chapter 4"));
        assert!(msg.contains("3 attempts"));
        assert!(msg.contains("timed out"));
    }

    #[test]
    fn test_recommendation_for_repetitive_content() {
        let err = GenerationError::ChapterFailed {
            chapter: 1,
            attempts: 3,
            cause: FailureCause::InvalidContent {
                codes: vec![IssueCode::RepetitiveContent],
                detail: "sequence repeats".into(),
            },
            completed: Vec::new(),
        };
        assert!(err.recommendation().contains("temperature"));
    }
}
