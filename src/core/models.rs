//! Book Domain Types
//!
//! Shared types for compiled books: chapters, metadata, format options,
//! and duplicate-drop records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

// ============================================================================
// Content Hashing
// ============================================================================

/// Normalize text for fingerprinting: lowercase, strip punctuation,
/// collapse whitespace. Word order is preserved.
pub fn normalize_for_hash(text: &str) -> String {
    let lowered = text.to_lowercase();
    let stripped: String = lowered
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c.is_whitespace() {
                c
            } else {
                ' '
            }
        })
        .collect();
    stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Order-sensitive fingerprint of normalized chapter text.
pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalize_for_hash(text).as_bytes());
    hex::encode(hasher.finalize())
}

/// Count whitespace-separated words.
pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

// ============================================================================
// Chapter
// ============================================================================

/// A structured chapter inside a compiled book.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chapter {
    /// Chapter number, unique within a compiled book
    pub number: u32,
    /// Chapter title (defaulted to "Chapter <n>" when blank)
    pub title: String,
    /// Chapter body text
    pub content: String,
    /// Normalized fingerprint used for exact-duplicate rejection
    pub content_hash: String,
    /// Identifiers of the producers that contributed this chapter
    pub sources: Vec<String>,
    /// Word count of the body
    pub word_count: usize,
}

impl Chapter {
    pub fn new(number: u32, title: impl Into<String>, content: impl Into<String>) -> Self {
        let content = content.into();
        Self {
            number,
            title: title.into(),
            content_hash: content_hash(&content),
            word_count: word_count(&content),
            content,
            sources: Vec::new(),
        }
    }

    pub fn with_source(mut self, source_id: impl Into<String>) -> Self {
        self.sources.push(source_id.into());
        self
    }

    /// Recompute hash and word count after the content was edited in place.
    pub fn refresh(&mut self) {
        self.content_hash = content_hash(&self.content);
        self.word_count = word_count(&self.content);
    }
}

// ============================================================================
// Book Metadata
// ============================================================================

/// Metadata describing a compiled book.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookMetadata {
    pub title: String,
    pub author: String,
    pub total_words: usize,
    pub total_chapters: usize,
    /// Estimated reading time in minutes
    pub reading_time_minutes: usize,
    /// When compilation finished
    pub generated_at: DateTime<Utc>,
    /// Distinct content-source identifiers across all chapters
    pub sources: Vec<String>,
}

/// Caller-supplied book identity, before compilation fills in the totals.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BookInfo {
    pub title: String,
    pub author: String,
}

impl BookInfo {
    pub fn new(title: impl Into<String>, author: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            author: author.into(),
        }
    }
}

// ============================================================================
// Compiled Book
// ============================================================================

/// Reason a chapter was rejected during deduplication.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum DropReason {
    /// Identical normalized hash as an accepted chapter
    ExactDuplicate { of_chapter: u32 },
    /// Word-set overlap with an accepted chapter above the threshold
    NearDuplicate { of_chapter: u32, similarity: f64 },
    /// Extracted content was empty or below the minimum length
    TooShort { chars: usize },
}

/// Record of a chapter dropped during compilation. Drops are bookkeeping,
/// never errors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DropRecord {
    /// Number the dropped chapter claimed
    pub chapter_number: u32,
    pub title: String,
    pub reason: DropReason,
}

/// Formatting options for the final document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FormatOptions {
    /// Include a table of contents between the author line and the body
    pub table_of_contents: bool,
    /// Rule inserted between chapter bodies
    pub chapter_separator: String,
}

impl Default for FormatOptions {
    fn default() -> Self {
        Self {
            table_of_contents: true,
            chapter_separator: "---".to_string(),
        }
    }
}

/// A fully compiled book. A partial book is the same value with
/// `stopped = true` and fewer chapters than were requested.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompiledBook {
    /// Final formatted document text
    pub content: String,
    pub metadata: BookMetadata,
    pub chapters: Vec<Chapter>,
    /// True when generation was cancelled or salvaged before completion
    pub stopped: bool,
    /// Chapters rejected during deduplication or ingest
    pub drops: Vec<DropRecord>,
}
