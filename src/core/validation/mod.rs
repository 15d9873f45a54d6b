//! Response Validator Module
//!
//! Extracts usable text from heterogeneous provider response shapes and
//! judges whether it is acceptable content. Judgments are returned as data
//! (`ValidationReport`), never raised; the generation engine applies its
//! retry policy to invalid reports.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::ValidationConfig;
use crate::core::llm::RawOutput;

// ============================================================================
// Issue Types
// ============================================================================

/// What kind of content the validator is judging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    Chapter,
    Outline,
    Generic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Blocks acceptance
    Critical,
    /// Informational only
    Warning,
}

/// Stable issue codes reported by the validator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IssueCode {
    NullResponse,
    NoContent,
    InsufficientLength,
    NoMeaningfulContent,
    InsufficientSentences,
    RepetitiveContent,
    ErrorAsContent,
    PermissionViolation,
    OutlineParseError,
    /// Warning-level: fewer than two substantial paragraphs
    SparseParagraphs,
    /// Warning-level: outline accepted from loosely structured text
    UnstructuredOutline,
}

/// One finding about a validated response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub code: IssueCode,
    pub message: String,
    pub severity: Severity,
}

impl ValidationIssue {
    pub fn critical(code: IssueCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            severity: Severity::Critical,
        }
    }

    pub fn warning(code: IssueCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            severity: Severity::Warning,
        }
    }
}

// ============================================================================
// Validation Report
// ============================================================================

/// Outcome of one validation call. Any critical error makes the response
/// invalid; warnings alone do not.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationReport {
    pub is_valid: bool,
    /// The extracted text, when any was found
    pub content: Option<String>,
    pub errors: Vec<ValidationIssue>,
    pub warnings: Vec<ValidationIssue>,
    pub metadata: HashMap<String, Value>,
}

impl ValidationReport {
    fn new() -> Self {
        Self {
            is_valid: false,
            content: None,
            errors: Vec::new(),
            warnings: Vec::new(),
            metadata: HashMap::new(),
        }
    }

    fn push(&mut self, issue: ValidationIssue) {
        match issue.severity {
            Severity::Critical => self.errors.push(issue),
            Severity::Warning => self.warnings.push(issue),
        }
    }

    fn finish(mut self) -> Self {
        self.is_valid = self.errors.is_empty();
        self
    }

    /// Whether a specific error code was reported.
    pub fn has_error(&self, code: IssueCode) -> bool {
        self.errors.iter().any(|e| e.code == code)
    }

    /// Whether a specific warning code was reported.
    pub fn has_warning(&self, code: IssueCode) -> bool {
        self.warnings.iter().any(|w| w.code == code)
    }
}

// ============================================================================
// Context and Permissions
// ============================================================================

/// Where the response being judged came from.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidationContext {
    pub source_id: Option<String>,
    pub chapter_number: Option<u32>,
}

/// What the producing node is allowed to emit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodePermissions {
    pub can_write_content: bool,
}

// ============================================================================
// Response Validator
// ============================================================================

/// Phrases that, in a short response, indicate an error message was returned
/// as if it were content.
const ERROR_PHRASES: &[&str] = &[
    "i cannot",
    "cannot ",
    "unable to",
    "i can't",
    "i'm sorry",
    "rate limit",
    "unauthorized",
    "invalid api key",
    "an error occurred",
    "something went wrong",
];

/// Keywords that mark freeform text as outline-like.
const OUTLINE_KEYWORDS: &[&str] = &[
    "chapter",
    "plot",
    "character",
    "act",
    "scene",
    "arc",
    "protagonist",
    "setting",
    "theme",
    "conflict",
];

/// Judges provider responses for acceptability.
pub struct ResponseValidator {
    config: ValidationConfig,
}

impl ResponseValidator {
    pub fn new() -> Self {
        Self {
            config: ValidationConfig::default(),
        }
    }

    pub fn with_config(config: ValidationConfig) -> Self {
        Self { config }
    }

    /// Validate a raw provider response.
    pub fn validate(
        &self,
        raw: Option<&RawOutput>,
        content_type: ContentType,
        context: &ValidationContext,
        permissions: Option<&NodePermissions>,
    ) -> ValidationReport {
        let mut report = ValidationReport::new();

        if let Some(perms) = permissions {
            if !perms.can_write_content && content_type == ContentType::Chapter {
                let source = context.source_id.as_deref().unwrap_or("unknown");
                report.push(ValidationIssue::critical(
                    IssueCode::PermissionViolation,
                    format!("Node '{source}' is not permitted to write narrative content"),
                ));
            }
        }

        let raw = match raw {
            Some(raw) => raw,
            None => {
                report.push(ValidationIssue::critical(
                    IssueCode::NullResponse,
                    "Provider returned no response",
                ));
                return report.finish();
            }
        };

        let content = match self.extract_content(raw) {
            Some(content) if !content.trim().is_empty() => content,
            _ => {
                report.push(ValidationIssue::critical(
                    IssueCode::NoContent,
                    "No usable text found in the provider response",
                ));
                return report.finish();
            }
        };

        match content_type {
            ContentType::Chapter => self.validate_chapter(&content, &mut report),
            ContentType::Outline => self.validate_outline(&content, &mut report),
            ContentType::Generic => {
                report.metadata.insert(
                    "word_count".into(),
                    crate::core::models::word_count(&content).into(),
                );
            }
        }

        report.content = Some(content);
        report.finish()
    }

    // ========================================================================
    // Content Extraction
    // ========================================================================

    /// Extract usable text from any known response shape. `None` means the
    /// caller must treat the response as containing no content.
    pub fn extract_content(&self, raw: &RawOutput) -> Option<String> {
        match raw {
            RawOutput::Text(text) => {
                let trimmed = text.trim();
                // A string that carries an embedded structured record is
                // unwrapped and re-dispatched; anything else is literal text.
                if trimmed.starts_with('{') || trimmed.starts_with('[') {
                    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
                        if let Some(inner) = self.extract_from_value(&value) {
                            return Some(inner);
                        }
                    }
                }
                (!trimmed.is_empty()).then(|| trimmed.to_string())
            }
            RawOutput::Blocks(blocks) => blocks
                .iter()
                .map(|b| b.text.trim())
                .find(|t| !t.is_empty())
                .map(str::to_string),
            RawOutput::Chat(payload) => payload
                .choices
                .first()
                .map(|c| c.message.content.trim().to_string())
                .filter(|c| !c.is_empty()),
            RawOutput::Chapters(records) => records
                .first()
                .map(|r| r.content.trim().to_string())
                .filter(|c| !c.is_empty()),
            RawOutput::Raw(value) => self.extract_from_value(value),
        }
    }

    /// Fallback extraction over an unrecognized JSON shape: prefer a
    /// block-style `content` array, then a chat payload, then flat candidate
    /// fields, recursing into nested values.
    fn extract_from_value(&self, value: &Value) -> Option<String> {
        match value {
            Value::String(s) => {
                let trimmed = s.trim();
                (!trimmed.is_empty()).then(|| trimmed.to_string())
            }
            Value::Array(items) => items.iter().find_map(|v| self.extract_from_value(v)),
            Value::Object(map) => {
                if let Some(Value::Array(blocks)) = map.get("content") {
                    if let Some(text) = blocks
                        .iter()
                        .filter_map(|b| b.get("text").and_then(Value::as_str))
                        .map(str::trim)
                        .find(|t| !t.is_empty())
                    {
                        return Some(text.to_string());
                    }
                }

                if let Some(text) = value
                    .pointer("/choices/0/message/content")
                    .and_then(Value::as_str)
                    .map(str::trim)
                    .filter(|t| !t.is_empty())
                {
                    return Some(text.to_string());
                }

                for field in ["content", "text", "message", "output", "result", "data"] {
                    if let Some(inner) = map.get(field) {
                        if let Some(text) = self.extract_from_value(inner) {
                            return Some(text);
                        }
                    }
                }
                None
            }
            _ => None,
        }
    }

    // ========================================================================
    // Chapter Validation
    // ========================================================================

    fn validate_chapter(&self, text: &str, report: &mut ValidationReport) {
        let words: Vec<&str> = text.split_whitespace().collect();
        let word_count = words.len();
        report
            .metadata
            .insert("word_count".into(), word_count.into());

        if word_count < self.config.min_word_count {
            report.push(ValidationIssue::critical(
                IssueCode::InsufficientLength,
                format!(
                    "Content has {word_count} words, minimum is {}",
                    self.config.min_word_count
                ),
            ));
        }

        let meaningful = text.chars().filter(|c| !c.is_whitespace()).count();
        if meaningful < self.config.min_meaningful_chars {
            report.push(ValidationIssue::critical(
                IssueCode::NoMeaningfulContent,
                format!(
                    "Content has {meaningful} meaningful characters, minimum is {}",
                    self.config.min_meaningful_chars
                ),
            ));
        }

        let sentences = text
            .split(['.', '!', '?'])
            .filter(|fragment| fragment.trim().len() > 10)
            .count();
        report
            .metadata
            .insert("sentence_count".into(), sentences.into());
        if sentences < self.config.min_sentences {
            report.push(ValidationIssue::critical(
                IssueCode::InsufficientSentences,
                format!(
                    "Content has {sentences} sentences, minimum is {}",
                    self.config.min_sentences
                ),
            ));
        }

        if let Some((sequence, count)) = self.worst_repetition(&words) {
            report
                .metadata
                .insert("repeated_sequence".into(), sequence.clone().into());
            report
                .metadata
                .insert("repetition_count".into(), count.into());
            report.push(ValidationIssue::critical(
                IssueCode::RepetitiveContent,
                format!("Sequence \"{sequence}\" repeats {count} times"),
            ));
        }

        if text.len() < self.config.error_phrase_scan_limit {
            let lowered = text.to_lowercase();
            if let Some(phrase) = ERROR_PHRASES.iter().find(|p| lowered.contains(**p)) {
                report.push(ValidationIssue::critical(
                    IssueCode::ErrorAsContent,
                    format!("Short response contains error phrase \"{}\"", phrase.trim()),
                ));
            }
        }

        let paragraphs = text
            .split("\n\n")
            .filter(|p| p.trim().len() > 50)
            .count();
        if paragraphs < 2 {
            report.push(ValidationIssue::warning(
                IssueCode::SparseParagraphs,
                "Content has fewer than two substantial paragraphs",
            ));
        }
    }

    /// Slide a window across the tokenized text and count how often each
    /// exact sequence recurs. Returns the worst offender when any sequence
    /// repeats more than the configured threshold.
    fn worst_repetition(&self, words: &[&str]) -> Option<(String, usize)> {
        let window = self.config.repetition_window;
        if words.len() < window {
            return None;
        }

        let mut counts: HashMap<Vec<&str>, usize> = HashMap::new();
        for seq in words.windows(window) {
            *counts.entry(seq.to_vec()).or_insert(0) += 1;
        }

        counts
            .into_iter()
            .filter(|(_, count)| *count > self.config.repetition_threshold)
            .max_by_key(|(_, count)| *count)
            .map(|(seq, count)| (seq.join(" "), count))
    }

    // ========================================================================
    // Outline Validation
    // ========================================================================

    fn validate_outline(&self, text: &str, report: &mut ValidationReport) {
        // Direct parse first, then recovery from fence/markdown wrapping.
        if let Some(value) = self.parse_outline_json(text) {
            let empty = match &value {
                Value::Object(map) => map.is_empty(),
                Value::Array(items) => items.is_empty(),
                _ => true,
            };
            if empty {
                report.push(ValidationIssue::critical(
                    IssueCode::OutlineParseError,
                    "Outline parsed to an empty structure",
                ));
            } else {
                report.metadata.insert("structured".into(), true.into());
            }
            return;
        }

        // Planning-stage output format is intentionally flexible: clearly
        // list-structured or keyword-rich plain text is accepted with a
        // warning instead of rejected.
        let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
        let listish = lines
            .iter()
            .filter(|line| {
                let t = line.trim_start();
                t.starts_with('-')
                    || t.starts_with('*')
                    || t.starts_with('•')
                    || t.chars().next().is_some_and(|c| c.is_ascii_digit())
            })
            .count();
        if !lines.is_empty() && listish * 2 >= lines.len() {
            report.push(ValidationIssue::warning(
                IssueCode::UnstructuredOutline,
                "Outline accepted as a plain list, not structured data",
            ));
            return;
        }

        let lowered = text.to_lowercase();
        let keyword_hits = OUTLINE_KEYWORDS
            .iter()
            .filter(|k| lowered.contains(**k))
            .count();
        if keyword_hits >= 3 {
            report.push(ValidationIssue::warning(
                IssueCode::UnstructuredOutline,
                format!("Outline accepted as freeform text ({keyword_hits} outline keywords)"),
            ));
            return;
        }

        report.push(ValidationIssue::critical(
            IssueCode::OutlineParseError,
            "No outline structure or outline-like signal found",
        ));
    }

    fn parse_outline_json(&self, text: &str) -> Option<Value> {
        if let Ok(value) = serde_json::from_str::<Value>(text.trim()) {
            if value.is_object() || value.is_array() {
                return Some(value);
            }
        }
        self.largest_brace_block(text)
            .and_then(|block| serde_json::from_str::<Value>(block).ok())
    }

    /// Locate the largest balanced `{...}` block inside fence- or
    /// markdown-wrapped text.
    fn largest_brace_block<'t>(&self, text: &'t str) -> Option<&'t str> {
        let bytes = text.as_bytes();
        let mut best: Option<(usize, usize)> = None;
        let mut stack: Vec<usize> = Vec::new();

        for (i, b) in bytes.iter().enumerate() {
            match b {
                b'{' => stack.push(i),
                b'}' => {
                    if let Some(start) = stack.pop() {
                        // Only top-level balanced spans are candidates
                        if stack.is_empty() {
                            let len = i - start + 1;
                            if best.map_or(true, |(s, e)| len > e - s + 1) {
                                best = Some((start, i));
                            }
                        }
                    }
                }
                _ => {}
            }
        }

        best.map(|(start, end)| &text[start..=end])
    }
}

impl Default for ResponseValidator {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Tests
// ============================================================================
