//! Content Compiler Module
//!
//! Turns a heterogeneous collection of producer outputs into a structured,
//! deduplicated, integrity-checked book:
//!
//! ```text
//! Raw outputs → Extraction → Chapter parsing → Dedup → Integrity → Format
//! ```
//!
//! Compiler issues are never fatal: duplicates are dropped and recorded,
//! integrity problems are repaired in place, and compilation succeeds
//! whenever at least one chapter survives.

pub mod dedup;

pub use dedup::{Admission, DuplicateRegistry};

use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::CompilerConfig;
use crate::core::llm::RawOutput;
use crate::core::models::{
    BookInfo, BookMetadata, Chapter, CompiledBook, DropReason, DropRecord, FormatOptions,
};
use crate::core::validation::ResponseValidator;

// ============================================================================
// Types
// ============================================================================

/// One producer output handed to the compiler. The payload may be plain
/// text, a pre-structured chapter list, or any response-shaped value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeOutput {
    pub source_id: String,
    pub payload: RawOutput,
}

/// Flat extracted text plus the hints needed to structure it.
struct SourceText {
    content: String,
    source_id: String,
    number_hint: Option<u32>,
    title_hint: Option<String>,
}

/// `Chapter <n>[: title]` at a line start, optionally behind markup-style
/// heading markers.
static CHAPTER_HEADING: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?mi)^\s*(?:[#*]+\s*)?chapter\s+(\d+)\s*[:.\-]?\s*(\S.*)?$").unwrap()
});

static EXCESS_NEWLINES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").unwrap());

/// Marker appended to chapters that arrive below the minimum length.
const CONTINUATION_MARKER: &str = "[content continues]";

// ============================================================================
// Book Compiler
// ============================================================================

/// Compiles raw producer outputs into a finished book. Stateless across
/// calls; every invocation owns a private duplicate registry.
pub struct BookCompiler {
    config: CompilerConfig,
    validator: ResponseValidator,
}

impl BookCompiler {
    pub fn new() -> Self {
        Self::with_config(CompilerConfig::default())
    }

    pub fn with_config(config: CompilerConfig) -> Self {
        Self {
            config,
            validator: ResponseValidator::new(),
        }
    }

    /// Compile producer outputs into a formatted book.
    pub fn compile(
        &self,
        outputs: &[NodeOutput],
        info: &BookInfo,
        options: &FormatOptions,
    ) -> CompiledBook {
        let mut drops = Vec::new();

        let sources = self.extract_raw_content(outputs, &mut drops);
        let parsed = self.parse_and_structure_chapters(sources);

        let mut registry = DuplicateRegistry::new(&self.config);
        let mut chapters = Vec::new();
        for chapter in parsed {
            match registry.admit(&chapter) {
                Admission::Accepted => chapters.push(chapter),
                Admission::Rejected(reason) => {
                    info!(
                        chapter = chapter.number,
                        title = %chapter.title,
                        ?reason,
                        "Dropping duplicate chapter"
                    );
                    drops.push(DropRecord {
                        chapter_number: chapter.number,
                        title: chapter.title,
                        reason,
                    });
                }
            }
        }

        debug!(accepted = ?registry.keys(), "Duplicate screening complete");
        self.validate_chapter_integrity(&mut chapters);

        let metadata = self.generate_book_metadata(info, &chapters);
        let content = self.format_final_book(&metadata, &chapters, options);
        debug!(
            chapters = chapters.len(),
            words = metadata.total_words,
            dropped = drops.len(),
            "Compilation finished"
        );

        CompiledBook {
            content,
            metadata,
            chapters,
            stopped: false,
            drops,
        }
    }

    // ========================================================================
    // Extraction
    // ========================================================================

    /// Normalize producer outputs into flat `{content, source, hints}`
    /// tuples, discarding anything empty or below the minimum length.
    fn extract_raw_content(
        &self,
        outputs: &[NodeOutput],
        drops: &mut Vec<DropRecord>,
    ) -> Vec<SourceText> {
        let mut sources = Vec::new();

        for output in outputs {
            match &output.payload {
                RawOutput::Chapters(records) => {
                    for record in records {
                        let content = record.content.trim();
                        if content.len() < self.config.min_content_chars {
                            drops.push(DropRecord {
                                chapter_number: record.chapter.unwrap_or(0),
                                title: record.title.clone().unwrap_or_default(),
                                reason: DropReason::TooShort {
                                    chars: content.len(),
                                },
                            });
                            continue;
                        }
                        sources.push(SourceText {
                            content: content.to_string(),
                            source_id: output.source_id.clone(),
                            number_hint: record.chapter,
                            title_hint: record.title.clone(),
                        });
                    }
                }
                payload => {
                    let extracted = self.extract_payload_text(payload).unwrap_or_default();
                    let content = extracted.trim();
                    if content.len() < self.config.min_content_chars {
                        drops.push(DropRecord {
                            chapter_number: 0,
                            title: output.source_id.clone(),
                            reason: DropReason::TooShort {
                                chars: content.len(),
                            },
                        });
                        continue;
                    }
                    sources.push(SourceText {
                        content: content.to_string(),
                        source_id: output.source_id.clone(),
                        number_hint: None,
                        title_hint: None,
                    });
                }
            }
        }

        sources
    }

    /// Producer payloads sometimes nest the real response one level down
    /// (`raw_data`, `ai_response`); unwrap those before the generic
    /// shape extraction.
    fn extract_payload_text(&self, payload: &RawOutput) -> Option<String> {
        if let RawOutput::Raw(value) = payload {
            for field in ["raw_data", "rawData", "ai_response", "aiResponse"] {
                if let Some(inner) = value.get(field) {
                    let inner_output = RawOutput::from_value(inner.clone());
                    if let Some(text) = self.validator.extract_content(&inner_output) {
                        return Some(text);
                    }
                }
            }
        }
        self.validator.extract_content(payload)
    }

    // ========================================================================
    // Chapter Parsing
    // ========================================================================

    /// Pre-structured records map directly; free text is sliced on chapter
    /// headings. Text with no boundary at all becomes a single Chapter 1.
    fn parse_and_structure_chapters(&self, sources: Vec<SourceText>) -> Vec<Chapter> {
        let mut chapters = Vec::new();

        for source in sources {
            if let Some(number) = source.number_hint {
                let title = source.title_hint.clone().unwrap_or_default();
                chapters.push(
                    Chapter::new(number, title, source.content.as_str())
                        .with_source(&source.source_id),
                );
                continue;
            }

            let matches: Vec<regex::Captures> =
                CHAPTER_HEADING.captures_iter(&source.content).collect();

            if matches.is_empty() {
                let title = source.title_hint.clone().unwrap_or_default();
                chapters.push(
                    Chapter::new(1, title, source.content.trim()).with_source(&source.source_id),
                );
                continue;
            }

            for (i, caps) in matches.iter().enumerate() {
                let heading = caps.get(0).expect("capture 0 always present");
                let number: u32 = caps[1].parse().unwrap_or((i + 1) as u32);
                let title = caps
                    .get(2)
                    .map(|m| m.as_str().trim().to_string())
                    .unwrap_or_default();

                let body_start = heading.end();
                let body_end = matches
                    .get(i + 1)
                    .and_then(|c| c.get(0))
                    .map(|m| m.start())
                    .unwrap_or(source.content.len());
                let body = source.content[body_start..body_end].trim();

                chapters.push(Chapter::new(number, title, body).with_source(&source.source_id));
            }
        }

        chapters
    }

    // ========================================================================
    // Integrity
    // ========================================================================

    /// Repair structural issues in place: contested numbers (the later
    /// claimant keeps the number, the earlier holder is bumped to a fresh
    /// one), short content, blank titles, duplicated inline headers, and
    /// excess whitespace. Never fails.
    fn validate_chapter_integrity(&self, chapters: &mut [Chapter]) {
        let mut counter = chapters.iter().map(|c| c.number).max().unwrap_or(0);
        let mut holders: HashMap<u32, usize> = HashMap::new();

        for i in 0..chapters.len() {
            let number = chapters[i].number;
            if let Some(&prev) = holders.get(&number) {
                counter += 1;
                chapters[prev].number = counter;
                holders.insert(counter, prev);
                debug!(from = number, to = counter, "Reassigned contested chapter number");
            }
            holders.insert(number, i);
        }

        for chapter in chapters.iter_mut() {
            // A heading duplicated at the top of the body would render twice
            if let Some(heading) = CHAPTER_HEADING.find(&chapter.content) {
                if heading.start() == 0 {
                    chapter.content = chapter.content[heading.end()..].trim_start().to_string();
                }
            }

            chapter.content = EXCESS_NEWLINES
                .replace_all(chapter.content.trim(), "\n\n")
                .into_owned();

            if chapter.content.len() < self.config.min_chapter_chars {
                if !chapter.content.is_empty() {
                    chapter.content.push_str("\n\n");
                }
                chapter.content.push_str(CONTINUATION_MARKER);
            }

            if chapter.title.trim().is_empty() {
                chapter.title = format!("Chapter {}", chapter.number);
            }

            chapter.refresh();
        }

        chapters.sort_by_key(|c| c.number);
    }

    // ========================================================================
    // Metadata and Formatting
    // ========================================================================

    fn generate_book_metadata(&self, info: &BookInfo, chapters: &[Chapter]) -> BookMetadata {
        let total_words: usize = chapters.iter().map(|c| c.word_count).sum();
        let wpm = self.config.words_per_minute.max(1);

        let mut sources: Vec<String> = Vec::new();
        for chapter in chapters {
            for source in &chapter.sources {
                if !sources.contains(source) {
                    sources.push(source.clone());
                }
            }
        }

        BookMetadata {
            title: info.title.clone(),
            author: info.author.clone(),
            total_words,
            total_chapters: chapters.len(),
            reading_time_minutes: total_words.div_ceil(wpm),
            generated_at: chrono::Utc::now(),
            sources,
        }
    }

    /// Render the document in fixed order: title, author line, optional
    /// table of contents, chapter bodies separated by a rule.
    fn format_final_book(
        &self,
        metadata: &BookMetadata,
        chapters: &[Chapter],
        options: &FormatOptions,
    ) -> String {
        let mut out = String::new();
        out.push_str(&metadata.title);
        out.push('\n');
        out.push_str(&format!("by {}\n\n", metadata.author));

        if options.table_of_contents {
            out.push_str("Table of Contents\n\n");
            for chapter in chapters {
                out.push_str(&format!("{}. {}\n", chapter.number, chapter.title));
            }
            out.push('\n');
        }

        for (i, chapter) in chapters.iter().enumerate() {
            if i > 0 {
                out.push_str(&format!("\n{}\n\n", options.chapter_separator));
            }
            if chapter.title == format!("Chapter {}", chapter.number) {
                out.push_str(&format!("Chapter {}\n\n", chapter.number));
            } else {
                out.push_str(&format!("Chapter {}: {}\n\n", chapter.number, chapter.title));
            }
            out.push_str(&chapter.content);
            out.push('\n');
        }

        out
    }
}

impl Default for BookCompiler {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::llm::ChapterRecord;
    use proptest::prelude::*;
    use serde_json::json;

    fn compiler() -> BookCompiler {
        BookCompiler::new()
    }

    fn info() -> BookInfo {
        BookInfo::new("The Harbor Lights", "A. Keel")
    }

    fn record_output(source: &str, number: u32, title: &str, content: &str) -> NodeOutput {
        NodeOutput {
            source_id: source.to_string(),
            payload: RawOutput::Chapters(vec![ChapterRecord {
                chapter: Some(number),
                title: Some(title.to_string()),
                content: content.to_string(),
                metadata: None,
            }]),
        }
    }

    /// Chapter body whose significant words are derived from the seed, so
    /// different seeds never trip the near-duplicate detector.
    fn body(seed: &str) -> String {
        let mut words: Vec<String> = (0..18).map(|i| format!("{seed}word{i}")).collect();
        words.push("with a closing line.".to_string());
        words.join(" ")
    }

    #[test]
    fn test_toc_round_trip_lists_all_chapters_in_order() {
        let outputs: Vec<NodeOutput> = (1..=4)
            .map(|n| {
                record_output(
                    "writer",
                    n,
                    &format!("Part {n}"),
                    &body(&format!("unique{n}")),
                )
            })
            .collect();

        let book = compiler().compile(&outputs, &info(), &FormatOptions::default());

        assert_eq!(book.chapters.len(), 4);
        for n in 1..=4u32 {
            assert!(book.content.contains(&format!("{n}. Part {n}")));
        }
        let toc_pos: Vec<usize> = (1..=4)
            .map(|n| book.content.find(&format!("{n}. Part {n}")).unwrap())
            .collect();
        assert!(toc_pos.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_chapter_numbers_unique_and_increasing() {
        let outputs = vec![
            record_output("a", 2, "Two", &body("alpha")),
            record_output("b", 1, "One", &body("beta")),
            record_output("c", 2, "AlsoTwo", &body("gamma")),
        ];

        let book = compiler().compile(&outputs, &info(), &FormatOptions::default());

        let numbers: Vec<u32> = book.chapters.iter().map(|c| c.number).collect();
        let mut sorted = numbers.clone();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(numbers.len(), sorted.len(), "numbers not unique: {numbers:?}");
        assert!(numbers.windows(2).all(|w| w[0] < w[1]), "not increasing: {numbers:?}");
    }

    #[test]
    fn test_later_chapter_wins_contested_number() {
        let outputs = vec![
            record_output("a", 1, "First Claimant", &body("alpha")),
            record_output("b", 1, "Second Claimant", &body("beta")),
        ];

        let book = compiler().compile(&outputs, &info(), &FormatOptions::default());

        let winner = book.chapters.iter().find(|c| c.number == 1).unwrap();
        assert_eq!(winner.title, "Second Claimant");
        let bumped = book.chapters.iter().find(|c| c.number == 2).unwrap();
        assert_eq!(bumped.title, "First Claimant");
    }

    #[test]
    fn test_free_text_boundary_detection() {
        let text = format!(
            "Chapter 1: Landfall\n\n{}\n\n## Chapter 2: The Crossing\n\n{}",
            body("landfall"),
            body("crossing")
        );
        let outputs = vec![NodeOutput {
            source_id: "draft".into(),
            payload: RawOutput::text(text),
        }];

        let book = compiler().compile(&outputs, &info(), &FormatOptions::default());

        assert_eq!(book.chapters.len(), 2);
        assert_eq!(book.chapters[0].title, "Landfall");
        assert_eq!(book.chapters[1].title, "The Crossing");
    }

    #[test]
    fn test_free_text_without_boundaries_is_single_chapter() {
        let outputs = vec![NodeOutput {
            source_id: "draft".into(),
            payload: RawOutput::text(body("solo")),
        }];

        let book = compiler().compile(&outputs, &info(), &FormatOptions::default());

        assert_eq!(book.chapters.len(), 1);
        assert_eq!(book.chapters[0].number, 1);
        assert_eq!(book.chapters[0].title, "Chapter 1");
    }

    #[test]
    fn test_exact_duplicate_submitted_twice_is_dropped() {
        let outputs = vec![
            record_output("a", 1, "One", &body("same")),
            record_output("b", 2, "Two", &body("same")),
        ];

        let book = compiler().compile(&outputs, &info(), &FormatOptions::default());

        assert_eq!(book.chapters.len(), 1);
        assert_eq!(book.drops.len(), 1);
        assert!(matches!(
            book.drops[0].reason,
            DropReason::ExactDuplicate { of_chapter: 1 }
        ));
    }

    #[test]
    fn test_near_duplicate_drop_cites_colliding_chapter() {
        let base = "captain harbor storm lantern evening rescue vessel crews signal beacon \
                    rigging tide breaker quarterdeck compass chartroom foghorn mast anchor cargo";
        let close = base.replace("cargo", "ledger");
        let outputs = vec![
            record_output("a", 1, "One", base),
            record_output("b", 2, "Two", &close),
        ];

        let book = compiler().compile(&outputs, &info(), &FormatOptions::default());

        assert_eq!(book.chapters.len(), 1);
        match &book.drops[0].reason {
            DropReason::NearDuplicate {
                of_chapter,
                similarity,
            } => {
                assert_eq!(*of_chapter, 1);
                assert!(*similarity > 0.85);
            }
            other => panic!("expected near-duplicate drop, got {other:?}"),
        }
    }

    #[test]
    fn test_short_chapter_padded_with_marker() {
        // Long enough to survive ingest, short enough to need padding
        let outputs = vec![record_output(
            "a",
            1,
            "Brief",
            "Fifty-one characters of content, but not quite enough.",
        )];
        let book = compiler().compile(&outputs, &info(), &FormatOptions::default());

        assert_eq!(book.chapters.len(), 1);
        assert!(book.chapters[0].content.contains(CONTINUATION_MARKER));
    }

    #[test]
    fn test_too_short_output_discarded() {
        let outputs = vec![
            NodeOutput {
                source_id: "stub".into(),
                payload: RawOutput::text("too short"),
            },
            record_output("a", 1, "One", &body("keeper")),
        ];

        let book = compiler().compile(&outputs, &info(), &FormatOptions::default());

        assert_eq!(book.chapters.len(), 1);
        assert!(book
            .drops
            .iter()
            .any(|d| matches!(d.reason, DropReason::TooShort { .. })));
    }

    #[test]
    fn test_duplicate_inline_header_stripped() {
        let content = format!("Chapter 3: Echo\n\n{}", body("echo"));
        let outputs = vec![record_output("a", 3, "Echo", &content)];

        let book = compiler().compile(&outputs, &info(), &FormatOptions::default());

        assert!(!book.chapters[0].content.to_lowercase().contains("chapter 3"));
    }

    #[test]
    fn test_nested_response_shapes_ingested() {
        let outputs = vec![
            NodeOutput {
                source_id: "node-1".into(),
                payload: RawOutput::Raw(json!({"raw_data": {"content": body("nested")}})),
            },
            NodeOutput {
                source_id: "node-2".into(),
                payload: RawOutput::Raw(json!({"aiResponse": {"text": body("response")}})),
            },
        ];

        let book = compiler().compile(&outputs, &info(), &FormatOptions::default());

        assert_eq!(book.chapters.len(), 2);
    }

    #[test]
    fn test_metadata_totals_and_reading_time() {
        let outputs = vec![
            record_output("a", 1, "One", &body("alpha")),
            record_output("b", 2, "Two", &body("beta")),
        ];

        let book = compiler().compile(&outputs, &info(), &FormatOptions::default());

        let expected_words: usize = book.chapters.iter().map(|c| c.word_count).sum();
        assert_eq!(book.metadata.total_words, expected_words);
        assert_eq!(book.metadata.total_chapters, 2);
        assert_eq!(
            book.metadata.reading_time_minutes,
            expected_words.div_ceil(200)
        );
        assert_eq!(book.metadata.sources, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_toc_can_be_disabled() {
        let outputs = vec![record_output("a", 1, "One", &body("alpha"))];
        let options = FormatOptions {
            table_of_contents: false,
            ..FormatOptions::default()
        };

        let book = compiler().compile(&outputs, &info(), &options);

        assert!(!book.content.contains("Table of Contents"));
    }

    proptest! {
        /// Submitting identical content twice always rejects the second
        /// occurrence via the hash path, regardless of the text itself.
        #[test]
        fn prop_identical_content_always_deduped(
            words in proptest::collection::vec("[a-z]{4,9}", 20..60)
        ) {
            let content = words.join(" ");
            let outputs = vec![
                record_output("a", 1, "One", &content),
                record_output("b", 2, "Two", &content),
            ];

            let book = compiler().compile(&outputs, &info(), &FormatOptions::default());

            prop_assert_eq!(book.chapters.len(), 1);
            prop_assert_eq!(book.drops.len(), 1);
            prop_assert!(
                matches!(
                    book.drops[0].reason,
                    DropReason::ExactDuplicate { of_chapter: 1 }
                ),
                "expected first drop to be ExactDuplicate of chapter 1"
            );
        }
    }
}
