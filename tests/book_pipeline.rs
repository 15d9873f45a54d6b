//! End-to-End Pipeline Tests
//!
//! Exercises generation through compilation against a mock provider, plus
//! direct compilation of mixed producer output shapes.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use bookforge::core::compiler::{BookCompiler, NodeOutput};
use bookforge::core::generation::{
    BookSpec, CancelToken, ChapterDirective, GenerationEngine, NodeStatus, NullSink,
    ProgressEvent, ProgressSink,
};
use bookforge::core::llm::{ChapterRecord, ProviderRequest, RawOutput, TextProvider};
use bookforge::core::models::{BookInfo, DropReason, FormatOptions};

// ========================================================================
// Scripted Provider
// ========================================================================

/// Provider that returns a distinct, rule-passing chapter per call.
struct ScriptedProvider {
    calls: AtomicU32,
}

impl ScriptedProvider {
    fn new() -> Self {
        Self {
            calls: AtomicU32::new(0),
        }
    }
}

fn chapter_prose(seed: &str) -> String {
    let mut out = String::new();
    for i in 0..64 {
        out.push_str(&format!("{seed}w{i:02}"));
        if i % 8 == 7 {
            out.push('.');
        }
        if i == 31 {
            out.push_str("\n\n");
        } else {
            out.push(' ');
        }
    }
    out.push('.');
    out
}

#[async_trait]
impl TextProvider for ScriptedProvider {
    fn id(&self) -> &str {
        "scripted"
    }

    fn name(&self) -> &str {
        "Scripted Provider"
    }

    fn model(&self) -> &str {
        "scripted-model"
    }

    async fn invoke(
        &self,
        _request: ProviderRequest,
    ) -> bookforge::core::llm::Result<RawOutput> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(RawOutput::text(chapter_prose(&format!("seed{call}"))))
    }
}

fn fast_spec() -> BookSpec {
    BookSpec::new("Signal Fires", "R. Ash").with_word_target(3_000)
}

fn fast_engine(provider: Arc<ScriptedProvider>) -> GenerationEngine {
    let mut config = bookforge::config::PipelineConfig::default();
    config.generation.inter_chapter_delay_ms = 0;
    config.generation.backoff_base_secs = 0;
    GenerationEngine::with_config(provider, config)
}

// ========================================================================
// Generation → Compilation
// ========================================================================

#[tokio::test]
async fn full_run_produces_well_formed_book() {
    let engine = fast_engine(Arc::new(ScriptedProvider::new()));
    let spec = fast_spec().with_directives(vec![ChapterDirective {
        title: Some("Landfall".into()),
        outline: None,
    }]);

    let book = engine
        .generate_book(
            &spec,
            3,
            &FormatOptions::default(),
            &NullSink,
            &CancelToken::new(),
        )
        .await
        .unwrap();

    assert!(!book.stopped);
    assert_eq!(book.chapters.len(), 3);
    assert_eq!(book.metadata.total_chapters, 3);

    // Unique, strictly increasing chapter numbers
    let numbers: Vec<u32> = book.chapters.iter().map(|c| c.number).collect();
    assert_eq!(numbers, vec![1, 2, 3]);

    // Fixed document order: title, author, TOC, then bodies
    let title_pos = book.content.find("Signal Fires").unwrap();
    let author_pos = book.content.find("by R. Ash").unwrap();
    let toc_pos = book.content.find("Table of Contents").unwrap();
    assert!(title_pos < author_pos && author_pos < toc_pos);

    // The directive title survives into the TOC
    assert!(book.content.contains("1. Landfall"));

    // Metadata totals agree with the chapters
    let words: usize = book.chapters.iter().map(|c| c.word_count).sum();
    assert_eq!(book.metadata.total_words, words);
    assert_eq!(book.metadata.reading_time_minutes, words.div_ceil(200));
}

#[tokio::test]
async fn cancelled_run_compiles_partial_book() {
    struct CancelAfter {
        token: CancelToken,
        remaining: AtomicU32,
    }
    impl ProgressSink for CancelAfter {
        fn emit(&self, event: ProgressEvent) {
            if event.status == NodeStatus::Completed
                && self.remaining.fetch_sub(1, Ordering::SeqCst) == 1
            {
                self.token.cancel();
            }
        }
    }

    let token = CancelToken::new();
    let sink = CancelAfter {
        token: token.clone(),
        remaining: AtomicU32::new(2),
    };
    let engine = fast_engine(Arc::new(ScriptedProvider::new()));

    let book = engine
        .generate_book(&fast_spec(), 5, &FormatOptions::default(), &sink, &token)
        .await
        .unwrap();

    assert!(book.stopped);
    assert_eq!(book.chapters.len(), 2);
    assert_eq!(book.metadata.total_chapters, 2);
}

// ========================================================================
// Direct Compilation of Mixed Shapes
// ========================================================================

#[test]
fn compiler_accepts_mixed_producer_shapes_and_drops_duplicates() {
    let compiler = BookCompiler::new();

    let outputs = vec![
        // Pre-structured records
        NodeOutput {
            source_id: "outliner".into(),
            payload: RawOutput::Chapters(vec![ChapterRecord {
                chapter: Some(1),
                title: Some("Landfall".into()),
                content: chapter_prose("landfall"),
                metadata: None,
            }]),
        },
        // Free text with heading boundaries
        NodeOutput {
            source_id: "drafting".into(),
            payload: RawOutput::text(format!(
                "Chapter 2: The Crossing\n\n{}\n\nChapter 3: Ashore\n\n{}",
                chapter_prose("crossing"),
                chapter_prose("ashore")
            )),
        },
        // Nested response shape
        NodeOutput {
            source_id: "reviser".into(),
            payload: RawOutput::Raw(json!({
                "raw_data": {"content": chapter_prose("reviser")}
            })),
        },
        // Exact duplicate of the first chapter, submitted later
        NodeOutput {
            source_id: "stray".into(),
            payload: RawOutput::Chapters(vec![ChapterRecord {
                chapter: Some(9),
                title: Some("Landfall Again".into()),
                content: chapter_prose("landfall"),
                metadata: None,
            }]),
        },
    ];

    let info = BookInfo::new("Signal Fires", "R. Ash");
    let book = compiler.compile(&outputs, &info, &FormatOptions::default());

    assert_eq!(book.chapters.len(), 4);
    let numbers: Vec<u32> = book.chapters.iter().map(|c| c.number).collect();
    let mut unique = numbers.clone();
    unique.sort_unstable();
    unique.dedup();
    assert_eq!(unique.len(), numbers.len());
    assert!(numbers.windows(2).all(|w| w[0] < w[1]));

    assert_eq!(book.drops.len(), 1);
    assert!(matches!(
        book.drops[0].reason,
        DropReason::ExactDuplicate { of_chapter: 1 }
    ));

    // Every distinct producer contributed
    for source in ["outliner", "drafting", "reviser"] {
        assert!(book.metadata.sources.iter().any(|s| s == source));
    }
}
