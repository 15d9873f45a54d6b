//! Duplicate Detection
//!
//! Two-tier, reject-don't-merge duplicate policy: a fast normalized-hash
//! check for exact duplicates, then a word-set similarity check against
//! every previously accepted chapter. Each compilation owns its own
//! registry; nothing is shared across invocations.

use std::collections::{HashMap, HashSet};

use indexmap::IndexMap;

use crate::config::CompilerConfig;
use crate::core::models::{normalize_for_hash, Chapter, DropReason};

/// Verdict for one candidate chapter.
#[derive(Debug, Clone, PartialEq)]
pub enum Admission {
    Accepted,
    Rejected(DropReason),
}

/// Per-compilation duplicate bookkeeping. Keyed registry entries use the
/// normalized `number+title` form; content identity uses the normalized
/// hash and significant-word sets.
pub struct DuplicateRegistry {
    similarity_threshold: f64,
    significant_word_len: usize,
    /// Normalized `number+title` key -> accepted chapter number
    by_key: IndexMap<String, u32>,
    /// Content hash -> accepted chapter number
    by_hash: HashMap<String, u32>,
    /// Significant-word sets of accepted chapters, in acceptance order
    word_sets: Vec<(u32, HashSet<String>)>,
}

impl DuplicateRegistry {
    pub fn new(config: &CompilerConfig) -> Self {
        Self {
            similarity_threshold: config.similarity_threshold,
            significant_word_len: config.significant_word_len,
            by_key: IndexMap::new(),
            by_hash: HashMap::new(),
            word_sets: Vec::new(),
        }
    }

    /// Judge a candidate against everything accepted so far, recording it
    /// when admitted. Rejected chapters are dropped by the caller, never
    /// merged into the chapter they collided with.
    pub fn admit(&mut self, chapter: &Chapter) -> Admission {
        if let Some(&existing) = self.by_hash.get(&chapter.content_hash) {
            return Admission::Rejected(DropReason::ExactDuplicate {
                of_chapter: existing,
            });
        }

        let words = self.significant_words(&chapter.content);
        for (existing, other) in &self.word_sets {
            let similarity = jaccard(&words, other);
            if similarity > self.similarity_threshold {
                return Admission::Rejected(DropReason::NearDuplicate {
                    of_chapter: *existing,
                    similarity,
                });
            }
        }

        self.by_key
            .insert(self.registry_key(chapter), chapter.number);
        self.by_hash
            .insert(chapter.content_hash.clone(), chapter.number);
        self.word_sets.push((chapter.number, words));
        Admission::Accepted
    }

    /// Number of accepted chapters.
    pub fn len(&self) -> usize {
        self.word_sets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.word_sets.is_empty()
    }

    /// Registry keys (normalized `number+title`) of accepted chapters, in
    /// acceptance order.
    pub fn keys(&self) -> Vec<&str> {
        self.by_key.keys().map(String::as_str).collect()
    }

    fn registry_key(&self, chapter: &Chapter) -> String {
        format!(
            "{}+{}",
            chapter.number,
            normalize_for_hash(&chapter.title)
        )
    }

    fn significant_words(&self, text: &str) -> HashSet<String> {
        normalize_for_hash(text)
            .split_whitespace()
            .filter(|w| w.len() > self.significant_word_len)
            .map(str::to_string)
            .collect()
    }
}

/// Set overlap in [0, 1]. Two empty sets count as disjoint, not identical,
/// so hash-distinct empty chapters never collide here.
fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count();
    let union = a.len() + b.len() - intersection;
    intersection as f64 / union as f64
}
