//! Pipeline Configuration
//!
//! All empirical thresholds used by the validator, the generation engine,
//! and the compiler live here as tunable values with serde defaults.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Top-level pipeline configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub validation: ValidationConfig,
    pub generation: GenerationConfig,
    pub compiler: CompilerConfig,
}

/// Thresholds applied by the response validator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    /// Minimum word count for an acceptable chapter.
    ///
    /// The upstream configuration documented 100 while the enforced check
    /// used 50; this field is the single source of truth, defaulting to the
    /// enforced value.
    pub min_word_count: usize,
    /// Minimum non-whitespace character count.
    pub min_meaningful_chars: usize,
    /// Minimum number of sentences (fragments longer than 10 chars).
    pub min_sentences: usize,
    /// Sliding-window width, in words, for repetition analysis.
    pub repetition_window: usize,
    /// A window sequence repeating more than this many times flags the text.
    pub repetition_threshold: usize,
    /// Texts shorter than this are checked against refusal/error phrases.
    pub error_phrase_scan_limit: usize,
}

/// Retry, timeout, and pacing settings for the generation engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    /// Total attempts per chapter (first try included).
    pub max_attempts: u32,
    /// Backoff delay is `backoff_base_secs ^ attempt` seconds.
    pub backoff_base_secs: u64,
    /// Provider timeout for long-form chapter generation.
    pub long_form_timeout_secs: u64,
    /// Provider timeout for everything else (outlines, short passages).
    pub default_timeout_secs: u64,
    /// Courtesy delay between accepted chapters.
    pub inter_chapter_delay_ms: u64,
    /// Floor for the per-chapter target word count.
    pub min_chapter_words: usize,
}

/// Thresholds applied by the book compiler.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompilerConfig {
    /// Extracted producer output below this length is discarded.
    pub min_content_chars: usize,
    /// Jaccard overlap above this marks a near-duplicate chapter.
    pub similarity_threshold: f64,
    /// Only words longer than this participate in similarity sets.
    pub significant_word_len: usize,
    /// Chapters below this length are padded with a continuation marker.
    pub min_chapter_chars: usize,
    /// Reading speed used for the estimated-reading-time metadata.
    pub words_per_minute: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            validation: ValidationConfig::default(),
            generation: GenerationConfig::default(),
            compiler: CompilerConfig::default(),
        }
    }
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            min_word_count: 50,
            min_meaningful_chars: 100,
            min_sentences: 3,
            repetition_window: 5,
            repetition_threshold: 5,
            error_phrase_scan_limit: 200,
        }
    }
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base_secs: 2,
            long_form_timeout_secs: 30 * 60,
            default_timeout_secs: 10 * 60,
            inter_chapter_delay_ms: 1000,
            min_chapter_words: 500,
        }
    }
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            min_content_chars: 50,
            similarity_threshold: 0.85,
            significant_word_len: 3,
            min_chapter_chars: 100,
            words_per_minute: 200,
        }
    }
}

impl PipelineConfig {
    /// Load configuration from `~/.config/bookforge/config.toml`.
    /// Returns `Default` if the file is missing or unparseable.
    pub fn load() -> Self {
        let config_path = Self::config_path();
        match std::fs::read_to_string(&config_path) {
            Ok(contents) => match toml::from_str(&contents) {
                Ok(config) => {
                    tracing::info!("Loaded config from {}", config_path.display());
                    config
                }
                Err(e) => {
                    tracing::warn!(
                        "Failed to parse config at {}: {e} — using defaults",
                        config_path.display()
                    );
                    Self::default()
                }
            },
            Err(_) => {
                tracing::debug!(
                    "No config file at {} — using defaults",
                    config_path.display()
                );
                Self::default()
            }
        }
    }

    fn config_path() -> PathBuf {
        dirs::config_dir()
            .map(|d| d.join("bookforge").join("config.toml"))
            .unwrap_or_else(|| PathBuf::from("config.toml"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = PipelineConfig::default();
        assert_eq!(config.validation.min_word_count, 50);
        assert_eq!(config.generation.max_attempts, 3);
        assert_eq!(config.compiler.similarity_threshold, 0.85);
    }

    #[test]
    fn test_config_load_missing_file() {
        // Should return defaults without panicking
        let config = PipelineConfig::load();
        assert_eq!(config.validation.min_sentences, 3);
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config: PipelineConfig =
            toml::from_str("[validation]\nmin_word_count = 75\n").unwrap();
        assert_eq!(config.validation.min_word_count, 75);
        assert_eq!(config.validation.min_meaningful_chars, 100);
        assert_eq!(config.generation.inter_chapter_delay_ms, 1000);
    }
}
