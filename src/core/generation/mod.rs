//! Generation Engine Module
//!
//! Drives sequential per-chapter generation against a `TextProvider`:
//! validate each attempt, retry with exponential backoff, honor cooperative
//! cancellation, emit progress events, and hand accepted drafts to the
//! compiler. Chapters are generated strictly in order because each prompt
//! embeds the prior chapters' summaries.
//!
//! # Module Structure
//!
//! - `types`: specs, drafts, outcomes, progress events, cancellation, errors
//! - the engine itself lives here

pub mod types;


pub use types::{
    AttemptOutcome, BookSpec, CancelToken, ChannelSink, ChapterDirective, ChapterDraft,
    ChapterProgress, ChapterState, FailureCause, GenerationAttempt, GenerationError,
    GenerationRun, GenerationStats, NodeStatus, NullSink, ProgressEvent, ProgressSink, Result,
};

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::{GenerationConfig, PipelineConfig};
use crate::core::compiler::{BookCompiler, NodeOutput};
use crate::core::llm::{
    estimate_tokens, ChapterRecord, ProviderError, ProviderRequest, RawOutput, TextProvider,
    TokenUsage,
};
use crate::core::models::{BookInfo, CompiledBook, FormatOptions};
use crate::core::validation::{
    ContentType, IssueCode, ResponseValidator, ValidationContext,
};

// ============================================================================
// Engine
// ============================================================================

const DEFAULT_TEMPLATE: &str = "Write chapter {chapter} of {total_chapters} of the book. \
Aim for {target_words} words of narrative prose.";

/// Outcome of one chapter's full attempt loop.
enum ChapterResult {
    Accepted(Box<ChapterDraft>),
    /// Cancellation observed; the run stops cleanly
    Stopped,
    /// All attempts consumed (or a non-retryable failure)
    Exhausted { attempts: u32, cause: FailureCause },
}

/// Sequential chapter generation engine. One engine may serve many runs;
/// each run owns its own chapter list and statistics.
pub struct GenerationEngine {
    provider: Arc<dyn TextProvider>,
    validator: ResponseValidator,
    config: GenerationConfig,
    compiler: BookCompiler,
}

impl GenerationEngine {
    pub fn new(provider: Arc<dyn TextProvider>) -> Self {
        Self::with_config(provider, PipelineConfig::default())
    }

    pub fn with_config(provider: Arc<dyn TextProvider>, config: PipelineConfig) -> Self {
        Self {
            provider,
            validator: ResponseValidator::with_config(config.validation),
            compiler: BookCompiler::with_config(config.compiler),
            config: config.generation,
        }
    }

    pub fn builder(provider: Arc<dyn TextProvider>) -> GenerationEngineBuilder {
        GenerationEngineBuilder::new(provider)
    }

    // ========================================================================
    // Chapter Generation
    // ========================================================================

    /// Generate `chapter_count` chapters sequentially.
    ///
    /// Returns the accumulated drafts, with `stopped = true` when the cancel
    /// token tripped mid-run. Exhausting retries on any chapter raises
    /// [`GenerationError::ChapterFailed`], which carries the chapters
    /// completed before the failure; deciding whether to salvage them is
    /// the caller's responsibility ([`Self::generate_book`] salvages).
    pub async fn generate_chapters(
        &self,
        spec: &BookSpec,
        chapter_count: u32,
        sink: &dyn ProgressSink,
        cancel: &CancelToken,
    ) -> Result<GenerationRun> {
        let run_id = Uuid::new_v4().to_string();
        let mut drafts: Vec<ChapterDraft> = Vec::new();
        let mut stats = GenerationStats {
            chapters_requested: chapter_count,
            ..Default::default()
        };
        let mut stopped = false;

        info!(%run_id, chapter_count, provider = self.provider.id(), "Starting generation run");

        for number in 1..=chapter_count {
            if cancel.is_cancelled() {
                stopped = true;
                break;
            }

            self.emit(sink, &run_id, number, chapter_count, NodeStatus::Queued, 0, 0.0, &drafts);

            match self
                .generate_one(spec, number, chapter_count, &drafts, sink, cancel, &run_id)
                .await
            {
                ChapterResult::Accepted(draft) => {
                    stats.chapters_completed += 1;
                    stats.attempts_total += draft.attempts;
                    stats.usage.add(&draft.usage);
                    let cost = self
                        .provider
                        .pricing()
                        .map(|p| p.calculate_cost(&draft.usage))
                        .unwrap_or(0.0);
                    stats.cost_usd += cost;

                    self.emit(
                        sink,
                        &run_id,
                        number,
                        chapter_count,
                        NodeStatus::Completed,
                        draft.word_count,
                        cost,
                        &drafts,
                    );
                    debug!(%run_id, chapter = number, words = draft.word_count, "Chapter accepted");
                    drafts.push(*draft);

                    if number < chapter_count {
                        tokio::time::sleep(Duration::from_millis(self.config.inter_chapter_delay_ms))
                            .await;
                    }
                }
                ChapterResult::Stopped => {
                    stopped = true;
                    break;
                }
                ChapterResult::Exhausted { attempts, cause } => {
                    stats.attempts_total += attempts;
                    self.emit(sink, &run_id, number, chapter_count, NodeStatus::Failed, 0, 0.0, &drafts);
                    let err = GenerationError::ChapterFailed {
                        chapter: number,
                        attempts,
                        cause,
                        completed: drafts,
                    };
                    error!(%run_id, chapter = number, "{err}; {}", err.recommendation());
                    return Err(err);
                }
            }
        }

        if stopped {
            info!(%run_id, completed = drafts.len(), "Run cancelled; keeping completed chapters");
        }

        Ok(GenerationRun {
            drafts,
            stopped,
            stats,
        })
    }

    /// Generate chapters and compile them into a final book.
    ///
    /// This is the built-in salvaging caller: a terminal chapter failure with
    /// completed earlier chapters is compiled into a partial book
    /// (`stopped = true`) instead of propagating.
    pub async fn generate_book(
        &self,
        spec: &BookSpec,
        chapter_count: u32,
        options: &FormatOptions,
        sink: &dyn ProgressSink,
        cancel: &CancelToken,
    ) -> Result<CompiledBook> {
        match self.generate_chapters(spec, chapter_count, sink, cancel).await {
            Ok(run) => Ok(self.compile_run(spec, run, options)),
            Err(GenerationError::ChapterFailed {
                chapter,
                attempts,
                cause,
                completed,
            }) if !completed.is_empty() => {
                warn!(
                    chapter,
                    attempts,
                    salvaged = completed.len(),
                    "Chapter failed terminally ({cause}); salvaging completed chapters"
                );
                let run = GenerationRun {
                    drafts: completed,
                    stopped: true,
                    stats: GenerationStats::default(),
                };
                Ok(self.compile_run(spec, run, options))
            }
            Err(err) => Err(err),
        }
    }

    /// Generate and validate a book outline. Returns `Ok(None)` when the
    /// cancel token tripped before a valid outline was produced.
    pub async fn generate_outline(
        &self,
        prompt: &str,
        cancel: &CancelToken,
    ) -> Result<Option<String>> {
        let mut last_cause = FailureCause::Provider(ProviderError::Unknown("no attempt ran".into()));

        for attempt in 1..=self.config.max_attempts {
            if cancel.is_cancelled() {
                return Ok(None);
            }
            if attempt > 1 {
                tokio::time::sleep(self.backoff_delay(attempt)).await;
            }

            match self
                .invoke_once(prompt, self.config.default_timeout_secs, None)
                .await
            {
                Ok(raw) => {
                    if cancel.is_cancelled() {
                        return Ok(None);
                    }
                    let report = self.validator.validate(
                        Some(&raw),
                        ContentType::Outline,
                        &ValidationContext::default(),
                        None,
                    );
                    if report.is_valid {
                        return Ok(report.content);
                    }
                    last_cause = FailureCause::InvalidContent {
                        codes: report.errors.iter().map(|e| e.code).collect(),
                        detail: report
                            .errors
                            .first()
                            .map(|e| e.message.clone())
                            .unwrap_or_default(),
                    };
                }
                Err(err) => {
                    last_cause = FailureCause::Provider(err);
                }
            }
        }

        Err(GenerationError::OutlineFailed {
            attempts: self.config.max_attempts,
            cause: last_cause,
        })
    }

    // ========================================================================
    // Attempt Loop
    // ========================================================================

    #[allow(clippy::too_many_arguments)]
    async fn generate_one(
        &self,
        spec: &BookSpec,
        number: u32,
        total: u32,
        prior: &[ChapterDraft],
        sink: &dyn ProgressSink,
        cancel: &CancelToken,
        run_id: &str,
    ) -> ChapterResult {
        let mut state = ChapterState::Pending;
        debug!(%run_id, chapter = number, ?state, "Chapter queued");
        let mut last_attempt = GenerationAttempt {
            index: 0,
            failure: None,
        };

        for attempt in 1..=self.config.max_attempts {
            // Cancellation is polled before every provider call; an
            // in-flight call is awaited and its result discarded.
            if cancel.is_cancelled() {
                return ChapterResult::Stopped;
            }
            if attempt > 1 {
                let delay = self.backoff_delay(attempt);
                debug!(%run_id, chapter = number, attempt, ?delay, "Backing off before retry");
                tokio::time::sleep(delay).await;
            }

            last_attempt.index = attempt;
            state = ChapterState::Generating;
            debug!(%run_id, chapter = number, attempt, ?state, "Invoking provider");
            self.emit(sink, run_id, number, total, NodeStatus::Processing, 0, 0.0, prior);

            let prompt = self.build_prompt(spec, number, total, prior);
            let outcome = match self
                .invoke_once(&prompt, self.config.long_form_timeout_secs, spec.temperature)
                .await
            {
                Ok(raw) => {
                    if cancel.is_cancelled() {
                        return ChapterResult::Stopped;
                    }
                    state = ChapterState::Validating;
                    debug!(%run_id, chapter = number, attempt, ?state, "Judging response");
                    self.judge_attempt(spec, number, attempt, &prompt, raw)
                }
                Err(err @ (ProviderError::Auth(_) | ProviderError::InvalidRequest(_))) => {
                    // More attempts cannot fix credentials or a malformed request
                    AttemptOutcome::Fatal(FailureCause::Provider(err))
                }
                Err(err) => AttemptOutcome::Retry(FailureCause::Provider(err)),
            };

            match outcome {
                AttemptOutcome::Accepted(draft) => {
                    state = ChapterState::Accepted;
                    debug!(%run_id, chapter = number, attempt, ?state, "Attempt accepted");
                    return ChapterResult::Accepted(Box::new(draft));
                }
                AttemptOutcome::Retry(cause) => {
                    state = ChapterState::Retrying;
                    warn!(%run_id, chapter = number, attempt, ?state, "Attempt failed: {cause}");
                    last_attempt.failure = Some(cause);
                }
                AttemptOutcome::Fatal(cause) => {
                    state = ChapterState::Failed;
                    debug!(%run_id, chapter = number, attempt, ?state, "Attempt failed terminally");
                    return ChapterResult::Exhausted {
                        attempts: attempt,
                        cause,
                    };
                }
            }
        }

        debug!(%run_id, chapter = number, state = ?ChapterState::Failed, "Retries exhausted");
        ChapterResult::Exhausted {
            attempts: self.config.max_attempts,
            cause: last_attempt.failure.unwrap_or(FailureCause::Provider(
                ProviderError::Unknown("no attempt ran".into()),
            )),
        }
    }

    /// Judge one raw provider response and convert it into an explicit
    /// attempt outcome.
    fn judge_attempt(
        &self,
        spec: &BookSpec,
        number: u32,
        attempt: u32,
        prompt: &str,
        raw: RawOutput,
    ) -> AttemptOutcome {
        let context = ValidationContext {
            source_id: Some(self.provider.id().to_string()),
            chapter_number: Some(number),
        };
        let report = self
            .validator
            .validate(Some(&raw), ContentType::Chapter, &context, None);

        if !report.is_valid {
            let codes: Vec<IssueCode> = report.errors.iter().map(|e| e.code).collect();
            let detail = report
                .errors
                .first()
                .map(|e| e.message.clone())
                .unwrap_or_default();
            let cause = FailureCause::InvalidContent { codes: codes.clone(), detail };
            // A permission violation cannot be retried away
            if codes.contains(&IssueCode::PermissionViolation) {
                return AttemptOutcome::Fatal(cause);
            }
            return AttemptOutcome::Retry(cause);
        }

        let content = report.content.unwrap_or_default();
        let title = spec
            .directive_for(number)
            .and_then(|d| d.title.clone())
            .unwrap_or_else(|| format!("Chapter {number}"));
        let word_count = crate::core::models::word_count(&content);
        let usage = TokenUsage::new(
            estimate_tokens(crate::core::models::word_count(prompt)),
            estimate_tokens(word_count),
        );

        AttemptOutcome::Accepted(ChapterDraft {
            number,
            title,
            content,
            word_count,
            usage,
            attempts: attempt,
        })
    }

    async fn invoke_once(
        &self,
        prompt: &str,
        timeout_secs: u64,
        temperature: Option<f32>,
    ) -> std::result::Result<RawOutput, ProviderError> {
        let timeout = Duration::from_secs(timeout_secs);
        let mut request = ProviderRequest::new(prompt, timeout.as_millis() as u64);
        if let Some(temp) = temperature {
            request = request.with_temperature(temp);
        }
        match tokio::time::timeout(timeout, self.provider.invoke(request)).await {
            Ok(result) => result,
            Err(_) => Err(ProviderError::Timeout),
        }
    }

    fn backoff_delay(&self, next_attempt: u32) -> Duration {
        Duration::from_secs(self.config.backoff_base_secs.pow(next_attempt - 1))
    }

    // ========================================================================
    // Prompt Assembly
    // ========================================================================

    /// Per-chapter word target: total ÷ chapters, floored at the configured
    /// minimum.
    fn target_words(&self, spec: &BookSpec, total: u32) -> usize {
        let split = spec.total_word_target / (total.max(1) as usize);
        split.max(self.config.min_chapter_words)
    }

    fn build_prompt(&self, spec: &BookSpec, number: u32, total: u32, prior: &[ChapterDraft]) -> String {
        let template = if spec.prompt_template.is_empty() {
            DEFAULT_TEMPLATE
        } else {
            spec.prompt_template.as_str()
        };
        let directive = spec.directive_for(number);
        let mandated_title = directive.and_then(|d| d.title.as_deref()).unwrap_or("");
        let outline = directive.and_then(|d| d.outline.as_deref()).unwrap_or("");
        let context = Self::prior_context(prior);

        let mut prompt = template
            .replace("{chapter}", &number.to_string())
            .replace("{total_chapters}", &total.to_string())
            .replace("{target_words}", &self.target_words(spec, total).to_string())
            .replace("{title}", mandated_title)
            .replace("{outline}", outline)
            .replace("{context}", &context);

        // Structural directives override invented structure even when the
        // template has no placeholder for them.
        if !mandated_title.is_empty() && !template.contains("{title}") {
            prompt.push_str(&format!("\n\nThe chapter title must be: {mandated_title}"));
        }
        if !outline.is_empty() && !template.contains("{outline}") {
            prompt.push_str(&format!("\n\nFollow this outline:\n{outline}"));
        }
        if !context.is_empty() && !template.contains("{context}") {
            prompt.push_str(&format!("\n\nStory so far:\n{context}"));
        }

        prompt
    }

    /// Narrative-continuity context: the opening sentences of every prior
    /// chapter.
    fn prior_context(prior: &[ChapterDraft]) -> String {
        prior
            .iter()
            .map(|draft| {
                let summary: String = draft
                    .content
                    .split_inclusive(['.', '!', '?'])
                    .filter(|fragment| fragment.trim().len() > 10)
                    .take(2)
                    .collect();
                format!("Chapter {} ({}): {}", draft.number, draft.title, summary.trim())
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    // ========================================================================
    // Compilation and Events
    // ========================================================================

    fn compile_run(&self, spec: &BookSpec, run: GenerationRun, options: &FormatOptions) -> CompiledBook {
        let outputs: Vec<NodeOutput> = run
            .drafts
            .iter()
            .map(|draft| NodeOutput {
                source_id: format!("{}/chapter-{}", self.provider.id(), draft.number),
                payload: RawOutput::Chapters(vec![ChapterRecord {
                    chapter: Some(draft.number),
                    title: Some(draft.title.clone()),
                    content: draft.content.clone(),
                    metadata: None,
                }]),
            })
            .collect();

        let info = BookInfo::new(&spec.title, &spec.author);
        let mut book = self.compiler.compile(&outputs, &info, options);
        book.stopped = run.stopped;
        book
    }

    #[allow(clippy::too_many_arguments)]
    fn emit(
        &self,
        sink: &dyn ProgressSink,
        run_id: &str,
        number: u32,
        total: u32,
        status: NodeStatus,
        words: usize,
        cost: f64,
        completed: &[ChapterDraft],
    ) {
        let done = match status {
            NodeStatus::Completed => completed.len() as u32 + 1,
            _ => completed.len() as u32,
        };
        sink.emit(ProgressEvent {
            run_id: run_id.to_string(),
            node_id: format!("chapter-{number}"),
            status,
            progress_percent: (done as f32 / total.max(1) as f32) * 100.0,
            tokens: estimate_tokens(words),
            words,
            cost_usd: cost,
            chapter: ChapterProgress {
                current: number,
                total,
            },
        });
    }
}

// ============================================================================
// Builder
// ============================================================================

/// Builder for constructing a GenerationEngine
pub struct GenerationEngineBuilder {
    provider: Arc<dyn TextProvider>,
    config: PipelineConfig,
}

impl GenerationEngineBuilder {
    pub fn new(provider: Arc<dyn TextProvider>) -> Self {
        Self {
            provider,
            config: PipelineConfig::default(),
        }
    }

    pub fn with_config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_generation(mut self, config: GenerationConfig) -> Self {
        self.config.generation = config;
        self
    }

    pub fn with_validation(mut self, config: crate::config::ValidationConfig) -> Self {
        self.config.validation = config;
        self
    }

    pub fn with_compiler(mut self, config: crate::config::CompilerConfig) -> Self {
        self.config.compiler = config;
        self
    }

    pub fn build(self) -> GenerationEngine {
        GenerationEngine::with_config(self.provider, self.config)
    }
}
