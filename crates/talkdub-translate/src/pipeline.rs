//! The per-chunk translation pipeline.
//!
//! For each chunk, in order: probe the cache, acquire a rate-limiter
//! token, issue one LLM request demanding a strict JSON shape, parse and
//! validate, store to cache. Retries branch on the error class: quota
//! errors wait out the provider window, client-side errors never retry,
//! everything else backs off exponentially. A chunk that exhausts its
//! retries falls back to the source text so downstream synthesis still has
//! input; the phase as a whole fails only when more than half the chunks
//! failed.

use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{info, warn};

use talkdub_config::TranslationConfig;
use talkdub_kv::{RateLimiter, TranslationCache};
use talkdub_llm::{LlmBackend, LlmError, LlmInvocation, Message};
use talkdub_utils::types::Language;

use crate::chunker::{ChunkInput, chunk_segments};
use crate::validator::{Severity, validate_batch};

/// Wait before retrying after a provider quota error.
const QUOTA_RETRY_DELAY: Duration = Duration::from_secs(60);

/// Bounded wait for a rate-limiter token.
const LIMITER_WAIT: Duration = Duration::from_secs(60);

/// Per-request wall-clock budget.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Chunk-failure ratio beyond which the whole phase is considered degraded
/// past acceptable quality.
const ABORT_FAILURE_RATIO: f64 = 0.5;

/// Cumulative request counters, for the stats surface.
#[derive(Debug, Default)]
pub struct TranslatorStats {
    pub total_requests: AtomicU64,
    pub cache_hits: AtomicU64,
    pub cache_misses: AtomicU64,
    pub total_tokens: AtomicU64,
}

impl TranslatorStats {
    #[must_use]
    pub fn snapshot(&self) -> serde_json::Value {
        let hits = self.cache_hits.load(Ordering::Relaxed);
        let misses = self.cache_misses.load(Ordering::Relaxed);
        let probes = hits + misses;
        json!({
            "total_requests": self.total_requests.load(Ordering::Relaxed),
            "cache_hits": hits,
            "cache_misses": misses,
            "cache_hit_rate": if probes > 0 { hits as f64 / probes as f64 } else { 0.0 },
            "total_tokens": self.total_tokens.load(Ordering::Relaxed),
        })
    }
}

/// Result for one segment after the pipeline ran.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentOutcome {
    pub seg_id: String,
    pub text: String,
    /// False when the segment's chunk exhausted its retries and `text` is
    /// the source-text fallback.
    pub translated: bool,
}

/// Aggregate result of translating a job's segments.
#[derive(Debug, Clone)]
pub struct TranslationOutcome {
    pub segments: Vec<SegmentOutcome>,
    pub total_chunks: usize,
    pub failed_chunks: usize,
}

impl TranslationOutcome {
    /// Whether failure density exceeded the acceptable ratio.
    #[must_use]
    pub fn degraded(&self) -> bool {
        self.total_chunks > 0
            && (self.failed_chunks as f64 / self.total_chunks as f64) > ABORT_FAILURE_RATIO
    }
}

/// The translation pipeline with its explicit collaborators.
pub struct Translator {
    backend: Arc<dyn LlmBackend>,
    limiter: RateLimiter,
    cache: TranslationCache,
    config: TranslationConfig,
    provider: String,
    stats: TranslatorStats,
}

impl Translator {
    #[must_use]
    pub fn new(
        backend: Arc<dyn LlmBackend>,
        limiter: RateLimiter,
        cache: TranslationCache,
        config: TranslationConfig,
        provider: impl Into<String>,
    ) -> Self {
        Self {
            backend,
            limiter,
            cache,
            config,
            provider: provider.into(),
            stats: TranslatorStats::default(),
        }
    }

    #[must_use]
    pub fn stats(&self) -> &TranslatorStats {
        &self.stats
    }

    #[must_use]
    pub fn provider(&self) -> &str {
        &self.provider
    }

    /// Translate segments in order, chunk by chunk.
    ///
    /// `on_chunk_done(completed_segments, total_segments)` fires after each
    /// chunk so the caller can persist monotonic progress.
    pub async fn translate_segments(
        &self,
        job_id: &str,
        segments: &[ChunkInput],
        src: Language,
        tgt: Language,
        mut on_chunk_done: impl FnMut(usize, usize) + Send,
    ) -> TranslationOutcome {
        let chunks = chunk_segments(
            segments,
            self.config.chunk_char_limit,
            self.config.chunk_seg_limit,
        );
        let total_chunks = chunks.len();
        let total_segments = segments.len();
        let mut outcome_segments = Vec::with_capacity(total_segments);
        let mut failed_chunks = 0usize;
        let mut completed = 0usize;

        info!(
            job_id,
            total_segments,
            total_chunks,
            src = %src,
            tgt = %tgt,
            "starting translation"
        );

        for (i, chunk) in chunks.iter().enumerate() {
            let texts: Vec<String> = chunk.iter().map(|s| s.text.clone()).collect();

            match self.translate_chunk(job_id, &texts, src, tgt).await {
                Ok(translations) => {
                    for (seg, translation) in chunk.iter().zip(translations) {
                        outcome_segments.push(SegmentOutcome {
                            seg_id: seg.seg_id.clone(),
                            text: translation,
                            translated: true,
                        });
                    }
                }
                Err(e) => {
                    warn!(job_id, chunk = i + 1, error = %e, "chunk failed all retries");
                    failed_chunks += 1;
                    // Source text is the last-resort fallback so synthesis
                    // still has input.
                    for seg in chunk {
                        outcome_segments.push(SegmentOutcome {
                            seg_id: seg.seg_id.clone(),
                            text: seg.text.clone(),
                            translated: false,
                        });
                    }
                }
            }

            completed += chunk.len();
            on_chunk_done(completed, total_segments);
        }

        info!(
            job_id,
            completed_chunks = total_chunks - failed_chunks,
            failed_chunks,
            "translation finished"
        );

        TranslationOutcome {
            segments: outcome_segments,
            total_chunks,
            failed_chunks,
        }
    }

    /// Translate one chunk with the full retry policy.
    async fn translate_chunk(
        &self,
        job_id: &str,
        texts: &[String],
        src: Language,
        tgt: Language,
    ) -> Result<Vec<String>, LlmError> {
        if let Some(cached) = self.cache.get(texts, src, tgt).await {
            self.stats.cache_hits.fetch_add(1, Ordering::Relaxed);
            info!(job_id, segments = texts.len(), "translation cache hit");
            return Ok(cached);
        }
        self.stats.cache_misses.fetch_add(1, Ordering::Relaxed);

        let system_prompt = build_system_prompt(src, tgt);
        let user_prompt = build_user_prompt(texts);

        let mut last_error = LlmError::Transport("no attempt made".into());

        for attempt in 0..self.config.max_retries {
            match self.attempt_chunk(job_id, &system_prompt, &user_prompt, texts, src, tgt).await {
                Ok(translations) => {
                    self.cache.set(texts, src, tgt, &translations).await;
                    return Ok(translations);
                }
                Err(e) => {
                    if !e.is_retriable() {
                        return Err(e);
                    }
                    let delay = match &e {
                        LlmError::ProviderQuota(_) => QUOTA_RETRY_DELAY,
                        _ => self.config.backoff_base * 2u32.pow(attempt),
                    };
                    warn!(
                        job_id,
                        attempt = attempt + 1,
                        max_retries = self.config.max_retries,
                        error = %e,
                        "chunk translation attempt failed"
                    );
                    last_error = e;
                    if attempt + 1 < self.config.max_retries {
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }

        Err(last_error)
    }

    /// One attempt: token, request, parse, validate.
    async fn attempt_chunk(
        &self,
        job_id: &str,
        system_prompt: &str,
        user_prompt: &str,
        texts: &[String],
        src: Language,
        tgt: Language,
    ) -> Result<Vec<String>, LlmError> {
        if !self
            .limiter
            .acquire(LIMITER_WAIT)
            .await
            .map_err(|e| LlmError::Transport(format!("rate limiter unavailable: {e}")))?
        {
            return Err(LlmError::RateLimiterTimeout);
        }

        let inv = LlmInvocation::new(
            job_id,
            vec![
                Message::system(system_prompt),
                Message::user(user_prompt),
            ],
            REQUEST_TIMEOUT,
        )
        .expecting_json();

        let result = self.backend.invoke(inv).await?;
        self.stats.total_requests.fetch_add(1, Ordering::Relaxed);
        self.stats
            .total_tokens
            .fetch_add(result.total_tokens(), Ordering::Relaxed);

        let translations = parse_response(&result.content, texts.len())?;

        let (pass, issues) = validate_batch(
            texts,
            &translations,
            src,
            tgt,
            self.config.min_length_ratio,
            self.config.max_length_ratio,
        );
        for issue in issues.iter().take(5) {
            if issue.severity != Severity::Info {
                warn!(job_id, "{}", issue.message);
            }
        }
        if !pass {
            let critical = issues
                .iter()
                .filter(|i| i.severity == Severity::Critical)
                .count();
            return Err(LlmError::MalformedResponse(format!(
                "translation quality validation failed: {critical} critical issue(s)"
            )));
        }

        Ok(translations)
    }

    /// Short-form translation with a length cap, used when a synthesized
    /// segment cannot fit its slot even at the maximum tempo stretch. Same
    /// contract and retry policy as the batch path, single text, capped
    /// output.
    pub async fn translate_shortened(
        &self,
        job_id: &str,
        text: &str,
        src: Language,
        tgt: Language,
        max_chars: usize,
    ) -> Result<String, LlmError> {
        let system_prompt = format!(
            "You are a professional dubbing translator. Rewrite the given {src} text in \
             {tgt} at most {max_chars} characters long, keeping the core meaning. \
             Return ONLY a JSON object: {{\"translations\":[{{\"id\":0,\"translation\":\"...\"}}]}}",
            src = src.english_name(),
            tgt = tgt.english_name(),
        );
        let user_prompt = build_user_prompt(&[text.to_string()]);

        let mut last_error = LlmError::Transport("no attempt made".into());
        for attempt in 0..self.config.max_retries {
            match self
                .attempt_chunk(
                    job_id,
                    &system_prompt,
                    &user_prompt,
                    &[text.to_string()],
                    src,
                    tgt,
                )
                .await
            {
                Ok(mut translations) => return Ok(translations.remove(0)),
                Err(e) => {
                    if !e.is_retriable() {
                        return Err(e);
                    }
                    let delay = match &e {
                        LlmError::ProviderQuota(_) => QUOTA_RETRY_DELAY,
                        _ => self.config.backoff_base * 2u32.pow(attempt),
                    };
                    last_error = e;
                    if attempt + 1 < self.config.max_retries {
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }
        Err(last_error)
    }
}

/// System prompt for a batch translation request.
fn build_system_prompt(src: Language, tgt: Language) -> String {
    format!(
        "You are a professional subtitle translator working on a video dub. \
         Translate each segment from {src} to {tgt}.\n\
         \n\
         Rules:\n\
         1. Preserve the meaning and register of the original.\n\
         2. Be concise: the translation is spoken over the original timing.\n\
         3. Keep terminology consistent across segments.\n\
         4. Do not invent annotations or commentary.\n\
         5. Keep bracketed sound-effect markers such as [music] or [applause] unchanged.",
        src = src.english_name(),
        tgt = tgt.english_name(),
    )
}

/// User prompt: the numbered segments and the strict response shape.
fn build_user_prompt(texts: &[String]) -> String {
    let segments: Vec<serde_json::Value> = texts
        .iter()
        .enumerate()
        .map(|(i, text)| json!({"id": i, "text": text}))
        .collect();

    format!(
        "Translate the following segments:\n\n{}\n\n\
         Return ONLY a JSON object in this format:\n\
         {{\"translations\": [{{\"id\": 0, \"translation\": \"...\"}}, ...]}}\n\n\
         IMPORTANT: Return pure JSON without markdown code blocks or extra text.",
        serde_json::to_string_pretty(&segments).unwrap_or_default()
    )
}

#[derive(Debug, Deserialize)]
struct ResponseShape {
    translations: Vec<ResponseItem>,
}

#[derive(Debug, Deserialize)]
struct ResponseItem {
    id: usize,
    translation: String,
}

/// Parse the model's response: strip code fences if present, require the
/// exact shape, sort by id, check the count.
fn parse_response(raw: &str, expected_count: usize) -> Result<Vec<String>, LlmError> {
    let mut content = raw.trim();
    if let Some(stripped) = content.strip_prefix("```json") {
        content = stripped;
    } else if let Some(stripped) = content.strip_prefix("```") {
        content = stripped;
    }
    if let Some(stripped) = content.strip_suffix("```") {
        content = stripped;
    }
    let content = content.trim();

    let shape: ResponseShape = serde_json::from_str(content).map_err(|e| {
        let preview: String = content.chars().take(200).collect();
        LlmError::MalformedResponse(format!("failed to parse JSON: {e} (content: {preview})"))
    })?;

    if shape.translations.len() != expected_count {
        return Err(LlmError::MalformedResponse(format!(
            "translation count mismatch: expected {expected_count}, got {}",
            shape.translations.len()
        )));
    }

    let mut items = shape.translations;
    items.sort_by_key(|item| item.id);

    Ok(items.into_iter().map(|item| item.translation).collect())
}
