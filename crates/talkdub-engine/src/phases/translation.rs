//! Translation phase: drive the translation pipeline over the job's
//! segments and fold the results back into the record.
//!
//! Hallucination-flagged segments never enter the pipeline; their target
//! text stays null and they are not counted as failures. Chunk-level
//! failures degrade to source-text fallback; the phase itself fails only
//! when more than half the chunks failed.

use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

use talkdub_job::record::SegmentTaskStatus;
use talkdub_job::{JobRecord, Progress};
use talkdub_phase_api::{Phase, PhaseContext, PhaseOutput};
use talkdub_translate::{ChunkInput, Translator, chunk_segments};
use talkdub_utils::error::PhaseError;
use talkdub_utils::types::PhaseId;

use crate::phases::load_record;

/// Floor for the phase budget; scaled up by expected chunk count.
const MIN_TIMEOUT: Duration = Duration::from_secs(1800);

/// Budget per chunk (one LLM round trip plus retries).
const PER_CHUNK_BUDGET: Duration = Duration::from_secs(30);

pub struct TranslationPhase {
    translator: Arc<Translator>,
}

impl TranslationPhase {
    #[must_use]
    pub fn new(translator: Arc<Translator>) -> Self {
        Self { translator }
    }
}

#[async_trait]
impl Phase for TranslationPhase {
    fn name(&self) -> &'static str {
        "Translation"
    }

    fn id(&self) -> PhaseId {
        PhaseId::Translation
    }

    fn timeout(&self, record: &JobRecord) -> Duration {
        let inputs: Vec<ChunkInput> = record
            .translatable_segments()
            .iter()
            .map(|s| ChunkInput::new(&s.seg_id, &s.src_text))
            .collect();
        let chunks = chunk_segments(&inputs, 2000, 30).len() as u32;
        MIN_TIMEOUT.max(PER_CHUNK_BUDGET * chunks.max(1))
    }

    async fn execute(&self, ctx: &PhaseContext) -> Result<PhaseOutput, PhaseError> {
        let record = load_record(ctx, self.id())?;
        let logger = ctx.logger(self.id());
        let src = record.languages.src_lang;
        let tgt = record.languages.tgt_lang;

        let inputs: Vec<ChunkInput> = record
            .translatable_segments()
            .iter()
            .map(|s| ChunkInput::new(&s.seg_id, &s.src_text))
            .collect();

        if inputs.is_empty() {
            logger.warn("no segments to translate (all flagged as hallucination)");
            return Ok(PhaseOutput::new());
        }

        let store = ctx.store.clone();
        let job_id = ctx.job_id.clone();
        let total_translatable = inputs.len();

        let outcome = self
            .translator
            .translate_segments(&ctx.job_id, &inputs, src, tgt, |done, _total| {
                // Persist monotonic progress after every chunk. Best-effort:
                // progress display must never fail the phase.
                let mut meta = serde_json::Map::new();
                meta.insert(
                    "progress".to_string(),
                    json!(Progress::of(done as u32, total_translatable as u32)),
                );
                let _ = store.apply_metadata(&job_id, meta);
            })
            .await;

        if outcome.degraded() {
            return Err(PhaseError::ExecutionFailed {
                phase: self.id().as_str().to_string(),
                message: format!(
                    "translation degraded past the acceptable ratio: {}/{} chunks failed",
                    outcome.failed_chunks, outcome.total_chunks
                ),
            });
        }

        // Fold the per-segment outcomes back into the record's segments.
        let mut segments = record.segments;
        for result in &outcome.segments {
            let Some(seg) = segments.iter_mut().find(|s| s.seg_id == result.seg_id) else {
                continue;
            };
            seg.tgt_text = Some(result.text.clone());
            if result.translated {
                seg.translation.provider = Some(self.translator.provider().to_string());
                seg.translation.status = SegmentTaskStatus::Completed;
            } else {
                seg.translation.status = SegmentTaskStatus::Failed;
                seg.translation.retries += 1;
            }
        }

        let completed = segments
            .iter()
            .filter(|s| s.translation.status == SegmentTaskStatus::Completed)
            .count();
        logger.info(&format!(
            "translation completed for {completed}/{} segments ({} chunks failed)",
            segments.len(),
            outcome.failed_chunks
        ));

        Ok(PhaseOutput::new()
            .with_metadata("segments", json!(segments))
            .with_metadata(
                "progress",
                json!(Progress::of(
                    total_translatable as u32,
                    total_translatable as u32
                )),
            ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use talkdub_config::Config;
    use talkdub_job::{
        Flags, JobStore, Languages, PipelineParams, Segment, Source, TranslationState, TtsState,
        WhisperStats,
    };
    use talkdub_kv::{MemoryStore, RateLimiter, TranslationCache};
    use talkdub_llm::{LlmBackend, LlmError, LlmInvocation, LlmResult};
    use talkdub_phase_api::PhaseRunner;
    use talkdub_utils::paths::DataLayout;
    use talkdub_utils::types::Language;
    use tempfile::TempDir;

    struct ScriptedBackend {
        responses: Mutex<Vec<Result<String, LlmError>>>,
    }

    #[async_trait]
    impl LlmBackend for ScriptedBackend {
        async fn invoke(&self, _inv: LlmInvocation) -> Result<LlmResult, LlmError> {
            let mut responses = self.responses.lock().unwrap();
            if responses.is_empty() {
                return Err(LlmError::Transport("script exhausted".into()));
            }
            responses
                .remove(0)
                .map(|content| LlmResult::new(content, "scripted"))
        }
    }

    fn segment(i: usize, text: &str, hallucination: bool) -> Segment {
        Segment {
            seg_id: Segment::make_id(i),
            start: i as f64 * 5.0,
            end: i as f64 * 5.0 + 4.0,
            src_text: text.into(),
            tgt_text: None,
            speaker_id: "SPEAKER_00".into(),
            flags: Flags {
                suspected_hallucination: hallucination,
                ..Default::default()
            },
            whisper: WhisperStats::default(),
            vad_speech_ratio: Some(0.8),
            translation: TranslationState::default(),
            tts: TtsState::default(),
            timing: Default::default(),
        }
    }

    fn setup(segments: Vec<Segment>) -> (TempDir, PhaseContext) {
        let dir = TempDir::new().unwrap();
        let root = camino::Utf8PathBuf::from_path_buf(dir.path().join("data")).unwrap();
        let layout = DataLayout::new(root);
        layout.ensure_dirs().unwrap();
        let store = JobStore::new(layout);

        let mut record = JobRecord::new_queued(
            Source {
                platform: "youtube".into(),
                video_id: "abc12345678".into(),
                url: "https://youtu.be/abc12345678".into(),
            },
            Languages {
                src_lang: Language::Ja,
                tgt_lang: Language::En,
            },
            "u@example.com",
            PipelineParams {
                max_atempo: 1.3,
                max_overlap_sec: 2.0,
                max_overlap_ratio: 0.25,
                overlap_duck_db: -6.0,
                hallucination_policy: "silence".into(),
                timeline_reference: "ffprobe".into(),
            },
        );
        record.segments = segments;
        store.save(&record).unwrap();

        // SAFETY: test env mutation; the registry requires the LLM key.
        unsafe { std::env::set_var(talkdub_config::LLM_API_KEY_ENV, "test-key") };

        let ctx = PhaseContext::new(
            record.job_id,
            store,
            Arc::new(Config::minimal_for_testing()),
        );
        (dir, ctx)
    }

    fn phase_with(responses: Vec<Result<String, LlmError>>, seg_limit: usize) -> TranslationPhase {
        let mut config = Config::minimal_for_testing().translation;
        config.chunk_seg_limit = seg_limit;
        config.max_retries = 1;
        config.backoff_base = Duration::from_millis(1);
        let store: Arc<dyn talkdub_kv::KeyedStore> = Arc::new(MemoryStore::new());
        TranslationPhase::new(Arc::new(Translator::new(
            Arc::new(ScriptedBackend {
                responses: Mutex::new(responses),
            }),
            RateLimiter::new(Arc::clone(&store), 1000, 1.0),
            TranslationCache::new(store, false, Duration::from_secs(60)),
            config,
            "groq",
        )))
    }

    fn ok_response(translations: &[&str]) -> Result<String, LlmError> {
        let items: Vec<serde_json::Value> = translations
            .iter()
            .enumerate()
            .map(|(i, t)| json!({"id": i, "translation": t}))
            .collect();
        Ok(json!({"translations": items}).to_string())
    }

    #[tokio::test]
    async fn test_partial_chunk_failure_is_tolerated() {
        // Three chunks, chunk 2 fails all retries: the phase succeeds,
        // those segments fall back to source text and are marked failed.
        let (_dir, ctx) = setup(vec![
            segment(0, "first sentence", false),
            segment(1, "second sentence", false),
            segment(2, "third sentence", false),
        ]);
        let phase = phase_with(
            vec![
                ok_response(&["one"]),
                Err(LlmError::ProviderOutage("503".into())),
                ok_response(&["three"]),
            ],
            1,
        );

        let runner = PhaseRunner::new(1, Duration::from_millis(1));
        let result = runner.run(&phase, &ctx).await;
        assert!(result.success, "1/3 failed chunks is within tolerance");

        let record = ctx.store.load(&ctx.job_id).unwrap();
        assert_eq!(record.segments[0].tgt_text.as_deref(), Some("one"));
        assert_eq!(
            record.segments[0].translation.status,
            SegmentTaskStatus::Completed
        );
        // Fallback keeps the source text available for synthesis.
        assert_eq!(
            record.segments[1].tgt_text.as_deref(),
            Some("second sentence")
        );
        assert_eq!(
            record.segments[1].translation.status,
            SegmentTaskStatus::Failed
        );
        assert_eq!(record.segments[2].tgt_text.as_deref(), Some("three"));
    }

    #[tokio::test]
    async fn test_hallucinated_segments_are_skipped() {
        let (_dir, ctx) = setup(vec![
            segment(0, "real speech", false),
            segment(1, "ご視聴ありがとうございました", true),
        ]);
        let phase = phase_with(vec![ok_response(&["real output"])], 30);

        let runner = PhaseRunner::new(1, Duration::from_millis(1));
        let result = runner.run(&phase, &ctx).await;
        assert!(result.success);

        let record = ctx.store.load(&ctx.job_id).unwrap();
        assert_eq!(record.segments[0].tgt_text.as_deref(), Some("real output"));
        // Flagged segment never entered the pipeline.
        assert!(record.segments[1].tgt_text.is_none());
        assert_eq!(
            record.segments[1].translation.status,
            SegmentTaskStatus::Pending
        );
    }

    #[tokio::test]
    async fn test_degraded_pipeline_fails_phase() {
        let (_dir, ctx) = setup(vec![
            segment(0, "first sentence", false),
            segment(1, "second sentence", false),
        ]);
        let phase = phase_with(
            vec![
                Err(LlmError::ProviderOutage("503".into())),
                Err(LlmError::ProviderOutage("503".into())),
            ],
            1,
        );

        let runner = PhaseRunner::new(1, Duration::from_millis(1));
        let result = runner.run(&phase, &ctx).await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("degraded"));
    }

    #[tokio::test]
    async fn test_progress_is_persisted_and_monotonic() {
        let (_dir, ctx) = setup(vec![
            segment(0, "first sentence", false),
            segment(1, "second sentence", false),
        ]);
        let phase = phase_with(vec![ok_response(&["a"]), ok_response(&["b"])], 1);

        let runner = PhaseRunner::new(1, Duration::from_millis(1));
        let result = runner.run(&phase, &ctx).await;
        assert!(result.success);

        let record = ctx.store.load(&ctx.job_id).unwrap();
        assert_eq!(record.progress.completed_segments, 2);
        assert_eq!(record.progress.total_segments, 2);
        assert_eq!(record.progress.percent, 100.0);
    }
}
