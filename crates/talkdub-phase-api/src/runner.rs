//! The shared phase runner.
//!
//! Wraps every phase execution in the same discipline:
//!
//! 1. load the job record;
//! 2. check the registry preconditions — a missing prerequisite returns a
//!    failure without ever invoking the phase body;
//! 3. retry the body up to the configured budget under the phase's
//!    timeout, sleeping `base * 2^attempt` between attempts;
//! 4. on success, deep-merge the phase's metadata into the record and
//!    persist it atomically;
//! 5. on exhaustion, translate the last technical error into a
//!    user-visible sentence.
//!
//! The runner never changes job status; that belongs to the orchestrator.

use std::time::Duration;
use tokio::time::Instant;

use talkdub_utils::error::PhaseError;
use talkdub_utils::error_translator;

use crate::registry::validate_preconditions;
use crate::{Phase, PhaseContext, PhaseResult};

/// Retry policy plus the machinery shared by all phases.
#[derive(Debug, Clone)]
pub struct PhaseRunner {
    max_retries: u32,
    retry_delay_base: Duration,
}

impl PhaseRunner {
    #[must_use]
    pub fn new(max_retries: u32, retry_delay_base: Duration) -> Self {
        Self {
            max_retries: max_retries.max(1),
            retry_delay_base,
        }
    }

    /// Run one phase to a [`PhaseResult`].
    pub async fn run(&self, phase: &dyn Phase, ctx: &PhaseContext) -> PhaseResult {
        let started = Instant::now();
        let id = phase.id();
        let logger = ctx.logger(id);

        logger.info(&format!("starting {}", phase.name()));

        // Load the record; a store failure here is not retriable.
        let record = match ctx.store.load(&ctx.job_id) {
            Ok(record) => record,
            Err(e) => {
                let technical = e.to_string();
                logger.error(&format!("failed to load job record: {technical}"));
                let user = error_translator::translate(&technical);
                return PhaseResult::failed(id, technical, user, started.elapsed(), 0);
            }
        };

        // Scratch directory exists from the first phase onward.
        let scratch_dir = ctx.scratch_dir();
        if let Err(e) = std::fs::create_dir_all(scratch_dir.as_std_path()) {
            let technical = format!("failed to create scratch directory: {e}");
            logger.error(&technical);
            let user = error_translator::translate(&technical);
            return PhaseResult::failed(id, technical, user, started.elapsed(), 0);
        }

        // Fail fast before heavy work: the phase body is never invoked when
        // a declared dependency is missing.
        if let Err(message) = validate_preconditions(id, &record, &scratch_dir) {
            logger.error(&format!("precondition validation failed: {message}"));
            // Precondition messages are already user-readable.
            return PhaseResult::failed(id, message.clone(), message, started.elapsed(), 0);
        }

        let timeout = phase.timeout(&record);
        let mut last_error: Option<PhaseError> = None;

        for attempt in 0..self.max_retries {
            let outcome = tokio::time::timeout(timeout, phase.execute(ctx)).await;

            let error = match outcome {
                Ok(Ok(output)) => {
                    let attempts = attempt + 1;
                    logger.info(&format!(
                        "completed successfully (attempt {attempts}, {:.2}s)",
                        started.elapsed().as_secs_f64()
                    ));

                    match ctx.store.apply_metadata(&ctx.job_id, output.metadata.clone()) {
                        Ok(_) => {
                            return PhaseResult::succeeded(
                                id,
                                output,
                                started.elapsed(),
                                attempts,
                            );
                        }
                        Err(e) => PhaseError::JobStore {
                            phase: id.as_str().to_string(),
                            source: e,
                        },
                    }
                }
                Ok(Err(e)) => e,
                Err(_elapsed) => PhaseError::Timeout {
                    phase: id.as_str().to_string(),
                    timeout,
                },
            };

            logger.warn(&format!(
                "attempt {}/{} failed: {error}",
                attempt + 1,
                self.max_retries
            ));
            last_error = Some(error);

            if attempt + 1 < self.max_retries {
                let delay = self.retry_delay_base * 2u32.pow(attempt);
                logger.info(&format!("retrying in {}s", delay.as_secs()));
                tokio::time::sleep(delay).await;
            }
        }

        let technical = last_error
            .map(|e| e.technical_message())
            .unwrap_or_else(|| "unknown phase failure".to_string());
        let user = error_translator::translate(&technical);

        logger.error(&format!(
            "failed after {} attempts: {technical}",
            self.max_retries
        ));

        PhaseResult::failed(id, technical, user, started.elapsed(), self.max_retries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{PhaseOutput, registry};
    use async_trait::async_trait;
    use camino::Utf8PathBuf;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};
    use talkdub_config::Config;
    use talkdub_job::{JobRecord, JobStore, Languages, PipelineParams, Source};
    use talkdub_utils::paths::DataLayout;
    use talkdub_utils::types::{Language, PhaseId};
    use tempfile::TempDir;

    struct FlakyPhase {
        fail_times: u32,
        calls: Arc<AtomicU32>,
    }

    #[async_trait]
    impl Phase for FlakyPhase {
        fn name(&self) -> &'static str {
            "Flaky"
        }

        fn id(&self) -> PhaseId {
            PhaseId::Download
        }

        fn timeout(&self, _record: &JobRecord) -> Duration {
            Duration::from_secs(30)
        }

        async fn execute(&self, _ctx: &PhaseContext) -> Result<PhaseOutput, PhaseError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.fail_times {
                Err(PhaseError::ExecutionFailed {
                    phase: "download".into(),
                    message: format!("transient failure #{call}"),
                })
            } else {
                Ok(PhaseOutput::new().with_metadata(
                    "media",
                    serde_json::json!({"duration_sec": 42.0}),
                ))
            }
        }
    }

    struct NeverCalledPhase {
        calls: Arc<AtomicU32>,
    }

    #[async_trait]
    impl Phase for NeverCalledPhase {
        fn name(&self) -> &'static str {
            "NeverCalled"
        }

        fn id(&self) -> PhaseId {
            PhaseId::Asr
        }

        fn timeout(&self, _record: &JobRecord) -> Duration {
            Duration::from_secs(30)
        }

        async fn execute(&self, _ctx: &PhaseContext) -> Result<PhaseOutput, PhaseError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(PhaseOutput::new())
        }
    }

    struct HangingPhase;

    #[async_trait]
    impl Phase for HangingPhase {
        fn name(&self) -> &'static str {
            "Hanging"
        }

        fn id(&self) -> PhaseId {
            PhaseId::Download
        }

        fn timeout(&self, _record: &JobRecord) -> Duration {
            Duration::from_millis(50)
        }

        async fn execute(&self, _ctx: &PhaseContext) -> Result<PhaseOutput, PhaseError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(PhaseOutput::new())
        }
    }

    fn test_ctx() -> (TempDir, PhaseContext) {
        let dir = TempDir::new().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().join("data")).unwrap();
        let layout = DataLayout::new(root);
        layout.ensure_dirs().unwrap();
        let store = JobStore::new(layout);

        let record = JobRecord::new_queued(
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
        store.save(&record).unwrap();

        let ctx = PhaseContext::new(
            record.job_id,
            store,
            Arc::new(Config::minimal_for_testing()),
        );
        (dir, ctx)
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_after_k_failures_within_budget() {
        let (_dir, ctx) = test_ctx();
        let runner = PhaseRunner::new(3, Duration::from_secs(5));
        let calls = Arc::new(AtomicU32::new(0));
        let phase = FlakyPhase {
            fail_times: 2,
            calls: Arc::clone(&calls),
        };

        let result = runner.run(&phase, &ctx).await;

        assert!(result.success, "phase should succeed on attempt 3");
        assert_eq!(result.attempts, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        // Metadata was merged and persisted.
        let record = ctx.store.load(&ctx.job_id).unwrap();
        assert_eq!(record.media.duration_sec, Some(42.0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_when_retries_exhaust() {
        let (_dir, ctx) = test_ctx();
        let runner = PhaseRunner::new(3, Duration::from_secs(5));
        let calls = Arc::new(AtomicU32::new(0));
        let phase = FlakyPhase {
            fail_times: 3,
            calls: Arc::clone(&calls),
        };

        let result = runner.run(&phase, &ctx).await;

        assert!(!result.success);
        assert_eq!(result.attempts, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(result.error.unwrap().contains("transient failure"));
        assert!(result.user_friendly_error.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_is_exponential() {
        let (_dir, ctx) = test_ctx();
        let base = Duration::from_secs(5);
        let runner = PhaseRunner::new(3, base);
        let phase = FlakyPhase {
            fail_times: 3,
            calls: Arc::new(AtomicU32::new(0)),
        };

        let start = Instant::now();
        let _ = runner.run(&phase, &ctx).await;
        let elapsed = start.elapsed();

        // Two inter-attempt sleeps: base * (2^0 + 2^1) = 15s of virtual
        // time; execution itself is instant under the paused clock.
        let expected = base * 3;
        assert!(
            elapsed >= expected && elapsed < expected + Duration::from_secs(1),
            "expected ~{expected:?} of backoff, saw {elapsed:?}"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_precondition_failure_skips_execute() {
        let (_dir, ctx) = test_ctx();
        let runner = PhaseRunner::new(3, Duration::from_secs(5));
        let calls = Arc::new(AtomicU32::new(0));
        // Asr requires pre_voice.wav, which does not exist.
        let phase = NeverCalledPhase {
            calls: Arc::clone(&calls),
        };

        let result = runner.run(&phase, &ctx).await;

        assert!(!result.success);
        assert_eq!(calls.load(Ordering::SeqCst), 0, "execute must not run");
        assert!(
            result.user_friendly_error.unwrap().contains("pre_voice.wav"),
            "message names the missing prerequisite"
        );
        assert_eq!(result.attempts, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_every_registry_entry_fast_fails_when_deprived() {
        // For each phase with declared file dependencies, omitting the file
        // causes a failure without invoking execute().
        let runner = PhaseRunner::new(1, Duration::from_secs(1));
        for spec in registry::PHASE_SPECS {
            if spec.required_files.is_empty() {
                continue;
            }
            let (_dir, ctx) = test_ctx();
            let calls = Arc::new(AtomicU32::new(0));

            struct AnyPhase {
                id: PhaseId,
                calls: Arc<AtomicU32>,
            }

            #[async_trait]
            impl Phase for AnyPhase {
                fn name(&self) -> &'static str {
                    "Any"
                }
                fn id(&self) -> PhaseId {
                    self.id
                }
                fn timeout(&self, _record: &JobRecord) -> Duration {
                    Duration::from_secs(1)
                }
                async fn execute(&self, _ctx: &PhaseContext) -> Result<PhaseOutput, PhaseError> {
                    self.calls.fetch_add(1, Ordering::SeqCst);
                    Ok(PhaseOutput::new())
                }
            }

            let phase = AnyPhase {
                id: spec.id,
                calls: Arc::clone(&calls),
            };
            let result = runner.run(&phase, &ctx).await;
            assert!(!result.success, "{} should fast-fail", spec.id);
            assert_eq!(calls.load(Ordering::SeqCst), 0, "{}", spec.id);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_a_retriable_failure() {
        let (_dir, ctx) = test_ctx();
        let runner = PhaseRunner::new(2, Duration::from_millis(10));

        let result = runner.run(&HangingPhase, &ctx).await;

        assert!(!result.success);
        assert_eq!(result.attempts, 2);
        assert!(result.error.unwrap().contains("Timeout"));
        // Generic timeouts translate to the time-limit sentence.
        assert!(result.user_friendly_error.unwrap().contains("time limit"));
    }
}
