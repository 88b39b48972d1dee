//! TTS phase: synthesize each translated segment in the target language,
//! conditioned on the speaker's reference audio.
//!
//! Contract: `{synthesizer} --text <t> --language <code> --output <wav>
//! [--ref-audio <wav> --ref-text <t>]` writes a 16-bit PCM WAV and exits
//! zero. Every output is validated (size, duration band relative to the
//! source slot, audible signal); a failure rate above 50% aborts the
//! phase.

use async_trait::async_trait;
use serde_json::json;
use std::collections::HashMap;
use std::time::Duration;

use talkdub_job::record::{FallbackMode, SegmentTaskStatus};
use talkdub_job::{JobRecord, Progress};
use talkdub_phase_api::{Phase, PhaseContext, PhaseOutput};
use talkdub_utils::error::PhaseError;
use talkdub_utils::process::{CommandSpec, run_checked};
use talkdub_utils::types::PhaseId;

use crate::media;
use crate::phases::load_record;

const MIN_TIMEOUT: Duration = Duration::from_secs(3600);

/// Budget per segment, CPU synthesis assumed.
const PER_SEGMENT_BUDGET: Duration = Duration::from_secs(300);

/// Acceptable synthesized duration relative to the source slot.
const DURATION_BAND: (f64, f64) = (0.5, 2.5);

/// Outputs quieter than this RMS are considered silent.
const MIN_RMS: f64 = 0.001;

/// Abort once more than half the processable segments failed.
const MAX_FAILURE_RATIO: f64 = 0.5;

struct SpeakerRef {
    ref_audio: Option<String>,
    ref_text: Option<String>,
}

pub struct TtsPhase;

#[async_trait]
impl Phase for TtsPhase {
    fn name(&self) -> &'static str {
        "TTS"
    }

    fn id(&self) -> PhaseId {
        PhaseId::Tts
    }

    fn timeout(&self, record: &JobRecord) -> Duration {
        let processable = record
            .segments
            .iter()
            .filter(|s| {
                s.translation.status == SegmentTaskStatus::Completed
                    && !s.flags.suspected_hallucination
            })
            .count() as u32;
        MIN_TIMEOUT.max(PER_SEGMENT_BUDGET * processable.max(1))
    }

    async fn execute(&self, ctx: &PhaseContext) -> Result<PhaseOutput, PhaseError> {
        let record = load_record(ctx, self.id())?;
        let logger = ctx.logger(self.id());
        let tgt = record.languages.tgt_lang;

        let tts_dir = ctx.output_dir().join("tts_output");
        std::fs::create_dir_all(tts_dir.as_std_path()).map_err(|e| PhaseError::ExecutionFailed {
            phase: self.id().as_str().to_string(),
            message: e.to_string(),
        })?;

        // Reference conditioning per speaker; preset-voice fallback drops
        // the reference arguments.
        let speaker_refs: HashMap<String, SpeakerRef> = record
            .speakers
            .iter()
            .map(|spk| {
                let preset = spk.fallback_mode == FallbackMode::PresetVoice;
                (
                    spk.speaker_id.clone(),
                    SpeakerRef {
                        ref_audio: if preset { None } else { spk.ref_audio_wav.clone() },
                        ref_text: if preset { None } else { spk.ref_text.clone() },
                    },
                )
            })
            .collect();

        let mut segments = record.segments;
        let processable: Vec<usize> = segments
            .iter()
            .enumerate()
            .filter(|(_, s)| {
                s.translation.status == SegmentTaskStatus::Completed
                    && !s.flags.suspected_hallucination
            })
            .map(|(i, _)| i)
            .collect();

        if processable.is_empty() {
            logger.warn("no segments to synthesize");
            return Ok(PhaseOutput::new());
        }

        let total = processable.len();
        let mut succeeded = 0usize;
        let mut failed = 0usize;

        logger.info(&format!("starting synthesis of {total} segments"));

        for (done, idx) in processable.into_iter().enumerate() {
            let seg = &mut segments[idx];
            logger.progress(done + 1, total, "synthesizing segment");

            let Some(text) = seg.tgt_text.clone() else {
                seg.tts.status = SegmentTaskStatus::Failed;
                failed += 1;
                continue;
            };

            let wav_path = tts_dir.join(format!("{}.wav", seg.seg_id));
            let mut spec = CommandSpec::new(&ctx.config.engines.synthesizer, PER_SEGMENT_BUDGET)
                .args(["--text", text.as_str(), "--language", tgt.code()])
                .args(["--output", wav_path.as_str()]);

            if let Some(speaker_ref) = speaker_refs.get(&seg.speaker_id) {
                if let (Some(ref_audio), Some(ref_text)) =
                    (&speaker_ref.ref_audio, &speaker_ref.ref_text)
                {
                    spec = spec
                        .args(["--ref-audio", ref_audio.as_str()])
                        .args(["--ref-text", ref_text.as_str()]);
                }
            }

            let synthesis = run_checked(&spec).await.map(|_| ()).and_then(|()| {
                let slot = seg.end - seg.start;
                media::validate_tts_output(
                    &wav_path,
                    (slot * DURATION_BAND.0, slot * DURATION_BAND.1),
                    MIN_RMS,
                )
                .map_err(|e| talkdub_utils::process::ProcessError::NonZeroExit {
                    program: ctx.config.engines.synthesizer.clone(),
                    exit_code: 0,
                    stderr: e,
                })
            });

            match synthesis {
                Ok(stats) => {
                    seg.tts.wav_path = Some(wav_path.to_string());
                    seg.tts.status = SegmentTaskStatus::Completed;
                    seg.timing.tts_duration = Some(stats.duration_sec);
                    succeeded += 1;
                }
                Err(e) => {
                    logger.error(&format!("synthesis failed for {}: {e}", seg.seg_id));
                    seg.tts.status = SegmentTaskStatus::Failed;
                    seg.tts.retries += 1;
                    failed += 1;

                    if (failed as f64) / (total as f64) > MAX_FAILURE_RATIO {
                        return Err(PhaseError::ExecutionFailed {
                            phase: self.id().as_str().to_string(),
                            message: format!(
                                "TTS failure rate too high: {failed}/{total} segments failed"
                            ),
                        });
                    }
                }
            }
        }

        logger.info(&format!(
            "synthesis completed: {succeeded} succeeded, {failed} failed"
        ));

        Ok(PhaseOutput::new()
            .with_file("tts_output_dir", tts_dir)
            .with_metadata("segments", json!(segments))
            .with_metadata("progress", json!(Progress::of(total as u32, total as u32))))
    }
}
