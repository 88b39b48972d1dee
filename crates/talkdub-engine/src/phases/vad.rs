//! VAD phase: voice-activity analysis per recognized segment.
//!
//! Contract: `{vad} <audio> --threshold 0.5 --output-json <path>` writes
//! `{"speech_spans": [{"start", "end"}]}` in seconds. The per-segment
//! speech ratio is the intersection of a segment's time range with the
//! detected spans, divided by the segment duration, clamped to [0, 1].

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

use talkdub_job::{JobRecord, Segment};
use talkdub_phase_api::{Phase, PhaseContext, PhaseOutput};
use talkdub_utils::error::PhaseError;
use talkdub_utils::process::{CommandSpec, run_checked};
use talkdub_utils::types::PhaseId;

use crate::phases::{exec_err, load_record};

const TIMEOUT: Duration = Duration::from_secs(1800);

#[derive(Debug, Deserialize)]
struct VadOutput {
    speech_spans: Vec<SpeechSpan>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
struct SpeechSpan {
    start: f64,
    end: f64,
}

pub struct VadPhase;

#[async_trait]
impl Phase for VadPhase {
    fn name(&self) -> &'static str {
        "VAD"
    }

    fn id(&self) -> PhaseId {
        PhaseId::Vad
    }

    fn timeout(&self, _record: &JobRecord) -> Duration {
        TIMEOUT
    }

    async fn execute(&self, ctx: &PhaseContext) -> Result<PhaseOutput, PhaseError> {
        let record = load_record(ctx, self.id())?;
        let logger = ctx.logger(self.id());
        let input = ctx.scratch_dir().join("pre_voice.wav");
        let result_path = ctx.scratch_dir().join("vad.json");

        let spec = CommandSpec::new(&ctx.config.engines.vad, TIMEOUT).args([
            input.as_str(),
            "--threshold",
            "0.5",
            "--output-json",
            result_path.as_str(),
        ]);
        run_checked(&spec)
            .await
            .map_err(|e| exec_err(self.id(), e))?;

        let raw = std::fs::read_to_string(result_path.as_std_path())
            .map_err(|e| exec_err(self.id(), format!("VAD output unreadable: {e}")))?;
        let parsed: VadOutput = serde_json::from_str(&raw)
            .map_err(|e| exec_err(self.id(), format!("VAD output unparsable: {e}")))?;

        logger.info(&format!(
            "running VAD overlap on {} segments against {} speech spans",
            record.segments.len(),
            parsed.speech_spans.len()
        ));

        let mut segments = record.segments;
        apply_speech_ratios(&mut segments, &parsed.speech_spans);

        let _ = std::fs::remove_file(result_path.as_std_path());

        Ok(PhaseOutput::new().with_metadata(
            "segments",
            serde_json::to_value(&segments).unwrap_or_default(),
        ))
    }
}

/// Fill `vad_speech_ratio` on every segment.
fn apply_speech_ratios(segments: &mut [Segment], spans: &[SpeechSpan]) {
    for seg in segments {
        let duration = seg.end - seg.start;
        if duration <= 0.0 {
            seg.vad_speech_ratio = Some(0.0);
            continue;
        }

        let speech: f64 = spans
            .iter()
            .map(|span| {
                let overlap_start = span.start.max(seg.start);
                let overlap_end = span.end.min(seg.end);
                (overlap_end - overlap_start).max(0.0)
            })
            .sum();

        seg.vad_speech_ratio = Some((speech / duration).min(1.0));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn segment(start: f64, end: f64) -> Segment {
        Segment {
            seg_id: Segment::make_id(0),
            start,
            end,
            src_text: "x".into(),
            tgt_text: None,
            speaker_id: "SPEAKER_00".into(),
            flags: Default::default(),
            whisper: Default::default(),
            vad_speech_ratio: None,
            translation: Default::default(),
            tts: Default::default(),
            timing: Default::default(),
        }
    }

    #[test]
    fn test_full_overlap_gives_ratio_one() {
        let mut segments = vec![segment(1.0, 3.0)];
        let spans = vec![SpeechSpan {
            start: 0.0,
            end: 10.0,
        }];
        apply_speech_ratios(&mut segments, &spans);
        assert_eq!(segments[0].vad_speech_ratio, Some(1.0));
    }

    #[test]
    fn test_partial_overlap() {
        let mut segments = vec![segment(0.0, 4.0)];
        let spans = vec![
            SpeechSpan {
                start: 0.0,
                end: 1.0,
            },
            SpeechSpan {
                start: 3.0,
                end: 4.0,
            },
        ];
        apply_speech_ratios(&mut segments, &spans);
        assert_eq!(segments[0].vad_speech_ratio, Some(0.5));
    }

    #[test]
    fn test_no_overlap_gives_zero() {
        let mut segments = vec![segment(10.0, 12.0)];
        let spans = vec![SpeechSpan {
            start: 0.0,
            end: 5.0,
        }];
        apply_speech_ratios(&mut segments, &spans);
        assert_eq!(segments[0].vad_speech_ratio, Some(0.0));
    }

    #[test]
    fn test_degenerate_segment_gets_zero() {
        let mut segments = vec![segment(2.0, 2.0)];
        apply_speech_ratios(&mut segments, &[]);
        assert_eq!(segments[0].vad_speech_ratio, Some(0.0));
    }

    #[test]
    fn test_ratio_clamped_to_one() {
        // Overlapping spans could sum past the segment duration.
        let mut segments = vec![segment(0.0, 2.0)];
        let spans = vec![
            SpeechSpan {
                start: 0.0,
                end: 2.0,
            },
            SpeechSpan {
                start: 0.5,
                end: 1.5,
            },
        ];
        apply_speech_ratios(&mut segments, &spans);
        assert_eq!(segments[0].vad_speech_ratio, Some(1.0));
    }
}
