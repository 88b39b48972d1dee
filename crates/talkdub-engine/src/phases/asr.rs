//! ASR phase: speech recognition with word timings and speaker
//! diarization, via the external recognizer CLI.
//!
//! Contract: `{recognizer} <audio> --language <code> --diarize
//! --output-json <path>` writes a JSON document of shape
//! `{"segments": [{"start", "end", "text", "speaker", "no_speech_prob",
//! "avg_logprob", "words": [{"word", "start", "end"}]}]}`.
//! The raw segments are converted into the job record's segment schema
//! with stable zero-padded ids and pending downstream state.

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::BTreeSet;
use std::time::Duration;

use talkdub_job::{JobRecord, Segment, Speaker, WhisperStats, WordTiming};
use talkdub_phase_api::{Phase, PhaseContext, PhaseOutput};
use talkdub_utils::error::PhaseError;
use talkdub_utils::process::{CommandSpec, run_checked};
use talkdub_utils::types::PhaseId;

use crate::phases::{exec_err, load_record};

const TIMEOUT: Duration = Duration::from_secs(10_800);

const DEFAULT_SPEAKER: &str = "SPEAKER_00";

#[derive(Debug, Deserialize)]
struct RecognizerOutput {
    segments: Vec<RecognizerSegment>,
}

#[derive(Debug, Deserialize)]
struct RecognizerSegment {
    start: f64,
    end: f64,
    text: String,
    speaker: Option<String>,
    #[serde(default)]
    no_speech_prob: f64,
    #[serde(default)]
    avg_logprob: f64,
    #[serde(default)]
    words: Vec<RecognizerWord>,
}

#[derive(Debug, Deserialize)]
struct RecognizerWord {
    word: String,
    start: f64,
    end: f64,
}

pub struct AsrPhase;

#[async_trait]
impl Phase for AsrPhase {
    fn name(&self) -> &'static str {
        "ASR"
    }

    fn id(&self) -> PhaseId {
        PhaseId::Asr
    }

    fn timeout(&self, _record: &JobRecord) -> Duration {
        TIMEOUT
    }

    async fn execute(&self, ctx: &PhaseContext) -> Result<PhaseOutput, PhaseError> {
        let record = load_record(ctx, self.id())?;
        let logger = ctx.logger(self.id());
        let input = ctx.scratch_dir().join("pre_voice.wav");
        let result_path = ctx.scratch_dir().join("asr.json");

        let spec = CommandSpec::new(&ctx.config.engines.recognizer, TIMEOUT).args([
            input.as_str(),
            "--language",
            record.languages.src_lang.code(),
            "--diarize",
            "--output-json",
            result_path.as_str(),
        ]);
        run_checked(&spec)
            .await
            .map_err(|e| exec_err(self.id(), e))?;

        let raw = std::fs::read_to_string(result_path.as_std_path())
            .map_err(|e| exec_err(self.id(), format!("recognizer output unreadable: {e}")))?;
        let parsed: RecognizerOutput = serde_json::from_str(&raw)
            .map_err(|e| exec_err(self.id(), format!("recognizer output unparsable: {e}")))?;

        if parsed.segments.is_empty() {
            return Err(exec_err(self.id(), "No speech found in audio"));
        }

        let segments = convert_segments(parsed.segments);
        let speakers = extract_speakers(&segments);

        logger.info(&format!(
            "recognized {} segments across {} speakers",
            segments.len(),
            speakers.len()
        ));

        let _ = std::fs::remove_file(result_path.as_std_path());

        Ok(PhaseOutput::new()
            .with_metadata("segments", serde_json::to_value(&segments).unwrap_or_default())
            .with_metadata("speakers", serde_json::to_value(&speakers).unwrap_or_default()))
    }
}

/// Convert recognizer segments into the record schema, ordered by start.
fn convert_segments(mut raw: Vec<RecognizerSegment>) -> Vec<Segment> {
    raw.sort_by(|a, b| a.start.total_cmp(&b.start));

    raw.into_iter()
        .enumerate()
        .map(|(i, seg)| Segment {
            seg_id: Segment::make_id(i),
            start: seg.start,
            end: seg.end,
            src_text: seg.text.trim().to_string(),
            tgt_text: None,
            speaker_id: seg.speaker.unwrap_or_else(|| DEFAULT_SPEAKER.to_string()),
            flags: Default::default(),
            whisper: WhisperStats {
                no_speech_prob: seg.no_speech_prob,
                avg_logprob: seg.avg_logprob,
                words: seg
                    .words
                    .into_iter()
                    .map(|w| WordTiming {
                        word: w.word,
                        start: w.start,
                        end: w.end,
                    })
                    .collect(),
            },
            vad_speech_ratio: None,
            translation: Default::default(),
            tts: Default::default(),
            timing: Default::default(),
        })
        .collect()
}

/// One speaker entry per distinct id, sorted for stable output.
fn extract_speakers(segments: &[Segment]) -> Vec<Speaker> {
    let ids: BTreeSet<&str> = segments.iter().map(|s| s.speaker_id.as_str()).collect();
    ids.into_iter().map(Speaker::new).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use talkdub_job::record::SegmentTaskStatus;

    fn raw_segment(start: f64, end: f64, text: &str, speaker: Option<&str>) -> RecognizerSegment {
        RecognizerSegment {
            start,
            end,
            text: text.to_string(),
            speaker: speaker.map(str::to_string),
            no_speech_prob: 0.1,
            avg_logprob: -0.3,
            words: vec![],
        }
    }

    #[test]
    fn test_convert_orders_by_start_and_assigns_stable_ids() {
        let raw = vec![
            raw_segment(5.0, 6.0, " second ", Some("SPEAKER_01")),
            raw_segment(1.0, 2.0, "first", Some("SPEAKER_00")),
        ];
        let segments = convert_segments(raw);

        assert_eq!(segments[0].seg_id, "seg_0000");
        assert_eq!(segments[0].src_text, "first");
        assert_eq!(segments[1].seg_id, "seg_0001");
        assert_eq!(segments[1].src_text, "second");
        assert_eq!(segments[0].translation.status, SegmentTaskStatus::Pending);
    }

    #[test]
    fn test_convert_defaults_missing_speaker() {
        let segments = convert_segments(vec![raw_segment(0.0, 1.0, "hi", None)]);
        assert_eq!(segments[0].speaker_id, DEFAULT_SPEAKER);
    }

    #[test]
    fn test_extract_speakers_is_deduplicated_and_sorted() {
        let segments = convert_segments(vec![
            raw_segment(0.0, 1.0, "a", Some("SPEAKER_01")),
            raw_segment(1.0, 2.0, "b", Some("SPEAKER_00")),
            raw_segment(2.0, 3.0, "c", Some("SPEAKER_01")),
        ]);
        let speakers = extract_speakers(&segments);

        assert_eq!(speakers.len(), 2);
        assert_eq!(speakers[0].speaker_id, "SPEAKER_00");
        assert_eq!(speakers[1].speaker_id, "SPEAKER_01");
    }

    #[test]
    fn test_recognizer_output_parses_contract_shape() {
        let raw = r#"{
            "segments": [
                {"start": 0.0, "end": 2.5, "text": "hello", "speaker": "SPEAKER_00",
                 "no_speech_prob": 0.05, "avg_logprob": -0.2,
                 "words": [{"word": "hello", "start": 0.1, "end": 0.6}]}
            ]
        }"#;
        let parsed: RecognizerOutput = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.segments.len(), 1);
        assert_eq!(parsed.segments[0].words.len(), 1);
    }
}
