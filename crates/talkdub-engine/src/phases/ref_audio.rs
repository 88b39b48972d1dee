//! Reference-audio phase: pick the best sample of each speaker's voice to
//! condition synthesis.
//!
//! Candidates are the speaker's own segments, scored on duration band,
//! measured speech ratio, recognizer confidence, text length, and
//! adjacency to other speakers' segments (voice bleed). A flagged
//! hallucination scores zero. Speakers with no candidate above the
//! threshold fall back to a preset voice.

use async_trait::async_trait;
use serde_json::json;
use std::time::Duration;

use talkdub_job::record::FallbackMode;
use talkdub_job::{JobRecord, Segment};
use talkdub_phase_api::{Phase, PhaseContext, PhaseOutput};
use talkdub_utils::error::PhaseError;
use talkdub_utils::types::PhaseId;

use crate::media;
use crate::phases::{exec_err, load_record};

const TIMEOUT: Duration = Duration::from_secs(1800);

/// Candidates below this score are unusable.
const MIN_ACCEPTABLE_SCORE: f64 = 20.0;

pub struct RefAudioPhase;

#[async_trait]
impl Phase for RefAudioPhase {
    fn name(&self) -> &'static str {
        "RefAudio"
    }

    fn id(&self) -> PhaseId {
        PhaseId::RefAudio
    }

    fn timeout(&self, _record: &JobRecord) -> Duration {
        TIMEOUT
    }

    async fn execute(&self, ctx: &PhaseContext) -> Result<PhaseOutput, PhaseError> {
        let record = load_record(ctx, self.id())?;
        let logger = ctx.logger(self.id());
        let input = ctx.scratch_dir().join("pre_voice.wav");
        let ref_dir = ctx.ref_audio_dir();
        std::fs::create_dir_all(ref_dir.as_std_path()).map_err(|e| exec_err(self.id(), e))?;

        let mut speakers = record.speakers.clone();
        let mut output = PhaseOutput::new();

        for speaker in &mut speakers {
            let candidates: Vec<&Segment> = record
                .segments
                .iter()
                .filter(|seg| seg.speaker_id == speaker.speaker_id)
                .collect();

            if candidates.is_empty() {
                logger.warn(&format!("speaker {} has no segments", speaker.speaker_id));
                continue;
            }

            let mut scored: Vec<(f64, &Segment)> = candidates
                .iter()
                .map(|seg| (score_candidate(seg, &record.segments), *seg))
                .collect();
            scored.sort_by(|a, b| b.0.total_cmp(&a.0));

            let (best_score, best_seg) = scored[0];
            if best_score < MIN_ACCEPTABLE_SCORE {
                logger.warn(&format!(
                    "speaker {}: no usable reference candidate (best score {best_score:.2})",
                    speaker.speaker_id
                ));
                speaker.fallback_mode = FallbackMode::PresetVoice;
                speaker.ref_quality_score = Some(best_score);
                continue;
            }

            let ref_wav = ref_dir.join(format!("{}_01.wav", speaker.speaker_id));
            media::extract_segment(
                &ctx.config.engines,
                &input,
                &ref_wav,
                best_seg.start,
                best_seg.duration(),
            )
            .await
            .map_err(|e| exec_err(self.id(), e))?;

            speaker.ref_audio_wav = Some(ref_wav.to_string());
            speaker.ref_text = Some(best_seg.src_text.clone());
            speaker.ref_text_lang = Some(record.languages.src_lang);
            speaker.ref_quality_score = Some(best_score);

            logger.info(&format!(
                "speaker {}: reference extracted (score={best_score:.2}, {:.2}s)",
                speaker.speaker_id,
                best_seg.duration()
            ));
            output = output.with_file(speaker.speaker_id.clone(), ref_wav);
        }

        if !speakers
            .iter()
            .any(|s| s.ref_audio_wav.is_some())
        {
            logger.warn("no valid reference audio for any speaker; preset voices will be used");
        }

        Ok(output.with_metadata("speakers", json!(speakers)))
    }
}

/// Score a reference-audio candidate. Higher is better; zero disqualifies.
fn score_candidate(seg: &Segment, all_segments: &[Segment]) -> f64 {
    if seg.flags.suspected_hallucination {
        return 0.0;
    }

    let mut score = 100.0;

    // Length: 3-8 s usable, 4-7 s ideal.
    let duration = seg.duration();
    if !(3.0..=8.0).contains(&duration) {
        score *= 0.3;
    } else if (4.0..=7.0).contains(&duration) {
        score *= 1.2;
    }

    // Measured speech density.
    let speech_ratio = seg.vad_speech_ratio.unwrap_or(0.0);
    if speech_ratio < 0.5 {
        score *= 0.1;
    } else if speech_ratio > 0.85 {
        score *= 1.3;
    }

    // Recognizer confidence.
    if seg.whisper.no_speech_prob > 0.5 {
        score *= 0.2;
    }

    // Text length as a proxy for phonetic coverage.
    let text_len = seg.src_text.chars().count();
    if text_len < 8 {
        score *= 0.5;
    } else if text_len > 20 {
        score *= 1.1;
    }

    // Another speaker starting or ending within half a second suggests
    // bleed into the sample.
    for other in all_segments {
        if other.speaker_id != seg.speaker_id
            && ((other.start - seg.end).abs() < 0.5 || (other.end - seg.start).abs() < 0.5)
        {
            score *= 0.4;
            break;
        }
    }

    score
}

#[cfg(test)]
mod tests {
    use super::*;

    fn segment(speaker: &str, start: f64, end: f64, text: &str) -> Segment {
        Segment {
            seg_id: Segment::make_id(0),
            start,
            end,
            src_text: text.into(),
            tgt_text: None,
            speaker_id: speaker.into(),
            flags: Default::default(),
            whisper: Default::default(),
            vad_speech_ratio: Some(0.9),
            translation: Default::default(),
            tts: Default::default(),
            timing: Default::default(),
        }
    }

    #[test]
    fn test_ideal_candidate_scores_high() {
        let seg = segment("SPEAKER_00", 10.0, 15.0, "a nicely long utterance here");
        let score = score_candidate(&seg, &[seg.clone()]);
        // 100 * 1.2 (ideal length) * 1.3 (speech) * 1.1 (text) = 171.6
        assert!(score > 150.0, "score was {score}");
    }

    #[test]
    fn test_hallucination_scores_zero() {
        let mut seg = segment("SPEAKER_00", 10.0, 15.0, "a nicely long utterance here");
        seg.flags.suspected_hallucination = true;
        assert_eq!(score_candidate(&seg, &[seg.clone()]), 0.0);
    }

    #[test]
    fn test_low_speech_ratio_is_heavily_penalized() {
        let mut seg = segment("SPEAKER_00", 10.0, 15.0, "a nicely long utterance here");
        seg.vad_speech_ratio = Some(0.2);
        let score = score_candidate(&seg, &[seg.clone()]);
        assert!(score < MIN_ACCEPTABLE_SCORE, "score was {score}");
    }

    #[test]
    fn test_adjacent_other_speaker_penalizes() {
        let seg = segment("SPEAKER_00", 10.0, 15.0, "a nicely long utterance here");
        let neighbor = segment("SPEAKER_01", 15.2, 18.0, "overlapping reply");
        let alone = score_candidate(&seg, std::slice::from_ref(&seg));
        let crowded = score_candidate(&seg, &[seg.clone(), neighbor]);
        assert!(crowded < alone * 0.5);
    }

    #[test]
    fn test_high_no_speech_prob_penalizes() {
        let mut seg = segment("SPEAKER_00", 10.0, 15.0, "a nicely long utterance here");
        seg.whisper.no_speech_prob = 0.8;
        let score = score_candidate(&seg, &[seg.clone()]);
        assert!(score < 60.0);
    }

    #[test]
    fn test_short_segment_penalized() {
        let seg = segment("SPEAKER_00", 10.0, 11.0, "hi");
        let score = score_candidate(&seg, &[seg.clone()]);
        // 100 * 0.3 (length) * 1.3 (speech) * 0.5 (text) = 19.5
        assert!(score < MIN_ACCEPTABLE_SCORE);
    }
}
