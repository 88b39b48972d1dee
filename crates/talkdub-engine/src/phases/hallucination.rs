//! Hallucination phase: flag recognizer output the audio does not support.
//!
//! Four signals, any of which flags a segment:
//! canned outro/engagement phrases (phrase lists exist for Japanese,
//! English, and Chinese; other source languages rely on the remaining
//! checks), 3-gram phrases repeated across at least 20% of segments,
//! near-empty text, and a high recognizer no-speech probability.
//! Flagged segments are excluded from translation and synthesis.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::time::Duration;

use talkdub_job::{JobRecord, Segment};
use talkdub_phase_api::{Phase, PhaseContext, PhaseOutput};
use talkdub_utils::error::PhaseError;
use talkdub_utils::types::{Language, PhaseId};

use crate::phases::load_record;

const TIMEOUT: Duration = Duration::from_secs(300);

/// Fraction of segments a 3-gram must appear in to count as frequent.
const FREQUENT_PHRASE_RATIO: f64 = 0.2;

/// Segments with recognizer no-speech probability above this are flagged.
const NO_SPEECH_THRESHOLD: f64 = 0.7;

static WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"\w+").unwrap());

/// Canned phrases the recognizer tends to invent over silence or music.
fn common_phrases(lang: Language) -> &'static [&'static str] {
    match lang {
        Language::Ja => &[
            "ご視聴ありがとうございました",
            "チャンネル登録",
            "高評価",
            "コメント欄",
            "次回",
            "字幕",
        ],
        Language::En => &[
            "thank you for watching",
            "subscribe",
            "like and subscribe",
            "comment below",
            "next video",
            "subtitles",
        ],
        Language::Zh => &["感谢观看", "订阅", "点赞", "评论", "下一期"],
        _ => &[],
    }
}

pub struct HallucinationPhase;

#[async_trait]
impl Phase for HallucinationPhase {
    fn name(&self) -> &'static str {
        "Hallucination"
    }

    fn id(&self) -> PhaseId {
        PhaseId::Hallucination
    }

    fn timeout(&self, _record: &JobRecord) -> Duration {
        TIMEOUT
    }

    async fn execute(&self, ctx: &PhaseContext) -> Result<PhaseOutput, PhaseError> {
        let record = load_record(ctx, self.id())?;
        let logger = ctx.logger(self.id());

        let mut segments = record.segments;
        let flagged = flag_hallucinations(&mut segments, record.languages.src_lang);

        logger.info(&format!(
            "hallucination detection completed: {flagged}/{} segments flagged",
            segments.len()
        ));

        Ok(PhaseOutput::new().with_metadata("segments", json!(segments)))
    }
}

/// Apply all detection signals; returns the number of flagged segments.
fn flag_hallucinations(segments: &mut [Segment], src_lang: Language) -> usize {
    let frequent = frequent_trigrams(segments);
    let phrases = common_phrases(src_lang);
    let mut flagged = 0;

    for seg in segments.iter_mut() {
        let text = seg.src_text.to_lowercase();

        let is_hallucination = phrases.iter().any(|p| text.contains(p))
            || frequent.iter().any(|p| text.contains(p.as_str()))
            || seg.src_text.trim().chars().count() < 2
            || seg.whisper.no_speech_prob > NO_SPEECH_THRESHOLD;

        seg.flags.suspected_hallucination = is_hallucination;
        if is_hallucination {
            flagged += 1;
        }
    }

    flagged
}

/// Word 3-grams that recur across at least 20% of segments. A phrase that
/// common in one video is almost always a recognizer loop, not speech.
fn frequent_trigrams(segments: &[Segment]) -> HashSet<String> {
    let mut counter: HashMap<String, usize> = HashMap::new();

    for seg in segments {
        let text = seg.src_text.to_lowercase();
        let words: Vec<&str> = WORD.find_iter(&text).map(|m| m.as_str()).collect();
        // Count each distinct trigram once per segment.
        let mut seen = HashSet::new();
        for window in words.windows(3) {
            seen.insert(window.join(" "));
        }
        for phrase in seen {
            *counter.entry(phrase).or_insert(0) += 1;
        }
    }

    let threshold = ((segments.len() as f64) * FREQUENT_PHRASE_RATIO).ceil().max(2.0) as usize;
    counter
        .into_iter()
        .filter(|(_, count)| *count >= threshold)
        .map(|(phrase, _)| phrase)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn segment(i: usize, text: &str) -> Segment {
        Segment {
            seg_id: Segment::make_id(i),
            start: i as f64 * 5.0,
            end: i as f64 * 5.0 + 4.0,
            src_text: text.into(),
            tgt_text: None,
            speaker_id: "SPEAKER_00".into(),
            flags: Default::default(),
            whisper: Default::default(),
            vad_speech_ratio: Some(0.8),
            translation: Default::default(),
            tts: Default::default(),
            timing: Default::default(),
        }
    }

    #[test]
    fn test_canned_phrase_flagged_for_japanese() {
        let mut segments = vec![
            segment(0, "今日は良い天気ですね"),
            segment(1, "ご視聴ありがとうございました"),
        ];
        let flagged = flag_hallucinations(&mut segments, Language::Ja);
        assert_eq!(flagged, 1);
        assert!(!segments[0].flags.suspected_hallucination);
        assert!(segments[1].flags.suspected_hallucination);
    }

    #[test]
    fn test_canned_phrase_flagged_for_english() {
        let mut segments = vec![
            segment(0, "Today we look at sorting algorithms"),
            segment(1, "Thank you for watching, like and subscribe"),
        ];
        let flagged = flag_hallucinations(&mut segments, Language::En);
        assert_eq!(flagged, 1);
        assert!(segments[1].flags.suspected_hallucination);
    }

    #[test]
    fn test_no_phrase_list_for_other_languages() {
        // German has no canned list; only the statistical checks apply.
        let mut segments = vec![segment(0, "Danke fürs Zuschauen und abonnieren")];
        let flagged = flag_hallucinations(&mut segments, Language::De);
        assert_eq!(flagged, 0);
    }

    #[test]
    fn test_repeated_trigram_flagged() {
        let distinct = [
            "quick brown foxes jump high",
            "many rivers flow toward oceans",
            "winter nights feel especially long",
            "fresh bread smells quite wonderful",
            "old maps show forgotten roads",
        ];
        let mut segments: Vec<Segment> = (0..10)
            .map(|i| {
                if i % 2 == 0 {
                    segment(i, "the same looping phrase again")
                } else {
                    segment(i, distinct[i / 2])
                }
            })
            .collect();

        let flagged = flag_hallucinations(&mut segments, Language::De);
        // 5/10 repeats >= 20% threshold.
        assert_eq!(flagged, 5);
        assert!(segments[0].flags.suspected_hallucination);
        assert!(!segments[1].flags.suspected_hallucination);
    }

    #[test]
    fn test_near_empty_text_flagged() {
        let mut segments = vec![segment(0, "a"), segment(1, "proper sentence here")];
        let flagged = flag_hallucinations(&mut segments, Language::De);
        assert_eq!(flagged, 1);
        assert!(segments[0].flags.suspected_hallucination);
    }

    #[test]
    fn test_high_no_speech_prob_flagged() {
        let mut segments = vec![segment(0, "plausible text over silence")];
        segments[0].whisper.no_speech_prob = 0.9;
        let flagged = flag_hallucinations(&mut segments, Language::De);
        assert_eq!(flagged, 1);
    }
}
