//! The versioned job record.
//!
//! One document per submission. Fields marked fixed are set at creation and
//! never rewritten; everything else is filled in by phases through the
//! metadata merge.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use talkdub_utils::types::{JobStatus, Language, PhaseId};

/// Current record format version.
pub const SCHEMA_VERSION: &str = "0.1";

/// Where the source video came from. Fixed at creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
    pub platform: String,
    pub video_id: String,
    pub url: String,
}

/// The language pair. Fixed at creation; `src_lang != tgt_lang` is enforced
/// at submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Languages {
    pub src_lang: Language,
    pub tgt_lang: Language,
}

/// Audio format of the working copy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioFormat {
    pub sample_rate_hz: u32,
    pub channels: u32,
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self {
            sample_rate_hz: 16_000,
            channels: 1,
        }
    }
}

/// Media facts discovered by the download phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Media {
    pub duration_sec: Option<f64>,
    #[serde(default)]
    pub audio_format: AudioFormat,
}

impl Default for Media {
    fn default() -> Self {
        Self {
            duration_sec: None,
            audio_format: AudioFormat::default(),
        }
    }
}

/// Fixed pipeline tunables, copied from configuration at creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineParams {
    pub max_atempo: f64,
    pub max_overlap_sec: f64,
    pub max_overlap_ratio: f64,
    pub overlap_duck_db: f64,
    pub hallucination_policy: String,
    pub timeline_reference: String,
}

/// Segment flags set by analysis phases.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Flags {
    pub suspected_hallucination: bool,
    pub silenced: bool,
    pub shortened: bool,
}

/// Recognizer confidence stats carried per segment.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WhisperStats {
    pub no_speech_prob: f64,
    pub avg_logprob: f64,
    #[serde(default)]
    pub words: Vec<WordTiming>,
}

/// Word-level timing from the recognizer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WordTiming {
    pub word: String,
    pub start: f64,
    pub end: f64,
}

/// Per-segment translation state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranslationState {
    pub provider: Option<String>,
    pub retries: u32,
    #[serde(default)]
    pub status: SegmentTaskStatus,
}

/// Per-segment synthesis state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TtsState {
    pub wav_path: Option<String>,
    #[serde(default)]
    pub status: SegmentTaskStatus,
    pub retries: u32,
}

/// Status of a per-segment task (translation or synthesis).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SegmentTaskStatus {
    #[default]
    Pending,
    Completed,
    Failed,
}

/// Timeline placement filled in by the timeline phase.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Timing {
    pub tts_duration: Option<f64>,
    pub final_start: Option<f64>,
    pub final_end: Option<f64>,
    pub atempo_applied: Option<f64>,
    pub overlap_applied: f64,
}

/// A time-bounded portion of source audio with recognized text and its
/// downstream translated/synthesized state. Ordered by `start`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub seg_id: String,
    pub start: f64,
    pub end: f64,
    pub src_text: String,
    pub tgt_text: Option<String>,
    pub speaker_id: String,
    #[serde(default)]
    pub flags: Flags,
    #[serde(default)]
    pub whisper: WhisperStats,
    pub vad_speech_ratio: Option<f64>,
    #[serde(default)]
    pub translation: TranslationState,
    #[serde(default)]
    pub tts: TtsState,
    #[serde(default)]
    pub timing: Timing,
}

impl Segment {
    /// Stable zero-padded segment id for ordinal `index`.
    #[must_use]
    pub fn make_id(index: usize) -> String {
        format!("seg_{index:04}")
    }

    #[must_use]
    pub fn duration(&self) -> f64 {
        self.end - self.start
    }
}

/// How a speaker's voice is conditioned during synthesis.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackMode {
    #[default]
    Normal,
    PresetVoice,
}

/// Per-speaker reference-audio metadata, populated by the ref_audio phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Speaker {
    pub speaker_id: String,
    pub ref_audio_wav: Option<String>,
    pub ref_text: Option<String>,
    pub ref_text_lang: Option<Language>,
    #[serde(default)]
    pub fallback_mode: FallbackMode,
    pub ref_quality_score: Option<f64>,
}

impl Speaker {
    #[must_use]
    pub fn new(speaker_id: impl Into<String>) -> Self {
        Self {
            speaker_id: speaker_id.into(),
            ref_audio_wav: None,
            ref_text: None,
            ref_text_lang: None,
            fallback_mode: FallbackMode::Normal,
            ref_quality_score: None,
        }
    }
}

/// Artifact paths filled at finalization.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Outputs {
    pub dub_wav: Option<String>,
    pub manifest_json: Option<String>,
    pub segments_json: Option<String>,
}

/// Segment-level progress; monotonic non-decreasing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Progress {
    pub completed_segments: u32,
    pub total_segments: u32,
    pub percent: f64,
}

impl Progress {
    #[must_use]
    pub fn of(completed: u32, total: u32) -> Self {
        let percent = if total > 0 {
            (f64::from(completed) / f64::from(total) * 1000.0).round() / 10.0
        } else {
            0.0
        };
        Self {
            completed_segments: completed,
            total_segments: total,
            percent,
        }
    }
}

/// The job record: one persisted JSON document per submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub schema_version: String,
    pub job_id: String,
    pub created_at: DateTime<Utc>,
    pub status: JobStatus,
    pub current_phase: Option<PhaseId>,
    pub source: Source,
    pub languages: Languages,
    #[serde(default)]
    pub media: Media,
    pub pipeline_params: PipelineParams,
    #[serde(default)]
    pub speakers: Vec<Speaker>,
    #[serde(default)]
    pub segments: Vec<Segment>,
    #[serde(default)]
    pub outputs: Outputs,
    pub error: Option<String>,
    #[serde(default)]
    pub progress: Progress,
    pub user_email: String,
    #[serde(default)]
    pub download_count: u32,
    pub expires_at: Option<DateTime<Utc>>,
}

impl JobRecord {
    /// Build a fresh QUEUED record for a validated submission.
    #[must_use]
    pub fn new_queued(
        source: Source,
        languages: Languages,
        user_email: impl Into<String>,
        pipeline_params: PipelineParams,
    ) -> Self {
        Self {
            schema_version: SCHEMA_VERSION.to_string(),
            job_id: uuid::Uuid::new_v4().to_string(),
            created_at: Utc::now(),
            status: JobStatus::Queued,
            current_phase: None,
            source,
            languages,
            media: Media::default(),
            pipeline_params,
            speakers: Vec::new(),
            segments: Vec::new(),
            outputs: Outputs::default(),
            error: None,
            progress: Progress::default(),
            user_email: user_email.into(),
            download_count: 0,
            expires_at: None,
        }
    }

    /// Segments eligible for translation and synthesis.
    #[must_use]
    pub fn translatable_segments(&self) -> Vec<&Segment> {
        self.segments
            .iter()
            .filter(|s| !s.flags.suspected_hallucination)
            .collect()
    }

    /// Whether the delivery window has passed.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|e| now > e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_record() -> JobRecord {
        JobRecord::new_queued(
            Source {
                platform: "youtube".into(),
                video_id: "dQw4w9WgXcQ".into(),
                url: "https://youtu.be/dQw4w9WgXcQ".into(),
            },
            Languages {
                src_lang: Language::Ja,
                tgt_lang: Language::En,
            },
            "user@example.com",
            PipelineParams {
                max_atempo: 1.3,
                max_overlap_sec: 2.0,
                max_overlap_ratio: 0.25,
                overlap_duck_db: -6.0,
                hallucination_policy: "silence".into(),
                timeline_reference: "ffprobe".into(),
            },
        )
    }

    #[test]
    fn test_new_queued_invariants() {
        let record = sample_record();
        assert_eq!(record.schema_version, SCHEMA_VERSION);
        assert_eq!(record.status, JobStatus::Queued);
        assert!(record.current_phase.is_none());
        assert_eq!(record.download_count, 0);
        assert!(record.expires_at.is_none());
        assert!(record.error.is_none());
    }

    #[test]
    fn test_record_round_trips_through_json() {
        let record = sample_record();
        let json = serde_json::to_string(&record).unwrap();
        let parsed: JobRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, record);
    }

    #[test]
    fn test_segment_id_is_zero_padded() {
        assert_eq!(Segment::make_id(0), "seg_0000");
        assert_eq!(Segment::make_id(42), "seg_0042");
        assert_eq!(Segment::make_id(12345), "seg_12345");
    }

    #[test]
    fn test_progress_percent() {
        let p = Progress::of(3, 8);
        assert_eq!(p.percent, 37.5);
        assert_eq!(Progress::of(0, 0).percent, 0.0);
        assert_eq!(Progress::of(8, 8).percent, 100.0);
    }

    #[test]
    fn test_translatable_segments_excludes_hallucinations() {
        let mut record = sample_record();
        let mut seg = Segment {
            seg_id: Segment::make_id(0),
            start: 0.0,
            end: 1.0,
            src_text: "a".into(),
            tgt_text: None,
            speaker_id: "SPEAKER_00".into(),
            flags: Flags::default(),
            whisper: WhisperStats::default(),
            vad_speech_ratio: None,
            translation: TranslationState::default(),
            tts: TtsState::default(),
            timing: Timing::default(),
        };
        record.segments.push(seg.clone());
        seg.seg_id = Segment::make_id(1);
        seg.flags.suspected_hallucination = true;
        record.segments.push(seg);

        assert_eq!(record.translatable_segments().len(), 1);
    }

    #[test]
    fn test_expiry_check() {
        let mut record = sample_record();
        assert!(!record.is_expired(Utc::now()));

        record.expires_at = Some(Utc::now() - chrono::Duration::hours(1));
        assert!(record.is_expired(Utc::now()));

        record.expires_at = Some(Utc::now() + chrono::Duration::hours(1));
        assert!(!record.is_expired(Utc::now()));
    }
}
