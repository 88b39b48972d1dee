//! Core identifier types for the dubbing pipeline.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use strum::{EnumIter, IntoEnumIterator};

/// Phase identifiers for the dubbing pipeline.
///
/// `PhaseId` represents the fixed, ordered sequence of steps a job moves
/// through. Phases execute strictly in declaration order; the registry in
/// `talkdub-phase-api` records what each phase requires before it may run.
///
/// # Phase Order
///
/// ```text
/// download → normalize → separate → asr → vad → ref_audio → hallucination
///          → translation → tts → timeline → mix → finalize → manifest
/// ```
///
/// # Serialization
///
/// `PhaseId` serializes to its string representation (e.g. `"download"`,
/// `"ref_audio"`), which is also what `current_phase` holds in the job
/// record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumIter)]
#[serde(rename_all = "snake_case")]
pub enum PhaseId {
    /// Fetch the source video's audio track.
    Download,
    /// Loudness-normalize and resample to the pipeline format.
    Normalize,
    /// Split voice from background music.
    Separate,
    /// Speech recognition with word timings and speaker diarization.
    Asr,
    /// Voice-activity analysis per recognized segment.
    Vad,
    /// Reference-voice selection per speaker.
    RefAudio,
    /// Flag recognizer output unsupported by the audio.
    Hallucination,
    /// Segment-level translation through the LLM pipeline.
    Translation,
    /// Segment-level speech synthesis.
    Tts,
    /// Fit synthesized segments onto the source timeline.
    Timeline,
    /// Mix the dubbed voice track with the background bed.
    Mix,
    /// Move artifacts into the output directory and drop scratch files.
    Finalize,
    /// Emit the manifest and segment report.
    Manifest,
}

impl PhaseId {
    /// Canonical lowercase name used in the job record, logs, and the CLI.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Download => "download",
            Self::Normalize => "normalize",
            Self::Separate => "separate",
            Self::Asr => "asr",
            Self::Vad => "vad",
            Self::RefAudio => "ref_audio",
            Self::Hallucination => "hallucination",
            Self::Translation => "translation",
            Self::Tts => "tts",
            Self::Timeline => "timeline",
            Self::Mix => "mix",
            Self::Finalize => "finalize",
            Self::Manifest => "manifest",
        }
    }

    /// All phases in execution order.
    #[must_use]
    pub fn ordered() -> Vec<Self> {
        Self::iter().collect()
    }
}

impl fmt::Display for PhaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PhaseId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::iter()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| format!("unknown phase id '{s}'"))
    }
}

/// Lifecycle status of a job.
///
/// Transitions are monotonic except for the pause loop:
///
/// ```text
/// QUEUED → PROCESSING → COMPLETED → EXPIRED
///              │   ↑
///              ↓   │
///            PAUSED┘        PROCESSING → FAILED
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Queued,
    Processing,
    Completed,
    Failed,
    Paused,
    Expired,
}

impl JobStatus {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "QUEUED",
            Self::Processing => "PROCESSING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Paused => "PAUSED",
            Self::Expired => "EXPIRED",
        }
    }

    /// Whether a transition from `self` to `next` is allowed.
    ///
    /// Self-transitions are permitted (status writes are idempotent).
    #[must_use]
    pub fn can_transition_to(&self, next: Self) -> bool {
        if *self == next {
            return true;
        }
        matches!(
            (self, next),
            (Self::Queued, Self::Processing)
                | (Self::Queued, Self::Failed)
                | (Self::Processing, Self::Completed)
                | (Self::Processing, Self::Failed)
                | (Self::Processing, Self::Paused)
                | (Self::Paused, Self::Processing)
                | (Self::Paused, Self::Failed)
                | (Self::Completed, Self::Expired)
                | (Self::Failed, Self::Expired)
        )
    }

    /// Terminal statuses never hand the job back to a worker.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Expired)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The closed set of supported languages.
///
/// Both the source and target language of a job must come from this set,
/// and the pair must differ.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumIter)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Ja,
    Zh,
    En,
    De,
    Fr,
    It,
    Es,
    Pt,
    Ru,
    Ko,
}

impl Language {
    /// ISO 639-1 code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Ja => "ja",
            Self::Zh => "zh",
            Self::En => "en",
            Self::De => "de",
            Self::Fr => "fr",
            Self::It => "it",
            Self::Es => "es",
            Self::Pt => "pt",
            Self::Ru => "ru",
            Self::Ko => "ko",
        }
    }

    /// English display name, used in translation prompts.
    #[must_use]
    pub const fn english_name(&self) -> &'static str {
        match self {
            Self::Ja => "Japanese",
            Self::Zh => "Chinese",
            Self::En => "English",
            Self::De => "German",
            Self::Fr => "French",
            Self::It => "Italian",
            Self::Es => "Spanish",
            Self::Pt => "Portuguese",
            Self::Ru => "Russian",
            Self::Ko => "Korean",
        }
    }

    /// All supported codes, for validation messages.
    #[must_use]
    pub fn supported_codes() -> Vec<&'static str> {
        Self::iter().map(|l| l.code()).collect()
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Language {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::iter().find(|l| l.code() == s).ok_or_else(|| {
            format!(
                "unsupported language code '{s}' (supported: {})",
                Self::supported_codes().join(", ")
            )
        })
    }
}
