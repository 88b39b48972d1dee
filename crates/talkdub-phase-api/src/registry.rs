//! Phase dependency registry.
//!
//! For each phase id: the scratch files it consumes, the job-record fields
//! it requires (dotted paths), the environment keys it needs, and an
//! estimated duration used only for ETA reporting. The runner checks this
//! table before launching heavy work so a missing prerequisite fails in
//! milliseconds, not hours.

use camino::Utf8Path;
use serde_json::Value;

use talkdub_config::{LLM_API_KEY_ENV, SPEECH_MODEL_TOKEN_ENV};
use talkdub_job::JobRecord;
use talkdub_utils::types::PhaseId;

/// Declared dependencies of one phase.
#[derive(Debug, Clone, Copy)]
pub struct PhaseSpec {
    pub id: PhaseId,
    /// Files that must exist in the job's scratch directory.
    pub required_files: &'static [&'static str],
    /// Dotted paths into the job record that must be present and
    /// non-empty (null and empty arrays count as missing).
    pub required_fields: &'static [&'static str],
    /// Environment variables that must be set and non-empty.
    pub required_env: &'static [&'static str],
    /// Rough duration for a 30-minute video, minutes. ETA reporting only.
    pub estimated_minutes: f64,
}

/// The full dependency table, in execution order.
pub const PHASE_SPECS: &[PhaseSpec] = &[
    PhaseSpec {
        id: PhaseId::Download,
        required_files: &[],
        required_fields: &["source.url"],
        required_env: &[],
        estimated_minutes: 5.0,
    },
    PhaseSpec {
        id: PhaseId::Normalize,
        required_files: &["original.wav"],
        required_fields: &["media.duration_sec"],
        required_env: &[],
        estimated_minutes: 10.0,
    },
    PhaseSpec {
        id: PhaseId::Separate,
        required_files: &["normalized.wav"],
        required_fields: &["media.duration_sec"],
        required_env: &[],
        estimated_minutes: 60.0,
    },
    PhaseSpec {
        id: PhaseId::Asr,
        required_files: &["pre_voice.wav"],
        required_fields: &["languages.src_lang"],
        required_env: &[SPEECH_MODEL_TOKEN_ENV],
        estimated_minutes: 120.0,
    },
    PhaseSpec {
        id: PhaseId::Vad,
        required_files: &["pre_voice.wav"],
        required_fields: &["segments"],
        required_env: &[],
        estimated_minutes: 15.0,
    },
    PhaseSpec {
        id: PhaseId::RefAudio,
        required_files: &["pre_voice.wav"],
        required_fields: &["segments", "speakers"],
        required_env: &[],
        estimated_minutes: 5.0,
    },
    PhaseSpec {
        id: PhaseId::Hallucination,
        required_files: &[],
        required_fields: &["segments", "languages.src_lang"],
        required_env: &[],
        estimated_minutes: 2.0,
    },
    PhaseSpec {
        id: PhaseId::Translation,
        required_files: &[],
        required_fields: &["segments", "languages.src_lang", "languages.tgt_lang"],
        required_env: &[LLM_API_KEY_ENV],
        estimated_minutes: 20.0,
    },
    PhaseSpec {
        id: PhaseId::Tts,
        required_files: &["pre_voice.wav"],
        required_fields: &["segments", "speakers", "languages.tgt_lang"],
        required_env: &[SPEECH_MODEL_TOKEN_ENV],
        estimated_minutes: 180.0,
    },
    PhaseSpec {
        id: PhaseId::Timeline,
        required_files: &[],
        required_fields: &["segments", "media.duration_sec"],
        required_env: &[],
        estimated_minutes: 5.0,
    },
    PhaseSpec {
        id: PhaseId::Mix,
        required_files: &[],
        required_fields: &["segments", "media.duration_sec"],
        required_env: &[],
        estimated_minutes: 15.0,
    },
    PhaseSpec {
        id: PhaseId::Finalize,
        required_files: &[],
        required_fields: &["segments"],
        required_env: &[],
        estimated_minutes: 2.0,
    },
    PhaseSpec {
        id: PhaseId::Manifest,
        required_files: &[],
        required_fields: &["outputs.dub_wav"],
        required_env: &[],
        estimated_minutes: 1.0,
    },
];

/// Look up the spec for a phase id.
#[must_use]
pub fn spec(id: PhaseId) -> &'static PhaseSpec {
    PHASE_SPECS
        .iter()
        .find(|s| s.id == id)
        .expect("every PhaseId has a registry entry")
}

/// Sum of estimated minutes for the phases from `from` onward.
#[must_use]
pub fn estimated_remaining_minutes(from: PhaseId) -> f64 {
    PHASE_SPECS
        .iter()
        .skip_while(|s| s.id != from)
        .map(|s| s.estimated_minutes)
        .sum()
}

/// Validate a phase's preconditions against the record, scratch directory,
/// and environment. Returns a message naming the missing prerequisite.
pub fn validate_preconditions(
    id: PhaseId,
    record: &JobRecord,
    scratch_dir: &Utf8Path,
) -> Result<(), String> {
    let spec = spec(id);

    for filename in spec.required_files {
        if !scratch_dir.join(filename).exists() {
            return Err(format!(
                "required file '{filename}' is missing (the previous phase may have failed)"
            ));
        }
    }

    let doc = serde_json::to_value(record).map_err(|e| format!("record not serializable: {e}"))?;
    for field_path in spec.required_fields {
        if !field_present(&doc, field_path) {
            return Err(format!(
                "required job record field '{field_path}' is missing"
            ));
        }
    }

    for env_key in spec.required_env {
        if std::env::var(env_key).map(|v| v.is_empty()).unwrap_or(true) {
            return Err(format!(
                "required environment variable '{env_key}' is not set"
            ));
        }
    }

    Ok(())
}

/// Dotted-path lookup; null and empty arrays count as missing, matching the
/// "field is populated" reading a phase actually depends on.
fn field_present(doc: &Value, dotted_path: &str) -> bool {
    let mut current = doc;
    for key in dotted_path.split('.') {
        match current.get(key) {
            Some(next) => current = next,
            None => return false,
        }
    }
    match current {
        Value::Null => false,
        Value::Array(items) => !items.is_empty(),
        _ => true,
    }
}
