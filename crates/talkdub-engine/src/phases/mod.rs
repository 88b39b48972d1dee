//! The thirteen pipeline phases.
//!
//! Each phase is a thin adapter: precondition declarations live in the
//! registry, retry/timeout/merge discipline in the shared runner, and the
//! heavy audio work in external engines driven through the subprocess
//! runner. What remains here is the glue and the algorithmic pieces
//! (scoring, flagging, timeline fitting).

pub mod asr;
pub mod download;
pub mod finalize;
pub mod hallucination;
pub mod manifest;
pub mod mix;
pub mod normalize;
pub mod ref_audio;
pub mod separate;
pub mod timeline;
pub mod translation;
pub mod tts;
pub mod vad;

use std::sync::Arc;

use talkdub_job::JobRecord;
use talkdub_phase_api::{Phase, PhaseContext};
use talkdub_translate::Translator;
use talkdub_utils::error::PhaseError;
use talkdub_utils::types::PhaseId;

/// Load the job record, wrapping store failures for the runner.
pub(crate) fn load_record(ctx: &PhaseContext, phase: PhaseId) -> Result<JobRecord, PhaseError> {
    ctx.store
        .load(&ctx.job_id)
        .map_err(|source| PhaseError::JobStore {
            phase: phase.as_str().to_string(),
            source,
        })
}

/// Wrap any displayable failure as this phase's execution error.
pub(crate) fn exec_err(phase: PhaseId, e: impl std::fmt::Display) -> PhaseError {
    PhaseError::ExecutionFailed {
        phase: phase.as_str().to_string(),
        message: e.to_string(),
    }
}

pub use asr::AsrPhase;
pub use download::DownloadPhase;
pub use finalize::FinalizePhase;
pub use hallucination::HallucinationPhase;
pub use manifest::ManifestPhase;
pub use mix::MixPhase;
pub use normalize::NormalizePhase;
pub use ref_audio::RefAudioPhase;
pub use separate::SeparatePhase;
pub use timeline::TimelinePhase;
pub use translation::TranslationPhase;
pub use tts::TtsPhase;
pub use vad::VadPhase;

/// The full pipeline in execution order.
#[must_use]
pub fn standard_phases(translator: Arc<Translator>) -> Vec<Arc<dyn Phase>> {
    vec![
        Arc::new(DownloadPhase),
        Arc::new(NormalizePhase),
        Arc::new(SeparatePhase),
        Arc::new(AsrPhase),
        Arc::new(VadPhase),
        Arc::new(RefAudioPhase),
        Arc::new(HallucinationPhase),
        Arc::new(TranslationPhase::new(Arc::clone(&translator))),
        Arc::new(TtsPhase),
        Arc::new(TimelinePhase),
        Arc::new(MixPhase),
        Arc::new(FinalizePhase),
        Arc::new(ManifestPhase),
    ]
}
