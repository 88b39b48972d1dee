//! Finalize phase: move artifacts into the output directory, record their
//! paths, and drop the scratch directory.

use async_trait::async_trait;
use serde_json::json;
use std::time::Duration;

use talkdub_job::JobRecord;
use talkdub_phase_api::{Phase, PhaseContext, PhaseOutput};
use talkdub_utils::error::PhaseError;
use talkdub_utils::types::PhaseId;

use crate::phases::{exec_err, load_record};

const TIMEOUT: Duration = Duration::from_secs(300);

pub struct FinalizePhase;

#[async_trait]
impl Phase for FinalizePhase {
    fn name(&self) -> &'static str {
        "Finalize"
    }

    fn id(&self) -> PhaseId {
        PhaseId::Finalize
    }

    fn timeout(&self, _record: &JobRecord) -> Duration {
        TIMEOUT
    }

    async fn execute(&self, ctx: &PhaseContext) -> Result<PhaseOutput, PhaseError> {
        let record = load_record(ctx, self.id())?;
        let logger = ctx.logger(self.id());
        let tgt = record.languages.tgt_lang;

        let mixed = ctx.scratch_dir().join("dub_mixed.wav");
        if !mixed.exists() {
            return Err(PhaseError::ExecutionFailed {
                phase: self.id().as_str().to_string(),
                message: "dub_mixed.wav is missing from the scratch directory".to_string(),
            });
        }

        let output_dir = ctx.output_dir();
        std::fs::create_dir_all(output_dir.as_std_path())
            .map_err(|e| exec_err(self.id(), e))?;

        let dub_wav = output_dir.join(format!("dub_{tgt}.wav"));
        std::fs::rename(mixed.as_std_path(), dub_wav.as_std_path())
            .or_else(|_| {
                // Rename fails across filesystems; fall back to copy.
                std::fs::copy(mixed.as_std_path(), dub_wav.as_std_path()).map(|_| ())
            })
            .map_err(|e| exec_err(self.id(), e))?;

        // Scratch is deleted once artifacts are finalized.
        let scratch = ctx.scratch_dir();
        if let Err(e) = std::fs::remove_dir_all(scratch.as_std_path()) {
            logger.warn(&format!("failed to remove scratch directory: {e}"));
        }

        logger.info(&format!("artifacts finalized under {output_dir}"));

        Ok(PhaseOutput::new()
            .with_file("dub_wav", dub_wav.clone())
            .with_metadata("outputs", json!({"dub_wav": dub_wav.as_str()})))
    }
}
