//! Normalize phase: loudness-normalize and resample to the pipeline
//! format. Deletes its input afterwards to bound scratch-disk use.

use async_trait::async_trait;
use std::time::Duration;

use talkdub_job::JobRecord;
use talkdub_phase_api::{Phase, PhaseContext, PhaseOutput};
use talkdub_utils::error::PhaseError;
use talkdub_utils::types::PhaseId;

use crate::media;
use crate::phases::exec_err;

const TIMEOUT: Duration = Duration::from_secs(1800);

pub struct NormalizePhase;

#[async_trait]
impl Phase for NormalizePhase {
    fn name(&self) -> &'static str {
        "Normalize"
    }

    fn id(&self) -> PhaseId {
        PhaseId::Normalize
    }

    fn timeout(&self, _record: &JobRecord) -> Duration {
        TIMEOUT
    }

    async fn execute(&self, ctx: &PhaseContext) -> Result<PhaseOutput, PhaseError> {
        let logger = ctx.logger(self.id());
        let input = ctx.scratch_dir().join("original.wav");
        let output = ctx.scratch_dir().join("normalized.wav");

        media::normalize_audio(&ctx.config.engines, &input, &output, TIMEOUT)
            .await
            .map_err(|e| exec_err(self.id(), e))?;

        if !output.exists() {
            return Err(PhaseError::OutputInvalid {
                phase: self.id().as_str().to_string(),
                message: "normalized.wav was not produced".to_string(),
            });
        }

        // Inputs are deleted once outputs are persisted.
        if std::fs::remove_file(input.as_std_path()).is_ok() {
            logger.debug("deleted original.wav to save disk space");
        }

        Ok(PhaseOutput::new().with_file("normalized", output))
    }
}
