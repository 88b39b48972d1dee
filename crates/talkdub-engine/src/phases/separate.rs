//! Separate phase: split voice from background music with the external
//! source separator.
//!
//! Contract: `{separator} --two-stems=vocals --device cpu --out <dir>
//! <input>` writes `<dir>/htdemucs/<stem-name>/vocals.wav` and
//! `no_vocals.wav`. The stems are moved to `pre_voice.wav` /
//! `pre_bgm.wav` and the model output tree is removed.

use async_trait::async_trait;
use std::time::Duration;

use talkdub_job::JobRecord;
use talkdub_phase_api::{Phase, PhaseContext, PhaseOutput};
use talkdub_utils::error::PhaseError;
use talkdub_utils::process::{CommandSpec, run_checked};
use talkdub_utils::types::PhaseId;

use crate::phases::exec_err;

const TIMEOUT: Duration = Duration::from_secs(7200);

pub struct SeparatePhase;

#[async_trait]
impl Phase for SeparatePhase {
    fn name(&self) -> &'static str {
        "Separate"
    }

    fn id(&self) -> PhaseId {
        PhaseId::Separate
    }

    fn timeout(&self, _record: &JobRecord) -> Duration {
        TIMEOUT
    }

    async fn execute(&self, ctx: &PhaseContext) -> Result<PhaseOutput, PhaseError> {
        let logger = ctx.logger(self.id());
        let input = ctx.scratch_dir().join("normalized.wav");
        let model_out = ctx.scratch_dir().join("separator_output");
        std::fs::create_dir_all(model_out.as_std_path())
            .map_err(|e| exec_err(self.id(), e))?;

        logger.info("starting source separation (CPU mode, this takes a while)");

        let spec = CommandSpec::new(&ctx.config.engines.separator, TIMEOUT).args([
            "--two-stems=vocals",
            "--device",
            "cpu",
            "--out",
            model_out.as_str(),
            input.as_str(),
        ]);
        run_checked(&spec)
            .await
            .map_err(|e| exec_err(self.id(), e))?;

        let stem_dir = model_out.join("htdemucs").join("normalized");
        let vocals_src = stem_dir.join("vocals.wav");
        let bgm_src = stem_dir.join("no_vocals.wav");

        if !vocals_src.exists() {
            return Err(PhaseError::OutputInvalid {
                phase: self.id().as_str().to_string(),
                message: "separator did not produce vocals.wav".to_string(),
            });
        }

        let pre_voice = ctx.scratch_dir().join("pre_voice.wav");
        let pre_bgm = ctx.scratch_dir().join("pre_bgm.wav");

        std::fs::rename(vocals_src.as_std_path(), pre_voice.as_std_path())
            .map_err(|e| exec_err(self.id(), e))?;
        let mut output = PhaseOutput::new().with_file("pre_voice", pre_voice);

        if bgm_src.exists() {
            std::fs::rename(bgm_src.as_std_path(), pre_bgm.as_std_path())
                .map_err(|e| exec_err(self.id(), e))?;
            output = output.with_file("pre_bgm", pre_bgm);
        }

        let _ = std::fs::remove_dir_all(model_out.as_std_path());
        let _ = std::fs::remove_file(input.as_std_path());

        logger.info("source separation completed");
        Ok(output)
    }
}
