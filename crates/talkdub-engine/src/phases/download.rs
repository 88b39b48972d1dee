//! Download phase: fetch the source video's audio track.

use async_trait::async_trait;
use serde_json::json;
use std::time::Duration;

use talkdub_job::JobRecord;
use talkdub_phase_api::{Phase, PhaseContext, PhaseOutput};
use talkdub_utils::error::PhaseError;
use talkdub_utils::process::{CommandSpec, run_checked};
use talkdub_utils::types::PhaseId;

use crate::media;
use crate::phases::{exec_err, load_record};

const TIMEOUT: Duration = Duration::from_secs(1800);

/// Downloaded audio below this size is treated as a failed fetch.
const MIN_AUDIO_BYTES: u64 = 1024 * 1024;

pub struct DownloadPhase;

#[async_trait]
impl Phase for DownloadPhase {
    fn name(&self) -> &'static str {
        "Download"
    }

    fn id(&self) -> PhaseId {
        PhaseId::Download
    }

    fn timeout(&self, _record: &JobRecord) -> Duration {
        TIMEOUT
    }

    async fn execute(&self, ctx: &PhaseContext) -> Result<PhaseOutput, PhaseError> {
        let record = load_record(ctx, self.id())?;
        let logger = ctx.logger(self.id());
        let output_path = ctx.scratch_dir().join("original.wav");

        let spec = CommandSpec::new(&ctx.config.engines.ytdlp, TIMEOUT).args([
            "--extract-audio",
            "--audio-format",
            "wav",
            "--audio-quality",
            "0",
            "--output",
            ctx.scratch_dir().join("original.%(ext)s").as_str(),
            "--no-playlist",
            "--no-warnings",
            record.source.url.as_str(),
        ]);

        run_checked(&spec)
            .await
            .map_err(|e| exec_err(self.id(), e))?;

        let size = std::fs::metadata(output_path.as_std_path())
            .map(|m| m.len())
            .unwrap_or(0);
        if size < MIN_AUDIO_BYTES {
            return Err(PhaseError::OutputInvalid {
                phase: self.id().as_str().to_string(),
                message: format!("downloaded audio is too small ({size} bytes)"),
            });
        }

        let duration = media::probe_duration(&ctx.config.engines, &output_path)
            .await
            .map_err(|e| exec_err(self.id(), e))?;

        logger.info(&format!("downloaded {size} bytes, {duration:.1}s of audio"));

        Ok(PhaseOutput::new()
            .with_file("original", output_path)
            .with_metadata("media", json!({"duration_sec": duration})))
    }
}
