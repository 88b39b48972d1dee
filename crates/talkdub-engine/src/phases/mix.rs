//! Mix phase: assemble the dubbed voice track and lay it over the
//! background bed.
//!
//! Builds one ffmpeg filter graph: every placed segment is tempo-adjusted,
//! trimmed to its final window, delayed to its final start, the voices are
//! mixed together, and the background stem (when the separator produced
//! one) is ducked underneath.

use async_trait::async_trait;
use camino::Utf8PathBuf;
use std::time::Duration;

use talkdub_job::record::SegmentTaskStatus;
use talkdub_job::{JobRecord, Segment};
use talkdub_phase_api::{Phase, PhaseContext, PhaseOutput};
use talkdub_utils::error::PhaseError;
use talkdub_utils::process::{CommandSpec, run_checked};
use talkdub_utils::types::PhaseId;

use crate::phases::{exec_err, load_record};

const TIMEOUT: Duration = Duration::from_secs(3600);

pub struct MixPhase;

#[async_trait]
impl Phase for MixPhase {
    fn name(&self) -> &'static str {
        "Mix"
    }

    fn id(&self) -> PhaseId {
        PhaseId::Mix
    }

    fn timeout(&self, _record: &JobRecord) -> Duration {
        TIMEOUT
    }

    async fn execute(&self, ctx: &PhaseContext) -> Result<PhaseOutput, PhaseError> {
        let record = load_record(ctx, self.id())?;
        let logger = ctx.logger(self.id());

        let placed: Vec<&Segment> = record
            .segments
            .iter()
            .filter(|s| is_mixable(s))
            .collect();

        if placed.is_empty() {
            return Err(PhaseError::ExecutionFailed {
                phase: self.id().as_str().to_string(),
                message: "no synthesized segments to mix".to_string(),
            });
        }

        let bgm = ctx.scratch_dir().join("pre_bgm.wav");
        let bgm_path = bgm.exists().then_some(bgm);
        let output = ctx.scratch_dir().join("dub_mixed.wav");

        let plan = build_mix_plan(
            &placed,
            bgm_path.as_deref(),
            record.pipeline_params.overlap_duck_db,
            record.media.duration_sec.unwrap_or(0.0),
            &output,
        );

        logger.info(&format!(
            "mixing {} segments{}",
            placed.len(),
            if bgm_path.is_some() {
                " over background bed"
            } else {
                ""
            }
        ));

        let spec = CommandSpec::new(&ctx.config.engines.ffmpeg, TIMEOUT).args(plan.args);
        run_checked(&spec)
            .await
            .map_err(|e| exec_err(self.id(), e))?;

        if !output.exists() {
            return Err(PhaseError::OutputInvalid {
                phase: self.id().as_str().to_string(),
                message: "mixed track was not produced".to_string(),
            });
        }

        Ok(PhaseOutput::new().with_file("dub_mixed", output))
    }
}

fn is_mixable(seg: &Segment) -> bool {
    seg.tts.status == SegmentTaskStatus::Completed
        && !seg.flags.silenced
        && seg.tts.wav_path.is_some()
        && seg.timing.final_start.is_some()
}

/// A fully-resolved ffmpeg invocation for the mix.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct MixPlan {
    pub args: Vec<String>,
    pub filter: String,
}

/// Build the ffmpeg arguments and filter graph.
pub(crate) fn build_mix_plan(
    segments: &[&Segment],
    bgm: Option<&camino::Utf8Path>,
    duck_db: f64,
    total_duration_sec: f64,
    output: &Utf8PathBuf,
) -> MixPlan {
    let mut args: Vec<String> = Vec::new();
    let mut filter = String::new();

    for seg in segments {
        args.push("-i".to_string());
        args.push(seg.tts.wav_path.clone().unwrap_or_default());
    }
    if let Some(bgm) = bgm {
        args.push("-i".to_string());
        args.push(bgm.to_string());
    }

    let mut voice_labels = Vec::new();
    for (i, seg) in segments.iter().enumerate() {
        let atempo = seg.timing.atempo_applied.unwrap_or(1.0);
        let final_start = seg.timing.final_start.unwrap_or(seg.start);
        let final_end = seg.timing.final_end.unwrap_or(seg.end);
        let window = (final_end - final_start).max(0.0);
        let delay_ms = (final_start * 1000.0).round() as u64;

        let mut chain = format!("[{i}:a]");
        if (atempo - 1.0).abs() > 1e-9 {
            chain.push_str(&format!("atempo={atempo:.4},"));
        }
        // Truncation point for segments the overlap cap could not fit.
        chain.push_str(&format!(
            "atrim=0:{window:.3},adelay={delay_ms}|{delay_ms}[v{i}]"
        ));
        filter.push_str(&chain);
        filter.push(';');
        voice_labels.push(format!("[v{i}]"));
    }

    filter.push_str(&voice_labels.concat());
    filter.push_str(&format!(
        "amix=inputs={}:duration=longest:normalize=0[voice]",
        voice_labels.len()
    ));

    let out_label = if bgm.is_some() {
        let bgm_index = segments.len();
        filter.push_str(&format!(
            ";[{bgm_index}:a]volume={duck_db}dB[bgm];[voice][bgm]amix=inputs=2:duration=first:normalize=0[out]"
        ));
        "[out]"
    } else {
        "[voice]"
    };

    args.push("-filter_complex".to_string());
    args.push(filter.clone());
    args.push("-map".to_string());
    args.push(out_label.to_string());
    if total_duration_sec > 0.0 {
        args.push("-t".to_string());
        args.push(format!("{total_duration_sec:.3}"));
    }
    args.push("-ar".to_string());
    args.push("16000".to_string());
    args.push("-ac".to_string());
    args.push("1".to_string());
    args.push("-y".to_string());
    args.push(output.to_string());

    MixPlan { args, filter }
}
