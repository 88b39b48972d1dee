//! Timeline phase: fit each synthesized segment onto the source timeline.
//!
//! A synthesized segment rarely matches its source slot exactly. The fit
//! order is: tempo-stretch up to `max_atempo`, then overlap into the
//! following gap bounded by `max_overlap_sec` and `max_overlap_ratio`,
//! and past that the segment is marked `shortened` and truncated at its
//! final end during mixing. Hallucinated segments are silenced when the
//! job's hallucination policy says so.

use async_trait::async_trait;
use serde_json::json;
use std::time::Duration;

use talkdub_job::record::SegmentTaskStatus;
use talkdub_job::{JobRecord, PipelineParams, Segment};
use talkdub_phase_api::{Phase, PhaseContext, PhaseOutput};
use talkdub_utils::error::PhaseError;
use talkdub_utils::types::PhaseId;

use crate::phases::load_record;

const TIMEOUT: Duration = Duration::from_secs(300);

pub struct TimelinePhase;

#[async_trait]
impl Phase for TimelinePhase {
    fn name(&self) -> &'static str {
        "Timeline"
    }

    fn id(&self) -> PhaseId {
        PhaseId::Timeline
    }

    fn timeout(&self, _record: &JobRecord) -> Duration {
        TIMEOUT
    }

    async fn execute(&self, ctx: &PhaseContext) -> Result<PhaseOutput, PhaseError> {
        let record = load_record(ctx, self.id())?;
        let logger = ctx.logger(self.id());

        let mut segments = record.segments;
        let stats = fit_timeline(&mut segments, &record.pipeline_params);

        logger.info(&format!(
            "timeline fitted: {} stretched, {} overlapped, {} shortened, {} silenced",
            stats.stretched, stats.overlapped, stats.shortened, stats.silenced
        ));

        Ok(PhaseOutput::new().with_metadata("segments", json!(segments)))
    }
}

#[derive(Debug, Default, PartialEq, Eq)]
struct FitStats {
    stretched: usize,
    overlapped: usize,
    shortened: usize,
    silenced: usize,
}

/// Place every synthesized segment; fills `timing` and the `shortened` /
/// `silenced` flags.
fn fit_timeline(segments: &mut [Segment], params: &PipelineParams) -> FitStats {
    let mut stats = FitStats::default();
    let silence_hallucinations = params.hallucination_policy == "silence";

    // Next segment's start bounds how far each segment may overlap.
    let next_starts: Vec<Option<f64>> = (0..segments.len())
        .map(|i| segments.get(i + 1).map(|n| n.start))
        .collect();

    for (i, seg) in segments.iter_mut().enumerate() {
        if seg.flags.suspected_hallucination {
            if silence_hallucinations {
                seg.flags.silenced = true;
                stats.silenced += 1;
            }
            continue;
        }
        if seg.tts.status != SegmentTaskStatus::Completed {
            continue;
        }
        let Some(tts_duration) = seg.timing.tts_duration else {
            continue;
        };

        let slot = seg.end - seg.start;
        seg.timing.final_start = Some(seg.start);

        if tts_duration <= slot {
            // Fits as-is.
            seg.timing.atempo_applied = Some(1.0);
            seg.timing.final_end = Some(seg.start + tts_duration);
            continue;
        }

        let required_atempo = tts_duration / slot;
        if required_atempo <= params.max_atempo {
            // Stretch exactly into the slot.
            seg.timing.atempo_applied = Some(required_atempo);
            seg.timing.final_end = Some(seg.end);
            stats.stretched += 1;
            continue;
        }

        // Maximum stretch still overflows; spill into the gap after the
        // slot, bounded by the overlap limits and the next segment.
        seg.timing.atempo_applied = Some(params.max_atempo);
        let effective = tts_duration / params.max_atempo;
        let overflow = effective - slot;

        let mut allowed = params
            .max_overlap_sec
            .min(slot * params.max_overlap_ratio);
        if let Some(next_start) = next_starts[i] {
            allowed = allowed.min((next_start - seg.end).max(0.0));
        }

        let overlap = overflow.min(allowed);
        seg.timing.overlap_applied = overlap;
        seg.timing.final_end = Some(seg.end + overlap);
        if overlap > 0.0 {
            stats.overlapped += 1;
        }

        if overflow > allowed {
            // Even the cap cannot fit it; the mix truncates at final_end.
            seg.flags.shortened = true;
            stats.shortened += 1;
        }
        stats.stretched += 1;
    }

    stats
}
