//! Manifest phase: emit the processing manifest and the segment report
//! that ship with the delivery archive.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use std::time::Duration;

use talkdub_job::record::SegmentTaskStatus;
use talkdub_job::JobRecord;
use talkdub_phase_api::{Phase, PhaseContext, PhaseOutput};
use talkdub_utils::atomic_write::write_json_atomic;
use talkdub_utils::error::PhaseError;
use talkdub_utils::types::PhaseId;

use crate::phases::{exec_err, load_record};

const TIMEOUT: Duration = Duration::from_secs(120);

pub struct ManifestPhase;

#[async_trait]
impl Phase for ManifestPhase {
    fn name(&self) -> &'static str {
        "Manifest"
    }

    fn id(&self) -> PhaseId {
        PhaseId::Manifest
    }

    fn timeout(&self, _record: &JobRecord) -> Duration {
        TIMEOUT
    }

    async fn execute(&self, ctx: &PhaseContext) -> Result<PhaseOutput, PhaseError> {
        let record = load_record(ctx, self.id())?;
        let tgt = record.languages.tgt_lang;
        let output_dir = ctx.output_dir();

        let manifest_path = output_dir.join("manifest.json");
        let segments_path = output_dir.join(format!("segments_{tgt}.json"));

        write_json_atomic(&manifest_path, &build_manifest(&record))
            .map_err(|e| exec_err(self.id(), e))?;
        write_json_atomic(&segments_path, &record.segments)
            .map_err(|e| exec_err(self.id(), e))?;

        Ok(PhaseOutput::new()
            .with_file("manifest", manifest_path.clone())
            .with_file("segments_json", segments_path.clone())
            .with_metadata(
                "outputs",
                json!({
                    "manifest_json": manifest_path.as_str(),
                    "segments_json": segments_path.as_str(),
                }),
            ))
    }
}

/// Processing summary for the delivery archive.
fn build_manifest(record: &JobRecord) -> serde_json::Value {
    let total = record.segments.len();
    let translated = record
        .segments
        .iter()
        .filter(|s| s.translation.status == SegmentTaskStatus::Completed)
        .count();
    let synthesized = record
        .segments
        .iter()
        .filter(|s| s.tts.status == SegmentTaskStatus::Completed)
        .count();
    let hallucinations = record
        .segments
        .iter()
        .filter(|s| s.flags.suspected_hallucination)
        .count();
    let shortened = record
        .segments
        .iter()
        .filter(|s| s.flags.shortened)
        .count();

    json!({
        "schema_version": record.schema_version,
        "job_id": record.job_id,
        "generated_at": Utc::now(),
        "source": record.source,
        "languages": record.languages,
        "media": record.media,
        "pipeline_params": record.pipeline_params,
        "speakers": record.speakers.len(),
        "stats": {
            "total_segments": total,
            "translated_segments": translated,
            "synthesized_segments": synthesized,
            "flagged_hallucinations": hallucinations,
            "shortened_segments": shortened,
        },
    })
}
