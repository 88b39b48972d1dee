//! Phase trait system for the dubbing pipeline.
//!
//! This crate is the shared contract between the orchestrator and phase
//! implementations: the [`Phase`] trait, the result types, the static
//! dependency [`registry`], and the shared [`runner`] that layers
//! precondition checking, timeouts, bounded retry with exponential backoff,
//! metadata merging, and user-facing error translation around every phase.

pub mod registry;
pub mod runner;

use async_trait::async_trait;
use camino::Utf8PathBuf;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use talkdub_config::Config;
use talkdub_job::{JobRecord, JobStore};
use talkdub_utils::error::PhaseError;
use talkdub_utils::logging::JobLogger;
use talkdub_utils::types::PhaseId;

pub use runner::PhaseRunner;

/// Context handed to phases during execution.
///
/// Collaborators are explicit: the store, the resolved configuration, and
/// the per-job directories derived from the data layout.
#[derive(Clone)]
pub struct PhaseContext {
    /// The job being processed.
    pub job_id: String,
    /// Durable job store; phases read their record and the runner merges
    /// their metadata back through it.
    pub store: JobStore,
    /// Effective configuration snapshot.
    pub config: Arc<Config>,
}

impl PhaseContext {
    #[must_use]
    pub fn new(job_id: impl Into<String>, store: JobStore, config: Arc<Config>) -> Self {
        Self {
            job_id: job_id.into(),
            store,
            config,
        }
    }

    /// Per-job scratch directory under `data/temp/`.
    #[must_use]
    pub fn scratch_dir(&self) -> Utf8PathBuf {
        self.store.layout().scratch_dir(&self.job_id)
    }

    /// Per-job reference-audio directory.
    #[must_use]
    pub fn ref_audio_dir(&self) -> Utf8PathBuf {
        self.store.layout().ref_audio_dir(&self.job_id)
    }

    /// Per-job output directory.
    #[must_use]
    pub fn output_dir(&self) -> Utf8PathBuf {
        self.store.layout().output_dir(&self.job_id)
    }

    /// Logger stamped with this job and the given phase.
    #[must_use]
    pub fn logger(&self, phase: PhaseId) -> JobLogger {
        JobLogger::new(&self.job_id, phase.as_str())
    }
}

/// What a successful phase execution hands back to the runner.
#[derive(Debug, Clone, Default)]
pub struct PhaseOutput {
    /// Artifacts produced, by logical name.
    pub output_files: BTreeMap<String, Utf8PathBuf>,
    /// Metadata merged into the job record one level deep.
    pub metadata: serde_json::Map<String, Value>,
}

impl PhaseOutput {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_file(mut self, name: impl Into<String>, path: Utf8PathBuf) -> Self {
        self.output_files.insert(name.into(), path);
        self
    }

    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

/// Result of running one phase through the shared runner.
#[derive(Debug, Clone)]
pub struct PhaseResult {
    pub phase: PhaseId,
    pub success: bool,
    pub output_files: BTreeMap<String, Utf8PathBuf>,
    /// Technical error after retries exhausted, if any.
    pub error: Option<String>,
    /// The same error translated for users.
    pub user_friendly_error: Option<String>,
    pub duration: Duration,
    /// How many attempts were made (1 on first-try success).
    pub attempts: u32,
}

impl PhaseResult {
    #[must_use]
    pub fn succeeded(phase: PhaseId, output: PhaseOutput, duration: Duration, attempts: u32) -> Self {
        Self {
            phase,
            success: true,
            output_files: output.output_files,
            error: None,
            user_friendly_error: None,
            duration,
            attempts,
        }
    }

    #[must_use]
    pub fn failed(
        phase: PhaseId,
        error: String,
        user_friendly_error: String,
        duration: Duration,
        attempts: u32,
    ) -> Self {
        Self {
            phase,
            success: false,
            output_files: BTreeMap::new(),
            error: Some(error),
            user_friendly_error: Some(user_friendly_error),
            duration,
            attempts,
        }
    }
}

/// Core trait every pipeline phase implements.
///
/// A phase supplies its identity, a timeout, and the execution body; the
/// shared runner owns everything around it (preconditions, retries,
/// persistence). Phases must be idempotent: after a crash the job is
/// re-entered at the failed phase or resubmitted.
#[async_trait]
pub trait Phase: Send + Sync {
    /// Human-readable name for logs.
    fn name(&self) -> &'static str;

    /// Stable phase identifier.
    fn id(&self) -> PhaseId;

    /// Wall-clock budget for a single execution attempt. Receives the
    /// current record because some phases scale their budget with the
    /// workload (chunk or segment counts).
    fn timeout(&self, record: &JobRecord) -> Duration;

    /// The phase body. Runs under the timeout; returns metadata for the
    /// runner to merge into the job record.
    async fn execute(&self, ctx: &PhaseContext) -> Result<PhaseOutput, PhaseError>;
}
