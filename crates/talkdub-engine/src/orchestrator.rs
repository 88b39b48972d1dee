//! The pipeline orchestrator: run a job's phases strictly in order.
//!
//! Before each phase the job is marked PROCESSING with that phase name;
//! each phase runs through the shared runner; a failure stops the pipeline
//! when `stop_on_error` is set. The orchestrator records per-phase results
//! and a summary — terminal status transitions belong to the worker.

use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

use talkdub_phase_api::{Phase, PhaseContext, PhaseResult, PhaseRunner};
use talkdub_utils::types::JobStatus;

/// Aggregate result of one pipeline run.
#[derive(Debug, Clone)]
pub struct PipelineSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub total_duration: Duration,
    pub success_rate: f64,
    pub results: Vec<PhaseResult>,
}

impl PipelineSummary {
    #[must_use]
    pub fn all_succeeded(&self) -> bool {
        self.failed == 0 && self.succeeded == self.total
    }

    /// The first failure's user-facing message, if any phase failed.
    #[must_use]
    pub fn first_failure(&self) -> Option<&PhaseResult> {
        self.results.iter().find(|r| !r.success)
    }
}

/// Executes a declared ordered list of phases for a single job.
pub struct Orchestrator {
    runner: PhaseRunner,
    stop_on_error: bool,
}

impl Orchestrator {
    #[must_use]
    pub fn new(runner: PhaseRunner, stop_on_error: bool) -> Self {
        Self {
            runner,
            stop_on_error,
        }
    }

    /// Run all phases for the job in `ctx`.
    pub async fn run(&self, ctx: &PhaseContext, phases: &[Arc<dyn Phase>]) -> PipelineSummary {
        let mut results = Vec::with_capacity(phases.len());

        for phase in phases {
            if let Err(e) = ctx.store.update_status(
                &ctx.job_id,
                JobStatus::Processing,
                Some(phase.id()),
                None,
            ) {
                error!(job_id = %ctx.job_id, phase = %phase.id(), error = %e,
                    "failed to mark job processing");
            }

            info!(job_id = %ctx.job_id, phase = %phase.id(), "executing phase");
            let result = self.runner.run(phase.as_ref(), ctx).await;
            let failed = !result.success;
            results.push(result);

            if failed && self.stop_on_error {
                error!(job_id = %ctx.job_id, phase = %phase.id(),
                    "pipeline stopped on phase failure");
                break;
            }
        }

        summarize(results)
    }
}

fn summarize(results: Vec<PhaseResult>) -> PipelineSummary {
    let total = results.len();
    let succeeded = results.iter().filter(|r| r.success).count();
    let total_duration = results.iter().map(|r| r.duration).sum();
    PipelineSummary {
        total,
        succeeded,
        failed: total - succeeded,
        total_duration,
        success_rate: if total > 0 {
            succeeded as f64 / total as f64
        } else {
            0.0
        },
        results,
    }
}
