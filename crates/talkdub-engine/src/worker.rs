//! The job worker: a single-concurrency queue consumer.
//!
//! One job id at a time (prefetch 1), one pipeline run per job under a
//! 24-hour deadline. All durable state lives in the job store and the
//! keyed store; the worker itself is stateless across jobs, so crashing
//! mid-job costs at most that job.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use talkdub_config::Config;
use talkdub_job::JobStore;
use talkdub_kv::{JobQueue, PinStore};
use talkdub_phase_api::{Phase, PhaseContext, PhaseRunner};
use talkdub_utils::error::TalkDubError;
use talkdub_utils::types::JobStatus;

use crate::notify::Notifier;
use crate::orchestrator::{Orchestrator, PipelineSummary};

/// How long one queue poll blocks before the loop re-checks shutdown.
const POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Long-running consumer that drives jobs through the pipeline.
pub struct JobWorker {
    store: JobStore,
    queue: Arc<dyn JobQueue>,
    pin_store: PinStore,
    notifier: Arc<dyn Notifier>,
    phases: Vec<Arc<dyn Phase>>,
    config: Arc<Config>,
}

impl JobWorker {
    #[must_use]
    pub fn new(
        store: JobStore,
        queue: Arc<dyn JobQueue>,
        pin_store: PinStore,
        notifier: Arc<dyn Notifier>,
        phases: Vec<Arc<dyn Phase>>,
        config: Arc<Config>,
    ) -> Self {
        Self {
            store,
            queue,
            pin_store,
            notifier,
            phases,
            config,
        }
    }

    /// Consume jobs until `shutdown` resolves.
    pub async fn run_until(&self, shutdown: impl std::future::Future<Output = ()>) {
        tokio::pin!(shutdown);
        info!("job worker started");

        loop {
            tokio::select! {
                () = &mut shutdown => {
                    info!("job worker shutting down");
                    return;
                }
                popped = self.queue.pop(POLL_INTERVAL) => {
                    match popped {
                        Ok(Some(job_id)) => {
                            if let Err(e) = self.process_one(&job_id).await {
                                // The failure is already recorded on the job;
                                // the worker moves on.
                                error!(job_id, error = %e, "job processing errored");
                            }
                        }
                        Ok(None) => {}
                        Err(e) => {
                            warn!(error = %e, "queue pop failed; backing off");
                            tokio::time::sleep(POLL_INTERVAL).await;
                        }
                    }
                }
            }
        }
    }

    /// Run one job end to end, including its terminal transition and
    /// notification.
    pub async fn process_one(&self, job_id: &str) -> Result<PipelineSummary, TalkDubError> {
        info!(job_id, "starting job");
        let ctx = PhaseContext::new(job_id, self.store.clone(), Arc::clone(&self.config));

        let runner = PhaseRunner::new(
            self.config.phase.max_retries,
            self.config.phase.retry_delay_base,
        );
        let orchestrator = Orchestrator::new(runner, true);

        let summary = match tokio::time::timeout(
            self.config.phase.job_time_limit,
            orchestrator.run(&ctx, &self.phases),
        )
        .await
        {
            Ok(summary) => summary,
            Err(_elapsed) => {
                let message = "processing exceeded the 24-hour job time limit".to_string();
                self.mark_failed(job_id, &message).await?;
                return Err(TalkDubError::Io(std::io::Error::other(message)));
            }
        };

        info!(
            job_id,
            total = summary.total,
            succeeded = summary.succeeded,
            failed = summary.failed,
            duration_secs = summary.total_duration.as_secs(),
            "pipeline finished"
        );

        if summary.all_succeeded() {
            self.mark_completed(job_id).await?;
        } else {
            let message = summary
                .first_failure()
                .and_then(|r| r.user_friendly_error.clone())
                .unwrap_or_else(|| "processing failed".to_string());
            self.mark_failed(job_id, &message).await?;
        }

        Ok(summary)
    }

    async fn mark_completed(&self, job_id: &str) -> Result<(), TalkDubError> {
        let mut record = self.store.load(job_id)?;
        record.status = JobStatus::Completed;
        record.current_phase = None;
        record.error = None;
        record.expires_at = Some(
            Utc::now()
                + chrono::Duration::from_std(self.config.retention.delivery)
                    .unwrap_or_else(|_| chrono::Duration::hours(72)),
        );
        self.store.save(&record)?;

        let pin = self.pin_store.generate(job_id).await?;
        self.notifier.job_completed(&record, &pin).await;
        info!(job_id, "job completed");
        Ok(())
    }

    async fn mark_failed(&self, job_id: &str, message: &str) -> Result<(), TalkDubError> {
        let record = self.store.update_status(
            job_id,
            JobStatus::Failed,
            None,
            Some(message.to_string()),
        )?;
        self.notifier.job_failed(&record, message).await;
        error!(job_id, message, "job failed");
        Ok(())
    }
}
