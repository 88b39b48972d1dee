//! Notification contract.
//!
//! Email/webhook delivery is an external collaborator; the worker only
//! depends on this narrow trait. The tracing-backed implementation ships
//! in-tree for deployments without a mailer and for tests.

use async_trait::async_trait;
use tracing::{error, info};

use talkdub_job::JobRecord;

/// User-notification sink for terminal job events.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// The job completed; `pin` unlocks the delivery.
    async fn job_completed(&self, record: &JobRecord, pin: &str);

    /// The job failed with a user-facing error message.
    async fn job_failed(&self, record: &JobRecord, error: &str);
}

/// Notifier that only logs. The PIN itself is never logged.
#[derive(Debug, Clone, Default)]
pub struct TracingNotifier;

#[async_trait]
impl Notifier for TracingNotifier {
    async fn job_completed(&self, record: &JobRecord, _pin: &str) {
        info!(
            job_id = %record.job_id,
            email = %record.user_email,
            expires_at = ?record.expires_at,
            "job completed; delivery notification would be sent"
        );
    }

    async fn job_failed(&self, record: &JobRecord, error: &str) {
        error!(
            job_id = %record.job_id,
            email = %record.user_email,
            error,
            "job failed; failure notification would be sent"
        );
    }
}
