//! Scheduled cleanup sweeps.
//!
//! Three jobs, run from the CLI on a timer: expire deliveries whose window
//! passed (artifacts and PIN removed, the record kept and marked EXPIRED
//! so the status surface stays truthful), purge failed jobs past their
//! retention (logs kept), and drop stale scratch directories.

use chrono::Utc;
use std::time::Duration;
use tracing::{info, warn};

use talkdub_job::JobStore;
use talkdub_kv::PinStore;
use talkdub_utils::error::TalkDubError;
use talkdub_utils::types::JobStatus;

/// Counts of what a sweep removed.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub expired_jobs: usize,
    pub purged_failed_jobs: usize,
    pub removed_temp_dirs: usize,
    pub removed_pins: usize,
}

/// Run all sweeps once.
pub async fn sweep(
    store: &JobStore,
    pin_store: &PinStore,
    failed_retention: Duration,
    temp_retention: Duration,
) -> Result<SweepReport, TalkDubError> {
    let mut report = SweepReport::default();
    let now = Utc::now();

    // Deliveries past their window: remove artifacts and PIN, keep the
    // record as EXPIRED.
    for job_id in store.list_expired(now) {
        let Ok(record) = store.load(&job_id) else {
            continue;
        };
        if record.status == JobStatus::Expired {
            continue;
        }

        for dir in [
            store.layout().ref_audio_dir(&job_id),
            store.layout().output_dir(&job_id),
            store.layout().scratch_dir(&job_id),
        ] {
            if dir.exists() {
                if let Err(e) = std::fs::remove_dir_all(dir.as_std_path()) {
                    warn!(job_id, dir = %dir, error = %e, "failed to remove expired artifacts");
                }
            }
        }

        pin_store.delete(&job_id).await?;
        store.update_status(&job_id, JobStatus::Expired, None, None)?;
        report.expired_jobs += 1;
        info!(job_id, "delivery expired and artifacts removed");
    }

    // Failed jobs past retention are deleted wholesale; logs survive for
    // forensics.
    let failed_cutoff = now
        - chrono::Duration::from_std(failed_retention).unwrap_or_else(|_| chrono::Duration::days(7));
    for job_id in store.list_ids() {
        let Ok(record) = store.load(&job_id) else {
            continue;
        };
        if record.status == JobStatus::Failed && record.created_at < failed_cutoff {
            pin_store.delete(&job_id).await?;
            store.delete(&job_id, true)?;
            report.purged_failed_jobs += 1;
            info!(job_id, "failed job purged after retention");
        }
    }

    report.removed_temp_dirs = store.cleanup_temp_dirs(temp_retention)?;
    report.removed_pins = pin_store.cleanup_expired().await?;

    info!(
        expired = report.expired_jobs,
        purged_failed = report.purged_failed_jobs,
        temp_dirs = report.removed_temp_dirs,
        pins = report.removed_pins,
        "cleanup sweep finished"
    );
    Ok(report)
}
