//! Logging infrastructure.
//!
//! Tracing is initialized once in the binary; everything else logs through
//! the `tracing` macros. [`JobLogger`] stamps `job_id` and `phase` onto
//! every event so a single job's run can be followed across phases.

use std::io::IsTerminal;
use tracing::{Level, event};
use tracing_subscriber::{
    EnvFilter,
    fmt::{self},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

/// Check if colored output should be used.
fn use_color() -> bool {
    std::io::stdout().is_terminal() && std::env::var_os("NO_COLOR").is_none()
}

/// Initialize the tracing subscriber.
///
/// `verbose` lowers the default filter to debug for talkdub crates; the
/// `RUST_LOG` environment variable always wins when set.
pub fn init_tracing(verbose: bool) -> Result<(), Box<dyn std::error::Error>> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| {
            if verbose {
                EnvFilter::try_new("talkdub=debug,info")
            } else {
                EnvFilter::try_new("talkdub=info,warn")
            }
        })
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_target(verbose)
                .with_thread_ids(false)
                .with_thread_names(false)
                .with_line_number(false)
                .with_file(false)
                .with_ansi(use_color())
                .compact(),
        )
        .try_init()?;

    Ok(())
}

/// Structured per-job logger.
///
/// Carries the job id and phase name so call sites don't repeat them, and
/// provides a `progress` event with current/total/percent fields.
#[derive(Debug, Clone)]
pub struct JobLogger {
    job_id: String,
    phase: String,
}

impl JobLogger {
    #[must_use]
    pub fn new(job_id: impl Into<String>, phase: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            phase: phase.into(),
        }
    }

    pub fn info(&self, message: &str) {
        event!(Level::INFO, job_id = %self.job_id, phase = %self.phase, "{message}");
    }

    pub fn warn(&self, message: &str) {
        event!(Level::WARN, job_id = %self.job_id, phase = %self.phase, "{message}");
    }

    pub fn error(&self, message: &str) {
        event!(Level::ERROR, job_id = %self.job_id, phase = %self.phase, "{message}");
    }

    pub fn debug(&self, message: &str) {
        event!(Level::DEBUG, job_id = %self.job_id, phase = %self.phase, "{message}");
    }

    /// Emit a progress event.
    pub fn progress(&self, current: usize, total: usize, message: &str) {
        let percent = if total > 0 {
            (current as f64 / total as f64 * 1000.0).round() / 10.0
        } else {
            0.0
        };
        event!(
            Level::INFO,
            job_id = %self.job_id,
            phase = %self.phase,
            progress_current = current,
            progress_total = total,
            progress_percent = percent,
            "{message}"
        );
    }
}
