//! On-disk data layout.
//!
//! All persistent and scratch state lives under a single data root:
//!
//! ```text
//! data/jobs/{job_id}.json      job records
//! data/ref_audio/{job_id}/     per-speaker reference audio
//! data/output/{job_id}/        finalized artifacts
//! data/temp/{job_id}/          per-job scratch directory
//! data/logs/                   log files
//! ```

use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use std::fs;

/// Resolved data directory layout, constructed once from configuration and
/// threaded through the stores and phases.
#[derive(Debug, Clone)]
pub struct DataLayout {
    root: Utf8PathBuf,
}

impl DataLayout {
    #[must_use]
    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    #[must_use]
    pub fn jobs_dir(&self) -> Utf8PathBuf {
        self.root.join("jobs")
    }

    #[must_use]
    pub fn job_record_path(&self, job_id: &str) -> Utf8PathBuf {
        self.jobs_dir().join(format!("{job_id}.json"))
    }

    #[must_use]
    pub fn ref_audio_dir(&self, job_id: &str) -> Utf8PathBuf {
        self.root.join("ref_audio").join(job_id)
    }

    #[must_use]
    pub fn output_dir(&self, job_id: &str) -> Utf8PathBuf {
        self.root.join("output").join(job_id)
    }

    #[must_use]
    pub fn temp_root(&self) -> Utf8PathBuf {
        self.root.join("temp")
    }

    /// Per-job scratch directory; created on first phase, removed at
    /// finalization.
    #[must_use]
    pub fn scratch_dir(&self, job_id: &str) -> Utf8PathBuf {
        self.temp_root().join(job_id)
    }

    #[must_use]
    pub fn logs_dir(&self) -> Utf8PathBuf {
        self.root.join("logs")
    }

    /// Create the top-level directories. Called once at startup.
    pub fn ensure_dirs(&self) -> Result<()> {
        for dir in [
            self.jobs_dir(),
            self.root.join("ref_audio"),
            self.root.join("output"),
            self.temp_root(),
            self.logs_dir(),
        ] {
            fs::create_dir_all(&dir)
                .with_context(|| format!("failed to create data directory: {dir}"))?;
        }
        Ok(())
    }
}

/// Sanitize a user-influenced filename component.
///
/// Strips path separators and leading dots so a crafted name can neither
/// traverse directories nor hide the file.
#[must_use]
pub fn sanitize_filename(name: &str) -> String {
    let safe: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let trimmed = safe.trim_start_matches('.');
    trimmed.chars().take(255).collect()
}
