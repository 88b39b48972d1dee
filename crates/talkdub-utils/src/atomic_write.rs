//! Atomic file writes.
//!
//! Every persistent document talkdub owns (job records, manifests) is
//! written through here: temp file in the target directory, fsync, then an
//! atomic rename. Readers can race a writer freely and still only ever see
//! a complete document.

use anyhow::{Context, Result};
use camino::Utf8Path;
use serde::Serialize;
use std::fs;
use std::io::Write;

use tempfile::NamedTempFile;

/// Atomically write raw bytes to `path`.
///
/// Creates the parent directory if needed. The temporary file lives next to
/// the target so the final rename stays on one filesystem.
pub fn write_bytes_atomic(path: &Utf8Path, content: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create parent directory: {parent}"))?;
    }

    let temp_dir = path.parent().unwrap_or_else(|| Utf8Path::new("."));
    let mut temp_file = NamedTempFile::new_in(temp_dir)
        .with_context(|| format!("failed to create temporary file in: {temp_dir}"))?;

    temp_file
        .write_all(content)
        .context("failed to write content to temporary file")?;

    temp_file
        .as_file()
        .sync_all()
        .context("failed to fsync temporary file")?;

    temp_file
        .persist(path.as_std_path())
        .map_err(|e| anyhow::anyhow!(e.error))
        .with_context(|| format!("failed to atomically write file: {path}"))?;

    Ok(())
}

/// Atomically write a value as pretty-printed JSON.
pub fn write_json_atomic<T: Serialize>(path: &Utf8Path, value: &T) -> Result<()> {
    let json = serde_json::to_vec_pretty(value).context("failed to serialize value to JSON")?;
    write_bytes_atomic(path, &json)
}
