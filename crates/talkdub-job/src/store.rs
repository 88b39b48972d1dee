//! Durable job store: one JSON document per job, atomically replaced.
//!
//! Writers are single-threaded per job by construction (the worker owns the
//! job while PROCESSING); the one cross-process mutation, the download
//! counter, takes an advisory file lock so no increment is lost.

use camino::Utf8PathBuf;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::fs;
use std::time::{Duration, SystemTime};
use tracing::{debug, warn};

use talkdub_utils::atomic_write::write_json_atomic;
use talkdub_utils::error::JobStoreError;
use talkdub_utils::paths::DataLayout;
use talkdub_utils::types::{JobStatus, PhaseId};

use crate::merge::deep_merge_one_level;
use crate::record::JobRecord;

/// The durable key/value mapping from job identifier to job record.
#[derive(Debug, Clone)]
pub struct JobStore {
    layout: DataLayout,
}

impl JobStore {
    #[must_use]
    pub fn new(layout: DataLayout) -> Self {
        Self { layout }
    }

    #[must_use]
    pub fn layout(&self) -> &DataLayout {
        &self.layout
    }

    /// Whether a record exists for `job_id`.
    #[must_use]
    pub fn exists(&self, job_id: &str) -> bool {
        self.layout.job_record_path(job_id).exists()
    }

    /// Load a job record.
    ///
    /// A missing file is `NotFound`; an unreadable or unparsable file is
    /// `Corrupted` and is never mutated.
    pub fn load(&self, job_id: &str) -> Result<JobRecord, JobStoreError> {
        let path = self.layout.job_record_path(job_id);
        if !path.exists() {
            return Err(JobStoreError::NotFound {
                job_id: job_id.to_string(),
            });
        }

        let raw = fs::read_to_string(&path).map_err(|source| JobStoreError::Io {
            job_id: job_id.to_string(),
            source,
        })?;

        serde_json::from_str(&raw).map_err(|e| JobStoreError::Corrupted {
            job_id: job_id.to_string(),
            reason: e.to_string(),
        })
    }

    /// Persist a record via temp file + rename. Readers never observe a
    /// partially written document.
    pub fn save(&self, record: &JobRecord) -> Result<(), JobStoreError> {
        let path = self.layout.job_record_path(&record.job_id);
        write_json_atomic(&path, record).map_err(|e| JobStoreError::PersistFailed {
            job_id: record.job_id.clone(),
            reason: e.to_string(),
        })?;
        debug!(job_id = %record.job_id, status = %record.status, "job record saved");
        Ok(())
    }

    /// Update status (and optionally phase / error) with transition
    /// checking.
    pub fn update_status(
        &self,
        job_id: &str,
        status: JobStatus,
        current_phase: Option<PhaseId>,
        error: Option<String>,
    ) -> Result<JobRecord, JobStoreError> {
        let mut record = self.load(job_id)?;

        if !record.status.can_transition_to(status) {
            return Err(JobStoreError::InvalidTransition {
                job_id: job_id.to_string(),
                from: record.status,
                to: status,
            });
        }

        record.status = status;
        record.current_phase = current_phase;
        // error is non-null only while FAILED
        record.error = if status == JobStatus::Failed {
            error.or_else(|| record.error.take())
        } else {
            None
        };
        self.save(&record)?;
        Ok(record)
    }

    /// Merge phase metadata into the record one level deep and persist.
    ///
    /// The merged document is re-validated against the typed schema before
    /// it replaces the stored record, so a buggy phase cannot corrupt it.
    pub fn apply_metadata(
        &self,
        job_id: &str,
        metadata: serde_json::Map<String, Value>,
    ) -> Result<JobRecord, JobStoreError> {
        if metadata.is_empty() {
            return self.load(job_id);
        }

        let record = self.load(job_id)?;
        let mut doc = serde_json::to_value(&record).map_err(|e| JobStoreError::PersistFailed {
            job_id: job_id.to_string(),
            reason: e.to_string(),
        })?;

        deep_merge_one_level(&mut doc, Value::Object(metadata));

        let merged: JobRecord =
            serde_json::from_value(doc).map_err(|e| JobStoreError::PersistFailed {
                job_id: job_id.to_string(),
                reason: format!("merged record failed schema validation: {e}"),
            })?;

        self.save(&merged)?;
        Ok(merged)
    }

    /// Atomically increment the download counter, enforcing `max`.
    ///
    /// The read-modify-write runs under an advisory file lock so two
    /// concurrent deliveries cannot lose an increment or both pass the cap.
    pub fn increment_download_count(
        &self,
        job_id: &str,
        max: u32,
    ) -> Result<u32, JobStoreError> {
        let lock_path = self.layout.jobs_dir().join(format!("{job_id}.lock"));
        let lock_file = fs::OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(lock_path.as_std_path())
            .map_err(|source| JobStoreError::Io {
                job_id: job_id.to_string(),
                source,
            })?;

        let mut lock = fd_lock::RwLock::new(lock_file);
        let _guard = lock.write().map_err(|source| JobStoreError::Io {
            job_id: job_id.to_string(),
            source,
        })?;

        let mut record = self.load(job_id)?;
        if record.download_count >= max {
            return Err(JobStoreError::DownloadLimitReached {
                job_id: job_id.to_string(),
                count: record.download_count,
                max,
            });
        }
        record.download_count += 1;
        self.save(&record)?;
        Ok(record.download_count)
    }

    /// Delete a job and its directories. The log directory is kept when
    /// `keep_logs` is set, which is the default for failed jobs.
    pub fn delete(&self, job_id: &str, keep_logs: bool) -> Result<(), JobStoreError> {
        let record_path = self.layout.job_record_path(job_id);
        if record_path.exists() {
            fs::remove_file(&record_path).map_err(|source| JobStoreError::Io {
                job_id: job_id.to_string(),
                source,
            })?;
        }
        let lock_path = self.layout.jobs_dir().join(format!("{job_id}.lock"));
        let _ = fs::remove_file(lock_path.as_std_path());

        for dir in [
            self.layout.ref_audio_dir(job_id),
            self.layout.output_dir(job_id),
            self.layout.scratch_dir(job_id),
        ] {
            remove_dir_if_present(&dir, job_id)?;
        }

        if !keep_logs {
            remove_dir_if_present(&self.layout.logs_dir().join(job_id), job_id)?;
        }

        debug!(job_id, keep_logs, "job deleted");
        Ok(())
    }

    /// List job ids whose delivery window has passed.
    ///
    /// Records that fail to parse are skipped with a warning; a corrupted
    /// record must never be garbage-collected automatically.
    #[must_use]
    pub fn list_expired(&self, now: DateTime<Utc>) -> Vec<String> {
        let mut expired = Vec::new();
        let Ok(entries) = fs::read_dir(self.layout.jobs_dir().as_std_path()) else {
            return expired;
        };

        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Ok(raw) = fs::read_to_string(&path) else {
                continue;
            };
            match serde_json::from_str::<JobRecord>(&raw) {
                Ok(record) if record.is_expired(now) => expired.push(record.job_id),
                Ok(_) => {}
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "skipping unparsable job record");
                }
            }
        }
        expired
    }

    /// All job ids with a record on disk.
    #[must_use]
    pub fn list_ids(&self) -> Vec<String> {
        let Ok(entries) = fs::read_dir(self.layout.jobs_dir().as_std_path()) else {
            return Vec::new();
        };
        entries
            .flatten()
            .filter_map(|entry| {
                let path = entry.path();
                if path.extension().and_then(|e| e.to_str()) == Some("json") {
                    path.file_stem()
                        .and_then(|s| s.to_str())
                        .map(str::to_string)
                } else {
                    None
                }
            })
            .collect()
    }

    /// Find a job for `video_id` created within `window` of `now`
    /// (duplicate-submission suppression). Unparsable records are skipped.
    #[must_use]
    pub fn find_recent_by_video_id(
        &self,
        video_id: &str,
        now: DateTime<Utc>,
        window: Duration,
    ) -> Option<String> {
        let cutoff = now - chrono::Duration::from_std(window).unwrap_or(chrono::Duration::hours(24));
        for job_id in self.list_ids() {
            let Ok(record) = self.load(&job_id) else {
                continue;
            };
            if record.source.video_id == video_id && record.created_at > cutoff {
                return Some(record.job_id);
            }
        }
        None
    }

    /// Remove scratch directories older than `retention`. Returns the
    /// number of directories removed.
    pub fn cleanup_temp_dirs(&self, retention: Duration) -> Result<usize, JobStoreError> {
        let cutoff = SystemTime::now() - retention;
        let mut removed = 0;

        let temp_root = self.layout.temp_root();
        let Ok(entries) = fs::read_dir(temp_root.as_std_path()) else {
            return Ok(0);
        };

        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            let Ok(meta) = entry.metadata() else { continue };
            let Ok(modified) = meta.modified() else {
                continue;
            };
            if modified < cutoff {
                if let Err(e) = fs::remove_dir_all(&path) {
                    warn!(path = %path.display(), error = %e, "failed to remove stale scratch dir");
                } else {
                    removed += 1;
                }
            }
        }
        Ok(removed)
    }
}

fn remove_dir_if_present(dir: &Utf8PathBuf, job_id: &str) -> Result<(), JobStoreError> {
    if dir.exists() {
        fs::remove_dir_all(dir.as_std_path()).map_err(|source| JobStoreError::Io {
            job_id: job_id.to_string(),
            source,
        })?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{Languages, PipelineParams, Source};
    use talkdub_utils::types::Language;
    use tempfile::TempDir;

    fn test_store() -> (TempDir, JobStore) {
        let dir = TempDir::new().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().join("data")).unwrap();
        let layout = DataLayout::new(root);
        layout.ensure_dirs().unwrap();
        (dir, JobStore::new(layout))
    }

    fn sample_record() -> JobRecord {
        JobRecord::new_queued(
            Source {
                platform: "youtube".into(),
                video_id: "abc12345678".into(),
                url: "https://youtu.be/abc12345678".into(),
            },
            Languages {
                src_lang: Language::Ja,
                tgt_lang: Language::En,
            },
            "user@example.com",
            PipelineParams {
                max_atempo: 1.3,
                max_overlap_sec: 2.0,
                max_overlap_ratio: 0.25,
                overlap_duck_db: -6.0,
                hallucination_policy: "silence".into(),
                timeline_reference: "ffprobe".into(),
            },
        )
    }

    #[test]
    fn test_save_load_round_trip() {
        let (_dir, store) = test_store();
        let record = sample_record();

        store.save(&record).unwrap();
        assert!(store.exists(&record.job_id));

        let loaded = store.load(&record.job_id).unwrap();
        assert_eq!(loaded, record);
    }

    #[test]
    fn test_load_missing_is_not_found() {
        let (_dir, store) = test_store();
        let err = store.load("nope").unwrap_err();
        assert!(matches!(err, JobStoreError::NotFound { .. }));
    }

    #[test]
    fn test_load_corrupted_is_distinct_from_not_found() {
        let (_dir, store) = test_store();
        let path = store.layout.job_record_path("broken");
        fs::write(path.as_std_path(), b"{not json").unwrap();

        let err = store.load("broken").unwrap_err();
        assert!(matches!(err, JobStoreError::Corrupted { .. }));
    }

    #[test]
    fn test_update_status_enforces_transitions() {
        let (_dir, store) = test_store();
        let record = sample_record();
        store.save(&record).unwrap();

        store
            .update_status(
                &record.job_id,
                JobStatus::Processing,
                Some(PhaseId::Download),
                None,
            )
            .unwrap();
        store
            .update_status(&record.job_id, JobStatus::Completed, None, None)
            .unwrap();

        let err = store
            .update_status(&record.job_id, JobStatus::Processing, None, None)
            .unwrap_err();
        assert!(matches!(err, JobStoreError::InvalidTransition { .. }));
    }

    #[test]
    fn test_apply_metadata_merges_one_level() {
        let (_dir, store) = test_store();
        let record = sample_record();
        store.save(&record).unwrap();

        let mut metadata = serde_json::Map::new();
        metadata.insert(
            "media".to_string(),
            serde_json::json!({"duration_sec": 321.5}),
        );
        let merged = store.apply_metadata(&record.job_id, metadata).unwrap();

        assert_eq!(merged.media.duration_sec, Some(321.5));
        // Sibling key untouched by the merge.
        assert_eq!(merged.media.audio_format.sample_rate_hz, 16_000);
    }

    #[test]
    fn test_apply_metadata_rejects_schema_violations() {
        let (_dir, store) = test_store();
        let record = sample_record();
        store.save(&record).unwrap();

        let mut metadata = serde_json::Map::new();
        metadata.insert("status".to_string(), serde_json::json!("NOT_A_STATUS"));
        let err = store.apply_metadata(&record.job_id, metadata).unwrap_err();
        assert!(matches!(err, JobStoreError::PersistFailed { .. }));

        // Original record is untouched.
        let loaded = store.load(&record.job_id).unwrap();
        assert_eq!(loaded.status, JobStatus::Queued);
    }

    #[test]
    fn test_increment_download_count_enforces_cap() {
        let (_dir, store) = test_store();
        let record = sample_record();
        store.save(&record).unwrap();

        for expected in 1..=3 {
            let count = store.increment_download_count(&record.job_id, 3).unwrap();
            assert_eq!(count, expected);
        }

        let err = store
            .increment_download_count(&record.job_id, 3)
            .unwrap_err();
        assert!(matches!(err, JobStoreError::DownloadLimitReached { .. }));
    }

    #[test]
    fn test_concurrent_increments_lose_nothing() {
        let (_dir, store) = test_store();
        let record = sample_record();
        store.save(&record).unwrap();

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let store = store.clone();
                let job_id = record.job_id.clone();
                std::thread::spawn(move || store.increment_download_count(&job_id, 100).unwrap())
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let loaded = store.load(&record.job_id).unwrap();
        assert_eq!(loaded.download_count, 4);
    }

    #[test]
    fn test_delete_removes_dirs_but_keeps_logs() {
        let (_dir, store) = test_store();
        let record = sample_record();
        store.save(&record).unwrap();

        let scratch = store.layout.scratch_dir(&record.job_id);
        let logs = store.layout.logs_dir().join(&record.job_id);
        fs::create_dir_all(scratch.as_std_path()).unwrap();
        fs::create_dir_all(logs.as_std_path()).unwrap();

        store.delete(&record.job_id, true).unwrap();

        assert!(!store.exists(&record.job_id));
        assert!(!scratch.exists());
        assert!(logs.exists());
    }

    #[test]
    fn test_list_expired() {
        let (_dir, store) = test_store();

        let mut expired = sample_record();
        expired.expires_at = Some(Utc::now() - chrono::Duration::hours(2));
        store.save(&expired).unwrap();

        let mut live = sample_record();
        live.expires_at = Some(Utc::now() + chrono::Duration::hours(2));
        store.save(&live).unwrap();

        let no_expiry = sample_record();
        store.save(&no_expiry).unwrap();

        let ids = store.list_expired(Utc::now());
        assert_eq!(ids, vec![expired.job_id]);
    }

    #[test]
    fn test_snapshots_always_parse_while_writing() {
        // A reader loading concurrently with a writer must always get a
        // complete document (atomic replace), never a parse error.
        let (_dir, store) = test_store();
        let mut record = sample_record();
        record.segments = (0..200)
            .map(|i| crate::record::Segment {
                seg_id: crate::record::Segment::make_id(i),
                start: i as f64,
                end: i as f64 + 1.0,
                src_text: "x".repeat(200),
                tgt_text: None,
                speaker_id: "SPEAKER_00".into(),
                flags: Default::default(),
                whisper: Default::default(),
                vad_speech_ratio: None,
                translation: Default::default(),
                tts: Default::default(),
                timing: Default::default(),
            })
            .collect();
        store.save(&record).unwrap();

        let writer = {
            let store = store.clone();
            let record = record.clone();
            std::thread::spawn(move || {
                for _ in 0..50 {
                    store.save(&record).unwrap();
                }
            })
        };

        for _ in 0..50 {
            // Every snapshot parses.
            let _ = store.load(&record.job_id).unwrap();
        }
        writer.join().unwrap();
    }
}
