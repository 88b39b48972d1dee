//! The delivery gate: the final checks before an artifact leaves the
//! system.
//!
//! Order matters and is part of the contract: existence, PIN, status,
//! expiry, download cap. Only after all five pass is the archive
//! assembled and the download counter incremented (atomically, so
//! concurrent deliveries neither lose an increment nor slip past the
//! cap).

use camino::Utf8PathBuf;
use chrono::{DateTime, Utc};
use std::fs;
use std::io::Write;
use tracing::info;
use zip::write::SimpleFileOptions;

use talkdub_job::{JobRecord, JobStore};
use talkdub_kv::{PinStore, VerifyOutcome};
use talkdub_utils::error::{DeliveryError, JobStoreError};
use talkdub_utils::types::JobStatus;

/// A release-ready delivery.
#[derive(Debug, Clone)]
pub struct DeliveryArtifact {
    /// The assembled zip on disk.
    pub archive_path: Utf8PathBuf,
    /// Suggested client-facing filename.
    pub filename: String,
    /// Download count after this delivery (X-Download-Count).
    pub download_count: u32,
    /// Delivery expiry (X-Expires-At).
    pub expires_at: Option<DateTime<Utc>>,
}

/// Validates PIN, status, expiry, and download budget, then assembles the
/// archive.
pub struct DeliveryGate {
    store: JobStore,
    pin_store: PinStore,
    max_downloads: u32,
}

impl DeliveryGate {
    #[must_use]
    pub fn new(store: JobStore, pin_store: PinStore, max_downloads: u32) -> Self {
        Self {
            store,
            pin_store,
            max_downloads,
        }
    }

    /// Run the full gate for `(job_id, pin_candidate)`.
    pub async fn release(
        &self,
        job_id: &str,
        pin_candidate: &str,
    ) -> Result<DeliveryArtifact, DeliveryError> {
        // 1. The job must exist.
        let record = match self.store.load(job_id) {
            Ok(record) => record,
            Err(JobStoreError::NotFound { .. }) => {
                return Err(DeliveryError::JobNotFound {
                    job_id: job_id.to_string(),
                });
            }
            Err(e) => return Err(DeliveryError::Internal(e.to_string())),
        };

        // 2. PIN.
        match self
            .pin_store
            .verify(job_id, pin_candidate)
            .await
            .map_err(|e| DeliveryError::Internal(e.to_string()))?
        {
            VerifyOutcome::Verified => {}
            VerifyOutcome::NotFound => return Err(DeliveryError::PinExpired),
            VerifyOutcome::Locked => return Err(DeliveryError::PinLocked),
            VerifyOutcome::Mismatch { remaining } => {
                return Err(DeliveryError::PinMismatch { remaining });
            }
        }

        // 3. Only completed jobs deliver.
        if record.status != JobStatus::Completed {
            return Err(DeliveryError::NotCompleted {
                status: record.status,
            });
        }

        // 4. Expiry.
        if record.is_expired(Utc::now()) {
            return Err(DeliveryError::Expired);
        }

        // 5. Download budget (pre-check; the increment re-checks under the
        // lock).
        if record.download_count >= self.max_downloads {
            return Err(DeliveryError::DownloadLimitReached {
                max: self.max_downloads,
            });
        }

        // 6. Assemble and count.
        let archive_path = self.build_archive(&record)?;

        let download_count = self
            .store
            .increment_download_count(job_id, self.max_downloads)
            .map_err(|e| match e {
                JobStoreError::DownloadLimitReached { max, .. } => {
                    DeliveryError::DownloadLimitReached { max }
                }
                other => DeliveryError::Internal(other.to_string()),
            })?;

        info!(job_id, download_count, "delivery released");

        Ok(DeliveryArtifact {
            archive_path,
            filename: format!("talkdub_{}.zip", record.languages.tgt_lang),
            download_count,
            expires_at: record.expires_at,
        })
    }

    /// Build the delivery zip: dubbed waveform, segment report, manifest,
    /// plus the generated upload guide and readme. Filenames are
    /// deterministic from the target language.
    fn build_archive(&self, record: &JobRecord) -> Result<Utf8PathBuf, DeliveryError> {
        let output_dir = self.store.layout().output_dir(&record.job_id);
        if !output_dir.exists() {
            return Err(DeliveryError::ArtifactsMissing {
                job_id: record.job_id.clone(),
            });
        }

        let temp_root = self.store.layout().temp_root();
        fs::create_dir_all(temp_root.as_std_path())
            .map_err(|e| DeliveryError::Internal(e.to_string()))?;
        let zip_path = temp_root.join(format!("dub_{}.zip", record.job_id));

        let file = fs::File::create(zip_path.as_std_path())
            .map_err(|e| DeliveryError::Internal(e.to_string()))?;
        let mut zip = zip::ZipWriter::new(file);
        let options = SimpleFileOptions::default()
            .compression_method(zip::CompressionMethod::Deflated);

        let tgt = record.languages.tgt_lang;
        let mut packed_any = false;
        for name in [
            format!("dub_{tgt}.wav"),
            "manifest.json".to_string(),
            format!("segments_{tgt}.json"),
        ] {
            let path = output_dir.join(&name);
            if !path.exists() {
                continue;
            }
            let bytes = fs::read(path.as_std_path())
                .map_err(|e| DeliveryError::Internal(e.to_string()))?;
            zip.start_file(&name, options)
                .map_err(|e| DeliveryError::Internal(e.to_string()))?;
            zip.write_all(&bytes)
                .map_err(|e| DeliveryError::Internal(e.to_string()))?;
            packed_any = true;
        }

        if !packed_any {
            return Err(DeliveryError::ArtifactsMissing {
                job_id: record.job_id.clone(),
            });
        }

        for (name, content) in [
            ("UPLOAD_GUIDE.txt", upload_guide(record)),
            ("README.txt", readme(record)),
        ] {
            zip.start_file(name, options)
                .map_err(|e| DeliveryError::Internal(e.to_string()))?;
            zip.write_all(content.as_bytes())
                .map_err(|e| DeliveryError::Internal(e.to_string()))?;
        }

        zip.finish()
            .map_err(|e| DeliveryError::Internal(e.to_string()))?;
        Ok(zip_path)
    }
}

/// Step-by-step instructions for attaching the dubbed track on the
/// distribution platform.
fn upload_guide(record: &JobRecord) -> String {
    let tgt = record.languages.tgt_lang;
    format!(
        "# Uploading your multi-language audio track\n\
         \n\
         1. Sign in to YouTube Studio: https://studio.youtube.com\n\
         2. Open \"Languages\" in the left menu.\n\
         3. Select the target video:\n\
            Video ID: {video_id}\n\
            URL: {url}\n\
         4. Add the language: \"Add Language\" -> {tgt}\n\
         5. Upload the audio track: next to \"Dub\", choose \"Add\" ->\n\
            \"Select file\" -> dub_{tgt}.wav\n\
         6. Publish.\n\
         \n\
         Notes:\n\
         - If an automatic dub already exists for this language, remove it first.\n\
         - The track is already padded to the video's length.\n\
         - The new track can take a few minutes to appear after upload.\n",
        video_id = record.source.video_id,
        url = record.source.url,
    )
}

/// Contents description shipped inside the archive.
fn readme(record: &JobRecord) -> String {
    let tgt = record.languages.tgt_lang;
    format!(
        "# TalkDub delivery\n\
         \n\
         Job: {job_id}\n\
         Created: {created_at}\n\
         Source language: {src}\n\
         Target language: {tgt}\n\
         \n\
         Files:\n\
         - dub_{tgt}.wav: the dubbed audio track\n\
         - manifest.json: processing metadata and statistics\n\
         - segments_{tgt}.json: per-segment detail for review\n\
         - UPLOAD_GUIDE.txt: how to attach the track on YouTube\n\
         \n\
         Notes:\n\
         - This delivery is removed 72 hours after completion.\n\
         - Lip synchronization is not performed.\n",
        job_id = record.job_id,
        created_at = record.created_at,
        src = record.languages.src_lang,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;
    use talkdub_job::{Languages, PipelineParams, Source};
    use talkdub_kv::MemoryStore;
    use talkdub_utils::paths::DataLayout;
    use talkdub_utils::types::Language;
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        store: JobStore,
        pin_store: PinStore,
        gate: DeliveryGate,
        job_id: String,
    }

    async fn fixture(status: JobStatus) -> (Fixture, String) {
        let dir = TempDir::new().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().join("data")).unwrap();
        let layout = DataLayout::new(root);
        layout.ensure_dirs().unwrap();
        let store = JobStore::new(layout.clone());

        let mut record = JobRecord::new_queued(
            Source {
                platform: "youtube".into(),
                video_id: "abc12345678".into(),
                url: "https://youtu.be/abc12345678".into(),
            },
            Languages {
                src_lang: Language::Ja,
                tgt_lang: Language::En,
            },
            "u@example.com",
            PipelineParams {
                max_atempo: 1.3,
                max_overlap_sec: 2.0,
                max_overlap_ratio: 0.25,
                overlap_duck_db: -6.0,
                hallucination_policy: "silence".into(),
                timeline_reference: "ffprobe".into(),
            },
        );
        record.status = status;
        if status == JobStatus::Completed {
            record.expires_at = Some(Utc::now() + chrono::Duration::hours(72));
        }
        store.save(&record).unwrap();

        // Artifacts on disk.
        let output_dir = layout.output_dir(&record.job_id);
        fs::create_dir_all(output_dir.as_std_path()).unwrap();
        fs::write(output_dir.join("dub_en.wav").as_std_path(), b"RIFFdata").unwrap();
        fs::write(output_dir.join("manifest.json").as_std_path(), b"{}").unwrap();
        fs::write(output_dir.join("segments_en.json").as_std_path(), b"[]").unwrap();

        let kv: Arc<dyn talkdub_kv::KeyedStore> = Arc::new(MemoryStore::new());
        let pin_store = PinStore::new(kv, Duration::from_secs(3600), 5);
        let pin = pin_store.generate(&record.job_id).await.unwrap();

        let gate = DeliveryGate::new(store.clone(), pin_store.clone(), 5);
        (
            Fixture {
                _dir: dir,
                store,
                pin_store,
                gate,
                job_id: record.job_id,
            },
            pin,
        )
    }

    #[tokio::test]
    async fn test_release_happy_path() {
        let (f, pin) = fixture(JobStatus::Completed).await;

        let artifact = f.gate.release(&f.job_id, &pin).await.unwrap();

        assert_eq!(artifact.download_count, 1);
        assert_eq!(artifact.filename, "talkdub_en.zip");
        assert!(artifact.archive_path.exists());
        assert!(artifact.expires_at.is_some());

        // The archive contains the artifacts plus guide and readme.
        let file = fs::File::open(artifact.archive_path.as_std_path()).unwrap();
        let mut archive = zip::ZipArchive::new(file).unwrap();
        let names: Vec<String> = (0..archive.len())
            .map(|i| archive.by_index(i).unwrap().name().to_string())
            .collect();
        assert!(names.contains(&"dub_en.wav".to_string()));
        assert!(names.contains(&"manifest.json".to_string()));
        assert!(names.contains(&"segments_en.json".to_string()));
        assert!(names.contains(&"UPLOAD_GUIDE.txt".to_string()));
        assert!(names.contains(&"README.txt".to_string()));
    }

    #[tokio::test]
    async fn test_unknown_job_is_404() {
        let (f, pin) = fixture(JobStatus::Completed).await;
        let err = f.gate.release("missing", &pin).await.unwrap_err();
        assert!(matches!(err, DeliveryError::JobNotFound { .. }));
        assert_eq!(err.http_status(), 404);
    }

    #[tokio::test]
    async fn test_wrong_pin_counts_down_then_locks() {
        let (f, pin) = fixture(JobStatus::Completed).await;
        let wrong = if pin == "000000" { "111111" } else { "000000" };

        let mut last_remaining = u32::MAX;
        for _ in 0..5 {
            match f.gate.release(&f.job_id, wrong).await.unwrap_err() {
                DeliveryError::PinMismatch { remaining } => {
                    assert!(remaining < last_remaining);
                    last_remaining = remaining;
                }
                other => panic!("expected PinMismatch, got {other:?}"),
            }
        }
        assert_eq!(last_remaining, 0);

        // Sixth try is locked even with the right PIN.
        let err = f.gate.release(&f.job_id, &pin).await.unwrap_err();
        assert!(matches!(err, DeliveryError::PinLocked));
        assert_eq!(err.http_status(), 403);
    }

    #[tokio::test]
    async fn test_non_completed_job_is_rejected_with_status() {
        let (f, pin) = fixture(JobStatus::Queued).await;
        let err = f.gate.release(&f.job_id, &pin).await.unwrap_err();
        match err {
            DeliveryError::NotCompleted { status } => assert_eq!(status, JobStatus::Queued),
            other => panic!("expected NotCompleted, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_expired_delivery_is_gone() {
        let (f, pin) = fixture(JobStatus::Completed).await;
        let mut record = f.store.load(&f.job_id).unwrap();
        record.expires_at = Some(Utc::now() - chrono::Duration::hours(1));
        f.store.save(&record).unwrap();

        let err = f.gate.release(&f.job_id, &pin).await.unwrap_err();
        assert!(matches!(err, DeliveryError::Expired));
        assert_eq!(err.http_status(), 410);
    }

    #[tokio::test]
    async fn test_download_cap_is_enforced() {
        let (f, pin) = fixture(JobStatus::Completed).await;

        for expected in 1..=5u32 {
            let artifact = f.gate.release(&f.job_id, &pin).await.unwrap();
            assert_eq!(artifact.download_count, expected);
        }

        let err = f.gate.release(&f.job_id, &pin).await.unwrap_err();
        assert!(matches!(err, DeliveryError::DownloadLimitReached { .. }));
        assert_eq!(err.http_status(), 429);
    }

    #[tokio::test]
    async fn test_concurrent_deliveries_count_exactly() {
        let (f, pin) = fixture(JobStatus::Completed).await;
        let gate = Arc::new(DeliveryGate::new(
            f.store.clone(),
            f.pin_store.clone(),
            100,
        ));

        let mut handles = Vec::new();
        for _ in 0..4 {
            let gate = Arc::clone(&gate);
            let job_id = f.job_id.clone();
            let pin = pin.clone();
            handles.push(tokio::spawn(async move {
                gate.release(&job_id, &pin).await.unwrap()
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        let record = f.store.load(&f.job_id).unwrap();
        assert_eq!(record.download_count, 4, "no increment may be lost");
    }

    #[tokio::test]
    async fn test_missing_artifacts_is_internal_error() {
        let (f, pin) = fixture(JobStatus::Completed).await;
        fs::remove_dir_all(
            f.store
                .layout()
                .output_dir(&f.job_id)
                .as_std_path(),
        )
        .unwrap();

        let err = f.gate.release(&f.job_id, &pin).await.unwrap_err();
        assert!(matches!(err, DeliveryError::ArtifactsMissing { .. }));
        assert_eq!(err.http_status(), 500);
    }
}
