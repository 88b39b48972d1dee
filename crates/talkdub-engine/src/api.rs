//! Submission and status operations.
//!
//! The HTTP surface is an external collaborator; these are the typed
//! command/response contracts it fronts. Errors carry the status code the
//! surface should map them to.

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::info;

use talkdub_config::Config;
use talkdub_job::{JobRecord, JobStore, Languages, PipelineParams, Progress, Source};
use talkdub_kv::JobQueue;
use talkdub_utils::types::{JobStatus, Language};

/// Window within which resubmitting the same video joins the prior job.
const DEDUPE_WINDOW: Duration = Duration::from_secs(24 * 3600);

/// Simple ETA heuristic: a job finishes within a day of submission.
fn eta() -> chrono::Duration {
    chrono::Duration::hours(24)
}

/// Accepted video host patterns.
static URL_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        Regex::new(r"youtube\.com/watch\?").unwrap(),
        Regex::new(r"youtu\.be/").unwrap(),
        Regex::new(r"youtube\.com/embed/").unwrap(),
    ]
});

/// Video-id extractors, tried in order.
static VIDEO_ID_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        Regex::new(r"[?&]v=([A-Za-z0-9_-]{11})").unwrap(),
        Regex::new(r"youtu\.be/([A-Za-z0-9_-]{11})").unwrap(),
        Regex::new(r"embed/([A-Za-z0-9_-]{11})").unwrap(),
    ]
});

/// A dubbing submission.
#[derive(Debug, Clone, Deserialize)]
pub struct SubmitRequest {
    pub video_url: String,
    pub src_lang: String,
    pub tgt_lang: String,
    pub email: String,
    pub webhook_url: Option<String>,
}

/// Successful submission response.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status")]
pub enum SubmitResponse {
    /// A new job was created and enqueued (HTTP 202).
    #[serde(rename = "QUEUED")]
    Accepted {
        job_id: String,
        estimated_completion: DateTime<Utc>,
        status_url: String,
        download_url: String,
        message: String,
    },
    /// The same video was submitted within the dedupe window (HTTP 200).
    #[serde(rename = "ALREADY_QUEUED")]
    AlreadyQueued { job_id: String, status_url: String },
}

/// Status response per the public contract.
#[derive(Debug, Clone, Serialize)]
pub struct StatusResponse {
    pub job_id: String,
    pub status: JobStatus,
    pub current_phase: Option<String>,
    pub progress: Progress,
    pub created_at: DateTime<Utc>,
    pub estimated_completion: DateTime<Utc>,
    pub download_available: bool,
    pub download_expires_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

/// API-surface errors with their HTTP mapping.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("the video URL is not a recognized format: {url}")]
    InvalidUrl { url: String },

    #[error("could not extract a video id from the URL")]
    NoVideoId,

    #[error("{field}: {message}")]
    InvalidLanguage { field: &'static str, message: String },

    #[error("source and target language must differ (both were '{lang}')")]
    SameLanguagePair { lang: String },

    #[error("email address '{email}' is not valid")]
    InvalidEmail { email: String },

    #[error("job {job_id} not found")]
    JobNotFound { job_id: String },

    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    /// HTTP status the fronting surface should return.
    #[must_use]
    pub const fn http_status(&self) -> u16 {
        match self {
            Self::InvalidUrl { .. }
            | Self::NoVideoId
            | Self::InvalidLanguage { .. }
            | Self::SameLanguagePair { .. }
            | Self::InvalidEmail { .. } => 400,
            Self::JobNotFound { .. } => 404,
            Self::Internal(_) => 500,
        }
    }
}

/// Validate a submission, dedupe against recent jobs for the same video,
/// create the QUEUED record, and enqueue it.
pub async fn submit(
    store: &JobStore,
    queue: &Arc<dyn JobQueue>,
    config: &Config,
    request: &SubmitRequest,
) -> Result<SubmitResponse, ApiError> {
    let video_id = validate_video_url(&request.video_url)?;
    let languages = validate_language_pair(&request.src_lang, &request.tgt_lang)?;
    validate_email(&request.email)?;

    // Resubmitting the same video within a day joins the existing job.
    if let Some(existing) = store.find_recent_by_video_id(&video_id, Utc::now(), DEDUPE_WINDOW) {
        info!(video_id, job_id = %existing, "duplicate submission joined to existing job");
        return Ok(SubmitResponse::AlreadyQueued {
            status_url: status_url(&existing),
            job_id: existing,
        });
    }

    let record = JobRecord::new_queued(
        Source {
            platform: "youtube".to_string(),
            video_id,
            url: request.video_url.clone(),
        },
        languages,
        &request.email,
        PipelineParams {
            max_atempo: config.pipeline.max_atempo,
            max_overlap_sec: config.pipeline.max_overlap_sec,
            max_overlap_ratio: config.pipeline.max_overlap_ratio,
            overlap_duck_db: config.pipeline.overlap_duck_db,
            hallucination_policy: "silence".to_string(),
            timeline_reference: "ffprobe".to_string(),
        },
    );

    store
        .save(&record)
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    queue
        .push(&record.job_id)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    info!(job_id = %record.job_id, "job accepted and enqueued");

    Ok(SubmitResponse::Accepted {
        estimated_completion: record.created_at + eta(),
        status_url: status_url(&record.job_id),
        download_url: format!("/api/v1/jobs/{}/download", record.job_id),
        message: "Your job was accepted. You will be notified by email when it completes."
            .to_string(),
        job_id: record.job_id,
    })
}

/// Read a job's public status.
pub fn status(store: &JobStore, job_id: &str) -> Result<StatusResponse, ApiError> {
    let record = store.load(job_id).map_err(|_| ApiError::JobNotFound {
        job_id: job_id.to_string(),
    })?;

    Ok(StatusResponse {
        job_id: record.job_id.clone(),
        status: record.status,
        current_phase: record.current_phase.map(|p| p.as_str().to_string()),
        progress: record.progress.clone(),
        created_at: record.created_at,
        estimated_completion: estimated_completion(&record),
        download_available: record.status == JobStatus::Completed,
        download_expires_at: record.expires_at,
        error: record.error,
    })
}

fn status_url(job_id: &str) -> String {
    format!("/api/v1/jobs/{job_id}/status")
}

fn estimated_completion(record: &JobRecord) -> DateTime<Utc> {
    if record.status == JobStatus::Completed {
        record.created_at
    } else {
        record.created_at + eta()
    }
}

/// Validate the URL shape and extract the video id.
fn validate_video_url(url: &str) -> Result<String, ApiError> {
    if !URL_PATTERNS.iter().any(|p| p.is_match(url)) {
        return Err(ApiError::InvalidUrl {
            url: url.to_string(),
        });
    }
    VIDEO_ID_PATTERNS
        .iter()
        .find_map(|p| p.captures(url))
        .map(|c| c[1].to_string())
        .ok_or(ApiError::NoVideoId)
}

/// Both languages must be supported and distinct.
fn validate_language_pair(src: &str, tgt: &str) -> Result<Languages, ApiError> {
    let src_lang: Language = src.parse().map_err(|message| ApiError::InvalidLanguage {
        field: "src_lang",
        message,
    })?;
    let tgt_lang: Language = tgt.parse().map_err(|message| ApiError::InvalidLanguage {
        field: "tgt_lang",
        message,
    })?;
    if src_lang == tgt_lang {
        return Err(ApiError::SameLanguagePair {
            lang: src_lang.code().to_string(),
        });
    }
    Ok(Languages { src_lang, tgt_lang })
}

fn validate_email(email: &str) -> Result<(), ApiError> {
    let valid = email.split_once('@').is_some_and(|(local, domain)| {
        !local.is_empty() && !domain.is_empty() && !domain.starts_with('.')
    });
    if valid {
        Ok(())
    } else {
        Err(ApiError::InvalidEmail {
            email: email.to_string(),
        })
    }
}
