//! Error taxonomy for talkdub.
//!
//! Library code returns these typed errors and never exits; the CLI maps
//! them to exit codes and user-facing messages. Phases additionally run
//! their technical error through [`crate::error_translator`] before it is
//! shown to a user.

use std::time::Duration;
use thiserror::Error;

use crate::types::JobStatus;

/// Top-level error type returned by talkdub library operations.
#[derive(Error, Debug)]
pub enum TalkDubError {
    #[error("job store error: {0}")]
    JobStore(#[from] JobStoreError),

    #[error("keyed store error: {0}")]
    Kv(#[from] KvError),

    #[error("PIN error: {0}")]
    Pin(#[from] PinError),

    #[error("phase error: {0}")]
    Phase(#[from] PhaseError),

    #[error("LLM backend error: {0}")]
    Llm(#[from] LlmError),

    #[error("delivery error: {0}")]
    Delivery(#[from] DeliveryError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors from the per-job JSON document store.
///
/// `Corrupted` is deliberately distinct from `NotFound`: a record that
/// exists but cannot be parsed must never be mutated and is surfaced to the
/// operator rather than the user.
#[derive(Error, Debug)]
pub enum JobStoreError {
    #[error("job {job_id} not found")]
    NotFound { job_id: String },

    #[error("job record for {job_id} is corrupted: {reason}")]
    Corrupted { job_id: String, reason: String },

    #[error("invalid status transition for job {job_id}: {from} -> {to}")]
    InvalidTransition {
        job_id: String,
        from: JobStatus,
        to: JobStatus,
    },

    #[error("failed to persist job {job_id}: {reason}")]
    PersistFailed { job_id: String, reason: String },

    #[error("download limit reached for job {job_id} ({count}/{max})")]
    DownloadLimitReached { job_id: String, count: u32, max: u32 },

    #[error("IO error for job {job_id}: {source}")]
    Io {
        job_id: String,
        #[source]
        source: std::io::Error,
    },
}

/// Errors from the ephemeral keyed store (Redis or the in-memory fake).
#[derive(Error, Debug)]
pub enum KvError {
    #[error("keyed store connection failed: {0}")]
    Connection(String),

    #[error("keyed store operation failed: {0}")]
    Operation(String),

    #[error("value for key '{key}' could not be decoded: {reason}")]
    Decode { key: String, reason: String },
}

/// Errors from PIN generation and verification.
#[derive(Error, Debug)]
pub enum PinError {
    #[error("no PIN is registered for job {job_id} (it may have expired)")]
    NotFound { job_id: String },

    #[error("PIN for job {job_id} is locked after too many attempts")]
    Locked { job_id: String },

    #[error("keyed store error: {0}")]
    Kv(#[from] KvError),
}

/// Errors raised by phase implementations and the shared runner.
#[derive(Error, Debug)]
pub enum PhaseError {
    /// A declared dependency (scratch file, record field, env key) is
    /// missing; the phase body was never invoked.
    #[error("precondition failed for phase {phase}: {message}")]
    PreconditionFailed { phase: String, message: String },

    #[error("phase {phase} timed out after {}s", timeout.as_secs())]
    Timeout { phase: String, timeout: Duration },

    /// Generic execution failure; carries the technical message that the
    /// runner translates for users after retries exhaust.
    #[error("phase {phase} failed: {message}")]
    ExecutionFailed { phase: String, message: String },

    /// Output validation (artifact missing, quality gate) after an
    /// otherwise successful run.
    #[error("phase {phase} produced invalid output: {message}")]
    OutputInvalid { phase: String, message: String },

    #[error("job store error during phase {phase}: {source}")]
    JobStore {
        phase: String,
        #[source]
        source: JobStoreError,
    },
}

impl PhaseError {
    /// The raw technical message, used as input to the user-facing
    /// translation table.
    #[must_use]
    pub fn technical_message(&self) -> String {
        match self {
            Self::PreconditionFailed { message, .. }
            | Self::ExecutionFailed { message, .. }
            | Self::OutputInvalid { message, .. } => message.clone(),
            Self::Timeout { timeout, .. } => {
                format!("Timeout after {}s", timeout.as_secs())
            }
            Self::JobStore { source, .. } => source.to_string(),
        }
    }
}

/// Errors from LLM backends.
///
/// The translation pipeline branches its retry policy on these variants:
/// quota errors wait out the window, transport errors back off, auth and
/// other client-side errors never retry.
#[derive(Error, Debug)]
pub enum LlmError {
    #[error("LLM misconfiguration: {0}")]
    Misconfiguration(String),

    #[error("LLM transport failure: {0}")]
    Transport(String),

    #[error("LLM provider authentication failed: {0}")]
    ProviderAuth(String),

    #[error("LLM provider rate limit exceeded: {0}")]
    ProviderQuota(String),

    #[error("LLM provider outage: {0}")]
    ProviderOutage(String),

    #[error("LLM request timed out after {}s", duration.as_secs())]
    Timeout { duration: Duration },

    #[error("LLM response malformed: {0}")]
    MalformedResponse(String),

    #[error("rate limiter acquisition timed out")]
    RateLimiterTimeout,
}

impl LlmError {
    /// Whether the translation pipeline should retry after this error.
    #[must_use]
    pub const fn is_retriable(&self) -> bool {
        !matches!(self, Self::Misconfiguration(_) | Self::ProviderAuth(_))
    }
}

/// Errors from the delivery gate.
///
/// Each variant maps onto the HTTP status the fronting surface should
/// return; [`DeliveryError::http_status`] makes the mapping explicit.
#[derive(Error, Debug)]
pub enum DeliveryError {
    #[error("job {job_id} not found")]
    JobNotFound { job_id: String },

    #[error("PIN incorrect ({remaining} attempts remaining)")]
    PinMismatch { remaining: u32 },

    #[error("PIN locked after too many attempts; request a new delivery email")]
    PinLocked,

    #[error("PIN not found (it may have expired)")]
    PinExpired,

    #[error("download unavailable: job status is '{status}'")]
    NotCompleted { status: JobStatus },

    #[error("the delivery expired and its artifacts were removed")]
    Expired,

    #[error("download limit reached ({max} downloads)")]
    DownloadLimitReached { max: u32 },

    #[error("delivery artifacts missing for job {job_id}")]
    ArtifactsMissing { job_id: String },

    #[error("internal delivery error: {0}")]
    Internal(String),
}

impl DeliveryError {
    /// HTTP status code the fronting surface should map this error to.
    #[must_use]
    pub const fn http_status(&self) -> u16 {
        match self {
            Self::JobNotFound { .. } => 404,
            Self::PinMismatch { .. } | Self::PinLocked | Self::PinExpired => 403,
            Self::NotCompleted { .. } => 400,
            Self::Expired => 410,
            Self::DownloadLimitReached { .. } => 429,
            Self::ArtifactsMissing { .. } | Self::Internal(_) => 500,
        }
    }
}
