//! Shared primitives for the talkdub pipeline
//!
//! This crate holds the pieces every other talkdub crate leans on: the core
//! identifier types (phases, job statuses, languages), the error taxonomy,
//! atomic file writes, the on-disk data layout, structured per-job logging,
//! user-facing error translation, and a narrow subprocess runner.

pub mod atomic_write;
pub mod error;
pub mod error_translator;
pub mod logging;
pub mod paths;
pub mod process;
pub mod types;

pub use error::{
    DeliveryError, JobStoreError, KvError, LlmError, PhaseError, PinError, TalkDubError,
};
pub use types::{JobStatus, Language, PhaseId};
