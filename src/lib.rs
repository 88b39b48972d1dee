//! talkdub - durable dubbing pipeline.
//!
//! This crate is the CLI front; the machinery lives in the member crates:
//!
//! - [`talkdub_utils`]: shared types, errors, filesystem, logging
//! - [`talkdub_config`]: environment-driven configuration
//! - [`talkdub_job`]: the job record schema and durable store
//! - [`talkdub_kv`]: PIN store, rate limiter, translation cache, queue
//! - [`talkdub_phase_api`]: phase contract, registry, and runner
//! - [`talkdub_llm`]: the LLM backend abstraction
//! - [`talkdub_translate`]: chunking, translation pipeline, validation
//! - [`talkdub_engine`]: the phases, orchestrator, worker, and delivery

pub mod cli;

pub use talkdub_config::Config;
pub use talkdub_engine::{DeliveryGate, JobWorker, Orchestrator};
pub use talkdub_job::{JobRecord, JobStore};
pub use talkdub_utils::types::{JobStatus, Language, PhaseId};
