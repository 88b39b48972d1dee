//! The talkdub engine: phase implementations, the orchestrator that drives
//! them, the queue worker, the PIN-gated delivery path, and the scheduled
//! cleanup sweeps.

pub mod api;
pub mod cleanup;
pub mod delivery;
pub mod media;
pub mod notify;
pub mod orchestrator;
pub mod phases;
pub mod worker;

pub use api::{ApiError, StatusResponse, SubmitRequest, SubmitResponse, status, submit};
pub use delivery::{DeliveryArtifact, DeliveryGate};
pub use notify::{Notifier, TracingNotifier};
pub use orchestrator::{Orchestrator, PipelineSummary};
pub use worker::JobWorker;
