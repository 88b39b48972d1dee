//! The translation sub-system.
//!
//! Orchestrates chunking of segments under joint character/count limits,
//! per-chunk LLM calls through the shared rate limiter, strict JSON-shape
//! parsing, quality validation, caching, and partial-failure accounting.

pub mod chunker;
pub mod pipeline;
pub mod validator;

pub use chunker::{ChunkInput, chunk_segments, estimate_total_chars};
pub use pipeline::{SegmentOutcome, TranslationOutcome, Translator, TranslatorStats};
pub use validator::{Severity, ValidationIssue, validate_batch};
