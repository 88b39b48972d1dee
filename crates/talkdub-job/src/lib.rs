//! Job record schema and the durable job store.
//!
//! A job is one submission: a single JSON document under `data/jobs/`,
//! atomically replaced on every update. The schema is versioned; phase
//! metadata lands in the record through a deep-merge-one-level operator so
//! concurrent readers always see a coherent snapshot.

pub mod merge;
pub mod record;
pub mod store;

pub use merge::deep_merge_one_level;
pub use record::{
    Flags, JobRecord, Languages, Media, Outputs, PipelineParams, Progress, Segment, Source,
    Speaker, Timing, TranslationState, TtsState, WhisperStats, WordTiming,
};
pub use store::JobStore;
