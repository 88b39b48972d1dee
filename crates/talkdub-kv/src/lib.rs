//! Ephemeral keyed state for talkdub.
//!
//! The PIN store, the outbound rate limiter, the translation cache, and the
//! job queue all live in one TTL-aware keyed store shared across worker
//! processes. The store is a trait so production wires Redis while tests
//! inject the in-memory fake; the consumers above it are plain structs that
//! take the store as an explicit collaborator.

pub mod cache;
pub mod limiter;
pub mod pin;
pub mod queue;
pub mod store;

pub use cache::TranslationCache;
pub use limiter::{RateLimiter, RateLimiterUsage};
pub use pin::{PinStore, VerifyOutcome};
pub use queue::{JobQueue, MemoryQueue, RedisQueue};
pub use store::{KeyedStore, MemoryStore, RedisStore, TtlState};
