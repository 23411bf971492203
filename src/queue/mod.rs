//! Deduplicating work queue over a set-oriented key-value store
//!
//! Discovered entities are queued once per discovery and evaluated at most
//! once, even across restarts, because dispositions are kept in the store.

mod dedup;
mod error;
mod memory;
mod redis;
mod store;

pub use dedup::{
    BLOCKED_KEY, CLEAN_KEY, DedupQueue, PENDING_KEY, TOPIC_WATERMARK_TTL, entity_key, topic_key,
};
pub use error::{QueueError, QueueResult, StoreError, StoreResult};
pub use memory::MemoryStore;
pub use redis::{RedisOptions, RedisStore};
pub use store::KeyValueStore;

#[cfg(test)]
pub(crate) use store::MockKeyValueStore;
