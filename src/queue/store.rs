//! The key-value operations the queue needs from its store

use crate::queue::StoreResult;
use std::time::Duration;

/// Set-oriented key-value store
///
/// Each operation is atomic on its own; nothing spans several calls.
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Add `member` to the set at `key`, returning whether it was new
    async fn set_add(&self, key: &str, member: &str) -> StoreResult<bool>;

    /// Whether `member` is in the set at `key`
    async fn set_is_member(&self, key: &str, member: &str) -> StoreResult<bool>;

    /// Cardinality of the set at `key`
    async fn set_len(&self, key: &str) -> StoreResult<u64>;

    /// Remove and return an arbitrary member of the set at `key`
    async fn set_pop(&self, key: &str) -> StoreResult<Option<String>>;

    /// Scalar value at `key`, `None` if absent or expired
    async fn get(&self, key: &str) -> StoreResult<Option<String>>;

    /// Store a scalar value, optionally expiring after `ttl`
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> StoreResult<()>;

    /// Remove a key
    async fn delete(&self, key: &str) -> StoreResult<()>;

    /// Write the store's contents to durable storage
    async fn persist(&self) -> StoreResult<()>;
}
