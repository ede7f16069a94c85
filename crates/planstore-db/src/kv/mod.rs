//! The key-value transport.
//!
//! Repositories only see the [`KvStore`] trait. Each call is atomic on its
//! own key; nothing here spans keys.

mod memory;
mod redis_store;

pub use memory::MemoryStore;
pub use redis_store::RedisStore;

use async_trait::async_trait;

use crate::error::StoreError;

pub type StoreResult<T> = Result<T, StoreError>;

/// Operations the repositories need from a key-value backend.
///
/// The trait is object-safe so a [`crate::store::Store`] can hold any backend
/// as `Arc<dyn KvStore>`.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Short backend name for logs (e.g. "memory", "redis").
    fn backend(&self) -> &'static str;

    async fn get(&self, key: &str) -> StoreResult<Option<String>>;

    async fn set(&self, key: &str, value: &str) -> StoreResult<()>;

    /// Remove a key of any type. Missing keys are not an error.
    async fn delete(&self, key: &str) -> StoreResult<()>;

    async fn hget(&self, key: &str, field: &str) -> StoreResult<Option<String>>;

    async fn hset(&self, key: &str, field: &str, value: &str) -> StoreResult<()>;

    async fn sadd(&self, key: &str, member: &str) -> StoreResult<()>;

    async fn srem(&self, key: &str, member: &str) -> StoreResult<()>;

    async fn smembers(&self, key: &str) -> StoreResult<Vec<String>>;

    /// Add or re-score a member of a sorted set.
    async fn zadd(&self, key: &str, member: &str, score: i64) -> StoreResult<()>;

    async fn zrem(&self, key: &str, member: &str) -> StoreResult<()>;

    /// All members in ascending score order (ties broken by member).
    async fn zrange_all(&self, key: &str) -> StoreResult<Vec<String>>;

    async fn zcard(&self, key: &str) -> StoreResult<i64>;

    /// Every key of any type starting with `prefix`, sorted.
    async fn scan_prefix(&self, prefix: &str) -> StoreResult<Vec<String>>;

    /// Liveness check.
    async fn ping(&self) -> StoreResult<()>;
}

// Compile-time assertion: KvStore must be usable as `dyn KvStore`.
const _: () = {
    fn _assert_object_safe(_: &dyn KvStore) {}
};
