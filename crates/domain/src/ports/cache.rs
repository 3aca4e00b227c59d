use std::time::Duration;
use thiserror::Error;

use super::BoxFuture;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache unavailable: {0}")]
    Unavailable(String),
    #[error("cache serialization error: {0}")]
    Serialization(String),
    #[error("cache operation failed: {0}")]
    Store(String),
}

/// Shared key-value cache visible to every worker process.
///
/// A zero `ttl` stores the value without expiry. Every operation is atomic on
/// the backing store; `set_many` and `delete_many` apply all keys or none.
pub trait KvStore: Send + Sync {
    fn get(&self, key: &str) -> BoxFuture<'_, Result<Option<String>, CacheError>>;

    /// Reads several keys in one round trip, preserving the order of `keys`.
    fn get_many(&self, keys: &[String]) -> BoxFuture<'_, Result<Vec<Option<String>>, CacheError>>;

    fn set(&self, key: &str, value: &str, ttl: Duration) -> BoxFuture<'_, Result<(), CacheError>>;

    fn delete(&self, key: &str) -> BoxFuture<'_, Result<(), CacheError>>;

    /// Returns `true` when the value was written because the key was absent.
    fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> BoxFuture<'_, Result<bool, CacheError>>;

    /// Deletes `key` only while it still holds `expected`.
    fn compare_and_delete(
        &self,
        key: &str,
        expected: &str,
    ) -> BoxFuture<'_, Result<bool, CacheError>>;

    /// Replaces the value of `key` only while it still holds `expected`.
    fn compare_and_swap(
        &self,
        key: &str,
        expected: &str,
        value: &str,
        ttl: Duration,
    ) -> BoxFuture<'_, Result<bool, CacheError>>;

    fn set_many(
        &self,
        entries: &[(String, String)],
        ttl: Duration,
    ) -> BoxFuture<'_, Result<(), CacheError>>;

    fn delete_many(&self, keys: &[String]) -> BoxFuture<'_, Result<(), CacheError>>;
}
