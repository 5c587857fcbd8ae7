use std::time::Duration;

use async_trait::async_trait;

use super::CacheError;

/// Storage behind a [`Cache`](super::Cache).
///
/// Implementations are shared across tasks and must tolerate concurrent
/// access; no read-modify-write atomicity is expected.
#[async_trait]
pub trait CacheBackend: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError>;

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), CacheError>;

    /// Remove every stored key starting with `prefix`; returns how many were removed.
    async fn delete_by_prefix(&self, prefix: &str) -> Result<u64, CacheError>;

    /// Record `key` in the key set of `tag`.
    async fn tag_add(&self, tag: &str, key: &str) -> Result<(), CacheError>;

    /// Remove every key registered under `tag`, then the tag's key set.
    async fn delete_by_tag(&self, tag: &str) -> Result<u64, CacheError>;

    async fn health_check(&self) -> Result<(), CacheError>;
}
