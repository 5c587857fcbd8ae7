use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use super::backend::CacheBackend;
use super::keys::{DefaultKeyMaker, KeyMaker, KeySpec};
use super::options::{CacheOptions, DEFAULT_TTL_SECONDS, Tag};
use super::{
    CacheError, METRIC_CACHE_BACKEND_ERROR_TOTAL, METRIC_CACHE_HIT_TOTAL, METRIC_CACHE_MISS_TOTAL,
};

/// Entry point for cached calls and bulk invalidation.
#[derive(Clone)]
pub struct Cache {
    backend: Arc<dyn CacheBackend>,
    key_maker: Arc<dyn KeyMaker>,
    default_ttl: Duration,
}

impl Cache {
    pub fn new(backend: Arc<dyn CacheBackend>) -> Self {
        Self {
            backend,
            key_maker: Arc::new(DefaultKeyMaker),
            default_ttl: Duration::from_secs(DEFAULT_TTL_SECONDS),
        }
    }

    /// TTL for options that do not set one.
    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    pub fn with_key_maker(mut self, key_maker: Arc<dyn KeyMaker>) -> Self {
        self.key_maker = key_maker;
        self
    }

    pub fn backend(&self) -> &Arc<dyn CacheBackend> {
        &self.backend
    }

    /// Validate `options` and return a guard for calls sharing them.
    pub fn cached(&self, options: CacheOptions) -> Result<Cached, CacheError> {
        let (spec, ttl) = options.validate(self.default_ttl)?;
        Ok(Cached {
            cache: self.clone(),
            spec,
            ttl,
        })
    }

    /// Remove every entry whose key starts with `prefix`.
    pub async fn remove_by_prefix(&self, prefix: &str) -> Result<u64, CacheError> {
        let removed = self
            .backend
            .delete_by_prefix(prefix)
            .await
            .inspect_err(|_| counter!(METRIC_CACHE_BACKEND_ERROR_TOTAL).increment(1))?;
        debug!(prefix, removed, "cache entries removed by prefix");
        Ok(removed)
    }

    /// Remove every entry stored under `tag`.
    pub async fn remove_by_tag(&self, tag: &Tag) -> Result<u64, CacheError> {
        let removed = self
            .backend
            .delete_by_tag(tag.as_str())
            .await
            .inspect_err(|_| counter!(METRIC_CACHE_BACKEND_ERROR_TOTAL).increment(1))?;
        debug!(%tag, removed, "cache entries removed by tag");
        Ok(removed)
    }
}

impl std::fmt::Debug for Cache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cache")
            .field("backend", &self.backend.name())
            .field("default_ttl", &self.default_ttl)
            .finish()
    }
}

/// Validated cache options bound to a [`Cache`].
#[derive(Clone, Debug)]
pub struct Cached {
    cache: Cache,
    spec: KeySpec,
    ttl: Duration,
}

impl Cached {
    pub fn spec(&self) -> &KeySpec {
        &self.spec
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Key that [`call`](Self::call) uses for `function` and `args`.
    pub fn key_for<A>(&self, function: &str, args: &A) -> Result<String, CacheError>
    where
        A: Serialize + ?Sized,
    {
        let args = serde_json::to_value(args)?;
        Ok(self.cache.key_maker.make(function, &self.spec, &args))
    }

    /// Return the cached value for (`function`, `args`) or compute it with `f`.
    ///
    /// Failures of `f` are returned as-is and never cached. Concurrent misses
    /// for the same key each run `f`; the last write wins.
    pub async fn call<A, T, E, F, Fut>(&self, function: &str, args: &A, f: F) -> Result<T, E>
    where
        A: Serialize + ?Sized,
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let key = match self.key_for(function, args) {
            Ok(key) => key,
            Err(err) => {
                warn!(function, error = %err, "cache bypassed: arguments are not serializable");
                return f().await;
            }
        };

        if let Some(value) = self.lookup::<T>(&key).await {
            counter!(METRIC_CACHE_HIT_TOTAL).increment(1);
            debug!(key = %key, "cache hit");
            return Ok(value);
        }
        counter!(METRIC_CACHE_MISS_TOTAL).increment(1);
        debug!(key = %key, "cache miss");

        let value = f().await?;
        self.store(&key, &value).await;
        Ok(value)
    }

    async fn lookup<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let backend = &self.cache.backend;
        let bytes = match backend.get(key).await {
            Ok(bytes) => bytes?,
            Err(err) => {
                counter!(METRIC_CACHE_BACKEND_ERROR_TOTAL).increment(1);
                warn!(key, backend = backend.name(), error = %err, "cache read failed; treating as miss");
                return None;
            }
        };
        match serde_json::from_slice(&bytes) {
            Ok(value) => Some(value),
            Err(err) => {
                warn!(key, error = %err, "cached value could not be decoded; treating as miss");
                None
            }
        }
    }

    async fn store<T: Serialize>(&self, key: &str, value: &T) {
        let backend = &self.cache.backend;
        let bytes = match serde_json::to_vec(value) {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(key, error = %err, "value not cached: serialization failed");
                return;
            }
        };

        if let Err(err) = backend.set(key, bytes, self.ttl).await {
            counter!(METRIC_CACHE_BACKEND_ERROR_TOTAL).increment(1);
            warn!(key, backend = backend.name(), error = %err, "cache write failed");
            return;
        }

        if let KeySpec::Tag(tag) = &self.spec {
            if let Err(err) = backend.tag_add(tag.as_str(), key).await {
                counter!(METRIC_CACHE_BACKEND_ERROR_TOTAL).increment(1);
                warn!(key, %tag, backend = backend.name(), error = %err, "cache tag registration failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::cache::MemoryBackend;

    #[tokio::test]
    async fn second_call_is_served_from_cache() {
        let cache = Cache::new(Arc::new(MemoryBackend::new()));
        let guarded = cache
            .cached(CacheOptions::for_prefix("add"))
            .expect("options");
        let calls = AtomicUsize::new(0);

        for _ in 0..2 {
            let sum: Result<i64, CacheError> = guarded
                .call("add", &(2, 3), || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(5)
                })
                .await;
            assert_eq!(sum.expect("sum"), 5);
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failures_are_not_cached() {
        let cache = Cache::new(Arc::new(MemoryBackend::new()));
        let guarded = cache.cached(CacheOptions::for_prefix("f")).expect("options");

        let first: Result<u8, &str> = guarded.call("f", &(), || async { Err("boom") }).await;
        assert_eq!(first, Err("boom"));
        let second: Result<u8, &str> = guarded.call("f", &(), || async { Ok(7) }).await;
        assert_eq!(second, Ok(7));
    }

    #[tokio::test]
    async fn undecodable_values_are_misses() {
        let backend = Arc::new(MemoryBackend::new());
        let cache = Cache::new(backend.clone());
        let guarded = cache.cached(CacheOptions::for_prefix("f")).expect("options");
        let key = guarded.key_for("f", &[1]).expect("key");
        backend
            .set(&key, b"not json".to_vec(), Duration::from_secs(60))
            .await
            .expect("set");

        let value: Result<u8, CacheError> = guarded.call("f", &[1], || async { Ok(9) }).await;
        assert_eq!(value.expect("value"), 9);
    }

    #[test]
    fn options_without_ttl_use_the_cache_default() {
        let cache = Cache::new(Arc::new(MemoryBackend::new()))
            .with_default_ttl(Duration::from_secs(5));
        let guarded = cache.cached(CacheOptions::for_prefix("p")).expect("options");
        assert_eq!(guarded.ttl(), Duration::from_secs(5));
    }

    #[test]
    fn invalid_options_fail_at_decoration() {
        let cache = Cache::new(Arc::new(MemoryBackend::new()));
        let err = cache
            .cached(CacheOptions::for_prefix("p").with_ttl(0))
            .expect_err("zero ttl");
        assert!(matches!(err, CacheError::InvalidOptions(_)));
    }
}
