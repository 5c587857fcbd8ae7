//! Function-result cache with prefix and tag invalidation.
//!
//! [`Cache::cached`] validates a set of [`CacheOptions`] once and returns a
//! [`Cached`] guard; [`Cached::call`] derives a key from the function identity
//! and its arguments, answers from the [`CacheBackend`] on a hit and stores the
//! computed value on a miss.
//!
//! ```ignore
//! const USERS: Tag = Tag::new("users");
//!
//! let cache = Cache::new(Arc::new(MemoryBackend::new()));
//! let fetch_user = cache.cached(CacheOptions::for_tag(USERS))?;
//! let user: User = fetch_user
//!     .call("fetch_user", &(id,), || repo.load_user(id))
//!     .await?;
//!
//! cache.remove_by_tag(&USERS).await?;
//! ```

pub mod backend;
pub mod facade;
pub mod keys;
pub mod memory;
pub mod options;
#[cfg(feature = "redis")]
pub mod redis;

use thiserror::Error;

pub use backend::CacheBackend;
pub use facade::{Cache, Cached};
pub use keys::{DefaultKeyMaker, KeyMaker, KeySpec};
pub use memory::{DEFAULT_MEMORY_CAPACITY, MemoryBackend};
pub use options::{CacheOptions, DEFAULT_TTL_SECONDS, Tag};
#[cfg(feature = "redis")]
pub use redis::RedisBackend;

pub(crate) const METRIC_CACHE_HIT_TOTAL: &str = "scopekit_cache_hit_total";
pub(crate) const METRIC_CACHE_MISS_TOTAL: &str = "scopekit_cache_miss_total";
pub(crate) const METRIC_CACHE_BACKEND_ERROR_TOTAL: &str = "scopekit_cache_backend_error_total";

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("invalid cache options: {0}")]
    InvalidOptions(&'static str),
    #[error("cache backend `{backend}` unavailable: {message}")]
    BackendUnavailable {
        backend: &'static str,
        message: String,
    },
    #[error("cache value could not be serialized: {0}")]
    Serialization(#[from] serde_json::Error),
}
