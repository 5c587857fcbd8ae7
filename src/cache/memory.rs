//! In-process cache backend.

use std::collections::{HashMap, HashSet};
use std::num::NonZeroUsize;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use lru::LruCache;
use tracing::debug;

use crate::util::lock::{rw_read, rw_write};

use super::CacheError;
use super::backend::CacheBackend;

const SOURCE: &str = "cache::memory";

/// Entry limit used by [`MemoryBackend::new`].
pub const DEFAULT_MEMORY_CAPACITY: usize = 10_000;

struct Entry {
    value: Vec<u8>,
    /// `None` when the TTL is too large to represent as an `Instant`.
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|expires_at| expires_at <= now)
    }
}

/// LRU-bounded store with lazy expiry.
///
/// Reads drop the expired entry they hit. Bulk deletes sweep every expired
/// entry, and so does a write into a full store before the least recently
/// used live entry is evicted. Keys leaving the store by any of these paths
/// are removed from their tag sets.
pub struct MemoryBackend {
    entries: RwLock<LruCache<String, Entry>>,
    tags: RwLock<HashMap<String, HashSet<String>>>,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::with_capacity(
            NonZeroUsize::new(DEFAULT_MEMORY_CAPACITY).unwrap_or(NonZeroUsize::MIN),
        )
    }

    /// Store holding at most `capacity` entries.
    pub fn with_capacity(capacity: NonZeroUsize) -> Self {
        Self {
            entries: RwLock::new(LruCache::new(capacity)),
            tags: RwLock::new(HashMap::new()),
        }
    }

    pub fn capacity(&self) -> usize {
        rw_read(&self.entries, SOURCE, "capacity").cap().get()
    }

    /// Number of stored entries, expired ones not yet swept included.
    pub fn len(&self) -> usize {
        rw_read(&self.entries, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Keys currently registered under `tag`.
    pub fn tagged_keys(&self, tag: &str) -> HashSet<String> {
        rw_read(&self.tags, SOURCE, "tagged_keys")
            .get(tag)
            .cloned()
            .unwrap_or_default()
    }

    fn forget_tagged(&self, removed: &[String], op: &'static str) {
        if removed.is_empty() {
            return;
        }
        let mut tags = rw_write(&self.tags, SOURCE, op);
        for keys in tags.values_mut() {
            for key in removed {
                keys.remove(key);
            }
        }
        tags.retain(|_, keys| !keys.is_empty());
    }
}

fn sweep_expired(entries: &mut LruCache<String, Entry>, now: Instant) -> Vec<String> {
    let expired: Vec<String> = entries
        .iter()
        .filter(|(_, entry)| entry.is_expired(now))
        .map(|(key, _)| key.clone())
        .collect();
    for key in &expired {
        entries.pop(key);
    }
    expired
}

impl std::fmt::Debug for MemoryBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryBackend")
            .field("entries", &self.len())
            .field("capacity", &self.capacity())
            .finish()
    }
}

#[async_trait]
impl CacheBackend for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let now = Instant::now();
        let expired = {
            let mut entries = rw_write(&self.entries, SOURCE, "get");
            let hit = entries
                .get(key)
                .map(|entry| (!entry.is_expired(now)).then(|| entry.value.clone()));
            match hit {
                Some(Some(value)) => return Ok(Some(value)),
                Some(None) => entries.pop(key).is_some(),
                None => false,
            }
        };

        if expired {
            debug!(key, "expired cache entry dropped");
            self.forget_tagged(&[key.to_string()], "get.tags");
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), CacheError> {
        let now = Instant::now();
        let entry = Entry {
            value,
            expires_at: now.checked_add(ttl),
        };

        let removed = {
            let mut entries = rw_write(&self.entries, SOURCE, "set");
            let mut removed = Vec::new();
            if entries.len() >= entries.cap().get() && !entries.contains(key) {
                removed = sweep_expired(&mut entries, now);
            }
            if let Some((evicted, _)) = entries.push(key.to_string(), entry) {
                if evicted != key {
                    debug!(key = %evicted, "cache entry evicted");
                    removed.push(evicted);
                }
            }
            removed
        };

        self.forget_tagged(&removed, "set.tags");
        Ok(())
    }

    async fn delete_by_prefix(&self, prefix: &str) -> Result<u64, CacheError> {
        let now = Instant::now();
        let (matching, expired) = {
            let mut entries = rw_write(&self.entries, SOURCE, "delete_by_prefix");
            let expired = sweep_expired(&mut entries, now);
            let matching: Vec<String> = entries
                .iter()
                .map(|(key, _)| key)
                .filter(|key| key.starts_with(prefix))
                .cloned()
                .collect();
            for key in &matching {
                entries.pop(key);
            }
            (matching, expired)
        };

        self.forget_tagged(&matching, "delete_by_prefix.tags");
        self.forget_tagged(&expired, "delete_by_prefix.expired_tags");
        Ok(matching.len() as u64)
    }

    async fn tag_add(&self, tag: &str, key: &str) -> Result<(), CacheError> {
        rw_write(&self.tags, SOURCE, "tag_add")
            .entry(tag.to_string())
            .or_default()
            .insert(key.to_string());
        Ok(())
    }

    async fn delete_by_tag(&self, tag: &str) -> Result<u64, CacheError> {
        let keys = rw_write(&self.tags, SOURCE, "delete_by_tag.tags").remove(tag);

        let now = Instant::now();
        let (removed, expired) = {
            let mut entries = rw_write(&self.entries, SOURCE, "delete_by_tag");
            let removed = keys
                .iter()
                .flatten()
                .filter(|key| entries.pop(key.as_str()).is_some())
                .count();
            (removed, sweep_expired(&mut entries, now))
        };

        self.forget_tagged(&expired, "delete_by_tag.expired_tags");
        Ok(removed as u64)
    }

    async fn health_check(&self) -> Result<(), CacheError> {
        Ok(())
    }
}
