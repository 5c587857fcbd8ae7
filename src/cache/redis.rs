//! Redis cache backend.
//!
//! Uses `redis::aio::ConnectionManager` for a multiplexed, reconnecting
//! connection. Prefix deletion walks the keyspace with `SCAN` instead of
//! `KEYS`; tag key sets are Redis sets under [`TAG_SET_PREFIX`] and are never
//! removed by a prefix delete.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use tracing::debug;

use crate::util::redact_url;

use super::CacheError;
use super::backend::CacheBackend;

pub const TAG_SET_PREFIX: &str = "scopekit:tag:";

const SCAN_BATCH: usize = 100;

#[derive(Clone)]
pub struct RedisBackend {
    connection_manager: ConnectionManager,
}

impl std::fmt::Debug for RedisBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisBackend")
            .field("connection_manager", &"ConnectionManager")
            .finish()
    }
}

impl RedisBackend {
    pub async fn connect(url: &str) -> Result<Self, CacheError> {
        let client = redis::Client::open(url)
            .map_err(|err| unavailable(format!("invalid redis url: {err}")))?;
        let connection_manager = ConnectionManager::new(client)
            .await
            .map_err(|err| unavailable(format!("failed to connect: {err}")))?;

        debug!(url = %redact_url(url), "redis cache backend connected");
        Ok(Self { connection_manager })
    }
}

#[async_trait]
impl CacheBackend for RedisBackend {
    fn name(&self) -> &'static str {
        "redis"
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let mut conn = self.connection_manager.clone();
        redis::cmd("GET")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|err| unavailable(format!("GET failed: {err}")))
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), CacheError> {
        let mut conn = self.connection_manager.clone();
        let ttl_seconds = ttl.as_secs().max(1);
        redis::cmd("SETEX")
            .arg(key)
            .arg(ttl_seconds)
            .arg(value)
            .query_async::<()>(&mut conn)
            .await
            .map_err(|err| unavailable(format!("SETEX failed: {err}")))
    }

    async fn delete_by_prefix(&self, prefix: &str) -> Result<u64, CacheError> {
        let mut conn = self.connection_manager.clone();
        let pattern = format!("{}*", escape_glob(prefix));
        let mut deleted: u64 = 0;
        let mut cursor: u64 = 0;

        loop {
            let (next_cursor, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(&mut conn)
                .await
                .map_err(|err| unavailable(format!("SCAN failed: {err}")))?;

            let keys: Vec<String> = keys
                .into_iter()
                .filter(|key| !is_tag_set_key(key))
                .collect();
            if !keys.is_empty() {
                let count: u64 = redis::cmd("DEL")
                    .arg(&keys)
                    .query_async(&mut conn)
                    .await
                    .map_err(|err| unavailable(format!("DEL failed: {err}")))?;
                deleted += count;
            }

            cursor = next_cursor;
            if cursor == 0 {
                break;
            }
        }

        debug!(prefix, deleted, "redis prefix delete");
        Ok(deleted)
    }

    async fn tag_add(&self, tag: &str, key: &str) -> Result<(), CacheError> {
        let mut conn = self.connection_manager.clone();
        redis::cmd("SADD")
            .arg(tag_set_key(tag))
            .arg(key)
            .query_async::<()>(&mut conn)
            .await
            .map_err(|err| unavailable(format!("SADD failed: {err}")))
    }

    async fn delete_by_tag(&self, tag: &str) -> Result<u64, CacheError> {
        let mut conn = self.connection_manager.clone();
        let set_key = tag_set_key(tag);
        let keys: Vec<String> = redis::cmd("SMEMBERS")
            .arg(&set_key)
            .query_async(&mut conn)
            .await
            .map_err(|err| unavailable(format!("SMEMBERS failed: {err}")))?;

        let mut deleted: u64 = 0;
        for batch in keys.chunks(SCAN_BATCH) {
            let count: u64 = redis::cmd("DEL")
                .arg(batch)
                .query_async(&mut conn)
                .await
                .map_err(|err| unavailable(format!("DEL failed: {err}")))?;
            deleted += count;
        }

        redis::cmd("DEL")
            .arg(&set_key)
            .query_async::<()>(&mut conn)
            .await
            .map_err(|err| unavailable(format!("DEL failed: {err}")))?;

        debug!(tag, deleted, "redis tag delete");
        Ok(deleted)
    }

    async fn health_check(&self) -> Result<(), CacheError> {
        let mut conn = self.connection_manager.clone();
        let pong: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|err| unavailable(format!("PING failed: {err}")))?;
        if pong == "PONG" {
            Ok(())
        } else {
            Err(unavailable(format!("unexpected PING reply `{pong}`")))
        }
    }
}

fn unavailable(message: String) -> CacheError {
    CacheError::BackendUnavailable {
        backend: "redis",
        message,
    }
}

fn tag_set_key(tag: &str) -> String {
    format!("{TAG_SET_PREFIX}{tag}")
}

/// Tag key sets share the keyspace with entries; prefix deletes leave them alone.
fn is_tag_set_key(key: &str) -> bool {
    key.starts_with(TAG_SET_PREFIX)
}

/// Escape glob metacharacters so `SCAN MATCH` treats the prefix literally.
fn escape_glob(prefix: &str) -> String {
    let mut escaped = String::with_capacity(prefix.len());
    for ch in prefix.chars() {
        if matches!(ch, '*' | '?' | '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn glob_metacharacters_are_escaped() {
        assert_eq!(escape_glob("get_user::"), "get_user::");
        assert_eq!(escape_glob("a*b?[c]\\"), "a\\*b\\?\\[c\\]\\\\");
    }

    #[test]
    fn tag_sets_live_under_their_own_prefix() {
        assert_eq!(tag_set_key("users"), "scopekit:tag:users");
        assert!(is_tag_set_key(&tag_set_key("users")));
        assert!(!is_tag_set_key("scopekit::fetch_user::abc"));
    }
}
