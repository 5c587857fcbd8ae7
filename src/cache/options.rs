//! Options accepted by [`Cache::cached`](super::Cache::cached).

use std::borrow::Cow;
use std::fmt;
use std::time::Duration;

use super::CacheError;
use super::keys::KeySpec;

pub const DEFAULT_TTL_SECONDS: u64 = 60;

/// Grouping label for bulk invalidation across functions and prefixes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Tag(Cow<'static, str>);

impl Tag {
    pub const fn new(name: &'static str) -> Self {
        Self(Cow::Borrowed(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for Tag {
    fn from(name: String) -> Self {
        Self(Cow::Owned(name))
    }
}

impl From<&'static str> for Tag {
    fn from(name: &'static str) -> Self {
        Self::new(name)
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Exactly one of `prefix` and `tag` must be set. `ttl` is in whole seconds;
/// `None` uses the cache's default TTL.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CacheOptions {
    pub prefix: Option<String>,
    pub tag: Option<Tag>,
    pub ttl: Option<u64>,
}

impl CacheOptions {
    pub fn for_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: Some(prefix.into()),
            ..Self::default()
        }
    }

    pub fn for_tag(tag: impl Into<Tag>) -> Self {
        Self {
            tag: Some(tag.into()),
            ..Self::default()
        }
    }

    pub fn with_ttl(mut self, seconds: u64) -> Self {
        self.ttl = Some(seconds);
        self
    }

    pub(crate) fn validate(self, default_ttl: Duration) -> Result<(KeySpec, Duration), CacheError> {
        let spec = match (self.prefix, self.tag) {
            (Some(_), Some(_)) => {
                return Err(CacheError::InvalidOptions(
                    "prefix and tag are mutually exclusive",
                ));
            }
            (None, None) => {
                return Err(CacheError::InvalidOptions(
                    "one of prefix or tag is required",
                ));
            }
            (Some(prefix), None) if prefix.is_empty() => {
                return Err(CacheError::InvalidOptions("prefix must not be empty"));
            }
            (None, Some(tag)) if tag.as_str().is_empty() => {
                return Err(CacheError::InvalidOptions("tag must not be empty"));
            }
            (Some(prefix), None) => KeySpec::Prefix(prefix),
            (None, Some(tag)) => KeySpec::Tag(tag),
        };
        let ttl = match self.ttl {
            Some(0) => {
                return Err(CacheError::InvalidOptions(
                    "ttl must be a positive number of seconds",
                ));
            }
            Some(seconds) => Duration::from_secs(seconds),
            None => default_ttl,
        };
        Ok((spec, ttl))
    }
}
