//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{
    num::{NonZeroU32, NonZeroU64, NonZeroUsize},
    path::PathBuf,
    str::FromStr,
    time::Duration,
};

use clap::{Args, Parser, Subcommand, ValueHint, builder::BoolishValueParser};
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

use crate::cache::{DEFAULT_MEMORY_CAPACITY, DEFAULT_TTL_SECONDS};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "scopekit";
const ENV_PREFIX: &str = "SCOPEKIT";
const DEFAULT_DB_MAX_CONNECTIONS: u32 = 8;

/// Command-line arguments for the scopekit binary.
#[derive(Debug, Parser)]
#[command(
    name = "scopekit",
    version,
    about = "Session routing and cache maintenance"
)]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(
        long = "config-file",
        env = "SCOPEKIT_CONFIG_FILE",
        value_name = "PATH",
        value_hint = ValueHint::FilePath,
        global = true
    )]
    pub config_file: Option<PathBuf>,

    #[command(flatten)]
    pub overrides: Overrides,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Connect to every configured store and the cache backend and report their health.
    Check,
    /// Cache maintenance.
    Cache(CacheArgs),
}

#[derive(Debug, Args, Clone)]
pub struct CacheArgs {
    #[command(subcommand)]
    pub command: CacheCommand,
}

#[derive(Debug, Subcommand, Clone)]
pub enum CacheCommand {
    /// Remove cached entries by key prefix or by tag.
    Purge(PurgeArgs),
}

#[derive(Debug, Args, Clone)]
#[group(required = true, multiple = false)]
pub struct PurgeArgs {
    /// Remove every entry whose key starts with PREFIX.
    #[arg(long, value_name = "PREFIX")]
    pub prefix: Option<String>,

    /// Remove every entry stored under TAG.
    #[arg(long, value_name = "TAG")]
    pub tag: Option<String>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct Overrides {
    /// Override the writer database URL.
    #[arg(long = "writer-url", value_name = "URL", global = true)]
    pub writer_url: Option<String>,

    /// Replace the reader database URLs; repeat for several readers.
    #[arg(long = "reader-url", value_name = "URL", global = true)]
    pub reader_urls: Vec<String>,

    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL", global = true)]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new(),
        global = true
    )]
    pub log_json: Option<bool>,

    /// Override the cache backend (memory|redis).
    #[arg(long = "cache-backend", value_name = "BACKEND", global = true)]
    pub cache_backend: Option<String>,

    /// Override the Redis URL used by the redis cache backend.
    #[arg(long = "redis-url", value_name = "URL", global = true)]
    pub redis_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub logging: LoggingSettings,
    pub database: DatabaseSettings,
    pub cache: CacheSettings,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct DatabaseSettings {
    pub writer_url: String,
    pub reader_urls: Vec<String>,
    pub max_connections: NonZeroU32,
    pub reader_selection: ReaderSelection,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReaderSelection {
    RoundRobin,
    First,
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub backend: CacheBackendKind,
    pub default_ttl: Duration,
    /// Entry limit of the in-process backend.
    pub memory_capacity: NonZeroUsize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheBackendKind {
    Memory,
    Redis { url: String },
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(
        Environment::with_prefix(ENV_PREFIX)
            .separator("__")
            .list_separator(",")
            .with_list_parse_key("database.reader_urls")
            .try_parsing(true),
    );

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;
    raw.apply_overrides(&cli.overrides);

    Settings::from_raw(raw)
}

/// Resolve configuration using the process arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    logging: RawLoggingSettings,
    database: RawDatabaseSettings,
    cache: RawCacheSettings,
}

impl RawSettings {
    fn apply_overrides(&mut self, overrides: &Overrides) {
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(url) = overrides.writer_url.as_ref() {
            self.database.writer_url = Some(url.clone());
        }
        if !overrides.reader_urls.is_empty() {
            self.database.reader_urls = Some(overrides.reader_urls.clone());
        }
        if let Some(backend) = overrides.cache_backend.as_ref() {
            self.cache.backend = Some(backend.clone());
        }
        if let Some(url) = overrides.redis_url.as_ref() {
            self.cache.redis_url = Some(url.clone());
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            logging,
            database,
            cache,
        } = raw;

        let logging = build_logging_settings(logging)?;
        let database = build_database_settings(database)?;
        let cache = build_cache_settings(cache)?;

        Ok(Self {
            logging,
            database,
            cache,
        })
    }
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_database_settings(database: RawDatabaseSettings) -> Result<DatabaseSettings, LoadError> {
    let writer_url = non_empty(database.writer_url).ok_or_else(|| {
        LoadError::invalid("database.writer_url", "a writer database URL is required")
    })?;

    let mut reader_urls = Vec::new();
    for url in database.reader_urls.unwrap_or_default() {
        match non_empty(Some(url)) {
            Some(url) => reader_urls.push(url),
            None => {
                return Err(LoadError::invalid(
                    "database.reader_urls",
                    "reader URLs must not be empty",
                ));
            }
        }
    }

    let max_connections = non_zero_u32(
        database
            .max_connections
            .unwrap_or(DEFAULT_DB_MAX_CONNECTIONS.into()),
        "database.max_connections",
    )?;

    let reader_selection = match database.reader_selection.as_deref().map(str::trim) {
        None | Some("round_robin") => ReaderSelection::RoundRobin,
        Some("first") => ReaderSelection::First,
        Some(other) => {
            return Err(LoadError::invalid(
                "database.reader_selection",
                format!("expected `round_robin` or `first`, got `{other}`"),
            ));
        }
    };

    Ok(DatabaseSettings {
        writer_url,
        reader_urls,
        max_connections,
        reader_selection,
    })
}

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheSettings, LoadError> {
    let backend = match cache.backend.as_deref().map(str::trim) {
        None | Some("memory") => CacheBackendKind::Memory,
        Some("redis") => {
            if !cfg!(feature = "redis") {
                return Err(LoadError::invalid(
                    "cache.backend",
                    "the redis backend requires building with the `redis` feature",
                ));
            }
            let url = non_empty(cache.redis_url).ok_or_else(|| {
                LoadError::invalid("cache.redis_url", "required when cache.backend is `redis`")
            })?;
            CacheBackendKind::Redis { url }
        }
        Some(other) => {
            return Err(LoadError::invalid(
                "cache.backend",
                format!("expected `memory` or `redis`, got `{other}`"),
            ));
        }
    };

    let ttl_seconds = cache.default_ttl_seconds.unwrap_or(DEFAULT_TTL_SECONDS);
    let default_ttl = NonZeroU64::new(ttl_seconds)
        .map(|seconds| Duration::from_secs(seconds.get()))
        .ok_or_else(|| {
            LoadError::invalid("cache.default_ttl_seconds", "must be greater than zero")
        })?;

    let memory_capacity = cache
        .memory_capacity
        .map_or(NonZeroUsize::new(DEFAULT_MEMORY_CAPACITY), NonZeroUsize::new)
        .ok_or_else(|| LoadError::invalid("cache.memory_capacity", "must be greater than zero"))?;

    Ok(CacheSettings {
        backend,
        default_ttl,
        memory_capacity,
    })
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    })
}

fn non_zero_u32(value: u64, key: &'static str) -> Result<NonZeroU32, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    let value_u32: u32 = value
        .try_into()
        .map_err(|_| LoadError::invalid(key, "value exceeds supported range for u32"))?;
    NonZeroU32::new(value_u32).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawDatabaseSettings {
    writer_url: Option<String>,
    reader_urls: Option<Vec<String>>,
    max_connections: Option<u64>,
    reader_selection: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    backend: Option<String>,
    redis_url: Option<String>,
    default_ttl_seconds: Option<u64>,
    memory_capacity: Option<usize>,
}

#[cfg(test)]
mod tests;
