use super::*;

fn raw_with_writer() -> RawSettings {
    let mut raw = RawSettings::default();
    raw.database.writer_url = Some("postgres://writer/app".to_string());
    raw
}

#[test]
fn defaults_apply_when_only_writer_is_set() {
    let settings = Settings::from_raw(raw_with_writer()).expect("valid settings");

    assert_eq!(settings.logging.level, LevelFilter::INFO);
    assert_eq!(settings.logging.format, LogFormat::Compact);
    assert_eq!(settings.database.writer_url, "postgres://writer/app");
    assert!(settings.database.reader_urls.is_empty());
    assert_eq!(
        settings.database.max_connections.get(),
        DEFAULT_DB_MAX_CONNECTIONS
    );
    assert_eq!(
        settings.database.reader_selection,
        ReaderSelection::RoundRobin
    );
    assert_eq!(settings.cache.backend, CacheBackendKind::Memory);
    assert_eq!(
        settings.cache.default_ttl,
        Duration::from_secs(DEFAULT_TTL_SECONDS)
    );
    assert_eq!(settings.cache.memory_capacity.get(), DEFAULT_MEMORY_CAPACITY);
}

#[test]
fn missing_writer_is_rejected() {
    let err = Settings::from_raw(RawSettings::default()).expect_err("writer required");
    assert!(matches!(
        err,
        LoadError::Invalid {
            key: "database.writer_url",
            ..
        }
    ));

    let mut raw = RawSettings::default();
    raw.database.writer_url = Some("   ".to_string());
    assert!(Settings::from_raw(raw).is_err());
}

#[test]
fn cli_overrides_take_highest_precedence() {
    let mut raw = raw_with_writer();
    raw.logging.level = Some("info".to_string());
    raw.database.reader_urls = Some(vec!["postgres://file-reader/app".to_string()]);

    let overrides = Overrides {
        writer_url: Some("postgres://cli-writer/app".to_string()),
        reader_urls: vec![
            "postgres://reader-1/app".to_string(),
            "postgres://reader-2/app".to_string(),
        ],
        log_level: Some("debug".to_string()),
        log_json: Some(true),
        ..Default::default()
    };

    raw.apply_overrides(&overrides);
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert_eq!(settings.database.writer_url, "postgres://cli-writer/app");
    assert_eq!(
        settings.database.reader_urls,
        ["postgres://reader-1/app", "postgres://reader-2/app"]
    );
    assert_eq!(settings.logging.level, LevelFilter::DEBUG);
    assert_eq!(settings.logging.format, LogFormat::Json);
}

#[test]
fn invalid_values_name_their_key() {
    let mut raw = raw_with_writer();
    raw.logging.level = Some("loud".to_string());
    assert!(matches!(
        Settings::from_raw(raw),
        Err(LoadError::Invalid {
            key: "logging.level",
            ..
        })
    ));

    let mut raw = raw_with_writer();
    raw.database.max_connections = Some(0);
    assert!(matches!(
        Settings::from_raw(raw),
        Err(LoadError::Invalid {
            key: "database.max_connections",
            ..
        })
    ));

    let mut raw = raw_with_writer();
    raw.database.reader_selection = Some("random".to_string());
    assert!(matches!(
        Settings::from_raw(raw),
        Err(LoadError::Invalid {
            key: "database.reader_selection",
            ..
        })
    ));

    let mut raw = raw_with_writer();
    raw.cache.default_ttl_seconds = Some(0);
    assert!(matches!(
        Settings::from_raw(raw),
        Err(LoadError::Invalid {
            key: "cache.default_ttl_seconds",
            ..
        })
    ));

    let mut raw = raw_with_writer();
    raw.cache.memory_capacity = Some(0);
    assert!(matches!(
        Settings::from_raw(raw),
        Err(LoadError::Invalid {
            key: "cache.memory_capacity",
            ..
        })
    ));

    let mut raw = raw_with_writer();
    raw.cache.backend = Some("memcached".to_string());
    assert!(matches!(
        Settings::from_raw(raw),
        Err(LoadError::Invalid {
            key: "cache.backend",
            ..
        })
    ));
}

#[test]
fn memory_capacity_is_configurable() {
    let mut raw = raw_with_writer();
    raw.cache.memory_capacity = Some(128);
    let settings = Settings::from_raw(raw).expect("valid settings");
    assert_eq!(settings.cache.memory_capacity.get(), 128);
}

#[test]
fn reader_selection_accepts_first() {
    let mut raw = raw_with_writer();
    raw.database.reader_selection = Some("first".to_string());
    let settings = Settings::from_raw(raw).expect("valid settings");
    assert_eq!(settings.database.reader_selection, ReaderSelection::First);
}

#[cfg(feature = "redis")]
#[test]
fn redis_backend_requires_url() {
    let mut raw = raw_with_writer();
    raw.cache.backend = Some("redis".to_string());
    assert!(matches!(
        Settings::from_raw(raw.clone()),
        Err(LoadError::Invalid {
            key: "cache.redis_url",
            ..
        })
    ));

    raw.cache.redis_url = Some("redis://localhost:6379".to_string());
    let settings = Settings::from_raw(raw).expect("valid settings");
    assert_eq!(
        settings.cache.backend,
        CacheBackendKind::Redis {
            url: "redis://localhost:6379".to_string()
        }
    );
}

#[cfg(not(feature = "redis"))]
#[test]
fn redis_backend_requires_feature() {
    let mut raw = raw_with_writer();
    raw.cache.backend = Some("redis".to_string());
    raw.cache.redis_url = Some("redis://localhost:6379".to_string());
    assert!(matches!(
        Settings::from_raw(raw),
        Err(LoadError::Invalid {
            key: "cache.backend",
            ..
        })
    ));
}

#[test]
fn parse_check_with_global_overrides() {
    let args = CliArgs::parse_from([
        "scopekit",
        "check",
        "--writer-url",
        "postgres://writer/app",
        "--reader-url",
        "postgres://reader-1/app",
        "--reader-url",
        "postgres://reader-2/app",
        "--log-json",
        "yes",
    ]);

    assert!(matches!(args.command, Command::Check));
    assert_eq!(
        args.overrides.writer_url.as_deref(),
        Some("postgres://writer/app")
    );
    assert_eq!(args.overrides.reader_urls.len(), 2);
    assert_eq!(args.overrides.log_json, Some(true));
}

#[test]
fn parse_cache_purge_by_prefix_or_tag() {
    let args = CliArgs::parse_from(["scopekit", "cache", "purge", "--prefix", "get_user"]);
    match args.command {
        Command::Cache(CacheArgs {
            command: CacheCommand::Purge(purge),
        }) => {
            assert_eq!(purge.prefix.as_deref(), Some("get_user"));
            assert!(purge.tag.is_none());
        }
        other => panic!("unexpected command: {other:?}"),
    }

    let args = CliArgs::parse_from(["scopekit", "cache", "purge", "--tag", "users"]);
    assert!(matches!(
        args.command,
        Command::Cache(CacheArgs {
            command: CacheCommand::Purge(PurgeArgs { tag: Some(_), .. })
        })
    ));
}

#[test]
fn cache_purge_requires_exactly_one_selector() {
    assert!(CliArgs::try_parse_from(["scopekit", "cache", "purge"]).is_err());
    assert!(
        CliArgs::try_parse_from([
            "scopekit", "cache", "purge", "--prefix", "p", "--tag", "t"
        ])
        .is_err()
    );
}
