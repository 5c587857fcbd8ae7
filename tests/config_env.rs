use std::io::Write;

use clap::Parser;
use scopekit::config::{self, CacheBackendKind, CliArgs, LoadError, LogFormat};
use serial_test::serial;

const ENV_KEYS: [&str; 4] = [
    "SCOPEKIT__DATABASE__WRITER_URL",
    "SCOPEKIT__DATABASE__READER_URLS",
    "SCOPEKIT__LOGGING__JSON",
    "SCOPEKIT__CACHE__DEFAULT_TTL_SECONDS",
];

fn clear_env() {
    for key in ENV_KEYS {
        // SAFETY: tests touching the process environment are serialized.
        unsafe { std::env::remove_var(key) };
    }
}

fn set_env(key: &str, value: &str) {
    // SAFETY: tests touching the process environment are serialized.
    unsafe { std::env::set_var(key, value) };
}

#[test]
#[serial]
fn environment_supplies_writer_and_reader_list() {
    clear_env();
    set_env("SCOPEKIT__DATABASE__WRITER_URL", "postgres://env-writer/app");
    set_env(
        "SCOPEKIT__DATABASE__READER_URLS",
        "postgres://env-reader-1/app,postgres://env-reader-2/app",
    );
    set_env("SCOPEKIT__LOGGING__JSON", "true");
    set_env("SCOPEKIT__CACHE__DEFAULT_TTL_SECONDS", "90");

    let args = CliArgs::parse_from(["scopekit", "check"]);
    let settings = config::load(&args).expect("settings");
    clear_env();

    assert_eq!(settings.database.writer_url, "postgres://env-writer/app");
    assert_eq!(
        settings.database.reader_urls,
        ["postgres://env-reader-1/app", "postgres://env-reader-2/app"]
    );
    assert_eq!(settings.logging.format, LogFormat::Json);
    assert_eq!(settings.cache.default_ttl.as_secs(), 90);
}

#[test]
#[serial]
fn cli_overrides_environment() {
    clear_env();
    set_env("SCOPEKIT__DATABASE__WRITER_URL", "postgres://env-writer/app");

    let args = CliArgs::parse_from([
        "scopekit",
        "--writer-url",
        "postgres://cli-writer/app",
        "check",
    ]);
    let settings = config::load(&args).expect("settings");
    clear_env();

    assert_eq!(settings.database.writer_url, "postgres://cli-writer/app");
}

#[test]
#[serial]
fn config_file_is_layered_below_environment() {
    clear_env();
    let path = std::env::temp_dir().join(format!("scopekit-{}.toml", uuid::Uuid::new_v4()));
    let mut file = std::fs::File::create(&path).expect("config file");
    writeln!(
        file,
        "[database]\nwriter_url = \"postgres://file-writer/app\"\nmax_connections = 3\n\n[cache]\nbackend = \"memory\""
    )
    .expect("write config");

    let path_arg = path.to_string_lossy().into_owned();
    let args = CliArgs::parse_from(["scopekit", "--config-file", path_arg.as_str(), "check"]);
    let from_file = config::load(&args).expect("settings");

    set_env("SCOPEKIT__DATABASE__WRITER_URL", "postgres://env-writer/app");
    let from_env = config::load(&args).expect("settings");
    clear_env();
    let _ = std::fs::remove_file(&path);

    assert_eq!(from_file.database.writer_url, "postgres://file-writer/app");
    assert_eq!(from_file.database.max_connections.get(), 3);
    assert_eq!(from_file.cache.backend, CacheBackendKind::Memory);
    assert_eq!(from_env.database.writer_url, "postgres://env-writer/app");
}

#[test]
#[serial]
fn missing_writer_fails_fast() {
    clear_env();
    let args = CliArgs::parse_from(["scopekit", "check"]);
    let err = config::load(&args).expect_err("writer is required");
    assert!(matches!(
        err,
        LoadError::Invalid {
            key: "database.writer_url",
            ..
        }
    ));
}
