// tests/config_tests.rs

use std::io::Write;
use std::time::Duration;
use tempfile::NamedTempFile;
use volmgr::config::{ConfigError, load};

fn write_config(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

#[test]
fn full_config_parses_with_humantime_intervals() {
    let file = write_config(
        r#"
[logging]
enable = true
file = "volmgr.log"
level = "DEBUG"

[broker]
encryption_namespace = '\\.\root\custom\Encryption'
device_namespace = '\\.\root\custom'

[poll]
encrypt_interval = "750ms"
decrypt_interval = "2s"

[watch]
queue_capacity = 16
"#,
    );

    let cfg = load(file.path()).unwrap();
    assert!(cfg.logging.enable);
    assert_eq!(cfg.logging.file.as_deref(), Some("volmgr.log"));
    assert_eq!(cfg.logging.level, "DEBUG");
    assert_eq!(cfg.broker.encryption_namespace, r"\\.\root\custom\Encryption");
    assert_eq!(cfg.poll.encrypt_interval, Duration::from_millis(750));
    assert_eq!(cfg.poll.decrypt_interval, Duration::from_secs(2));
    assert_eq!(cfg.watch.queue_capacity, 16);
}

#[test]
fn missing_tables_fall_back_to_defaults() {
    let file = write_config("");
    let cfg = load(file.path()).unwrap();

    assert!(!cfg.logging.enable);
    assert_eq!(cfg.logging.level, "INFO");
    assert!(cfg.broker.encryption_namespace.contains("MicrosoftVolumeEncryption"));
    assert_eq!(cfg.poll.encrypt_interval, Duration::from_millis(500));
    assert_eq!(cfg.poll.decrypt_interval, Duration::from_millis(200));
    assert_eq!(cfg.watch.queue_capacity, volmgr::watch::DEFAULT_QUEUE_CAPACITY);
}

#[test]
fn an_invalid_duration_is_a_typed_error() {
    let file = write_config(
        r#"
[poll]
encrypt_interval = "soon"
"#,
    );

    let err = load(file.path()).unwrap_err();
    assert!(matches!(err, ConfigError::InvalidDuration(ref raw, _) if raw == "soon"));
}

#[test]
fn a_missing_file_is_an_io_error() {
    let err = load(std::path::Path::new("/definitely/not/here.toml")).unwrap_err();
    assert!(matches!(err, ConfigError::Io(_)));
}

#[test]
fn malformed_toml_is_a_parse_error() {
    let file = write_config("[poll\nencrypt_interval = ");
    let err = load(file.path()).unwrap_err();
    assert!(matches!(err, ConfigError::Toml(_)));
}
