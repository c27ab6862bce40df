use oscroute_router::{ConfigError, ServerConfig};
use std::io::Write;
use tempfile::NamedTempFile;

#[test]
fn test_load_from_file() {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(
        file,
        r#"
host = "0.0.0.0"
port = 57120
queue_capacity = 64
drain_grace_ms = 250
"#
    )
    .unwrap();

    let config = ServerConfig::from_file(file.path()).unwrap();
    assert_eq!(config.bind_addr(), "0.0.0.0:57120");
    assert_eq!(config.queue_capacity, 64);
    assert_eq!(config.drain_grace().as_millis(), 250);
    assert_eq!(config.workers, ServerConfig::default().workers);
}

#[test]
fn test_missing_file() {
    let dir = tempfile::tempdir().unwrap();
    let err = ServerConfig::from_file(dir.path().join("absent.toml")).unwrap_err();
    assert!(matches!(err, ConfigError::Io(_)));
}

#[test]
fn test_invalid_values_in_file() {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "max_packet_size = 100000").unwrap();

    let err = ServerConfig::from_file(file.path()).unwrap_err();
    assert!(matches!(err, ConfigError::Invalid(_)));
}
