use super::*;

#[test]
fn test_default_config_is_valid() {
    let config = Config::default();
    assert!(config.validate().is_ok());
    assert_eq!(config.storage.driver, STORAGE_DRIVER_MEMORY);
    assert_eq!(config.http.port, DEFAULT_HTTP_PORT);
}

#[test]
fn test_sqlite_requires_dsn() {
    let config = Config {
        storage: StorageConfig {
            driver: STORAGE_DRIVER_SQLITE.to_string(),
            dsn: String::new(),
        },
        ..Default::default()
    };
    assert!(config.validate().is_err());
}

#[test]
fn test_unknown_driver_rejected() {
    let config = Config {
        storage: StorageConfig {
            driver: "cassandra".to_string(),
            dsn: "whatever".to_string(),
        },
        ..Default::default()
    };
    assert!(config.validate().is_err());
}

#[test]
fn test_ttl_must_be_positive() {
    let config = Config {
        session_idle_ttl_secs: 0,
        ..Default::default()
    };
    assert!(config.validate().is_err());
}
