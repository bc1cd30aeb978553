//! Config defaults and round-trip tests

use edut::Config;

#[test]
fn test_default_config_values() {
    let config = Config::default();
    assert!(config.bootstrap_server.is_none());
    assert_eq!(config.request_timeout_ms, 10_000);
    assert_eq!(config.retry.max_attempts, 5);
    assert_eq!(config.retry.interval_ms, 10_000);
    assert_eq!(config.retry.ttl_ms, 300_000);
}

#[test]
fn test_empty_toml_uses_defaults() {
    let config: Config = toml::from_str("").expect("valid TOML");
    assert!(config.bootstrap_server.is_none());
    assert_eq!(config.request_timeout_ms, 10_000);
}

#[test]
fn test_config_with_all_fields() {
    let toml_str = r#"
bootstrap_server = "bootstrap.example.org:10000"
advertise_addr = "/ip4/203.0.113.7/tcp/4001"
request_timeout_ms = 2500

[retry]
max_attempts = 10
interval_ms = 1000
ttl_ms = 60000
"#;
    let config: Config = toml::from_str(toml_str).expect("valid TOML");
    assert_eq!(
        config.bootstrap_server.as_deref(),
        Some("bootstrap.example.org:10000")
    );
    assert_eq!(config.advertise_addr, "/ip4/203.0.113.7/tcp/4001");
    assert_eq!(config.request_timeout_ms, 2500);
    assert_eq!(config.retry.max_attempts, 10);
    assert_eq!(config.retry.interval_ms, 1000);
    assert_eq!(config.retry.ttl_ms, 60_000);
}

#[test]
fn test_config_roundtrips_through_file() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("edut.toml");

    let mut config = Config::default();
    config.bootstrap_server = Some("127.0.0.1:10000".to_string());
    std::fs::write(&path, toml::to_string(&config).unwrap()).unwrap();

    let loaded: Config = toml::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(
        loaded.bootstrap_server.as_deref(),
        Some("127.0.0.1:10000")
    );
    assert_eq!(loaded.retry.max_attempts, config.retry.max_attempts);
}
