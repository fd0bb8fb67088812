//! Integration tests for resident-config

use resident_config::*;
use std::io::Write;
use std::time::Duration;
use temp_env::with_vars;

const OVERRIDE_VARS: [&str; 8] = [
    "RESIDENT_WORKERS",
    "RESIDENT_WORKER_COMMAND",
    "RESIDENT_MAX_REQUESTS",
    "RESIDENT_REQUEST_TIMEOUT",
    "RESIDENT_HTTP_BIND",
    "RESIDENT_SOCKET_BIND",
    "RESIDENT_LOG_LEVEL",
    "RESIDENT_LOG_FORMAT",
];

fn cleared() -> Vec<(&'static str, Option<&'static str>)> {
    OVERRIDE_VARS.iter().map(|name| (*name, None)).collect()
}

#[test]
fn test_default_config_validation() {
    let config = ResidentConfig::default();
    assert!(config.validate_all().is_ok());
}

#[test]
fn test_config_loader_from_env() {
    let mut vars = cleared();
    vars.extend([
        ("RESIDENT_WORKERS", Some("8")),
        ("RESIDENT_WORKER_COMMAND", Some("/usr/bin/php")),
        ("RESIDENT_MAX_REQUESTS", Some("1000")),
        ("RESIDENT_REQUEST_TIMEOUT", Some("1500ms")),
        ("RESIDENT_LOG_LEVEL", Some("debug")),
    ]);

    with_vars(vars, || {
        let config = ConfigLoader::new().from_env().unwrap();

        assert_eq!(config.pool.workers, 8);
        assert_eq!(config.pool.command.as_deref(), Some("/usr/bin/php"));
        assert_eq!(config.pool.max_requests, Some(1000));
        assert_eq!(config.pool.request_timeout, Duration::from_millis(1500));
        assert_eq!(config.logging.level, LogLevel::Debug);
    });
}

#[test]
fn test_socket_bind_override_enables_listener() {
    let mut vars = cleared();
    vars.push(("RESIDENT_SOCKET_BIND", Some("127.0.0.1:7000")));

    with_vars(vars, || {
        let config = ConfigLoader::new().from_env().unwrap();
        let socket = config.socket.expect("socket listener enabled by override");
        assert_eq!(socket.bind_address, "127.0.0.1:7000");
    });
}

#[test]
fn test_invalid_env_value_reported() {
    let mut vars = cleared();
    vars.push(("RESIDENT_WORKERS", Some("many")));

    with_vars(vars, || {
        let err = ConfigLoader::new().from_env().unwrap_err();
        assert!(matches!(err, ConfigError::EnvError(_)));
    });
}

#[test]
fn test_custom_prefix() {
    let vars = vec![("APP_LOG_FORMAT", Some("json")), ("RESIDENT_LOG_FORMAT", None)];

    with_vars(vars, || {
        let config = ConfigLoader::with_prefix("APP").from_env().unwrap();
        assert_eq!(config.logging.format, LogFormat::Json);
    });
}

#[test]
fn test_comprehensive_config_file() {
    let yaml = r#"
pool:
  workers: 3
  command: php
  args: ["bin/worker.php"]
  env:
    APP_ENV: prod
  max_requests: 250
  max_memory_mib: 256
  max_ttl: 30m
  max_idle: 5m
  startup_timeout: 5s
  request_timeout: 10s
  cancel_grace: 2s
  spawn_retry:
    max_attempts: 3
    initial_delay: 200ms
    max_delay: 5s

supervisor:
  interval: 500ms
  stall_threshold: 20s
  shutdown_grace: 15s

http:
  bind_address: "0.0.0.0:8081"
  max_connections: 256
  max_body_bytes: 1048576

socket:
  bind_address: "127.0.0.1:9091"
  read_timeout: 2s

logging:
  level: warn
  format: json
"#;

    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(yaml.as_bytes()).unwrap();

    with_vars(cleared(), || {
        let config = ConfigLoader::new().from_file(file.path()).unwrap();

        assert_eq!(config.pool.workers, 3);
        assert_eq!(config.pool.args, vec!["bin/worker.php".to_string()]);
        assert_eq!(config.pool.env.get("APP_ENV").map(String::as_str), Some("prod"));
        assert_eq!(config.pool.max_memory_bytes(), Some(256 * 1024 * 1024));
        assert_eq!(config.pool.max_idle, Some(Duration::from_secs(300)));
        assert_eq!(config.pool.spawn_retry.max_attempts, 3);
        assert_eq!(config.supervisor.interval, Duration::from_millis(500));
        assert_eq!(config.supervisor.reload_timeout, Duration::from_secs(60));

        let http = config.http.unwrap();
        assert_eq!(http.max_connections, 256);
        assert!(http.health_path.is_none());

        let socket = config.socket.unwrap();
        assert_eq!(socket.read_timeout, Duration::from_secs(2));
        assert_eq!(config.logging.format, LogFormat::Json);
    });
}

#[test]
fn test_invalid_file_rejected() {
    let yaml = r#"
http:
  bind_address: "nowhere"
"#;
    with_vars(cleared(), || {
        let err = ConfigLoader::new().from_yaml(yaml).unwrap_err();
        assert!(matches!(err, ConfigError::DomainError { .. }));
    });
}

#[test]
fn test_missing_file() {
    let err = ConfigLoader::new()
        .from_file("/definitely/not/here.yaml")
        .unwrap_err();
    assert!(matches!(err, ConfigError::FileReadError(_)));
}
