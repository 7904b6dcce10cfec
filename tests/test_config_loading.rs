//! Configuration loading and validation tests
//!
//! Tests focus on BEHAVIOR of configuration loading, validation, and error handling.

use std::io::Write;
use std::time::Duration;
use telemetrix::config::{ConfigError, ConfigFile};
use tempfile::NamedTempFile;

fn write_config(contents: &str) -> NamedTempFile {
    let mut temp_file = NamedTempFile::new().unwrap();
    writeln!(temp_file, "{contents}").unwrap();
    temp_file
}

#[test]
fn test_config_loads_successfully_from_valid_toml() {
    let temp_file = write_config(
        r#"
[broker]
url = "mqtts://broker.example.com"
client_id_prefix = "bench"

[topics]
outbound = "lab/display"
status = "lab/status"

[liveness]
heartbeat_timeout_secs = 45
"#,
    );

    let config = ConfigFile::load_from_file(temp_file.path()).unwrap();
    let session = config.resolve().unwrap();

    assert_eq!(session.broker.host, "broker.example.com");
    assert_eq!(session.broker.port, 8883);
    assert!(session.broker.tls);
    assert_eq!(session.client_id_prefix, "bench");
    assert_eq!(session.outbound_topic, "lab/display");
    assert_eq!(session.status_topic, "lab/status");
    assert_eq!(session.heartbeat_timeout, Duration::from_secs(45));
    // Unset values keep their defaults
    assert_eq!(session.grace_period, Duration::from_secs(10));
    assert_eq!(session.max_payload_chars, 147);
}

#[test]
fn test_missing_file_is_a_read_error() {
    let result = ConfigFile::load_from_file(std::path::Path::new(
        "/nonexistent/telemetrix/telemetrix.toml",
    ));
    assert!(matches!(result, Err(ConfigError::FileRead(_))));
}

#[test]
fn test_malformed_toml_is_a_parse_error() {
    let temp_file = write_config("[broker\nurl = ");
    let result = ConfigFile::load_from_file(temp_file.path());
    assert!(matches!(result, Err(ConfigError::TomlParse(_))));
}

#[test]
fn test_missing_broker_section_is_rejected() {
    let temp_file = write_config(
        r#"
[topics]
outbound = "lab/display"
"#,
    );
    assert!(ConfigFile::load_from_file(temp_file.path()).is_err());
}

#[test]
fn test_invalid_broker_url_is_rejected_at_load() {
    let temp_file = write_config(
        r#"
[broker]
url = "ftp://broker.example.com"
"#,
    );
    let result = ConfigFile::load_from_file(temp_file.path());
    assert!(matches!(result, Err(ConfigError::InvalidBrokerUrl(_))));
}

#[test]
fn test_credentials_are_read_from_named_env_vars() {
    let user_var = "TELEMETRIX_IT_USER_4C1D";
    let pass_var = "TELEMETRIX_IT_PASS_4C1D";
    std::env::set_var(user_var, "operator");
    std::env::set_var(pass_var, "s3cret");

    let temp_file = write_config(&format!(
        r#"
[broker]
url = "mqtt://localhost"
username_env = "{user_var}"
password_env = "{pass_var}"
"#
    ));

    let session = ConfigFile::load_from_file(temp_file.path())
        .unwrap()
        .resolve()
        .unwrap();
    let credentials = session.credentials.clone().unwrap();
    assert_eq!(credentials.username, "operator");
    assert_eq!(credentials.password, "s3cret");

    // Debug output must not leak the password
    let debug = format!("{session:?}");
    assert!(!debug.contains("s3cret"));

    std::env::remove_var(user_var);
    std::env::remove_var(pass_var);
}

#[test]
fn test_missing_credential_env_var_fails_resolution() {
    let temp_file = write_config(
        r#"
[broker]
url = "mqtt://localhost"
username_env = "TELEMETRIX_IT_MISSING_USER_77E0"
"#,
    );

    let config = ConfigFile::load_from_file(temp_file.path()).unwrap();
    assert!(matches!(
        config.resolve(),
        Err(ConfigError::EnvVarNotFound(name)) if name == "TELEMETRIX_IT_MISSING_USER_77E0"
    ));
}

#[test]
fn test_overrides_replace_file_values() {
    let mut config = ConfigFile::for_broker("mqtt://localhost");
    config.apply_overrides(
        Some("mqtt://10.0.0.9:1885"),
        Some("bench/out"),
        Some("bench/+/status"),
    );
    let session = config.resolve().unwrap();

    assert_eq!(session.broker.host, "10.0.0.9");
    assert_eq!(session.broker.port, 1885);
    assert_eq!(session.outbound_topic, "bench/out");
    assert_eq!(session.status_topic, "bench/+/status");
}

#[test]
fn test_config_round_trips_through_show_output() {
    let config = ConfigFile::for_broker("mqtt://localhost");
    let rendered = toml::to_string_pretty(&config).unwrap();
    let parsed: ConfigFile = toml::from_str(&rendered).unwrap();
    assert_eq!(parsed, config);
}
