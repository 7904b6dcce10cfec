//! Session configuration
//!
//! Configuration is read once from a TOML file (optionally overridden from the
//! command line), validated, and resolved into an immutable [`SessionConfig`].
//! Broker credentials are never stored in the file itself: the file names the
//! environment variables that hold them.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use url::Url;

pub const DEFAULT_HEARTBEAT_TIMEOUT_SECS: u64 = 20;
pub const DEFAULT_GRACE_PERIOD_SECS: u64 = 10;
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 5;
pub const DEFAULT_MAX_PAYLOAD_CHARS: usize = 147;
pub const DEFAULT_PACING_MS: u64 = 500;
pub const DEFAULT_RECONNECT_DELAY_MS: u64 = 1000;
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_KEEP_ALIVE_SECS: u64 = 60;
pub const DEFAULT_OUTBOUND_TOPIC: &str = "telemetrix/stream";
pub const DEFAULT_STATUS_TOPIC: &str = "status/esp32";
pub const DEFAULT_CLIENT_ID_PREFIX: &str = "telemetrix";

/// Configuration file layout
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConfigFile {
    pub broker: BrokerSection,
    #[serde(default)]
    pub topics: TopicsSection,
    #[serde(default)]
    pub liveness: LivenessSection,
    #[serde(default)]
    pub publish: PublishSection,
    #[serde(default)]
    pub reconnect: ReconnectSection,
}

/// `[broker]` section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BrokerSection {
    /// Broker URL, `mqtt://host[:port]` or `mqtts://host[:port]`
    pub url: String,
    /// Environment variable containing the username
    pub username_env: Option<String>,
    /// Environment variable containing the password
    pub password_env: Option<String>,
    #[serde(default = "default_client_id_prefix")]
    pub client_id_prefix: String,
    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

/// `[topics]` section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TopicsSection {
    /// Topic operator messages are published to
    #[serde(default = "default_outbound_topic")]
    pub outbound: String,
    /// Topic the peer publishes its heartbeat on
    #[serde(default = "default_status_topic")]
    pub status: String,
}

impl Default for TopicsSection {
    fn default() -> Self {
        Self {
            outbound: default_outbound_topic(),
            status: default_status_topic(),
        }
    }
}

/// `[liveness]` section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LivenessSection {
    #[serde(default = "default_heartbeat_timeout_secs")]
    pub heartbeat_timeout_secs: u64,
    #[serde(default = "default_grace_period_secs")]
    pub grace_period_secs: u64,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
}

impl Default for LivenessSection {
    fn default() -> Self {
        Self {
            heartbeat_timeout_secs: DEFAULT_HEARTBEAT_TIMEOUT_SECS,
            grace_period_secs: DEFAULT_GRACE_PERIOD_SECS,
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
        }
    }
}

/// `[publish]` section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PublishSection {
    #[serde(default = "default_max_payload_chars")]
    pub max_payload_chars: usize,
    #[serde(default = "default_pacing_ms")]
    pub pacing_ms: u64,
    /// MQTT QoS level (0, 1 or 2)
    #[serde(default = "default_qos")]
    pub qos: u8,
    #[serde(default)]
    pub retain: bool,
}

impl Default for PublishSection {
    fn default() -> Self {
        Self {
            max_payload_chars: DEFAULT_MAX_PAYLOAD_CHARS,
            pacing_ms: DEFAULT_PACING_MS,
            qos: default_qos(),
            retain: false,
        }
    }
}

/// `[reconnect]` section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReconnectSection {
    /// Pause before the single automatic reconnect attempt
    #[serde(default = "default_reconnect_delay_ms")]
    pub delay_ms: u64,
}

impl Default for ReconnectSection {
    fn default() -> Self {
        Self {
            delay_ms: DEFAULT_RECONNECT_DELAY_MS,
        }
    }
}

fn default_client_id_prefix() -> String {
    DEFAULT_CLIENT_ID_PREFIX.to_string()
}

fn default_keep_alive_secs() -> u64 {
    DEFAULT_KEEP_ALIVE_SECS
}

fn default_connect_timeout_secs() -> u64 {
    DEFAULT_CONNECT_TIMEOUT_SECS
}

fn default_outbound_topic() -> String {
    DEFAULT_OUTBOUND_TOPIC.to_string()
}

fn default_status_topic() -> String {
    DEFAULT_STATUS_TOPIC.to_string()
}

fn default_heartbeat_timeout_secs() -> u64 {
    DEFAULT_HEARTBEAT_TIMEOUT_SECS
}

fn default_grace_period_secs() -> u64 {
    DEFAULT_GRACE_PERIOD_SECS
}

fn default_poll_interval_secs() -> u64 {
    DEFAULT_POLL_INTERVAL_SECS
}

fn default_max_payload_chars() -> usize {
    DEFAULT_MAX_PAYLOAD_CHARS
}

fn default_pacing_ms() -> u64 {
    DEFAULT_PACING_MS
}

fn default_qos() -> u8 {
    1
}

fn default_reconnect_delay_ms() -> u64 {
    DEFAULT_RECONNECT_DELAY_MS
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Environment variable not found: {0}")]
    EnvVarNotFound(String),
    #[error("Invalid broker URL: {0}")]
    InvalidBrokerUrl(String),
    #[error("Invalid topic '{topic}': {reason}")]
    InvalidTopic { topic: String, reason: String },
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Parsed broker location
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerAddress {
    pub host: String,
    pub port: u16,
    pub tls: bool,
}

impl BrokerAddress {
    /// Parse `mqtt://` / `mqtts://` URLs; the port defaults to 1883 / 8883
    pub fn parse(broker_url: &str) -> Result<Self, ConfigError> {
        let url =
            Url::parse(broker_url).map_err(|_| ConfigError::InvalidBrokerUrl(broker_url.into()))?;

        let tls = match url.scheme() {
            "mqtts" | "ssl" => true,
            "mqtt" | "tcp" => false,
            other => {
                return Err(ConfigError::InvalidBrokerUrl(format!(
                    "unsupported scheme '{other}' in {broker_url}"
                )))
            }
        };

        let host = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| ConfigError::InvalidBrokerUrl(broker_url.into()))?;
        let port = url.port().unwrap_or(if tls { 8883 } else { 1883 });

        Ok(Self {
            host: host.to_string(),
            port,
            tls,
        })
    }
}

impl fmt::Display for BrokerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let scheme = if self.tls { "mqtts" } else { "mqtt" };
        write!(f, "{scheme}://{}:{}", self.host, self.port)
    }
}

/// Broker credentials resolved from the environment
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// Immutable, validated session configuration
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    pub broker: BrokerAddress,
    pub client_id_prefix: String,
    pub credentials: Option<Credentials>,
    pub outbound_topic: String,
    pub status_topic: String,
    pub heartbeat_timeout: Duration,
    pub grace_period: Duration,
    pub poll_interval: Duration,
    pub reconnect_delay: Duration,
    pub connect_timeout: Duration,
    pub keep_alive: Duration,
    pub max_payload_chars: usize,
    pub pacing: Duration,
    pub qos: u8,
    pub retain: bool,
}

impl SessionConfig {
    /// Session configuration with default timings and no credentials
    pub fn new(broker: BrokerAddress, outbound_topic: &str, status_topic: &str) -> Self {
        Self {
            broker,
            client_id_prefix: DEFAULT_CLIENT_ID_PREFIX.to_string(),
            credentials: None,
            outbound_topic: outbound_topic.to_string(),
            status_topic: status_topic.to_string(),
            heartbeat_timeout: Duration::from_secs(DEFAULT_HEARTBEAT_TIMEOUT_SECS),
            grace_period: Duration::from_secs(DEFAULT_GRACE_PERIOD_SECS),
            poll_interval: Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
            reconnect_delay: Duration::from_millis(DEFAULT_RECONNECT_DELAY_MS),
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            keep_alive: Duration::from_secs(DEFAULT_KEEP_ALIVE_SECS),
            max_payload_chars: DEFAULT_MAX_PAYLOAD_CHARS,
            pacing: Duration::from_millis(DEFAULT_PACING_MS),
            qos: default_qos(),
            retain: false,
        }
    }
}

impl ConfigFile {
    /// Load and validate configuration from a TOML file
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: ConfigFile = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Minimal configuration for a broker URL, everything else defaulted
    pub fn for_broker(url: &str) -> Self {
        Self {
            broker: BrokerSection {
                url: url.to_string(),
                username_env: None,
                password_env: None,
                client_id_prefix: default_client_id_prefix(),
                keep_alive_secs: DEFAULT_KEEP_ALIVE_SECS,
                connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
            },
            topics: TopicsSection::default(),
            liveness: LivenessSection::default(),
            publish: PublishSection::default(),
            reconnect: ReconnectSection::default(),
        }
    }

    /// Apply command-line overrides
    pub fn apply_overrides(
        &mut self,
        broker_url: Option<&str>,
        outbound_topic: Option<&str>,
        status_topic: Option<&str>,
    ) {
        if let Some(url) = broker_url {
            self.broker.url = url.to_string();
        }
        if let Some(topic) = outbound_topic {
            self.topics.outbound = topic.to_string();
        }
        if let Some(topic) = status_topic {
            self.topics.status = topic.to_string();
        }
    }

    /// Validate values that do not depend on the environment
    pub fn validate(&self) -> Result<(), ConfigError> {
        BrokerAddress::parse(&self.broker.url)?;
        validate_publish_topic(&self.topics.outbound)?;
        validate_subscribe_topic(&self.topics.status)?;

        if self.liveness.heartbeat_timeout_secs == 0 {
            return Err(ConfigError::InvalidConfig(
                "liveness.heartbeat_timeout_secs must be greater than 0".to_string(),
            ));
        }
        if self.liveness.poll_interval_secs == 0 {
            return Err(ConfigError::InvalidConfig(
                "liveness.poll_interval_secs must be greater than 0".to_string(),
            ));
        }
        if self.publish.max_payload_chars == 0 {
            return Err(ConfigError::InvalidConfig(
                "publish.max_payload_chars must be greater than 0".to_string(),
            ));
        }
        if self.publish.qos > 2 {
            return Err(ConfigError::InvalidConfig(format!(
                "publish.qos must be 0, 1 or 2 (got {})",
                self.publish.qos
            )));
        }
        if self.broker.client_id_prefix.trim().is_empty() {
            return Err(ConfigError::InvalidConfig(
                "broker.client_id_prefix cannot be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Validate and resolve into a session configuration, reading credentials
    /// from the configured environment variables
    pub fn resolve(&self) -> Result<SessionConfig, ConfigError> {
        self.validate()?;

        let broker = BrokerAddress::parse(&self.broker.url)?;
        let credentials = self.resolve_credentials()?;

        Ok(SessionConfig {
            broker,
            client_id_prefix: self.broker.client_id_prefix.clone(),
            credentials,
            outbound_topic: self.topics.outbound.clone(),
            status_topic: self.topics.status.clone(),
            heartbeat_timeout: Duration::from_secs(self.liveness.heartbeat_timeout_secs),
            grace_period: Duration::from_secs(self.liveness.grace_period_secs),
            poll_interval: Duration::from_secs(self.liveness.poll_interval_secs),
            reconnect_delay: Duration::from_millis(self.reconnect.delay_ms),
            connect_timeout: Duration::from_secs(self.broker.connect_timeout_secs),
            keep_alive: Duration::from_secs(self.broker.keep_alive_secs),
            max_payload_chars: self.publish.max_payload_chars,
            pacing: Duration::from_millis(self.publish.pacing_ms),
            qos: self.publish.qos,
            retain: self.publish.retain,
        })
    }

    /// Username is required once `username_env` is configured; a missing password
    /// variable resolves to an empty password
    fn resolve_credentials(&self) -> Result<Option<Credentials>, ConfigError> {
        let Some(username_env) = &self.broker.username_env else {
            return Ok(None);
        };

        let username = get_env_var_required(username_env)?;
        let password = self
            .broker
            .password_env
            .as_ref()
            .and_then(|name| std::env::var(name).ok())
            .unwrap_or_default();

        Ok(Some(Credentials { username, password }))
    }
}

fn get_env_var_required(env_var_name: &str) -> Result<String, ConfigError> {
    std::env::var(env_var_name).map_err(|_| ConfigError::EnvVarNotFound(env_var_name.to_string()))
}

/// Topics we publish to must be concrete: no wildcards, no NUL
pub fn validate_publish_topic(topic: &str) -> Result<(), ConfigError> {
    validate_subscribe_topic(topic)?;
    if topic.contains(['+', '#']) {
        return Err(ConfigError::InvalidTopic {
            topic: topic.to_string(),
            reason: "wildcards are not allowed in publish topics".to_string(),
        });
    }
    Ok(())
}

/// Topic filters may carry wildcards but must be non-empty
pub fn validate_subscribe_topic(topic: &str) -> Result<(), ConfigError> {
    if topic.trim().is_empty() {
        return Err(ConfigError::InvalidTopic {
            topic: topic.to_string(),
            reason: "topic cannot be empty".to_string(),
        });
    }
    if topic.contains('\0') {
        return Err(ConfigError::InvalidTopic {
            topic: topic.to_string(),
            reason: "topic cannot contain NUL".to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_config() {
        let toml_content = r#"
[broker]
url = "mqtts://broker.example.com:8883"
username_env = "TELEMETRIX_TEST_USER"
password_env = "TELEMETRIX_TEST_PASS"

[topics]
outbound = "telemetrix/stream"
status = "status/esp32"

[liveness]
heartbeat_timeout_secs = 30
grace_period_secs = 15
poll_interval_secs = 2

[publish]
max_payload_chars = 100
pacing_ms = 250
qos = 0
retain = true

[reconnect]
delay_ms = 2000
"#;

        let config: ConfigFile = toml::from_str(toml_content).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.broker.url, "mqtts://broker.example.com:8883");
        assert_eq!(config.liveness.heartbeat_timeout_secs, 30);
        assert_eq!(config.publish.max_payload_chars, 100);
        assert!(config.publish.retain);
        assert_eq!(config.reconnect.delay_ms, 2000);
    }

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config: ConfigFile = toml::from_str(
            r#"
[broker]
url = "mqtt://localhost"
"#,
        )
        .unwrap();

        let session = config.resolve().unwrap();
        assert_eq!(session.broker.port, 1883);
        assert!(!session.broker.tls);
        assert_eq!(session.outbound_topic, DEFAULT_OUTBOUND_TOPIC);
        assert_eq!(session.status_topic, DEFAULT_STATUS_TOPIC);
        assert_eq!(session.heartbeat_timeout, Duration::from_secs(20));
        assert_eq!(session.grace_period, Duration::from_secs(10));
        assert_eq!(session.poll_interval, Duration::from_secs(5));
        assert_eq!(session.max_payload_chars, 147);
        assert_eq!(session.pacing, Duration::from_millis(500));
        assert_eq!(session.reconnect_delay, Duration::from_secs(1));
        assert!(session.credentials.is_none());
    }

    #[test]
    fn test_broker_address_parsing() {
        let tls = BrokerAddress::parse("mqtts://broker.example.com").unwrap();
        assert_eq!(tls.port, 8883);
        assert!(tls.tls);

        let plain = BrokerAddress::parse("mqtt://10.0.0.5:1884").unwrap();
        assert_eq!(plain.host, "10.0.0.5");
        assert_eq!(plain.port, 1884);
        assert!(!plain.tls);

        assert_eq!(plain.to_string(), "mqtt://10.0.0.5:1884");
    }

    #[test]
    fn test_invalid_broker_urls() {
        assert!(matches!(
            BrokerAddress::parse("not a url"),
            Err(ConfigError::InvalidBrokerUrl(_))
        ));
        assert!(matches!(
            BrokerAddress::parse("http://broker.example.com"),
            Err(ConfigError::InvalidBrokerUrl(_))
        ));
    }

    #[test]
    fn test_wildcard_outbound_topic_rejected() {
        let mut config = ConfigFile::for_broker("mqtt://localhost");
        config.topics.outbound = "telemetrix/#".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidTopic { .. })
        ));

        // Wildcards are fine for the subscription side
        let mut config = ConfigFile::for_broker("mqtt://localhost");
        config.topics.status = "status/+".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_values_rejected() {
        let mut config = ConfigFile::for_broker("mqtt://localhost");
        config.liveness.heartbeat_timeout_secs = 0;
        assert!(config.validate().is_err());

        let mut config = ConfigFile::for_broker("mqtt://localhost");
        config.liveness.poll_interval_secs = 0;
        assert!(config.validate().is_err());

        let mut config = ConfigFile::for_broker("mqtt://localhost");
        config.publish.max_payload_chars = 0;
        assert!(config.validate().is_err());

        let mut config = ConfigFile::for_broker("mqtt://localhost");
        config.publish.qos = 3;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_username_env_is_an_error() {
        let mut config = ConfigFile::for_broker("mqtt://localhost");
        config.broker.username_env = Some("TELEMETRIX_UNSET_USER_VAR_9F2A".to_string());
        assert!(matches!(
            config.resolve(),
            Err(ConfigError::EnvVarNotFound(name)) if name == "TELEMETRIX_UNSET_USER_VAR_9F2A"
        ));
    }

    #[test]
    fn test_overrides() {
        let mut config = ConfigFile::for_broker("mqtt://localhost");
        config.apply_overrides(Some("mqtts://remote"), None, Some("status/device-7"));
        assert_eq!(config.broker.url, "mqtts://remote");
        assert_eq!(config.topics.outbound, DEFAULT_OUTBOUND_TOPIC);
        assert_eq!(config.topics.status, "status/device-7");
    }

    #[test]
    fn test_credentials_debug_redacts_password() {
        let credentials = Credentials {
            username: "device".to_string(),
            password: "hunter2".to_string(),
        };
        let rendered = format!("{credentials:?}");
        assert!(rendered.contains("device"));
        assert!(!rendered.contains("hunter2"));
    }
}
