//! Configuration types for the alert mailer.
//!
//! Provides SMTP connection settings with a builder:
//! - Server host and port
//! - STARTTLS and an optional extra CA bundle
//! - Optional authentication credentials
//! - Socket timeouts

use std::path::PathBuf;
use std::time::Duration;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use crate::errors::{DeliveryError, DeliveryResult};

/// Default SMTP port.
pub const DEFAULT_PORT: u16 = 25;

/// Default timeout for connections.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default timeout for commands.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(60);

/// TLS mode for SMTP connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TlsMode {
    /// Plain SMTP session.
    #[default]
    None,
    /// Greet, then upgrade with STARTTLS before anything else. The send fails
    /// if the server cannot upgrade.
    StartTls,
}

/// TLS configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TlsConfig {
    /// TLS mode.
    #[serde(default)]
    pub mode: TlsMode,
    /// PEM bundle trusted in addition to the web PKI roots.
    pub ca_cert_path: Option<PathBuf>,
}

impl TlsConfig {
    /// Returns true if the session should be upgraded.
    pub fn enabled(&self) -> bool {
        self.mode == TlsMode::StartTls
    }
}

/// SMTP settings consumed by the transmitter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmtpConfig {
    /// SMTP server hostname.
    pub host: String,
    /// SMTP server port.
    #[serde(default = "default_port")]
    pub port: u16,
    /// TLS configuration.
    #[serde(default)]
    pub tls: TlsConfig,
    /// Authentication username. Authentication is skipped when unset.
    pub username: Option<String>,
    /// Authentication password.
    #[serde(default, skip_serializing)]
    pub password: Option<SecretString>,
    /// Connect timeout.
    #[serde(default = "default_connect_timeout", with = "humantime_serde")]
    pub connect_timeout: Duration,
    /// Command timeout.
    #[serde(default = "default_command_timeout", with = "humantime_serde")]
    pub command_timeout: Duration,
    /// Client identifier for EHLO.
    pub client_id: Option<String>,
}

fn default_port() -> u16 { DEFAULT_PORT }
fn default_connect_timeout() -> Duration { DEFAULT_CONNECT_TIMEOUT }
fn default_command_timeout() -> Duration { DEFAULT_COMMAND_TIMEOUT }

impl SmtpConfig {
    /// Creates a new configuration builder.
    pub fn builder() -> SmtpConfigBuilder {
        SmtpConfigBuilder::default()
    }

    /// Parses and validates a JSON configuration document.
    pub fn from_json(json: &str) -> DeliveryResult<Self> {
        let config: SmtpConfig = serde_json::from_str(json)
            .map_err(|e| DeliveryError::configuration(format!("Malformed SMTP settings: {}", e)).with_cause(e))?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration.
    pub fn validate(&self) -> DeliveryResult<()> {
        if self.host.trim().is_empty() {
            return Err(DeliveryError::configuration("Host is required"));
        }

        if self.port == 0 {
            return Err(DeliveryError::configuration("Port must be non-zero"));
        }

        if self.password.is_some() && self.username.is_none() {
            return Err(DeliveryError::configuration("Password given without a username"));
        }

        Ok(())
    }

    /// Returns the full server address.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Returns true if authentication is configured.
    pub fn has_auth(&self) -> bool {
        self.username.as_deref().is_some_and(|u| !u.is_empty())
    }

    /// Returns the client identifier for EHLO.
    pub fn client_id(&self) -> &str {
        self.client_id.as_deref().unwrap_or("localhost")
    }
}

/// Builder for SMTP configuration.
#[derive(Debug, Default)]
pub struct SmtpConfigBuilder {
    host: Option<String>,
    port: u16,
    tls: TlsConfig,
    username: Option<String>,
    password: Option<SecretString>,
    connect_timeout: Duration,
    command_timeout: Duration,
    client_id: Option<String>,
}

impl SmtpConfigBuilder {
    /// Sets the SMTP server host.
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    /// Sets the SMTP server port.
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Sets plain credentials.
    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(SecretString::new(password.into()));
        self
    }

    /// Enables or disables STARTTLS.
    pub fn use_tls(mut self, enabled: bool) -> Self {
        self.tls.mode = if enabled { TlsMode::StartTls } else { TlsMode::None };
        self
    }

    /// Adds a PEM bundle of extra trusted roots.
    pub fn ca_cert_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.tls.ca_cert_path = Some(path.into());
        self
    }

    /// Sets connect timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets command timeout.
    pub fn command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    /// Sets the client identifier for EHLO.
    pub fn client_id(mut self, id: impl Into<String>) -> Self {
        self.client_id = Some(id.into());
        self
    }

    /// Builds the configuration.
    pub fn build(self) -> DeliveryResult<SmtpConfig> {
        let config = SmtpConfig {
            host: self.host.ok_or_else(|| DeliveryError::configuration("Host is required"))?,
            port: if self.port == 0 { DEFAULT_PORT } else { self.port },
            tls: self.tls,
            username: self.username,
            password: self.password,
            connect_timeout: if self.connect_timeout == Duration::ZERO {
                DEFAULT_CONNECT_TIMEOUT
            } else {
                self.connect_timeout
            },
            command_timeout: if self.command_timeout == Duration::ZERO {
                DEFAULT_COMMAND_TIMEOUT
            } else {
                self.command_timeout
            },
            client_id: self.client_id,
        };

        config.validate()?;
        Ok(config)
    }
}

// Humantime serde support
mod humantime_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let s = humantime::format_duration(*duration).to_string();
        serializer.serialize_str(&s)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    #[test]
    fn test_config_builder() {
        let config = SmtpConfig::builder()
            .host("smtp.example.com")
            .port(587)
            .use_tls(true)
            .credentials("alerts", "pass")
            .build()
            .unwrap();

        assert_eq!(config.host, "smtp.example.com");
        assert_eq!(config.port, 587);
        assert_eq!(config.tls.mode, TlsMode::StartTls);
        assert!(config.has_auth());
        assert_eq!(config.address(), "smtp.example.com:587");
    }

    #[test]
    fn test_config_defaults() {
        let config = SmtpConfig::builder()
            .host("mail.internal")
            .build()
            .unwrap();

        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.connect_timeout, DEFAULT_CONNECT_TIMEOUT);
        assert_eq!(config.command_timeout, DEFAULT_COMMAND_TIMEOUT);
        assert_eq!(config.tls.mode, TlsMode::None);
        assert!(!config.has_auth());
        assert_eq!(config.client_id(), "localhost");
    }

    #[test]
    fn test_config_validation() {
        assert!(SmtpConfig::builder().build().is_err());
        assert!(SmtpConfig::builder().host("  ").build().is_err());
    }

    #[test]
    fn test_from_json() {
        let config = SmtpConfig::from_json(
            r#"{
                "host": "relay.example.com",
                "port": 2525,
                "tls": { "mode": "start_tls" },
                "username": "alerts",
                "password": "hunter2",
                "command_timeout": "15s"
            }"#,
        )
        .unwrap();

        assert_eq!(config.port, 2525);
        assert!(config.tls.enabled());
        assert_eq!(config.password.as_ref().unwrap().expose_secret(), "hunter2");
        assert_eq!(config.command_timeout, Duration::from_secs(15));
        assert_eq!(config.connect_timeout, DEFAULT_CONNECT_TIMEOUT);
    }

    #[test]
    fn test_from_json_rejects_bad_documents() {
        assert!(SmtpConfig::from_json("{").is_err());
        assert!(SmtpConfig::from_json(r#"{"host": "", "port": 25}"#).is_err());
        assert!(SmtpConfig::from_json(r#"{"host": "a", "password": "p"}"#).is_err());
    }

    #[test]
    fn test_password_never_serialized() {
        let config = SmtpConfig::builder()
            .host("smtp.example.com")
            .credentials("alerts", "top-secret")
            .build()
            .unwrap();
        let json = serde_json::to_string(&config).unwrap();
        assert!(!json.contains("top-secret"));
    }
}
