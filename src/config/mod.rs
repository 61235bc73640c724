//! Configuration types for the mailer.
//!
//! Provides:
//! - [`ConnectionConfig`], the immutable parameters of one SMTP session
//! - [`ConnectionConfigBuilder`] with validation
//! - [`MailerSettings`], a set of named connections with a designated default

use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::time::Duration;

use crate::errors::{MailError, MailErrorKind, MailResult};

/// Default SMTP port.
pub const DEFAULT_PORT: u16 = 25;

/// Default timeout for connect, handshake and every read/write.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Transport security for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecurityMode {
    /// Plain TCP.
    #[default]
    None,
    /// TLS from the first byte (usually port 465).
    #[serde(alias = "ssl")]
    ImplicitTls,
    /// Plain TCP upgraded with `STARTTLS`.
    #[serde(alias = "tls", alias = "starttls")]
    StartTls,
}

/// How intermediate replies of the mail transaction are treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponsePolicy {
    /// `MAIL FROM`, `RCPT TO` and `DATA` replies are read but not checked.
    #[default]
    Lenient,
    /// `MAIL FROM` must get 250, `RCPT TO` 250/251 and `DATA` 354.
    Strict,
}

/// Parameters of a single SMTP session.
#[derive(Clone, Deserialize)]
pub struct ConnectionConfig {
    /// SMTP server hostname.
    pub host: String,
    /// SMTP server port.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Transport security.
    #[serde(default, alias = "secure")]
    pub security: SecurityMode,
    /// Whether `EHLO` + `AUTH LOGIN` is performed.
    #[serde(default, alias = "auth")]
    pub auth_required: bool,
    /// Authentication username.
    #[serde(default)]
    pub user: String,
    /// Authentication password.
    #[serde(default = "empty_secret")]
    pub pass: SecretString,
    /// Timeout for connect, TLS handshake and each read/write.
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub timeout: Duration,
    /// Emit raw protocol traffic to the observability sink.
    #[serde(default)]
    pub debug: bool,
    /// Name announced in `HELO`/`EHLO`; falls back to `host`.
    #[serde(default, alias = "localhost")]
    pub local_hostname: Option<String>,
    /// Default sender address.
    pub from: String,
    /// Default sender display name.
    #[serde(default)]
    pub sender: Option<String>,
    /// Default reply-to address.
    #[serde(default)]
    pub reply: Option<String>,
    /// Strictness of intermediate reply checks.
    #[serde(default)]
    pub response_policy: ResponsePolicy,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_timeout() -> Duration {
    DEFAULT_TIMEOUT
}

fn empty_secret() -> SecretString {
    SecretString::new(String::new())
}

impl ConnectionConfig {
    /// Creates a new configuration builder.
    pub fn builder() -> ConnectionConfigBuilder {
        ConnectionConfigBuilder::default()
    }

    /// Validates the configuration.
    pub fn validate(&self) -> MailResult<()> {
        if self.host.is_empty() {
            return Err(MailError::configuration("Host is required"));
        }

        if self.port == 0 {
            return Err(MailError::configuration("Port must be non-zero"));
        }

        if self.from.is_empty() {
            return Err(MailError::configuration("Default sender address is required"));
        }

        if self.auth_required && (self.user.is_empty() || self.pass.expose_secret().is_empty()) {
            return Err(MailError::configuration(
                "Credentials are required when auth is enabled",
            ));
        }

        if self.timeout.is_zero() {
            return Err(MailError::configuration("Timeout must be non-zero"));
        }

        Ok(())
    }

    /// Returns the `host:port` address.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Returns the name announced in `HELO`/`EHLO`.
    pub fn local_hostname(&self) -> &str {
        match self.local_hostname.as_deref() {
            Some(name) if !name.is_empty() => name,
            _ => &self.host,
        }
    }
}

impl fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("security", &self.security)
            .field("auth_required", &self.auth_required)
            .field("user", &self.user)
            .field("pass", &"[REDACTED]")
            .field("timeout", &self.timeout)
            .field("debug", &self.debug)
            .field("local_hostname", &self.local_hostname)
            .field("from", &self.from)
            .field("sender", &self.sender)
            .field("reply", &self.reply)
            .field("response_policy", &self.response_policy)
            .finish()
    }
}

/// Builder for [`ConnectionConfig`].
#[derive(Debug, Default)]
pub struct ConnectionConfigBuilder {
    host: Option<String>,
    port: u16,
    security: SecurityMode,
    auth_required: bool,
    user: String,
    pass: Option<SecretString>,
    timeout: Duration,
    debug: bool,
    local_hostname: Option<String>,
    from: Option<String>,
    sender: Option<String>,
    reply: Option<String>,
    response_policy: ResponsePolicy,
}

impl ConnectionConfigBuilder {
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

    /// Sets the transport security.
    pub fn security(mut self, security: SecurityMode) -> Self {
        self.security = security;
        self
    }

    /// Enables `AUTH LOGIN` with the given credentials.
    pub fn credentials(mut self, user: impl Into<String>, pass: impl Into<String>) -> Self {
        self.auth_required = true;
        self.user = user.into();
        self.pass = Some(SecretString::new(pass.into()));
        self
    }

    /// Sets the timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Enables protocol tracing.
    pub fn debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Sets the name announced in `HELO`/`EHLO`.
    pub fn local_hostname(mut self, name: impl Into<String>) -> Self {
        self.local_hostname = Some(name.into());
        self
    }

    /// Sets the default sender address and display name.
    pub fn from(mut self, email: impl Into<String>, sender: Option<&str>) -> Self {
        self.from = Some(email.into());
        self.sender = sender.map(str::to_string);
        self
    }

    /// Sets the default reply-to address.
    pub fn reply(mut self, email: impl Into<String>) -> Self {
        self.reply = Some(email.into());
        self
    }

    /// Sets the strictness of intermediate reply checks.
    pub fn response_policy(mut self, policy: ResponsePolicy) -> Self {
        self.response_policy = policy;
        self
    }

    /// Builds the configuration.
    pub fn build(self) -> MailResult<ConnectionConfig> {
        let config = ConnectionConfig {
            host: self.host.ok_or_else(|| MailError::configuration("Host is required"))?,
            port: if self.port == 0 { DEFAULT_PORT } else { self.port },
            security: self.security,
            auth_required: self.auth_required,
            user: self.user,
            pass: self.pass.unwrap_or_else(empty_secret),
            timeout: if self.timeout.is_zero() { DEFAULT_TIMEOUT } else { self.timeout },
            debug: self.debug,
            local_hostname: self.local_hostname,
            from: self.from.unwrap_or_default(),
            sender: self.sender,
            reply: self.reply,
            response_policy: self.response_policy,
        };

        config.validate()?;
        Ok(config)
    }
}

/// Named connections with a designated default.
#[derive(Debug, Clone, Deserialize)]
pub struct MailerSettings {
    /// Name of the connection used when none is requested.
    pub default: String,
    /// Overrides every connection's `HELO`/`EHLO` name when non-empty.
    #[serde(default)]
    pub localhost: Option<String>,
    /// Available connections by name.
    pub connections: HashMap<String, ConnectionConfig>,
}

impl MailerSettings {
    /// Parses settings from a TOML document.
    pub fn from_toml_str(source: &str) -> MailResult<Self> {
        let settings: Self = toml::from_str(source).map_err(|e| {
            MailError::configuration(format!("Invalid mailer settings: {}", e)).with_cause(e)
        })?;

        if !settings.connections.contains_key(&settings.default) {
            return Err(MailError::new(
                MailErrorKind::ConnectionNotFound,
                format!("Default connection '{}' is not defined", settings.default),
            ));
        }

        Ok(settings)
    }

    /// Reads and parses a TOML settings file.
    pub fn load(path: impl AsRef<Path>) -> MailResult<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|e| {
            MailError::configuration(format!("Cannot read {}: {}", path.display(), e)).with_cause(e)
        })?;
        Self::from_toml_str(&source)
    }

    /// Returns the named connection, or the default one when `name` is `None`.
    pub fn connection(&self, name: Option<&str>) -> MailResult<ConnectionConfig> {
        let name = name.unwrap_or(&self.default);
        let mut config = self.connections.get(name).cloned().ok_or_else(|| {
            MailError::new(
                MailErrorKind::ConnectionNotFound,
                format!("No connection named '{}'", name),
            )
        })?;

        if let Some(localhost) = self.localhost.as_deref().filter(|l| !l.is_empty()) {
            config.local_hostname = Some(localhost.to_string());
        }

        config.validate()?;
        Ok(config)
    }
}

// Humantime serde support
mod humantime_serde {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}
