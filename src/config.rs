//! Configuration for the relay.
//!
//! Use [`RelayConfigBuilder`] to create a configuration with sensible defaults,
//! or [`RelayConfig::from_env`] to read it from the process environment:
//!
//! ```
//! use code_relay::RelayConfig;
//!
//! let config = RelayConfig::builder()
//!     .host("pop.example.com")
//!     .account("codes@example.com")
//!     .password("app-password")
//!     .webhook_url("https://hooks.example.com/T000/B000/XXXX")
//!     .build()
//!     .expect("valid config");
//!
//! assert_eq!(config.port, 995);
//! ```

use crate::error::{Error, Result};
use crate::scanner::DEFAULT_SCAN_INTERVAL;
use secrecy::{ExposeSecret, SecretString};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use url::Url;

/// Default POP3S port (implicit TLS).
pub const DEFAULT_POP3_PORT: u16 = 995;

/// Default location of the history database, relative to the working directory.
pub const DEFAULT_DATABASE_PATH: &str = "history.db";

/// Default chat message; `{code}` is replaced with the extracted code.
pub const DEFAULT_MESSAGE_TEMPLATE: &str = "Fellow tapirs, here's the latest login code {code}";

/// Placeholder substituted with the code in a message template.
pub const CODE_PLACEHOLDER: &str = "{code}";

/// What to do with a message whose code could not be delivered to the webhook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NotifyPolicy {
    /// Record and delete the message even if delivery failed, so a webhook outage
    /// never causes a notification storm. A failed delivery is lost.
    #[default]
    RecordAlways,
    /// Leave the message unrecorded and in the mailbox when delivery fails, so the
    /// next cycle tries again.
    RetryUntilDelivered,
}

impl FromStr for NotifyPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "record-always" => Ok(Self::RecordAlways),
            "retry-until-delivered" => Ok(Self::RetryUntilDelivered),
            other => Err(Error::InvalidConfig {
                message: format!(
                    "unknown notify policy '{other}' (expected record-always or retry-until-delivered)"
                ),
            }),
        }
    }
}

/// Timeout configuration for mailbox and webhook operations.
#[derive(Debug, Clone)]
pub struct TimeoutConfig {
    /// Timeout for establishing the TCP/TLS connection.
    pub connect: Duration,
    /// Timeout for the `USER`/`PASS` exchange.
    pub auth: Duration,
    /// Timeout for short commands (greeting, `UIDL`, `DELE`).
    pub command: Duration,
    /// Timeout for retrieving one full message.
    pub retrieve: Duration,
    /// Timeout for `QUIT`.
    pub quit: Duration,
    /// Timeout for one webhook POST.
    pub webhook: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(30),
            auth: Duration::from_secs(30),
            command: Duration::from_secs(10),
            retrieve: Duration::from_secs(30),
            quit: Duration::from_secs(5),
            webhook: Duration::from_secs(15),
        }
    }
}

/// Everything the relay needs to run.
///
/// Create using [`RelayConfig::builder()`] or [`RelayConfig::from_env()`].
///
/// The password and webhook URL are kept private: the password is a
/// [`SecretString`], and the webhook URL usually embeds a bearer token.
#[derive(Clone)]
pub struct RelayConfig {
    /// POP3 server hostname.
    pub host: String,
    /// POP3 server port (default: 995).
    pub port: u16,
    /// POP3 account name.
    pub account: String,
    password: SecretString,
    webhook_url: Url,
    /// Path of the SQLite history database.
    pub database_path: PathBuf,
    /// Idle time between scan cycles.
    pub scan_interval: Duration,
    /// Handling of failed deliveries.
    pub notify_policy: NotifyPolicy,
    /// Chat message template containing `{code}`.
    pub message_template: String,
    /// Timeout configuration.
    pub timeouts: TimeoutConfig,
}

impl std::fmt::Debug for RelayConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("account", &self.account)
            .field("password", &"[REDACTED]")
            .field("webhook_host", &self.webhook_url.host_str())
            .field("database_path", &self.database_path)
            .field("scan_interval", &self.scan_interval)
            .field("notify_policy", &self.notify_policy)
            .field("timeouts", &self.timeouts)
            .finish_non_exhaustive()
    }
}

impl RelayConfig {
    /// Creates a new configuration builder.
    #[must_use]
    pub fn builder() -> RelayConfigBuilder {
        RelayConfigBuilder::default()
    }

    /// Reads the configuration from the process environment.
    ///
    /// Required: `POP3_SERVER`, `POP3_PORT`, `POP3_ACCOUNT`, `POP3_PASSWORD`, `SLACK_WEBHOOK`.
    /// Optional: `HISTORY_DB`, `SCAN_INTERVAL_SECS`, `NOTIFY_POLICY`, `NOTIFY_TEMPLATE`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingEnv`] for an absent or empty required variable and
    /// [`Error::InvalidConfig`] for a value that does not parse.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Reads the configuration through an arbitrary variable lookup.
    ///
    /// # Errors
    ///
    /// Same as [`RelayConfig::from_env`].
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let require = |name: &'static str| get(name).ok_or(Error::MissingEnv { name });

        let host = require("POP3_SERVER")?;
        let port = parse_value::<u16>("POP3_PORT", &require("POP3_PORT")?)?;
        let account = require("POP3_ACCOUNT")?;
        let password = require("POP3_PASSWORD")?;
        let webhook = require("SLACK_WEBHOOK")?;

        let mut builder = Self::builder()
            .host(host)
            .port(port)
            .account(account)
            .password(password)
            .webhook_url(webhook);

        if let Some(path) = get("HISTORY_DB") {
            builder = builder.database_path(path);
        }
        if let Some(secs) = get("SCAN_INTERVAL_SECS") {
            let secs = parse_value::<u64>("SCAN_INTERVAL_SECS", &secs)?;
            builder = builder.scan_interval(Duration::from_secs(secs));
        }
        if let Some(policy) = get("NOTIFY_POLICY") {
            builder = builder.notify_policy(policy.parse()?);
        }
        if let Some(template) = get("NOTIFY_TEMPLATE") {
            builder = builder.message_template(template);
        }

        builder.build()
    }

    /// Returns the password as a string slice, for authentication only.
    #[must_use]
    pub fn password(&self) -> &str {
        self.password.expose_secret()
    }

    /// Returns the webhook URL.
    #[must_use]
    pub fn webhook_url(&self) -> &Url {
        &self.webhook_url
    }

    /// Returns the full POP3 server address as "host:port".
    #[must_use]
    pub fn server_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_value<T: FromStr>(name: &str, raw: &str) -> Result<T> {
    raw.trim().parse().map_err(|_| Error::InvalidConfig {
        message: format!("{name} has invalid value '{raw}'"),
    })
}

/// Builder for [`RelayConfig`].
#[derive(Default)]
pub struct RelayConfigBuilder {
    host: Option<String>,
    port: Option<u16>,
    account: Option<String>,
    password: Option<SecretString>,
    webhook_url: Option<String>,
    database_path: Option<PathBuf>,
    scan_interval: Option<Duration>,
    notify_policy: Option<NotifyPolicy>,
    message_template: Option<String>,
    timeouts: Option<TimeoutConfig>,
}

impl std::fmt::Debug for RelayConfigBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayConfigBuilder")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("account", &self.account)
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .field("webhook_url", &self.webhook_url.as_ref().map(|_| "[REDACTED]"))
            .field("database_path", &self.database_path)
            .field("scan_interval", &self.scan_interval)
            .field("notify_policy", &self.notify_policy)
            .field("message_template", &self.message_template)
            .field("timeouts", &self.timeouts)
            .finish()
    }
}

impl RelayConfigBuilder {
    /// Sets the POP3 server hostname (required).
    #[must_use]
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    /// Sets the POP3 server port. Default is 995.
    #[must_use]
    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Sets the POP3 account name (required).
    #[must_use]
    pub fn account(mut self, account: impl Into<String>) -> Self {
        self.account = Some(account.into());
        self
    }

    /// Sets the POP3 password (required).
    #[must_use]
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(SecretString::from(password.into()));
        self
    }

    /// Sets the webhook URL codes are posted to (required).
    #[must_use]
    pub fn webhook_url(mut self, url: impl Into<String>) -> Self {
        self.webhook_url = Some(url.into());
        self
    }

    /// Sets the history database path. Default is `history.db`.
    #[must_use]
    pub fn database_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.database_path = Some(path.into());
        self
    }

    /// Sets the idle time between scan cycles. Default is 30 seconds.
    #[must_use]
    pub fn scan_interval(mut self, interval: Duration) -> Self {
        self.scan_interval = Some(interval);
        self
    }

    /// Sets the failed-delivery policy.
    #[must_use]
    pub fn notify_policy(mut self, policy: NotifyPolicy) -> Self {
        self.notify_policy = Some(policy);
        self
    }

    /// Sets the chat message template. It must contain `{code}`.
    #[must_use]
    pub fn message_template(mut self, template: impl Into<String>) -> Self {
        self.message_template = Some(template.into());
        self
    }

    /// Sets timeout configuration.
    #[must_use]
    pub fn timeouts(mut self, timeouts: TimeoutConfig) -> Self {
        self.timeouts = Some(timeouts);
        self
    }

    /// Sets the connection timeout.
    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.timeouts
            .get_or_insert_with(TimeoutConfig::default)
            .connect = timeout;
        self
    }

    /// Builds the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if required fields are missing or invalid.
    pub fn build(self) -> Result<RelayConfig> {
        let host = required(self.host, "host")?;
        let account = required(self.account, "account")?;
        let password = self
            .password
            .filter(|p| !p.expose_secret().trim().is_empty())
            .ok_or_else(|| Error::InvalidConfig {
                message: "password is required".into(),
            })?;
        let webhook_raw = required(self.webhook_url, "webhook URL")?;

        let webhook_url = validate_webhook_url(&webhook_raw)?;

        let port = self.port.unwrap_or(DEFAULT_POP3_PORT);
        if port == 0 {
            return Err(Error::InvalidConfig {
                message: "port must be non-zero".into(),
            });
        }

        let scan_interval = self.scan_interval.unwrap_or(DEFAULT_SCAN_INTERVAL);
        if scan_interval.is_zero() {
            return Err(Error::InvalidConfig {
                message: "scan interval must be non-zero".into(),
            });
        }

        let message_template = self
            .message_template
            .unwrap_or_else(|| DEFAULT_MESSAGE_TEMPLATE.to_string());
        if !message_template.contains(CODE_PLACEHOLDER) {
            return Err(Error::InvalidConfig {
                message: format!("message template must contain {CODE_PLACEHOLDER}"),
            });
        }

        Ok(RelayConfig {
            host,
            port,
            account,
            password,
            webhook_url,
            database_path: self
                .database_path
                .unwrap_or_else(|| PathBuf::from(DEFAULT_DATABASE_PATH)),
            scan_interval,
            notify_policy: self.notify_policy.unwrap_or_default(),
            message_template,
            timeouts: self.timeouts.unwrap_or_default(),
        })
    }
}

fn required(value: Option<String>, field: &str) -> Result<String> {
    value
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| Error::InvalidConfig {
            message: format!("{field} is required"),
        })
}

fn validate_webhook_url(raw: &str) -> Result<Url> {
    let url = Url::parse(raw.trim()).map_err(|source| Error::InvalidWebhookUrl { source })?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(Error::InvalidConfig {
            message: format!("webhook URL scheme must be http or https, got '{other}'"),
        }),
    }
}
