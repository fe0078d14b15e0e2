//! Error types for the code-relay crate.
//!
//! All errors implement [`std::error::Error`] and provide context about what went wrong.
//! Errors are categorized by their retryability (see [`Error::is_retryable`]) and by
//! whether they leave the POP3 stream in an unknown state (see [`Error::desyncs_session`]).

use std::time::Duration;
use thiserror::Error;

/// Result type alias using [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while relaying login codes.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    // ─────────────────────────────────────────────────────────────────────────
    // Configuration errors (NOT retryable, fatal at startup)
    // ─────────────────────────────────────────────────────────────────────────
    /// A required environment variable is missing or empty.
    #[error("required {name} not found")]
    MissingEnv {
        /// Name of the environment variable.
        name: &'static str,
    },

    /// Invalid configuration provided.
    #[error("invalid configuration: {message}")]
    InvalidConfig {
        /// Description of the configuration error.
        message: String,
    },

    /// The webhook URL could not be parsed.
    #[error("invalid webhook URL")]
    InvalidWebhookUrl {
        /// The underlying parse error.
        #[source]
        source: url::ParseError,
    },

    /// Invalid DNS name for TLS.
    #[error("invalid DNS name for host '{host}'")]
    InvalidDnsName {
        /// The invalid hostname.
        host: String,
        /// The underlying DNS name error.
        #[source]
        source: rustls::client::InvalidDnsNameError,
    },

    // ─────────────────────────────────────────────────────────────────────────
    // Network / connection errors (RETRYABLE)
    // ─────────────────────────────────────────────────────────────────────────
    /// Failed to establish TCP connection.
    #[error("failed to connect to {target}")]
    TcpConnect {
        /// The target address that failed.
        target: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Failed to establish TLS connection.
    #[error("failed to establish TLS connection to {target}")]
    TlsConnect {
        /// The target address that failed.
        target: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Reading from or writing to an established session failed.
    #[error("I/O failure during POP3 {command}")]
    Transport {
        /// The POP3 command in flight.
        command: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The server closed the connection mid-command.
    #[error("connection closed by server during POP3 {command}")]
    ConnectionClosed {
        /// The POP3 command in flight.
        command: String,
    },

    // ─────────────────────────────────────────────────────────────────────────
    // Timeout errors (RETRYABLE)
    // ─────────────────────────────────────────────────────────────────────────
    /// Connection timeout.
    #[error("connection timeout to {target} after {timeout:?}")]
    ConnectTimeout {
        /// The target address.
        target: String,
        /// The timeout duration that was exceeded.
        timeout: Duration,
    },

    /// Authentication timeout.
    #[error("authentication timeout for {account} after {timeout:?}")]
    AuthTimeout {
        /// The account used for authentication.
        account: String,
        /// The timeout duration that was exceeded.
        timeout: Duration,
    },

    /// A single POP3 command did not complete in time.
    #[error("POP3 {command} timeout after {timeout:?}")]
    CommandTimeout {
        /// The POP3 command in flight.
        command: String,
        /// The timeout duration that was exceeded.
        timeout: Duration,
    },

    // ─────────────────────────────────────────────────────────────────────────
    // POP3 protocol errors (RETRYABLE, the server may recover)
    // ─────────────────────────────────────────────────────────────────────────
    /// The server greeting was not `+OK`.
    #[error("POP3 server rejected the connection: {reply}")]
    Greeting {
        /// Server reply text.
        reply: String,
    },

    /// `USER`/`PASS` was rejected.
    #[error("POP3 login failed for {account}: {reply}")]
    Login {
        /// The account used for login.
        account: String,
        /// Server reply text.
        reply: String,
    },

    /// `UIDL` was rejected.
    #[error("POP3 listing rejected: {reply}")]
    Listing {
        /// Server reply text.
        reply: String,
    },

    /// `RETR` was rejected.
    #[error("POP3 retrieve of message {index} rejected: {reply}")]
    Retrieve {
        /// Message index within the current listing.
        index: u32,
        /// Server reply text.
        reply: String,
    },

    /// `DELE` was rejected.
    #[error("POP3 delete of message {index} rejected: {reply}")]
    Delete {
        /// Message index within the current listing.
        index: u32,
        /// Server reply text.
        reply: String,
    },

    /// `QUIT` was rejected; pending deletions were not committed.
    #[error("POP3 quit rejected: {reply}")]
    Quit {
        /// Server reply text.
        reply: String,
    },

    /// The server answered with neither `+OK` nor `-ERR`.
    #[error("unexpected POP3 reply to {command}: {reply}")]
    UnexpectedReply {
        /// The POP3 command in flight.
        command: String,
        /// The raw reply line (lossily decoded).
        reply: String,
    },

    // ─────────────────────────────────────────────────────────────────────────
    // Storage errors
    // ─────────────────────────────────────────────────────────────────────────
    /// The history database could not be opened or migrated.
    #[error("failed to open history database at {path}")]
    StoreOpen {
        /// Database file path.
        path: String,
        /// The underlying database error.
        #[source]
        source: sqlx::Error,
    },

    /// A history database query failed.
    #[error("history database {operation} failed")]
    Store {
        /// What the store was doing.
        operation: &'static str,
        /// The underlying database error.
        #[source]
        source: sqlx::Error,
    },

    /// A stored record has an unreadable timestamp.
    #[error("history record for {mail_id} has invalid timestamp '{value}'")]
    CorruptRecord {
        /// The mail identifier of the record.
        mail_id: String,
        /// The stored timestamp text.
        value: String,
    },

    // ─────────────────────────────────────────────────────────────────────────
    // Webhook delivery errors (RETRYABLE)
    // ─────────────────────────────────────────────────────────────────────────
    /// The HTTP client could not be built.
    #[error("failed to build webhook HTTP client")]
    WebhookClient {
        /// The underlying HTTP error.
        #[source]
        source: reqwest::Error,
    },

    /// The webhook request could not be sent.
    #[error("webhook request failed")]
    WebhookRequest {
        /// The underlying HTTP error.
        #[source]
        source: reqwest::Error,
    },

    /// The webhook answered with a non-2xx status.
    #[error("webhook responded with HTTP {status}")]
    WebhookStatus {
        /// HTTP status code.
        status: u16,
    },
}

impl Error {
    /// Returns `true` if this error represents a transient failure that might succeed on retry.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::TcpConnect { .. }
            | Error::TlsConnect { .. }
            | Error::Transport { .. }
            | Error::ConnectionClosed { .. }
            | Error::ConnectTimeout { .. }
            | Error::AuthTimeout { .. }
            | Error::CommandTimeout { .. }
            | Error::Greeting { .. }
            | Error::Login { .. }
            | Error::Listing { .. }
            | Error::Retrieve { .. }
            | Error::Delete { .. }
            | Error::Quit { .. }
            | Error::UnexpectedReply { .. }
            | Error::Store { .. }
            | Error::WebhookRequest { .. }
            | Error::WebhookStatus { .. } => true,

            Error::MissingEnv { .. }
            | Error::InvalidConfig { .. }
            | Error::InvalidWebhookUrl { .. }
            | Error::InvalidDnsName { .. }
            | Error::StoreOpen { .. }
            | Error::CorruptRecord { .. }
            | Error::WebhookClient { .. } => false,
        }
    }

    /// Returns `true` if the POP3 stream can no longer be trusted after this error.
    ///
    /// A `-ERR` reply leaves the session usable; a timeout, I/O failure or garbled
    /// reply means later replies could be attributed to the wrong command.
    #[must_use]
    pub fn desyncs_session(&self) -> bool {
        matches!(
            self,
            Error::TcpConnect { .. }
                | Error::TlsConnect { .. }
                | Error::Transport { .. }
                | Error::ConnectionClosed { .. }
                | Error::ConnectTimeout { .. }
                | Error::AuthTimeout { .. }
                | Error::CommandTimeout { .. }
                | Error::UnexpectedReply { .. }
        )
    }

    /// Returns the error category for logging purposes.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::MissingEnv { .. }
            | Error::InvalidConfig { .. }
            | Error::InvalidWebhookUrl { .. }
            | Error::InvalidDnsName { .. }
            | Error::WebhookClient { .. } => ErrorCategory::Configuration,

            Error::TcpConnect { .. }
            | Error::TlsConnect { .. }
            | Error::Transport { .. }
            | Error::ConnectionClosed { .. } => ErrorCategory::Network,

            Error::ConnectTimeout { .. }
            | Error::AuthTimeout { .. }
            | Error::CommandTimeout { .. } => ErrorCategory::Timeout,

            Error::Greeting { .. }
            | Error::Login { .. }
            | Error::Listing { .. }
            | Error::Retrieve { .. }
            | Error::Delete { .. }
            | Error::Quit { .. }
            | Error::UnexpectedReply { .. } => ErrorCategory::Protocol,

            Error::StoreOpen { .. } | Error::Store { .. } | Error::CorruptRecord { .. } => {
                ErrorCategory::Storage
            }

            Error::WebhookRequest { .. } | Error::WebhookStatus { .. } => ErrorCategory::Delivery,
        }
    }
}

/// Error categories for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Configuration or validation errors.
    Configuration,
    /// Network connectivity errors.
    Network,
    /// Timeout errors.
    Timeout,
    /// POP3 protocol errors.
    Protocol,
    /// History database errors.
    Storage,
    /// Webhook delivery errors.
    Delivery,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorCategory::Configuration => write!(f, "configuration"),
            ErrorCategory::Network => write!(f, "network"),
            ErrorCategory::Timeout => write!(f, "timeout"),
            ErrorCategory::Protocol => write!(f, "protocol"),
            ErrorCategory::Storage => write!(f, "storage"),
            ErrorCategory::Delivery => write!(f, "delivery"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        let err = Error::MissingEnv {
            name: "POP3_SERVER",
        };
        assert!(!err.is_retryable());

        let err = Error::TcpConnect {
            target: "pop.example.com:995".into(),
            source: std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused"),
        };
        assert!(err.is_retryable());

        let err = Error::WebhookStatus { status: 503 };
        assert!(err.is_retryable());
    }

    #[test]
    fn test_error_categories() {
        let err = Error::InvalidConfig {
            message: "bad port".into(),
        };
        assert_eq!(err.category(), ErrorCategory::Configuration);

        let err = Error::CommandTimeout {
            command: "RETR 1".into(),
            timeout: Duration::from_secs(10),
        };
        assert_eq!(err.category(), ErrorCategory::Timeout);

        let err = Error::Retrieve {
            index: 3,
            reply: "no such message".into(),
        };
        assert_eq!(err.category(), ErrorCategory::Protocol);
        assert_eq!(err.category().to_string(), "protocol");
    }

    #[test]
    fn test_rejections_keep_session_usable() {
        let rejected = Error::Retrieve {
            index: 1,
            reply: "locked".into(),
        };
        assert!(!rejected.desyncs_session());

        let timed_out = Error::CommandTimeout {
            command: "RETR 1".into(),
            timeout: Duration::from_secs(1),
        };
        assert!(timed_out.desyncs_session());

        let garbled = Error::UnexpectedReply {
            command: "UIDL".into(),
            reply: "hello".into(),
        };
        assert!(garbled.desyncs_session());
    }

    #[test]
    fn test_missing_env_message() {
        let err = Error::MissingEnv {
            name: "SLACK_WEBHOOK",
        };
        assert_eq!(err.to_string(), "required SLACK_WEBHOOK not found");
    }
}
