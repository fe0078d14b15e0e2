//! # code-relay
//!
//! Relays one-time login codes from a POP3 mailbox to a chat webhook.
//!
//! Each scan cycle the relay:
//! - lists the mailbox and skips messages whose id is already in the history store
//! - classifies each new message against a login-code template and extracts the code
//! - posts the code to the webhook, at most once per message
//! - records the message id and deletes consumed mail
//!
//! ## Quick Start
//!
//! ```no_run
//! use code_relay::{
//!     HistoryStore, LoginCodeTemplate, Pop3Source, RelayConfig, Scanner, WebhookNotifier,
//! };
//!
//! # async fn example() -> code_relay::Result<()> {
//! let config = RelayConfig::builder()
//!     .host("pop.example.com")
//!     .account("codes@example.com")
//!     .password("app-password")
//!     .webhook_url("https://hooks.slack.com/services/T000/B000/XXXX")
//!     .build()?;
//!
//! let store = HistoryStore::open(&config.database_path).await?;
//! let scanner = Scanner::new(
//!     Pop3Source::new(&config),
//!     WebhookNotifier::from_config(&config)?,
//!     store,
//!     LoginCodeTemplate::streamyard(),
//! );
//!
//! let report = scanner.scan_once().await?;
//! println!("relayed {} code(s)", report.codes.len());
//! # Ok(())
//! # }
//! ```
//!
//! ## Error Handling
//!
//! Every fallible operation returns [`Error`]. [`Error::is_retryable`] tells
//! transient failures apart from permanent ones, and [`Error::desyncs_session`]
//! tells whether a POP3 session can still be used:
//!
//! ```
//! use code_relay::Error;
//!
//! fn handle_error(error: &Error) {
//!     if error.is_retryable() {
//!         println!("Transient error, next cycle may succeed: {}", error);
//!     } else {
//!         println!("Permanent error: {}", error);
//!     }
//! }
//! ```
//!
//! ## Observability
//!
//! The crate emits `tracing` spans and events; the binary installs the
//! subscriber through [`logging::init`].
//!
//! ### Span Naming Convention
//!
//! - `Scanner::scan_once` - One scan cycle
//! - `Pop3Source::connect` - Connection and login
//! - `session::uidl`, `session::retr`, `session::dele`, `session::quit` - POP3 commands
//! - `connection::establish_tls` - TLS connection
//! - `WebhookNotifier::notify` - Webhook delivery
//! - `HistoryStore::open`, `HistoryStore::record` - History database
//!
//! ### Standard Fields
//!
//! - `cycle` - Scan cycle number
//! - `host` - POP3 or webhook hostname
//! - `index` - Position in the current listing
//! - `mail_id` - Stable message id
//!
//! Codes are only logged at `debug` level; passwords are never logged.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Public modules
pub mod classifier;
pub mod config;
pub mod error;
pub mod logging;
pub mod mailbox;
pub mod notifier;
pub mod scanner;
pub mod session;
pub mod store;

// Internal modules
mod connection;

// Re-exports for ergonomic API
pub use classifier::{Classification, Classifier, LoginCodeTemplate};
pub use config::{NotifyPolicy, RelayConfig, RelayConfigBuilder, TimeoutConfig};
pub use error::{Error, ErrorCategory, Result};
pub use mailbox::{MailEntry, MailSession, MailSource, Pop3Source, RawMessage};
pub use notifier::{Notifier, WebhookNotifier};
pub use scanner::{ScanReport, Scanner};
pub use session::Pop3Session;
pub use store::{HistoryStore, ProcessedRecord};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_api_accessible() {
        // Ensure all public types are accessible
        let _ = RelayConfig::builder();
        let _ = LoginCodeTemplate::streamyard();
        let _ = ScanReport::default();
        let _ = NotifyPolicy::default();
    }
}
