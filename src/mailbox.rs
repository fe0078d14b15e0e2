//! Mail source abstraction: list, fetch and delete messages in a remote mailbox.
//!
//! The scanner only needs the minimal POP3-shaped capability expressed by
//! [`MailSource`] and [`MailSession`]. [`Pop3Source`] is the production
//! implementation; tests substitute in-memory mailboxes.

use crate::config::{RelayConfig, TimeoutConfig};
use crate::connection::{self, TlsStream};
use crate::error::{Error, Result};
use crate::session::Pop3Session;
use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, instrument};

/// One entry of a mailbox listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailEntry {
    /// 1-based position in the current listing. Only valid for one session.
    pub index: u32,
    /// Identifier that stays the same across sessions for the same message.
    pub id: String,
}

impl MailEntry {
    /// Creates a listing entry.
    #[must_use]
    pub fn new(index: u32, id: impl Into<String>) -> Self {
        Self {
            index,
            id: id.into(),
        }
    }
}

/// Full raw content of one message, split into lines without terminators.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMessage {
    /// 1-based position in the current listing.
    pub index: u32,
    /// Stable identifier, the key recorded in the history store.
    pub id: String,
    /// Header block followed by body, one entry per line.
    pub lines: Vec<Vec<u8>>,
}

/// An authenticated mailbox session.
///
/// Implementations must leave the mailbox untouched until [`close`](Self::close)
/// succeeds: POP3 only commits deletions on `QUIT`.
#[async_trait]
pub trait MailSession: Send {
    /// Lists every message currently in the mailbox, in server order.
    async fn list(&mut self) -> Result<Vec<MailEntry>>;

    /// Retrieves the full content of one listed message.
    async fn fetch(&mut self, entry: &MailEntry) -> Result<RawMessage>;

    /// Marks a message for removal.
    async fn delete(&mut self, index: u32) -> Result<()>;

    /// Ends the session, committing deletions.
    async fn close(&mut self) -> Result<()>;
}

/// Something that can open [`MailSession`]s.
#[async_trait]
pub trait MailSource: Send + Sync {
    /// Session type produced by [`connect`](Self::connect).
    type Session: MailSession;

    /// Opens an authenticated session.
    async fn connect(&self) -> Result<Self::Session>;
}

/// POP3-over-TLS mail source.
#[derive(Clone)]
pub struct Pop3Source {
    host: String,
    address: String,
    account: String,
    password: SecretString,
    timeouts: TimeoutConfig,
}

impl Pop3Source {
    /// Creates a source from the relay configuration.
    #[must_use]
    pub fn new(config: &RelayConfig) -> Self {
        Self {
            host: config.host.clone(),
            address: config.server_address(),
            account: config.account.clone(),
            password: SecretString::from(config.password().to_string()),
            timeouts: config.timeouts.clone(),
        }
    }
}

impl std::fmt::Debug for Pop3Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pop3Source")
            .field("address", &self.address)
            .field("account", &self.account)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl MailSource for Pop3Source {
    type Session = Pop3Session<TlsStream>;

    #[instrument(
        name = "Pop3Source::connect",
        skip_all,
        fields(address = %self.address, account = %self.account)
    )]
    async fn connect(&self) -> Result<Self::Session> {
        let target = &self.address;
        let timeout = self.timeouts.connect;

        let stream = tokio::time::timeout(
            timeout,
            connection::establish_tls_connection(&self.host, target),
        )
        .await
        .map_err(|_| Error::ConnectTimeout {
            target: target.clone(),
            timeout,
        })??;

        debug!("TLS connection established");

        let mut session = Pop3Session::open(stream, self.timeouts.clone()).await?;
        session
            .login(&self.account, self.password.expose_secret())
            .await?;

        debug!("Authenticated");

        Ok(session)
    }
}
