//! POP3 session over any async byte stream.
//!
//! Implements the handful of RFC 1939 commands the relay needs: `USER`/`PASS`,
//! `UIDL`, `RETR`, `DELE` and `QUIT`. Each command is bounded by a timeout from
//! [`TimeoutConfig`].

use crate::config::TimeoutConfig;
use crate::error::{Error, Result};
use crate::mailbox::{MailEntry, MailSession, RawMessage};
use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::{debug, instrument, warn};

/// Longest reply line accepted, terminator included.
const MAX_LINE_LENGTH: usize = 64 * 1024;

/// Status line of a POP3 reply.
#[derive(Debug, PartialEq, Eq)]
enum Status {
    Ok(String),
    Err(String),
}

/// An open POP3 session.
///
/// Obtain one through [`Pop3Source`](crate::mailbox::Pop3Source) or, for any
/// stream, [`Pop3Session::open`].
pub struct Pop3Session<S> {
    stream: BufReader<S>,
    timeouts: TimeoutConfig,
}

impl<S> Pop3Session<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Wraps a connected stream and consumes the server greeting.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Greeting`] if the server does not answer `+OK`.
    pub async fn open(stream: S, timeouts: TimeoutConfig) -> Result<Self> {
        let mut session = Self {
            stream: BufReader::new(stream),
            timeouts,
        };

        let timeout = session.timeouts.command;
        let status = bounded(timeout, "greeting", session.read_status("greeting")).await?;
        match status {
            Status::Ok(banner) => {
                debug!(banner = %banner, "POP3 greeting received");
                Ok(session)
            }
            Status::Err(reply) => Err(Error::Greeting { reply }),
        }
    }

    /// Authenticates with `USER`/`PASS`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Login`] if either command is rejected and
    /// [`Error::AuthTimeout`] if the exchange takes too long.
    #[instrument(name = "session::login", skip(self, password))]
    pub async fn login(&mut self, account: &str, password: &str) -> Result<()> {
        let timeout = self.timeouts.auth;
        tokio::time::timeout(timeout, self.login_inner(account, password))
            .await
            .map_err(|_| Error::AuthTimeout {
                account: account.to_string(),
                timeout,
            })?
    }

    async fn login_inner(&mut self, account: &str, password: &str) -> Result<()> {
        let rejected = |reply| Error::Login {
            account: account.to_string(),
            reply,
        };

        if let Status::Err(reply) = self.command(&format!("USER {account}"), "USER").await? {
            return Err(rejected(reply));
        }
        // The label keeps the password out of error messages.
        if let Status::Err(reply) = self.command(&format!("PASS {password}"), "PASS").await? {
            return Err(rejected(reply));
        }
        Ok(())
    }

    /// Lists messages with their unique ids (`UIDL`).
    ///
    /// Lines that do not look like `<index> <id>` are skipped.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Listing`] if the server rejects `UIDL`.
    #[instrument(name = "session::uidl", skip(self))]
    pub async fn uidl(&mut self) -> Result<Vec<MailEntry>> {
        let timeout = self.timeouts.command;
        let lines = bounded(timeout, "UIDL", async {
            match self.command("UIDL", "UIDL").await? {
                Status::Ok(_) => self.read_multiline("UIDL").await,
                Status::Err(reply) => Err(Error::Listing { reply }),
            }
        })
        .await?;

        let entries: Vec<MailEntry> = lines.iter().filter_map(|l| parse_uidl_line(l)).collect();
        if entries.len() != lines.len() {
            warn!(
                skipped = lines.len() - entries.len(),
                "Ignoring malformed UIDL lines"
            );
        }
        debug!(count = entries.len(), "Listed messages");
        Ok(entries)
    }

    /// Retrieves one message (`RETR`), dot-unstuffed and split into lines.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Retrieve`] if the server rejects the command.
    #[instrument(name = "session::retr", skip(self))]
    pub async fn retr(&mut self, index: u32) -> Result<Vec<Vec<u8>>> {
        let timeout = self.timeouts.retrieve;
        let command = format!("RETR {index}");
        bounded(timeout, &command, async {
            match self.command(&command, &command).await? {
                Status::Ok(_) => self.read_multiline(&command).await,
                Status::Err(reply) => Err(Error::Retrieve { index, reply }),
            }
        })
        .await
    }

    /// Marks a message as deleted (`DELE`). Takes effect on `QUIT`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Delete`] if the server rejects the command.
    #[instrument(name = "session::dele", skip(self))]
    pub async fn dele(&mut self, index: u32) -> Result<()> {
        let timeout = self.timeouts.command;
        let command = format!("DELE {index}");
        let status = bounded(timeout, &command, self.command(&command, &command)).await?;
        match status {
            Status::Ok(_) => Ok(()),
            Status::Err(reply) => Err(Error::Delete { index, reply }),
        }
    }

    /// Ends the session (`QUIT`), committing deletions.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Quit`] if the server refuses to commit.
    #[instrument(name = "session::quit", skip(self))]
    pub async fn quit(&mut self) -> Result<()> {
        let timeout = self.timeouts.quit;
        let status = bounded(timeout, "QUIT", self.command("QUIT", "QUIT")).await?;
        let _ = self.stream.get_mut().shutdown().await;
        match status {
            Status::Ok(_) => Ok(()),
            Status::Err(reply) => Err(Error::Quit { reply }),
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Wire helpers
    // ─────────────────────────────────────────────────────────────────────────

    /// Sends one command line and reads its status line.
    async fn command(&mut self, line: &str, label: &str) -> Result<Status> {
        let transport = |source| Error::Transport {
            command: label.to_string(),
            source,
        };

        let stream = self.stream.get_mut();
        stream
            .write_all(format!("{line}\r\n").as_bytes())
            .await
            .map_err(transport)?;
        stream.flush().await.map_err(transport)?;

        self.read_status(label).await
    }

    async fn read_status(&mut self, label: &str) -> Result<Status> {
        let line = self.read_line(label).await?;
        parse_status(&line).ok_or_else(|| Error::UnexpectedReply {
            command: label.to_string(),
            reply: String::from_utf8_lossy(&line).into_owned(),
        })
    }

    /// Reads a dot-terminated multi-line body, undoing byte-stuffing.
    async fn read_multiline(&mut self, label: &str) -> Result<Vec<Vec<u8>>> {
        let mut lines = Vec::new();
        loop {
            let mut line = self.read_line(label).await?;
            if line == b"." {
                return Ok(lines);
            }
            if line.first() == Some(&b'.') {
                line.remove(0);
            }
            lines.push(line);
        }
    }

    /// Reads one CRLF (or bare LF) terminated line, without the terminator.
    ///
    /// Lines longer than [`MAX_LINE_LENGTH`] are rejected as garbled.
    async fn read_line(&mut self, label: &str) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        (&mut self.stream)
            .take(MAX_LINE_LENGTH as u64)
            .read_until(b'\n', &mut buf)
            .await
            .map_err(|source| Error::Transport {
                command: label.to_string(),
                source,
            })?;

        if buf.last() != Some(&b'\n') {
            if buf.len() >= MAX_LINE_LENGTH {
                return Err(Error::UnexpectedReply {
                    command: label.to_string(),
                    reply: format!("line exceeds {MAX_LINE_LENGTH} bytes"),
                });
            }
            return Err(Error::ConnectionClosed {
                command: label.to_string(),
            });
        }

        buf.pop();
        if buf.last() == Some(&b'\r') {
            buf.pop();
        }
        Ok(buf)
    }
}

#[async_trait]
impl<S> MailSession for Pop3Session<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn list(&mut self) -> Result<Vec<MailEntry>> {
        self.uidl().await
    }

    async fn fetch(&mut self, entry: &MailEntry) -> Result<RawMessage> {
        let lines = self.retr(entry.index).await?;
        Ok(RawMessage {
            index: entry.index,
            id: entry.id.clone(),
            lines,
        })
    }

    async fn delete(&mut self, index: u32) -> Result<()> {
        self.dele(index).await
    }

    async fn close(&mut self) -> Result<()> {
        self.quit().await
    }
}

impl<S> std::fmt::Debug for Pop3Session<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pop3Session")
            .field("timeouts", &self.timeouts)
            .finish_non_exhaustive()
    }
}

/// Runs `fut` under `timeout`, mapping expiry to [`Error::CommandTimeout`].
async fn bounded<T, F>(timeout: Duration, command: &str, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::time::timeout(timeout, fut)
        .await
        .map_err(|_| Error::CommandTimeout {
            command: command.to_string(),
            timeout,
        })?
}

fn parse_status(line: &[u8]) -> Option<Status> {
    let text = String::from_utf8_lossy(line);
    if let Some(rest) = text.strip_prefix("+OK") {
        Some(Status::Ok(rest.trim().to_string()))
    } else {
        text.strip_prefix("-ERR")
            .map(|rest| Status::Err(rest.trim().to_string()))
    }
}

fn parse_uidl_line(line: &[u8]) -> Option<MailEntry> {
    let text = std::str::from_utf8(line).ok()?;
    let mut parts = text.split_whitespace();
    let index = parts.next()?.parse::<u32>().ok().filter(|i| *i > 0)?;
    let id = parts.next()?;
    if parts.next().is_some() {
        return None;
    }
    Some(MailEntry::new(index, id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, DuplexStream};
    use tokio::task::JoinHandle;

    /// Plays the server side: sends a greeting, then for each step reads one
    /// command line, checks it, and writes the canned reply.
    fn scripted_server(
        stream: DuplexStream,
        greeting: &'static str,
        script: Vec<(&'static str, &'static str)>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let (read, mut write) = tokio::io::split(stream);
            let mut read = tokio::io::BufReader::new(read);
            write.write_all(greeting.as_bytes()).await.unwrap();
            for (expected, reply) in script {
                let mut line = String::new();
                read.read_line(&mut line).await.unwrap();
                assert_eq!(line, format!("{expected}\r\n"));
                write.write_all(reply.as_bytes()).await.unwrap();
            }
        })
    }

    fn quick_timeouts() -> TimeoutConfig {
        TimeoutConfig {
            command: Duration::from_millis(500),
            retrieve: Duration::from_millis(500),
            auth: Duration::from_millis(500),
            quit: Duration::from_millis(500),
            ..TimeoutConfig::default()
        }
    }

    #[tokio::test]
    async fn test_login_list_retrieve_delete_quit() {
        let (client, server) = tokio::io::duplex(8192);
        let server = scripted_server(
            server,
            "+OK POP3 ready\r\n",
            vec![
                ("USER codes@example.com", "+OK\r\n"),
                ("PASS hunter2", "+OK logged in\r\n"),
                ("UIDL", "+OK\r\n1 AAA\r\n2 BBB\r\n.\r\n"),
                (
                    "RETR 2",
                    "+OK 42 octets\r\nSubject: hi\r\n\r\n..dotted\r\n.\r\n",
                ),
                ("DELE 2", "+OK marked\r\n"),
                ("QUIT", "+OK bye\r\n"),
            ],
        );

        let mut session = Pop3Session::open(client, quick_timeouts()).await.unwrap();
        session.login("codes@example.com", "hunter2").await.unwrap();

        let entries = session.list().await.unwrap();
        assert_eq!(
            entries,
            vec![MailEntry::new(1, "AAA"), MailEntry::new(2, "BBB")]
        );

        let message = session.fetch(&entries[1]).await.unwrap();
        assert_eq!(message.id, "BBB");
        assert_eq!(
            message.lines,
            vec![b"Subject: hi".to_vec(), Vec::new(), b".dotted".to_vec()]
        );

        session.delete(2).await.unwrap();
        session.close().await.unwrap();
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_rejected_greeting() {
        let (client, server) = tokio::io::duplex(1024);
        let server = scripted_server(server, "-ERR go away\r\n", vec![]);

        let err = Pop3Session::open(client, quick_timeouts())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Greeting { reply } if reply == "go away"));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_rejected_password_does_not_leak() {
        let (client, server) = tokio::io::duplex(1024);
        let server = scripted_server(
            server,
            "+OK\r\n",
            vec![
                ("USER me", "+OK\r\n"),
                ("PASS topsecret", "-ERR [AUTH] invalid credentials\r\n"),
            ],
        );

        let mut session = Pop3Session::open(client, quick_timeouts()).await.unwrap();
        let err = session.login("me", "topsecret").await.unwrap_err();
        assert!(matches!(err, Error::Login { .. }));
        assert!(!err.to_string().contains("topsecret"));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_retrieve_rejection_keeps_session_usable() {
        let (client, server) = tokio::io::duplex(1024);
        let server = scripted_server(
            server,
            "+OK\r\n",
            vec![
                ("RETR 7", "-ERR no such message\r\n"),
                ("QUIT", "+OK\r\n"),
            ],
        );

        let mut session = Pop3Session::open(client, quick_timeouts()).await.unwrap();
        let err = session.retr(7).await.unwrap_err();
        assert!(matches!(err, Error::Retrieve { index: 7, .. }));
        assert!(!err.desyncs_session());
        session.quit().await.unwrap();
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_uidl_rejected() {
        let (client, server) = tokio::io::duplex(1024);
        let server = scripted_server(
            server,
            "+OK\r\n",
            vec![("UIDL", "-ERR command not supported\r\n")],
        );

        let mut session = Pop3Session::open(client, quick_timeouts()).await.unwrap();
        let err = session.uidl().await.unwrap_err();
        assert!(matches!(err, Error::Listing { .. }));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_uidl_skips_malformed_lines() {
        let (client, server) = tokio::io::duplex(1024);
        let server = scripted_server(
            server,
            "+OK\r\n",
            vec![("UIDL", "+OK\r\n1 AAA\r\ngarbage\r\n0 ZERO\r\n3 CCC\r\n.\r\n")],
        );

        let mut session = Pop3Session::open(client, quick_timeouts()).await.unwrap();
        let entries = session.uidl().await.unwrap();
        assert_eq!(
            entries,
            vec![MailEntry::new(1, "AAA"), MailEntry::new(3, "CCC")]
        );
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_garbled_reply_is_unexpected() {
        let (client, server) = tokio::io::duplex(1024);
        let server = scripted_server(server, "+OK\r\n", vec![("DELE 1", "HELLO?\r\n")]);

        let mut session = Pop3Session::open(client, quick_timeouts()).await.unwrap();
        let err = session.dele(1).await.unwrap_err();
        assert!(matches!(err, Error::UnexpectedReply { .. }));
        assert!(err.desyncs_session());
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_silent_server_times_out() {
        let (client, _server) = tokio::io::duplex(1024);

        let err = Pop3Session::open(client, quick_timeouts())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::CommandTimeout { .. }));
    }

    #[tokio::test]
    async fn test_closed_connection() {
        let (client, server) = tokio::io::duplex(1024);
        drop(server);

        let err = Pop3Session::open(client, quick_timeouts())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ConnectionClosed { .. }));
    }

    #[tokio::test]
    async fn test_overlong_line_is_rejected() {
        let (client, server) = tokio::io::duplex(8192);
        tokio::spawn(async move {
            let mut server = server;
            let flood = vec![b'A'; MAX_LINE_LENGTH + 100];
            let _ = server.write_all(b"+OK ").await;
            let _ = server.write_all(&flood).await;
            // Hold the pipe open so the reader hits the cap, not EOF.
            std::future::pending::<()>().await;
        });

        let err = Pop3Session::open(client, quick_timeouts())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::UnexpectedReply { ref reply, .. } if reply.contains("exceeds")));
        assert!(err.desyncs_session());
    }

    #[test]
    fn test_parse_status() {
        assert_eq!(
            parse_status(b"+OK 2 messages"),
            Some(Status::Ok("2 messages".into()))
        );
        assert_eq!(parse_status(b"-ERR nope"), Some(Status::Err("nope".into())));
        assert_eq!(parse_status(b"* OK imap"), None);
    }
}
