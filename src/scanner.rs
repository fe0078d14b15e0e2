//! The scan loop: list, classify, notify, record, delete, sleep.

use crate::classifier::{Classification, Classifier};
use crate::config::NotifyPolicy;
use crate::error::Result;
use crate::mailbox::{MailEntry, MailSession, MailSource};
use crate::notifier::Notifier;
use crate::store::HistoryStore;
use std::collections::HashSet;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, info, info_span, instrument, warn, Instrument};

/// Default idle time between scan cycles.
pub const DEFAULT_SCAN_INTERVAL: Duration = Duration::from_secs(30);

/// What one scan cycle did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanReport {
    /// Entries in the mailbox listing.
    pub listed: usize,
    /// Entries skipped because their id was already recorded.
    pub skipped_seen: usize,
    /// Entries whose retrieval was rejected; left for the next cycle.
    pub fetch_failed: usize,
    /// Messages that are not login-code notices.
    pub not_matched: usize,
    /// Login-code notices without a usable code.
    pub no_code: usize,
    /// Codes extracted during the cycle, in mailbox order.
    pub codes: Vec<String>,
    /// Codes the notifier failed to deliver.
    pub notify_failed: usize,
    /// Messages marked for deletion.
    pub deleted: usize,
    /// Messages the server refused to delete.
    pub delete_failed: usize,
    /// Sessions reopened after a retrieval broke the stream.
    pub reconnects: usize,
}

/// How far one session got through the listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pass {
    Complete,
    Stalled,
}

/// Drives a [`MailSource`] through repeated scan cycles.
pub struct Scanner<S, N> {
    source: S,
    notifier: N,
    store: HistoryStore,
    classifier: Box<dyn Classifier>,
    policy: NotifyPolicy,
    interval: Duration,
}

impl<S, N> Scanner<S, N>
where
    S: MailSource,
    N: Notifier,
{
    /// Creates a scanner with the default policy and interval.
    pub fn new(
        source: S,
        notifier: N,
        store: HistoryStore,
        classifier: impl Classifier + 'static,
    ) -> Self {
        Self {
            source,
            notifier,
            store,
            classifier: Box::new(classifier),
            policy: NotifyPolicy::default(),
            interval: DEFAULT_SCAN_INTERVAL,
        }
    }

    /// Sets the handling of failed deliveries.
    #[must_use]
    pub fn with_policy(mut self, policy: NotifyPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Sets the idle time between cycles.
    #[must_use]
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Returns the history store.
    #[must_use]
    pub fn store(&self) -> &HistoryStore {
        &self.store
    }

    /// Consumes the scanner, returning the history store.
    #[must_use]
    pub fn into_store(self) -> HistoryStore {
        self.store
    }

    /// Runs one scan cycle.
    ///
    /// The session is closed on every path that reaches a connected session, so
    /// deletions marked before a mid-cycle failure are still committed.
    ///
    /// A retrieval that breaks the stream (timeout, I/O failure, garbled reply)
    /// only skips that message: the session is closed, a new one is opened, and
    /// the cycle continues with the entries not yet visited.
    ///
    /// # Errors
    ///
    /// Returns an error if the mailbox cannot be reached, the listing or a
    /// deletion breaks the stream, or the history store fails. Per-message
    /// retrieval failures are counted in the report instead.
    #[instrument(name = "Scanner::scan_once", skip_all)]
    pub async fn scan_once(&self) -> Result<ScanReport> {
        let mut report = ScanReport::default();
        let mut visited = HashSet::new();

        loop {
            let mut session = self.source.connect().await?;

            let outcome = self.process(&mut session, &mut visited, &mut report).await;

            if let Err(err) = session.close().await {
                warn!(error = %err, category = %err.category(), "Failed to close mailbox session");
            }

            match outcome? {
                Pass::Complete => return Ok(report),
                Pass::Stalled => {
                    report.reconnects += 1;
                    debug!(reconnects = report.reconnects, "Reconnecting to finish the cycle");
                }
            }
        }
    }

    async fn process(
        &self,
        session: &mut S::Session,
        visited: &mut HashSet<String>,
        report: &mut ScanReport,
    ) -> Result<Pass> {
        let entries = match session.list().await {
            Ok(entries) => entries,
            Err(err) if err.desyncs_session() => return Err(err),
            Err(err) => {
                warn!(error = %err, "Mailbox listing rejected, treating as empty");
                Vec::new()
            }
        };
        if report.reconnects == 0 {
            report.listed = entries.len();
        }

        for entry in &entries {
            if !visited.insert(entry.id.clone()) {
                continue;
            }
            if self.store.has(&entry.id).await? {
                report.skipped_seen += 1;
                continue;
            }
            let pass = self
                .handle(session, entry, report)
                .instrument(info_span!("message", index = entry.index, mail_id = %entry.id))
                .await?;
            if pass == Pass::Stalled {
                return Ok(Pass::Stalled);
            }
        }

        Ok(Pass::Complete)
    }

    async fn handle(
        &self,
        session: &mut S::Session,
        entry: &MailEntry,
        report: &mut ScanReport,
    ) -> Result<Pass> {
        let message = match session.fetch(entry).await {
            Ok(message) => message,
            Err(err) if err.desyncs_session() => {
                warn!(
                    error = %err,
                    category = %err.category(),
                    "Retrieval broke the session, skipping message"
                );
                report.fetch_failed += 1;
                return Ok(Pass::Stalled);
            }
            Err(err) => {
                warn!(error = %err, "Retrieval rejected, will retry next cycle");
                report.fetch_failed += 1;
                return Ok(Pass::Complete);
            }
        };

        match self.classifier.classify(&message.lines) {
            Classification::MatchedWithCode(code) => {
                debug!(code = %code, "Extracted login code");

                let delivered = match self.notifier.notify(&code).await {
                    Ok(()) => true,
                    Err(err) => {
                        warn!(error = %err, category = %err.category(), "Failed to deliver code");
                        report.notify_failed += 1;
                        false
                    }
                };
                report.codes.push(code);

                if !delivered && self.policy == NotifyPolicy::RetryUntilDelivered {
                    return Ok(Pass::Complete);
                }

                self.store.record(&message.id).await?;

                match session.delete(message.index).await {
                    Ok(()) => report.deleted += 1,
                    Err(err) if err.desyncs_session() => return Err(err),
                    Err(err) => {
                        warn!(error = %err, "Server refused to delete message");
                        report.delete_failed += 1;
                    }
                }
                info!(delivered, "Relayed login code");
            }
            Classification::MatchedNoCode => {
                warn!(
                    classifier = self.classifier.description(),
                    "Login-code notice without a code"
                );
                report.no_code += 1;
                self.store.record(&message.id).await?;
            }
            Classification::NotMatched => {
                debug!("Not a login-code notice");
                report.not_matched += 1;
                self.store.record(&message.id).await?;
            }
        }

        Ok(Pass::Complete)
    }

    /// Scans forever, sleeping between cycles, until `shutdown` resolves.
    ///
    /// Cycle failures are logged and retried after the interval. Shutdown is
    /// observed between cycles, never in the middle of one.
    pub async fn run<F>(&self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let mut cycle: u64 = 0;

        loop {
            cycle += 1;
            let span = info_span!("cycle", cycle);

            match self.scan_once().instrument(span).await {
                Ok(report) => info!(
                    cycle,
                    listed = report.listed,
                    skipped = report.skipped_seen,
                    codes = report.codes.len(),
                    deleted = report.deleted,
                    "Scan cycle complete"
                ),
                Err(err) => warn!(
                    cycle,
                    error = %err,
                    category = %err.category(),
                    retryable = err.is_retryable(),
                    "Scan cycle failed"
                ),
            }

            tokio::select! {
                () = &mut shutdown => {
                    info!(cycle, "Shutdown requested");
                    break;
                }
                () = tokio::time::sleep(self.interval) => {}
            }
        }
    }
}

impl<S, N> std::fmt::Debug for Scanner<S, N>
where
    S: std::fmt::Debug,
    N: std::fmt::Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scanner")
            .field("source", &self.source)
            .field("notifier", &self.notifier)
            .field("classifier", &self.classifier.description())
            .field("policy", &self.policy)
            .field("interval", &self.interval)
            .finish_non_exhaustive()
    }
}
