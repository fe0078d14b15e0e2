//! Persistent record of processed messages.
//!
//! One row per mail id; the `UNIQUE` constraint makes recording idempotent even
//! if two processes race on the same database file.

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, instrument};

const SCHEMA: &str = r"
CREATE TABLE IF NOT EXISTS history (
    id          INTEGER PRIMARY KEY,
    mail_id     TEXT NOT NULL UNIQUE,
    created_at  TEXT NOT NULL
)";

/// A message that must never be processed again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessedRecord {
    /// Stable identifier assigned by the mail source.
    pub mail_id: String,
    /// When the message was first recorded.
    pub recorded_at: DateTime<Utc>,
}

/// SQLite-backed history of processed mail ids.
#[derive(Debug, Clone)]
pub struct HistoryStore {
    pool: SqlitePool,
}

impl HistoryStore {
    /// Opens (creating if needed) the history database at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StoreOpen`] if the file cannot be opened or migrated.
    #[instrument(name = "HistoryStore::open", skip_all, fields(path = %path.display()))]
    pub async fn open(path: &Path) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(|source| Error::StoreOpen {
                path: path.display().to_string(),
                source,
            })?;

        Self::migrate(pool, &path.display().to_string()).await
    }

    /// Opens a private in-memory database. Nothing survives the process.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StoreOpen`] if SQLite cannot be initialized.
    pub async fn in_memory() -> Result<Self> {
        let open_error = |source| Error::StoreOpen {
            path: ":memory:".to_string(),
            source,
        };

        let options = SqliteConnectOptions::from_str("sqlite::memory:").map_err(open_error)?;

        // One connection that never expires, or the database would vanish with it.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(open_error)?;

        Self::migrate(pool, ":memory:").await
    }

    async fn migrate(pool: SqlitePool, path: &str) -> Result<Self> {
        sqlx::query(SCHEMA)
            .execute(&pool)
            .await
            .map_err(|source| Error::StoreOpen {
                path: path.to_string(),
                source,
            })?;

        debug!("History schema ready");
        Ok(Self { pool })
    }

    /// Returns `true` if `mail_id` has been recorded.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Store`] on database failure.
    pub async fn has(&self, mail_id: &str) -> Result<bool> {
        let row: Option<i64> =
            sqlx::query_scalar("SELECT 1 FROM history WHERE mail_id = ?1 LIMIT 1")
                .bind(mail_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(|source| Error::Store {
                    operation: "lookup",
                    source,
                })?;
        Ok(row.is_some())
    }

    /// Records `mail_id` as processed.
    ///
    /// Recording an id that is already present is a no-op. Returns `true` if a
    /// new row was written.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Store`] on database failure.
    #[instrument(name = "HistoryStore::record", skip(self))]
    pub async fn record(&self, mail_id: &str) -> Result<bool> {
        let result = sqlx::query(
            "INSERT INTO history (mail_id, created_at) VALUES (?1, ?2) \
             ON CONFLICT(mail_id) DO NOTHING",
        )
        .bind(mail_id)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|source| Error::Store {
            operation: "insert",
            source,
        })?;

        let inserted = result.rows_affected() == 1;
        if !inserted {
            debug!("Mail id already recorded");
        }
        Ok(inserted)
    }

    /// Returns the stored record for `mail_id`, if any.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Store`] on database failure and [`Error::CorruptRecord`]
    /// if the stored timestamp cannot be parsed.
    pub async fn recorded(&self, mail_id: &str) -> Result<Option<ProcessedRecord>> {
        let row: Option<(String, String)> =
            sqlx::query_as("SELECT mail_id, created_at FROM history WHERE mail_id = ?1")
                .bind(mail_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(|source| Error::Store {
                    operation: "lookup",
                    source,
                })?;

        row.map(|(mail_id, created_at)| {
            let recorded_at = DateTime::parse_from_rfc3339(&created_at)
                .map_err(|_| Error::CorruptRecord {
                    mail_id: mail_id.clone(),
                    value: created_at.clone(),
                })?
                .with_timezone(&Utc);
            Ok(ProcessedRecord {
                mail_id,
                recorded_at,
            })
        })
        .transpose()
    }

    /// Returns the number of recorded ids.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Store`] on database failure.
    pub async fn count(&self) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM history")
            .fetch_one(&self.pool)
            .await
            .map_err(|source| Error::Store {
                operation: "count",
                source,
            })?;
        Ok(u64::try_from(count).unwrap_or_default())
    }

    /// Closes the underlying connection, waiting for in-flight queries.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_record_then_has() {
        let store = HistoryStore::in_memory().await.unwrap();

        assert!(!store.has("AAA").await.unwrap());
        assert!(store.record("AAA").await.unwrap());
        assert!(store.has("AAA").await.unwrap());
        assert!(!store.has("BBB").await.unwrap());
    }

    #[tokio::test]
    async fn test_duplicate_record_is_noop() {
        let store = HistoryStore::in_memory().await.unwrap();

        assert!(store.record("AAA").await.unwrap());
        let first = store.recorded("AAA").await.unwrap().unwrap();

        assert!(!store.record("AAA").await.unwrap());
        let second = store.recorded("AAA").await.unwrap().unwrap();

        assert_eq!(first, second);
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_recorded_timestamp() {
        let store = HistoryStore::in_memory().await.unwrap();
        let before = Utc::now();
        store.record("AAA").await.unwrap();

        let record = store.recorded("AAA").await.unwrap().unwrap();
        assert_eq!(record.mail_id, "AAA");
        assert!(record.recorded_at >= before - chrono::Duration::seconds(1));
        assert!(store.recorded("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.db");

        let store = HistoryStore::open(&path).await.unwrap();
        store.record("persisted-id").await.unwrap();
        store.close().await;

        let reopened = HistoryStore::open(&path).await.unwrap();
        assert!(reopened.has("persisted-id").await.unwrap());
        assert_eq!(reopened.count().await.unwrap(), 1);
        reopened.close().await;
    }

    #[tokio::test]
    async fn test_open_in_missing_directory_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("no-such-dir").join("history.db");

        let err = HistoryStore::open(&path).await.unwrap_err();
        assert!(matches!(err, Error::StoreOpen { .. }));
        assert!(!err.is_retryable());
    }
}
