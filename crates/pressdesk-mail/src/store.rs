//! SQLite-backed outbox: one row per outbound email.
//! Rows are created before the first delivery attempt and updated after
//! every attempt, so anyone polling sees the live status.

use chrono::{DateTime, Utc};
use pressdesk_core::error::{PressdeskError, Result};
use pressdesk_core::types::EmailStatus;
use rusqlite::{Connection, params};
use serde::Serialize;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use crate::recipients::{encode_recipients, parse_recipients};

/// A persisted outbound email.
#[derive(Debug, Clone, Serialize)]
pub struct OutboundEmail {
    pub id: i64,
    pub subject: String,
    /// Recipient list as stored (JSON array).
    pub recipients: String,
    pub body: String,
    pub status: EmailStatus,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl OutboundEmail {
    /// Decode the stored recipient list.
    pub fn recipient_list(&self) -> Result<Vec<String>> {
        parse_recipients(&self.recipients)
    }
}

const OUTBOX_SELECT: &str = "SELECT id, subject, recipients, body, status, attempts, last_error, created_at, updated_at FROM outbox";

fn parse_time(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|d| d.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn row_to_email(row: &rusqlite::Row) -> rusqlite::Result<OutboundEmail> {
    let status: String = row.get(4)?;
    let created_at: String = row.get(7)?;
    let updated_at: String = row.get(8)?;
    Ok(OutboundEmail {
        id: row.get(0)?,
        subject: row.get(1)?,
        recipients: row.get(2)?,
        body: row.get(3)?,
        status: EmailStatus::parse(&status).unwrap_or(EmailStatus::Failed),
        attempts: row.get(5)?,
        last_error: row.get(6)?,
        created_at: parse_time(&created_at),
        updated_at: parse_time(&updated_at),
    })
}

/// Outbox store. Safe to share between the caller and delivery workers.
pub struct OutboxStore {
    conn: Mutex<Connection>,
}

impl OutboxStore {
    /// Open or create the outbox database.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .map_err(|e| PressdeskError::Database(format!("Outbox open: {e}")))?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA busy_timeout = 5000;",
        )
        .map_err(|e| PressdeskError::Database(format!("Outbox pragma: {e}")))?;
        let store = Self { conn: Mutex::new(conn) };
        store.migrate()?;
        Ok(store)
    }

    /// In-memory store, mostly for tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| PressdeskError::Database(format!("Outbox open: {e}")))?;
        let store = Self { conn: Mutex::new(conn) };
        store.migrate()?;
        Ok(store)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| PressdeskError::Database("Outbox lock poisoned".into()))
    }

    fn migrate(&self) -> Result<()> {
        self.conn()?
            .execute_batch(
                "
            CREATE TABLE IF NOT EXISTS outbox (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                subject TEXT NOT NULL DEFAULT '',
                recipients TEXT NOT NULL DEFAULT '[]',   -- JSON array
                body TEXT NOT NULL DEFAULT '',
                status TEXT NOT NULL DEFAULT 'sending',
                attempts INTEGER NOT NULL DEFAULT 0,
                last_error TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_outbox_status ON outbox(status);
         ",
            )
            .map_err(|e| PressdeskError::Database(format!("Outbox migration: {e}")))?;
        Ok(())
    }

    /// Persist a new outbound email and return its id.
    pub fn create(
        &self,
        subject: &str,
        recipients: &[String],
        body: &str,
        status: EmailStatus,
    ) -> Result<i64> {
        self.insert(subject, recipients, body, status, None)
    }

    /// Persist an email that failed before any delivery attempt.
    pub fn create_failed(
        &self,
        subject: &str,
        recipients: &[String],
        body: &str,
        error: &str,
    ) -> Result<i64> {
        self.insert(subject, recipients, body, EmailStatus::Failed, Some(error))
    }

    fn insert(
        &self,
        subject: &str,
        recipients: &[String],
        body: &str,
        status: EmailStatus,
        last_error: Option<&str>,
    ) -> Result<i64> {
        let encoded = encode_recipients(recipients)?;
        let now = Utc::now().to_rfc3339();
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO outbox (subject, recipients, body, status, last_error, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
            params![subject, encoded, body, status.as_str(), last_error, now],
        )
        .map_err(|e| PressdeskError::Database(format!("Create outbox row: {e}")))?;
        let id = conn.last_insert_rowid();
        tracing::debug!("outbox #{id} created ({status})");
        Ok(id)
    }

    /// Get one email by id.
    pub fn get(&self, id: i64) -> Result<OutboundEmail> {
        self.conn()?
            .query_row(&format!("{OUTBOX_SELECT} WHERE id = ?1"), params![id], row_to_email)
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => {
                    PressdeskError::NotFound(format!("outbox email #{id}"))
                }
                other => PressdeskError::Database(format!("Get outbox row: {other}")),
            })
    }

    /// Record the outcome of an automated delivery attempt. Only forward
    /// transitions (see [`EmailStatus::can_advance_to`]) are written.
    pub fn record_attempt(
        &self,
        id: i64,
        status: EmailStatus,
        attempts: u32,
        last_error: Option<&str>,
    ) -> Result<()> {
        let conn = self.conn()?;
        let raw: String = conn
            .query_row("SELECT status FROM outbox WHERE id = ?1", params![id], |row| row.get(0))
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => {
                    PressdeskError::NotFound(format!("outbox email #{id}"))
                }
                other => PressdeskError::Database(format!("Read outbox status: {other}")),
            })?;
        let current = EmailStatus::parse(&raw).unwrap_or(EmailStatus::Failed);
        if !current.can_advance_to(status) {
            return Err(PressdeskError::Conflict(format!(
                "outbox email #{id} cannot move from {current} to {status}"
            )));
        }

        conn.execute(
            "UPDATE outbox SET status = ?1, attempts = ?2, last_error = ?3, updated_at = ?4 WHERE id = ?5",
            params![status.as_str(), attempts, last_error, Utc::now().to_rfc3339(), id],
        )
        .map_err(|e| PressdeskError::Database(format!("Update outbox row: {e}")))?;
        tracing::debug!("outbox #{id} → {status} (attempts: {attempts})");
        Ok(())
    }

    /// Record the outcome of a manual re-send of `seen`. The write only
    /// lands if the row still has the status and attempt count that were
    /// read, so a worker that moved it on in the meantime wins.
    /// Returns the new attempt count.
    pub fn record_resend(
        &self,
        seen: &OutboundEmail,
        status: EmailStatus,
        last_error: Option<&str>,
    ) -> Result<u32> {
        let id = seen.id;
        if !seen.status.can_resend_to(status) {
            return Err(PressdeskError::Conflict(format!(
                "outbox email #{id} cannot be re-sent from {}",
                seen.status
            )));
        }

        let attempts = seen.attempts + 1;
        let changed = self
            .conn()?
            .execute(
                "UPDATE outbox SET status = ?1, attempts = ?2, last_error = ?3, updated_at = ?4
                 WHERE id = ?5 AND status = ?6 AND attempts = ?7",
                params![
                    status.as_str(),
                    attempts,
                    last_error,
                    Utc::now().to_rfc3339(),
                    id,
                    seen.status.as_str(),
                    seen.attempts,
                ],
            )
            .map_err(|e| PressdeskError::Database(format!("Update outbox row: {e}")))?;
        if changed == 0 {
            return Err(PressdeskError::Conflict(format!(
                "outbox email #{id} changed during re-send"
            )));
        }
        tracing::debug!("outbox #{id} re-sent → {status} (attempts: {attempts})");
        Ok(attempts)
    }

    /// Move `updated_at` into the past.
    #[cfg(test)]
    pub(crate) fn backdate(&self, id: i64, by: chrono::Duration) {
        let then = (Utc::now() - by).to_rfc3339();
        self.conn()
            .unwrap()
            .execute("UPDATE outbox SET updated_at = ?1 WHERE id = ?2", params![then, id])
            .unwrap();
    }

    /// Most recent emails first.
    pub fn list_recent(&self, limit: usize) -> Result<Vec<OutboundEmail>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(&format!("{OUTBOX_SELECT} ORDER BY id DESC LIMIT ?1"))
            .map_err(|e| PressdeskError::Database(format!("Prepare: {e}")))?;
        let rows = stmt
            .query_map(params![limit as i64], row_to_email)
            .map_err(|e| PressdeskError::Database(format!("Query: {e}")))?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    /// Emails in a given status, most recent first.
    pub fn list_by_status(&self, status: EmailStatus, limit: usize) -> Result<Vec<OutboundEmail>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(&format!("{OUTBOX_SELECT} WHERE status = ?1 ORDER BY id DESC LIMIT ?2"))
            .map_err(|e| PressdeskError::Database(format!("Prepare: {e}")))?;
        let rows = stmt
            .query_map(params![status.as_str(), limit as i64], row_to_email)
            .map_err(|e| PressdeskError::Database(format!("Query: {e}")))?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_and_get() {
        let store = OutboxStore::open_in_memory().unwrap();
        let to = vec!["a@x.com".to_string(), "b@y.org".to_string()];
        let id = store.create("Hello", &to, "<p>hi</p>", EmailStatus::Sending).unwrap();

        let email = store.get(id).unwrap();
        assert_eq!(email.subject, "Hello");
        assert_eq!(email.status, EmailStatus::Sending);
        assert_eq!(email.attempts, 0);
        assert_eq!(email.recipient_list().unwrap(), to);
    }

    #[test]
    fn test_record_attempt() {
        let store = OutboxStore::open_in_memory().unwrap();
        let id = store.create("S", &["a@x.com".into()], "b", EmailStatus::Sending).unwrap();
        store
            .record_attempt(id, EmailStatus::Retrying, 1, Some("connection refused"))
            .unwrap();

        let email = store.get(id).unwrap();
        assert_eq!(email.status, EmailStatus::Retrying);
        assert_eq!(email.attempts, 1);
        assert_eq!(email.last_error.as_deref(), Some("connection refused"));
    }

    #[test]
    fn test_record_attempt_is_forward_only() {
        let store = OutboxStore::open_in_memory().unwrap();
        let id = store.create("S", &["a@x.com".into()], "b", EmailStatus::Sending).unwrap();
        store.record_attempt(id, EmailStatus::Sent, 1, None).unwrap();

        assert!(matches!(
            store.record_attempt(id, EmailStatus::Retrying, 2, Some("late worker")),
            Err(PressdeskError::Conflict(_))
        ));
        let email = store.get(id).unwrap();
        assert_eq!(email.status, EmailStatus::Sent);
        assert_eq!(email.attempts, 1);
    }

    #[test]
    fn test_create_failed_keeps_error() {
        let store = OutboxStore::open_in_memory().unwrap();
        let id = store.create_failed("S", &["a@x.com".into()], "x", "template missing").unwrap();
        let email = store.get(id).unwrap();
        assert_eq!(email.status, EmailStatus::Failed);
        assert_eq!(email.attempts, 0);
        assert_eq!(email.last_error.as_deref(), Some("template missing"));
    }

    #[test]
    fn test_record_resend() {
        let store = OutboxStore::open_in_memory().unwrap();
        let id = store.create("S", &["a@x.com".into()], "b", EmailStatus::Failed).unwrap();
        let seen = store.get(id).unwrap();

        assert_eq!(store.record_resend(&seen, EmailStatus::Sent, None).unwrap(), 1);
        assert_eq!(store.get(id).unwrap().status, EmailStatus::Sent);

        // The row moved on since `seen` was read.
        assert!(matches!(
            store.record_resend(&seen, EmailStatus::Failed, Some("x")),
            Err(PressdeskError::Conflict(_))
        ));
        let sent = store.get(id).unwrap();
        assert!(matches!(
            store.record_resend(&sent, EmailStatus::Failed, Some("x")),
            Err(PressdeskError::Conflict(_))
        ));
        assert_eq!(store.get(id).unwrap().status, EmailStatus::Sent);
    }

    #[test]
    fn test_missing_row() {
        let store = OutboxStore::open_in_memory().unwrap();
        assert!(matches!(store.get(42), Err(PressdeskError::NotFound(_))));
        assert!(matches!(
            store.record_attempt(42, EmailStatus::Sent, 1, None),
            Err(PressdeskError::NotFound(_))
        ));
    }

    #[test]
    fn test_listing() {
        let store = OutboxStore::open_in_memory().unwrap();
        let first = store.create("one", &[], "", EmailStatus::Pending).unwrap();
        let second = store.create("two", &[], "", EmailStatus::Sending).unwrap();

        let recent = store.list_recent(10).unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].id, second); // newest first

        let pending = store.list_by_status(EmailStatus::Pending, 10).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, first);
    }
}
