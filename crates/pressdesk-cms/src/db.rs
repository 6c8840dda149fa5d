//! Content database: SQLite schema for articles, their version archive,
//! sections, audit log, signup tokens, downloads, redirects and themes.

use chrono::{DateTime, SecondsFormat, Utc};
use pressdesk_core::error::{PressdeskError, Result};
use pressdesk_core::traits::AuditSink;
use pressdesk_core::types::{AuditAction, AuditTarget};
use rusqlite::{Connection, params};
use std::path::Path;

/// Actor recorded for entries written by background routines.
pub const SYSTEM_ACTOR: &str = "sys";

/// Content database manager.
pub struct CmsDb {
    pub(crate) conn: Connection,
}

/// Audit log entry.
#[derive(Debug, Clone, serde::Serialize)]
pub struct AuditEntry {
    pub id: i64,
    pub actor: String,
    pub action: AuditAction,
    pub target_kind: String,
    pub target_id: Option<String>,
    pub target_repr: String,
    pub message: String,
    pub created_at: String,
}

/// Timestamps are stored as fixed-width RFC 3339 UTC so they sort as text.
pub(crate) fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_timestamp(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|d| d.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

pub(crate) fn db_err(context: &str) -> impl Fn(rusqlite::Error) -> PressdeskError + '_ {
    move |e| PressdeskError::Database(format!("{context}: {e}"))
}

/// Map "no rows" to `NotFound`, anything else to `Database`.
pub(crate) fn lookup_err(what: String) -> impl FnOnce(rusqlite::Error) -> PressdeskError {
    move |e| match e {
        rusqlite::Error::QueryReturnedNoRows => PressdeskError::NotFound(what),
        other => PressdeskError::Database(format!("{what}: {other}")),
    }
}

impl CmsDb {
    /// Open or create the content database.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path).map_err(db_err("DB open error"))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA busy_timeout = 5000;
             PRAGMA foreign_keys = ON;",
        )
        .map_err(db_err("DB pragma error"))?;

        let db = Self { conn };
        db.migrate()?;
        Ok(db)
    }

    /// Run schema migrations.
    fn migrate(&self) -> Result<()> {
        self.conn
            .execute_batch(
                "
            CREATE TABLE IF NOT EXISTS articles (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                title TEXT NOT NULL,
                slug TEXT UNIQUE NOT NULL,
                header TEXT NOT NULL DEFAULT '',
                content TEXT NOT NULL DEFAULT '',
                keywords TEXT NOT NULL DEFAULT '',
                author TEXT NOT NULL,
                is_active INTEGER NOT NULL DEFAULT 1,
                allow_comments INTEGER NOT NULL DEFAULT 0,
                views INTEGER NOT NULL DEFAULT 0,
                conversions INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL
            );

            -- One row per changed field per save. Never updated or deleted.
            CREATE TABLE IF NOT EXISTS article_versions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                article_id INTEGER NOT NULL REFERENCES articles(id),
                header TEXT,
                content TEXT,
                editor TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_versions_article
                ON article_versions(article_id, updated_at);

            CREATE TRIGGER IF NOT EXISTS article_versions_no_update
                BEFORE UPDATE ON article_versions
                BEGIN SELECT RAISE(ABORT, 'article versions are append-only'); END;
            CREATE TRIGGER IF NOT EXISTS article_versions_no_delete
                BEFORE DELETE ON article_versions
                BEGIN SELECT RAISE(ABORT, 'article versions are append-only'); END;

            CREATE TABLE IF NOT EXISTS sections (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                title TEXT NOT NULL,
                slug TEXT UNIQUE NOT NULL,
                position INTEGER NOT NULL DEFAULT 0
            );

            CREATE TABLE IF NOT EXISTS section_items (
                section_id INTEGER NOT NULL REFERENCES sections(id) ON DELETE CASCADE,
                article_id INTEGER NOT NULL REFERENCES articles(id) ON DELETE CASCADE,
                position INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (section_id, article_id)
            );

            CREATE TABLE IF NOT EXISTS audit_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                actor TEXT NOT NULL,
                action TEXT NOT NULL,           -- 'addition', 'change'
                target_kind TEXT NOT NULL,
                target_id TEXT,
                target_repr TEXT NOT NULL DEFAULT '',
                message TEXT NOT NULL DEFAULT '',
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS user_tokens (
                token TEXT PRIMARY KEY,
                owner TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS file_downloads (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                title TEXT NOT NULL,
                file_path TEXT NOT NULL,
                count INTEGER NOT NULL DEFAULT 0,
                expires_at TEXT,
                article_id INTEGER REFERENCES articles(id) ON DELETE SET NULL
            );

            CREATE TABLE IF NOT EXISTS url_redirects (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                old_url TEXT UNIQUE NOT NULL,
                new_url TEXT NOT NULL,
                kind INTEGER NOT NULL DEFAULT 301,
                views INTEGER NOT NULL DEFAULT 0,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS themes (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT UNIQUE NOT NULL,
                path_name TEXT NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                active INTEGER NOT NULL DEFAULT 0
            );
        ",
            )
            .map_err(db_err("Migration error"))?;
        Ok(())
    }

    // ── Audit Log ────────────────────────────────────

    /// Log an audit event.
    pub fn log_event(
        &self,
        actor: &str,
        action: AuditAction,
        target: &AuditTarget,
        message: &str,
    ) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO audit_log (actor, action, target_kind, target_id, target_repr, message, created_at)
                 VALUES (?1,?2,?3,?4,?5,?6,?7)",
                params![
                    actor,
                    action.as_str(),
                    target.kind,
                    target.id,
                    target.repr,
                    message,
                    timestamp(Utc::now()),
                ],
            )
            .map_err(db_err("Log event"))?;
        Ok(())
    }

    /// Record a failed background routine against the system actor.
    pub fn log_error(&self, routine: &str, error: &str) -> Result<()> {
        tracing::warn!("routine '{routine}' failed: {error}");
        self.log_event(
            SYSTEM_ACTOR,
            AuditAction::Addition,
            &AuditTarget::kind_only("routine", routine),
            error,
        )
    }

    /// Get recent audit entries, newest first.
    pub fn recent_events(&self, limit: usize) -> Result<Vec<AuditEntry>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id,actor,action,target_kind,target_id,target_repr,message,created_at
                 FROM audit_log ORDER BY id DESC LIMIT ?1",
            )
            .map_err(db_err("Prepare"))?;

        let entries = stmt
            .query_map(params![limit as i64], |row| {
                let action: String = row.get(2)?;
                Ok(AuditEntry {
                    id: row.get(0)?,
                    actor: row.get(1)?,
                    action: AuditAction::parse(&action),
                    target_kind: row.get(3)?,
                    target_id: row.get(4)?,
                    target_repr: row.get(5)?,
                    message: row.get(6)?,
                    created_at: row.get(7)?,
                })
            })
            .map_err(db_err("Query"))?
            .filter_map(|r| r.ok())
            .collect();
        Ok(entries)
    }
}

impl AuditSink for CmsDb {
    fn record(
        &self,
        actor: &str,
        action: AuditAction,
        target: &AuditTarget,
        message: &str,
    ) -> Result<()> {
        self.log_event(actor, action, target, message)
    }
}

#[cfg(test)]
pub(crate) fn temp_db() -> CmsDb {
    CmsDb::open(Path::new(":memory:")).unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audit_log() {
        let db = temp_db();
        db.log_event(
            "editor-1",
            AuditAction::Addition,
            &AuditTarget::new("article", 7, "Launch"),
            "",
        )
        .unwrap();
        db.log_error("nightly_digest", "smtp unreachable").unwrap();

        let events = db.recent_events(10).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].actor, SYSTEM_ACTOR); // most recent first
        assert_eq!(events[0].target_repr, "nightly_digest");
        assert_eq!(events[0].target_id, None);
        assert_eq!(events[1].target_id.as_deref(), Some("7"));
        assert_eq!(events[1].action, AuditAction::Addition);
    }

    #[test]
    fn test_audit_sink_trait() {
        let db = temp_db();
        let sink: &dyn AuditSink = &db;
        sink.record(
            "editor-2",
            AuditAction::Change,
            &AuditTarget::kind_only("theme", "all"),
            "bulk update",
        )
        .unwrap();
        assert_eq!(db.recent_events(1).unwrap()[0].message, "bulk update");
    }

    #[test]
    fn test_timestamps_sort_as_text() {
        let early = timestamp(DateTime::parse_from_rfc3339("2026-01-02T03:04:05Z").unwrap().with_timezone(&Utc));
        let late = timestamp(DateTime::parse_from_rfc3339("2026-01-02T03:04:05.5Z").unwrap().with_timezone(&Utc));
        assert!(early < late);
        assert_eq!(parse_timestamp(&early).timestamp(), 1767323045);
    }
}
