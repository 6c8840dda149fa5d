//! Legacy URL redirects.

use chrono::Utc;
use pressdesk_core::error::{PressdeskError, Result};
use rusqlite::{OptionalExtension, params};

use crate::db::{CmsDb, db_err, timestamp};

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum RedirectKind {
    Permanent,
    Temporary,
}

impl RedirectKind {
    pub fn status_code(self) -> u16 {
        match self {
            Self::Permanent => 301,
            Self::Temporary => 302,
        }
    }

    pub fn from_status_code(code: u16) -> Option<Self> {
        match code {
            301 => Some(Self::Permanent),
            302 => Some(Self::Temporary),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct UrlRedirect {
    pub id: i64,
    pub old_url: String,
    pub new_url: String,
    pub kind: RedirectKind,
    pub views: i64,
    pub updated_at: String,
}

fn row_to_redirect(row: &rusqlite::Row) -> rusqlite::Result<UrlRedirect> {
    let code: u16 = row.get(3)?;
    Ok(UrlRedirect {
        id: row.get(0)?,
        old_url: row.get(1)?,
        new_url: row.get(2)?,
        kind: RedirectKind::from_status_code(code).unwrap_or(RedirectKind::Permanent),
        views: row.get(4)?,
        updated_at: row.get(5)?,
    })
}

impl CmsDb {
    /// Insert or replace the target of `old_url`. View counts survive updates.
    pub fn upsert_redirect(&self, old_url: &str, new_url: &str, kind: RedirectKind) -> Result<()> {
        if old_url == new_url {
            return Err(PressdeskError::Conflict(format!("redirect loop on '{old_url}'")));
        }
        self.conn
            .execute(
                "INSERT INTO url_redirects (old_url, new_url, kind, updated_at) VALUES (?1,?2,?3,?4)
                 ON CONFLICT(old_url) DO UPDATE SET new_url=excluded.new_url, kind=excluded.kind,
                 updated_at=excluded.updated_at",
                params![old_url, new_url, kind.status_code(), timestamp(Utc::now())],
            )
            .map_err(db_err("Upsert redirect"))?;
        Ok(())
    }

    /// Look up `old_url`, counting the hit.
    pub fn resolve_redirect(&self, old_url: &str) -> Result<Option<UrlRedirect>> {
        let found = self
            .conn
            .query_row(
                "SELECT id,old_url,new_url,kind,views,updated_at FROM url_redirects WHERE old_url=?1",
                params![old_url],
                row_to_redirect,
            )
            .optional()
            .map_err(db_err("Resolve redirect"))?;

        let Some(mut redirect) = found else {
            return Ok(None);
        };
        self.conn
            .execute("UPDATE url_redirects SET views=views+1 WHERE id=?1", params![redirect.id])
            .map_err(db_err("Count redirect"))?;
        redirect.views += 1;
        Ok(Some(redirect))
    }

    pub fn list_redirects(&self) -> Result<Vec<UrlRedirect>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id,old_url,new_url,kind,views,updated_at FROM url_redirects ORDER BY old_url")
            .map_err(db_err("Prepare"))?;
        let redirects = stmt
            .query_map([], row_to_redirect)
            .map_err(db_err("Query"))?
            .filter_map(|r| r.ok())
            .collect();
        Ok(redirects)
    }
}
