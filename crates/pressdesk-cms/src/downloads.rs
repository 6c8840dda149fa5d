//! Tracked file downloads with optional expiry.

use chrono::{DateTime, Utc};
use pressdesk_core::error::{PressdeskError, Result};
use pressdesk_core::types::{AuditAction, AuditTarget};
use rusqlite::params;

use crate::articles::ArticleDraft;
use crate::db::{CmsDb, db_err, lookup_err, parse_timestamp, timestamp};

#[derive(Debug, Clone, serde::Serialize)]
pub struct FileDownload {
    pub id: i64,
    pub title: String,
    pub file_path: String,
    pub count: i64,
    pub expires_at: Option<DateTime<Utc>>,
    pub article_id: Option<i64>,
}

impl FileDownload {
    pub fn download_url(&self) -> String {
        format!("/download/{}/", self.id)
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| now > at)
    }
}

impl CmsDb {
    /// Register a download. With `create_article` an inactive announcement
    /// article linking to it is created as well.
    pub fn create_download(
        &self,
        title: &str,
        file_path: &str,
        expires_at: Option<DateTime<Utc>>,
        create_article: bool,
        editor: &str,
    ) -> Result<FileDownload> {
        self.conn
            .execute(
                "INSERT INTO file_downloads (title, file_path, expires_at) VALUES (?1,?2,?3)",
                params![title, file_path, expires_at.map(timestamp)],
            )
            .map_err(db_err("Insert download"))?;
        let id = self.conn.last_insert_rowid();
        self.log_event(editor, AuditAction::Addition, &AuditTarget::new("file_download", id, title), "")
            .ok();

        if create_article {
            let link = format!("/download/{id}/");
            let mut draft = ArticleDraft::new(
                &format!("Download {title}"),
                "",
                &format!("<a href=\"{link}\">{title}</a>"),
            );
            draft.is_active = false;
            let article = self.create_article(&draft, &[], editor)?;
            self.conn
                .execute(
                    "UPDATE file_downloads SET article_id=?1 WHERE id=?2",
                    params![article.id, id],
                )
                .map_err(db_err("Link download"))?;
        }

        self.get_download(id)
    }

    pub fn get_download(&self, id: i64) -> Result<FileDownload> {
        self.conn
            .query_row(
                "SELECT id,title,file_path,count,expires_at,article_id FROM file_downloads WHERE id=?1",
                params![id],
                |row| {
                    let expires: Option<String> = row.get(4)?;
                    Ok(FileDownload {
                        id: row.get(0)?,
                        title: row.get(1)?,
                        file_path: row.get(2)?,
                        count: row.get(3)?,
                        expires_at: expires.as_deref().map(parse_timestamp),
                        article_id: row.get(5)?,
                    })
                },
            )
            .map_err(lookup_err(format!("download #{id}")))
    }

    /// Count a download and return the file path to serve.
    pub fn record_download(&self, id: i64) -> Result<String> {
        let download = self.get_download(id)?;
        if download.is_expired(Utc::now()) {
            return Err(PressdeskError::Expired(format!("download #{id}")));
        }
        self.conn
            .execute("UPDATE file_downloads SET count=count+1 WHERE id=?1", params![id])
            .map_err(db_err("Count download"))?;
        tracing::debug!("download #{id} served: {}", download.file_path);
        Ok(download.file_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::temp_db;
    use chrono::Duration;

    #[test]
    fn test_download_with_article() {
        let db = temp_db();
        let download = db
            .create_download("Annual report", "files/report.pdf", None, true, "ana")
            .unwrap();
        assert_eq!(download.download_url(), format!("/download/{}/", download.id));

        let article = db.get_article(download.article_id.unwrap()).unwrap();
        assert_eq!(article.title, "Download Annual report");
        assert!(article.content.contains(&download.download_url()));
        assert!(!article.is_active);
    }

    #[test]
    fn test_record_download_counts() {
        let db = temp_db();
        let download = db.create_download("Slides", "files/slides.pdf", None, false, "ana").unwrap();
        assert_eq!(download.article_id, None);

        assert_eq!(db.record_download(download.id).unwrap(), "files/slides.pdf");
        db.record_download(download.id).unwrap();
        assert_eq!(db.get_download(download.id).unwrap().count, 2);
    }

    #[test]
    fn test_expired_download() {
        let db = temp_db();
        let past = Utc::now() - Duration::days(1);
        let download = db.create_download("Old", "files/old.pdf", Some(past), false, "ana").unwrap();

        assert!(matches!(db.record_download(download.id), Err(PressdeskError::Expired(_))));
        assert_eq!(db.get_download(download.id).unwrap().count, 0);
        assert!(matches!(db.record_download(999), Err(PressdeskError::NotFound(_))));
    }
}
