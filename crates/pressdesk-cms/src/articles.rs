//! Articles and their version archive.
//!
//! Every save goes through [`CmsDb::create_article`] or
//! [`CmsDb::update_article`], which write the article row and its archive
//! rows in one transaction.

use chrono::Utc;
use pressdesk_core::error::{PressdeskError, Result};
use pressdesk_core::types::{AuditAction, AuditTarget};
use rusqlite::{Connection, OptionalExtension, params};

use crate::db::{CmsDb, db_err, lookup_err, timestamp};
use crate::sections::place_in_section;
use crate::versioning::{Snapshot, VersionDraft, versions_for_save};

/// Article record.
#[derive(Debug, Clone, serde::Serialize)]
pub struct Article {
    pub id: i64,
    pub title: String,
    pub slug: String,
    pub header: String,
    pub content: String,
    pub keywords: String,
    pub author: String,
    pub is_active: bool,
    pub allow_comments: bool,
    pub views: i64,
    pub conversions: i64,
    pub created_at: String,
}

impl Article {
    fn snapshot(&self) -> Snapshot {
        Snapshot::new(&self.header, &self.content)
    }
}

/// Editable article fields.
#[derive(Debug, Clone)]
pub struct ArticleDraft {
    pub title: String,
    /// Derived from the title when empty.
    pub slug: Option<String>,
    pub header: String,
    pub content: String,
    pub keywords: String,
    pub is_active: bool,
    pub allow_comments: bool,
}

impl ArticleDraft {
    pub fn new(title: &str, header: &str, content: &str) -> Self {
        Self {
            title: title.to_string(),
            slug: None,
            header: header.to_string(),
            content: content.to_string(),
            keywords: String::new(),
            is_active: true,
            allow_comments: false,
        }
    }
}

/// Archived value of one field at one save.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ArticleVersion {
    pub id: i64,
    pub article_id: i64,
    pub header: Option<String>,
    pub content: Option<String>,
    pub editor: String,
    pub updated_at: String,
}

const ARTICLE_SELECT: &str = "SELECT id,title,slug,header,content,keywords,author,is_active,allow_comments,views,conversions,created_at FROM articles";

fn row_to_article(row: &rusqlite::Row) -> rusqlite::Result<Article> {
    Ok(Article {
        id: row.get(0)?, title: row.get(1)?, slug: row.get(2)?, header: row.get(3)?,
        content: row.get(4)?, keywords: row.get(5)?, author: row.get(6)?,
        is_active: row.get::<_, i32>(7)? != 0, allow_comments: row.get::<_, i32>(8)? != 0,
        views: row.get(9)?, conversions: row.get(10)?, created_at: row.get(11)?,
    })
}

/// Lowercase, alphanumerics kept, everything else collapsed to single dashes.
pub fn slugify(text: &str) -> String {
    let mut slug = String::with_capacity(text.len());
    for c in text.chars().flat_map(char::to_lowercase) {
        if c.is_alphanumeric() {
            slug.push(c);
        } else if !slug.is_empty() && !slug.ends_with('-') {
            slug.push('-');
        }
    }
    let slug = slug.trim_end_matches('-').to_string();
    if slug.is_empty() { "article".into() } else { slug }
}

/// First free slug among `base`, `base-2`, `base-3`, … ignoring `exclude`.
fn unique_slug(conn: &Connection, base: &str, exclude: Option<i64>) -> Result<String> {
    let mut candidate = base.to_string();
    let mut n = 2;
    loop {
        let taken: Option<i64> = conn
            .query_row(
                "SELECT id FROM articles WHERE slug=?1 AND id IS NOT ?2",
                params![candidate, exclude],
                |row| row.get(0),
            )
            .optional()
            .map_err(db_err("Check slug"))?;
        if taken.is_none() {
            return Ok(candidate);
        }
        candidate = format!("{base}-{n}");
        n += 1;
    }
}

fn insert_versions(conn: &Connection, article_id: i64, drafts: &[VersionDraft], editor: &str) -> Result<()> {
    let now = timestamp(Utc::now());
    for draft in drafts {
        conn.execute(
            "INSERT INTO article_versions (article_id, header, content, editor, updated_at) VALUES (?1,?2,?3,?4,?5)",
            params![article_id, draft.header, draft.content, editor, now],
        )
        .map_err(db_err("Archive version"))?;
    }
    Ok(())
}

fn fetch_article(conn: &Connection, id: i64) -> Result<Article> {
    conn.query_row(&format!("{ARTICLE_SELECT} WHERE id=?1"), params![id], row_to_article)
        .map_err(lookup_err(format!("article #{id}")))
}

/// Insert an article plus its creation version inside the caller's
/// transaction. The version row is attributed to `editor`.
fn insert_article(
    conn: &Connection,
    draft: &ArticleDraft,
    author: &str,
    editor: &str,
) -> Result<i64> {
    let base = draft
        .slug
        .as_deref()
        .filter(|s| !s.trim().is_empty())
        .map(slugify)
        .unwrap_or_else(|| slugify(&draft.title));
    let slug = unique_slug(conn, &base, None)?;

    conn.execute(
        "INSERT INTO articles (title, slug, header, content, keywords, author, is_active, allow_comments, created_at)
         VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9)",
        params![
            draft.title,
            slug,
            draft.header,
            draft.content,
            draft.keywords,
            author,
            draft.is_active as i32,
            draft.allow_comments as i32,
            timestamp(Utc::now()),
        ],
    )
    .map_err(db_err("Insert article"))?;
    let id = conn.last_insert_rowid();

    let drafts = versions_for_save(None, &Snapshot::new(&draft.header, &draft.content));
    insert_versions(conn, id, &drafts, editor)?;
    Ok(id)
}

impl CmsDb {
    /// Create an article authored by `editor`, placed in `sections`.
    pub fn create_article(&self, draft: &ArticleDraft, sections: &[i64], editor: &str) -> Result<Article> {
        let tx = self.conn.unchecked_transaction().map_err(db_err("Begin"))?;
        let id = insert_article(&tx, draft, editor, editor)?;
        for section_id in sections {
            place_in_section(&tx, *section_id, id, None)?;
        }
        tx.commit().map_err(db_err("Commit"))?;

        let article = self.get_article(id)?;
        tracing::info!("📝 Article #{id} created: '{}'", article.title);
        self.log_event(editor, AuditAction::Addition, &AuditTarget::new("article", id, &article.title), "")
            .ok();
        Ok(article)
    }

    /// Save new field values, archiving each changed rich-text field.
    pub fn update_article(&self, id: i64, draft: &ArticleDraft, editor: &str) -> Result<Article> {
        let tx = self.conn.unchecked_transaction().map_err(db_err("Begin"))?;
        let previous = fetch_article(&tx, id)?;

        let slug = match draft.slug.as_deref().filter(|s| !s.trim().is_empty()) {
            Some(s) if slugify(s) != previous.slug => unique_slug(&tx, &slugify(s), Some(id))?,
            _ => previous.slug.clone(),
        };

        tx.execute(
            "UPDATE articles SET title=?1, slug=?2, header=?3, content=?4, keywords=?5, is_active=?6, allow_comments=?7 WHERE id=?8",
            params![
                draft.title,
                slug,
                draft.header,
                draft.content,
                draft.keywords,
                draft.is_active as i32,
                draft.allow_comments as i32,
                id,
            ],
        )
        .map_err(db_err("Update article"))?;

        let drafts = versions_for_save(
            Some(&previous.snapshot()),
            &Snapshot::new(&draft.header, &draft.content),
        );
        insert_versions(&tx, id, &drafts, editor)?;
        tx.commit().map_err(db_err("Commit"))?;

        let changed: Vec<&str> = drafts
            .iter()
            .map(|d| if d.header.is_some() { "header" } else { "content" })
            .collect();
        tracing::debug!("article #{id} saved, {} version row(s)", drafts.len());
        let message = if changed.is_empty() {
            String::new()
        } else {
            format!("Changed {}.", changed.join(", "))
        };
        self.log_event(editor, AuditAction::Change, &AuditTarget::new("article", id, &draft.title), &message)
            .ok();
        self.get_article(id)
    }

    /// Get an article by ID.
    pub fn get_article(&self, id: i64) -> Result<Article> {
        fetch_article(&self.conn, id)
    }

    /// Get an article by slug.
    pub fn get_article_by_slug(&self, slug: &str) -> Result<Article> {
        self.conn
            .query_row(&format!("{ARTICLE_SELECT} WHERE slug=?1"), params![slug], row_to_article)
            .map_err(lookup_err(format!("article '{slug}'")))
    }

    /// Archive rows of an article, newest first.
    pub fn list_versions(&self, article_id: i64) -> Result<Vec<ArticleVersion>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id,article_id,header,content,editor,updated_at FROM article_versions
                 WHERE article_id=?1 ORDER BY updated_at DESC, id DESC",
            )
            .map_err(db_err("Prepare"))?;
        let versions = stmt
            .query_map(params![article_id], |row| {
                Ok(ArticleVersion {
                    id: row.get(0)?,
                    article_id: row.get(1)?,
                    header: row.get(2)?,
                    content: row.get(3)?,
                    editor: row.get(4)?,
                    updated_at: row.get(5)?,
                })
            })
            .map_err(db_err("Query"))?
            .filter_map(|r| r.ok())
            .collect();
        Ok(versions)
    }

    /// Duplicate an article: fresh slug, zeroed counters, same sections at
    /// the same positions. The source author is kept; the version row names
    /// `editor`.
    pub fn clone_article(&self, id: i64, editor: &str) -> Result<Article> {
        let tx = self.conn.unchecked_transaction().map_err(db_err("Begin"))?;
        let source = fetch_article(&tx, id)?;
        let placements: Vec<(i64, i64)> = {
            let mut stmt = tx
                .prepare("SELECT section_id, position FROM section_items WHERE article_id=?1")
                .map_err(db_err("Prepare"))?;
            stmt.query_map(params![id], |row| Ok((row.get(0)?, row.get(1)?)))
                .map_err(db_err("Query"))?
                .filter_map(|r| r.ok())
                .collect()
        };

        let draft = ArticleDraft {
            title: source.title.clone(),
            slug: None,
            header: source.header.clone(),
            content: source.content.clone(),
            keywords: source.keywords.clone(),
            is_active: source.is_active,
            allow_comments: source.allow_comments,
        };
        let clone_id = insert_article(&tx, &draft, &source.author, editor)?;
        for (section_id, position) in placements {
            place_in_section(&tx, section_id, clone_id, Some(position))?;
        }
        tx.commit().map_err(db_err("Commit"))?;

        tracing::info!("📝 Article #{id} cloned as #{clone_id}");
        self.log_event(
            editor,
            AuditAction::Addition,
            &AuditTarget::new("article", clone_id, &source.title),
            &format!("Cloned from #{id}."),
        )
        .ok();
        self.get_article(clone_id)
    }

    /// Zero views and conversions. Returns the number of articles reset.
    pub fn reset_views(&self, ids: &[i64]) -> Result<usize> {
        let mut reset = 0;
        for id in ids {
            reset += self
                .conn
                .execute("UPDATE articles SET views=0, conversions=0 WHERE id=?1", params![id])
                .map_err(db_err("Reset views"))?;
        }
        Ok(reset)
    }

    /// Count a page view, and a conversion when `converted`.
    pub fn record_view(&self, id: i64, converted: bool) -> Result<()> {
        let changed = self
            .conn
            .execute(
                "UPDATE articles SET views=views+1, conversions=conversions+?1 WHERE id=?2",
                params![converted as i32, id],
            )
            .map_err(db_err("Record view"))?;
        if changed == 0 {
            return Err(PressdeskError::NotFound(format!("article #{id}")));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::temp_db;

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Hello, World!"), "hello-world");
        assert_eq!(slugify("  Ação   Cultural "), "ação-cultural");
        assert_eq!(slugify("!!!"), "article");
    }

    #[test]
    fn test_create_writes_single_version() {
        let db = temp_db();
        let article = db.create_article(&ArticleDraft::new("Empty", "", ""), &[], "ana").unwrap();
        assert_eq!(article.author, "ana");
        assert_eq!(article.slug, "empty");

        let versions = db.list_versions(article.id).unwrap();
        assert_eq!(versions.len(), 1);
        assert_eq!(versions[0].header.as_deref(), Some(""));
        assert_eq!(versions[0].content.as_deref(), Some(""));
        assert_eq!(versions[0].editor, "ana");
    }

    #[test]
    fn test_update_archives_changed_field_only() {
        let db = temp_db();
        let article = db.create_article(&ArticleDraft::new("Post", "A", "B"), &[], "ana").unwrap();

        db.update_article(article.id, &ArticleDraft::new("Post", "A", "C"), "bia").unwrap();

        let versions = db.list_versions(article.id).unwrap();
        assert_eq!(versions.len(), 2);
        let newest = &versions[0];
        assert_eq!(newest.header, None);
        assert_eq!(newest.content.as_deref(), Some("C"));
        assert_eq!(newest.editor, "bia");
    }

    #[test]
    fn test_update_without_changes_archives_nothing() {
        let db = temp_db();
        let article = db.create_article(&ArticleDraft::new("Post", "A", "B"), &[], "ana").unwrap();
        let mut draft = ArticleDraft::new("Post renamed", "A", "B");
        draft.keywords = "news".into();
        let updated = db.update_article(article.id, &draft, "ana").unwrap();

        assert_eq!(updated.title, "Post renamed");
        assert_eq!(updated.slug, "post");
        assert_eq!(db.list_versions(article.id).unwrap().len(), 1);
    }

    #[test]
    fn test_update_is_atomic_with_archive() {
        let db = temp_db();
        let article = db.create_article(&ArticleDraft::new("Post", "A", "B"), &[], "ana").unwrap();
        db.conn
            .execute_batch(
                "CREATE TRIGGER reject_archive BEFORE INSERT ON article_versions
                 BEGIN SELECT RAISE(ABORT, 'archive unavailable'); END;",
            )
            .unwrap();

        let result = db.update_article(article.id, &ArticleDraft::new("Post", "A", "Z"), "bia");
        assert!(result.is_err());
        assert_eq!(db.get_article(article.id).unwrap().content, "B");
    }

    #[test]
    fn test_versions_are_append_only() {
        let db = temp_db();
        let article = db.create_article(&ArticleDraft::new("Post", "A", "B"), &[], "ana").unwrap();
        assert!(db.conn.execute("UPDATE article_versions SET content='x'", []).is_err());
        assert!(db.conn.execute("DELETE FROM article_versions", []).is_err());
        assert_eq!(db.list_versions(article.id).unwrap().len(), 1);
    }

    #[test]
    fn test_unique_slugs() {
        let db = temp_db();
        let a = db.create_article(&ArticleDraft::new("Same", "", ""), &[], "ana").unwrap();
        let b = db.create_article(&ArticleDraft::new("Same", "", ""), &[], "ana").unwrap();
        let c = db.create_article(&ArticleDraft::new("Same", "", ""), &[], "ana").unwrap();
        assert_eq!((a.slug.as_str(), b.slug.as_str(), c.slug.as_str()), ("same", "same-2", "same-3"));
        assert_eq!(db.get_article_by_slug("same-2").unwrap().id, b.id);
    }

    #[test]
    fn test_clone_article() {
        let db = temp_db();
        let section = db.create_section("News", 0).unwrap();
        let source = db
            .create_article(&ArticleDraft::new("Launch", "H", "C"), &[section.id], "ana")
            .unwrap();
        db.record_view(source.id, true).unwrap();

        let other = db
            .create_article(&ArticleDraft::new("Other", "", ""), &[section.id], "ana")
            .unwrap();
        db.place_article(section.id, source.id, Some(5)).unwrap();

        let copy = db.clone_article(source.id, "bia").unwrap();
        assert_ne!(copy.id, source.id);
        assert_eq!(copy.slug, "launch-2");
        assert_eq!(copy.author, "ana");
        assert_eq!(copy.views, 0);
        assert_eq!(copy.conversions, 0);
        assert_eq!(copy.content, "C");

        let versions = db.list_versions(copy.id).unwrap();
        assert_eq!(versions.len(), 1);
        assert_eq!(versions[0].editor, "bia");

        let in_section = db.articles_in_section(section.id).unwrap();
        assert_eq!(in_section, vec![other.id, source.id, copy.id]);
        assert_eq!(db.recent_events(1).unwrap()[0].actor, "bia");
    }

    #[test]
    fn test_views() {
        let db = temp_db();
        let a = db.create_article(&ArticleDraft::new("A", "", ""), &[], "ana").unwrap();
        db.record_view(a.id, false).unwrap();
        db.record_view(a.id, true).unwrap();
        let a = db.get_article(a.id).unwrap();
        assert_eq!((a.views, a.conversions), (2, 1));

        assert_eq!(db.reset_views(&[a.id, 999]).unwrap(), 1);
        assert_eq!(db.get_article(a.id).unwrap().views, 0);
        assert!(matches!(db.record_view(999, false), Err(PressdeskError::NotFound(_))));
    }
}
