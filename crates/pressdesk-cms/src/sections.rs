//! Sections group articles for navigation.

use pressdesk_core::error::Result;
use pressdesk_core::types::{AuditAction, AuditTarget};
use rusqlite::{Connection, params};

use crate::articles::{Article, slugify};
use crate::db::{CmsDb, SYSTEM_ACTOR, db_err, lookup_err};

#[derive(Debug, Clone, serde::Serialize)]
pub struct Section {
    pub id: i64,
    pub title: String,
    pub slug: String,
    pub position: i64,
}

/// Place an article in a section, or move it if already there. Without a
/// position it goes after the last article of the section.
pub(crate) fn place_in_section(
    conn: &Connection,
    section_id: i64,
    article_id: i64,
    position: Option<i64>,
) -> Result<()> {
    conn.execute(
        "INSERT INTO section_items (section_id, article_id, position)
         VALUES (?1, ?2, COALESCE(?3,
            (SELECT COALESCE(MAX(position) + 1, 0) FROM section_items WHERE section_id=?1)))
         ON CONFLICT(section_id, article_id) DO UPDATE SET position=excluded.position",
        params![section_id, article_id, position],
    )
    .map_err(db_err("Place article"))?;
    Ok(())
}

impl CmsDb {
    /// Create a section. The slug is derived from the title.
    pub fn create_section(&self, title: &str, position: i64) -> Result<Section> {
        self.conn
            .execute(
                "INSERT INTO sections (title, slug, position) VALUES (?1,?2,?3)",
                params![title, slugify(title), position],
            )
            .map_err(db_err("Insert section"))?;
        let id = self.conn.last_insert_rowid();
        self.log_event(SYSTEM_ACTOR, AuditAction::Addition, &AuditTarget::new("section", id, title), "")
            .ok();
        self.get_section(id)
    }

    pub fn get_section(&self, id: i64) -> Result<Section> {
        self.conn
            .query_row(
                "SELECT id,title,slug,position FROM sections WHERE id=?1",
                params![id],
                |row| {
                    Ok(Section {
                        id: row.get(0)?,
                        title: row.get(1)?,
                        slug: row.get(2)?,
                        position: row.get(3)?,
                    })
                },
            )
            .map_err(lookup_err(format!("section #{id}")))
    }

    /// Place or reorder an article within a section.
    pub fn place_article(&self, section_id: i64, article_id: i64, position: Option<i64>) -> Result<()> {
        place_in_section(&self.conn, section_id, article_id, position)
    }

    /// Article IDs placed in a section, in placement order.
    pub fn articles_in_section(&self, section_id: i64) -> Result<Vec<i64>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT article_id FROM section_items WHERE section_id=?1 ORDER BY position, article_id",
            )
            .map_err(db_err("Prepare"))?;
        let ids = stmt
            .query_map(params![section_id], |row| row.get(0))
            .map_err(db_err("Query"))?
            .filter_map(|r| r.ok())
            .collect();
        Ok(ids)
    }

    /// Sections an article is placed in.
    pub fn sections_of(&self, article: &Article) -> Result<Vec<Section>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT s.id,s.title,s.slug,s.position FROM sections s
                 JOIN section_items i ON i.section_id = s.id
                 WHERE i.article_id=?1 ORDER BY s.position, s.id",
            )
            .map_err(db_err("Prepare"))?;
        let sections = stmt
            .query_map(params![article.id], |row| {
                Ok(Section {
                    id: row.get(0)?,
                    title: row.get(1)?,
                    slug: row.get(2)?,
                    position: row.get(3)?,
                })
            })
            .map_err(db_err("Query"))?
            .filter_map(|r| r.ok())
            .collect();
        Ok(sections)
    }
}
