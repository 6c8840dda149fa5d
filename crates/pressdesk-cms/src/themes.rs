//! Site themes. At most one is active.

use pressdesk_core::error::{PressdeskError, Result};
use pressdesk_core::types::{AuditAction, AuditTarget};
use rusqlite::{Connection, OptionalExtension, params};

use crate::articles::slugify;
use crate::db::{CmsDb, db_err, lookup_err};

#[derive(Debug, Clone, serde::Serialize)]
pub struct Theme {
    pub id: i64,
    pub name: String,
    pub path_name: String,
    pub description: String,
    pub active: bool,
}

const THEME_SELECT: &str = "SELECT id,name,path_name,description,active FROM themes";

fn row_to_theme(row: &rusqlite::Row) -> rusqlite::Result<Theme> {
    Ok(Theme {
        id: row.get(0)?,
        name: row.get(1)?,
        path_name: row.get(2)?,
        description: row.get(3)?,
        active: row.get::<_, i32>(4)? != 0,
    })
}

/// Make `id` the only active theme, inside the caller's transaction.
fn activate_in(conn: &Connection, id: i64) -> Result<()> {
    conn.execute("UPDATE themes SET active=0 WHERE id<>?1", params![id])
        .map_err(db_err("Deactivate themes"))?;
    let changed = conn
        .execute("UPDATE themes SET active=1 WHERE id=?1", params![id])
        .map_err(db_err("Activate theme"))?;
    if changed == 0 {
        return Err(PressdeskError::NotFound(format!("theme #{id}")));
    }
    Ok(())
}

impl CmsDb {
    /// Register a theme. `path_name` defaults to the slugified name.
    pub fn create_theme(
        &self,
        name: &str,
        path_name: Option<&str>,
        description: &str,
        active: bool,
        editor: &str,
    ) -> Result<Theme> {
        let path_name = path_name
            .filter(|p| !p.trim().is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| slugify(name));
        let tx = self.conn.unchecked_transaction().map_err(db_err("Begin"))?;
        tx.execute(
            "INSERT INTO themes (name, path_name, description) VALUES (?1,?2,?3)",
            params![name, path_name, description],
        )
        .map_err(db_err("Insert theme"))?;
        let id = tx.last_insert_rowid();
        if active {
            activate_in(&tx, id)?;
        }
        tx.commit().map_err(db_err("Commit"))?;

        self.log_event(editor, AuditAction::Addition, &AuditTarget::new("theme", id, name), "")
            .ok();
        self.get_theme(id)
    }

    pub fn get_theme(&self, id: i64) -> Result<Theme> {
        self.conn
            .query_row(&format!("{THEME_SELECT} WHERE id=?1"), params![id], row_to_theme)
            .map_err(lookup_err(format!("theme #{id}")))
    }

    /// Make `id` the only active theme.
    pub fn activate_theme(&self, id: i64) -> Result<()> {
        let tx = self.conn.unchecked_transaction().map_err(db_err("Begin"))?;
        activate_in(&tx, id)?;
        tx.commit().map_err(db_err("Commit"))?;
        tracing::info!("🎨 Theme #{id} activated");
        Ok(())
    }

    pub fn active_theme(&self) -> Result<Option<Theme>> {
        self.conn
            .query_row(&format!("{THEME_SELECT} WHERE active=1 LIMIT 1"), [], row_to_theme)
            .optional()
            .map_err(db_err("Active theme"))
    }

    /// Delete an inactive theme.
    pub fn delete_theme(&self, id: i64) -> Result<()> {
        let theme = self.get_theme(id)?;
        if theme.active {
            return Err(PressdeskError::Conflict(format!(
                "theme '{}' is active",
                theme.name
            )));
        }
        self.conn
            .execute("DELETE FROM themes WHERE id=?1", params![id])
            .map_err(db_err("Delete theme"))?;
        Ok(())
    }

    pub fn list_themes(&self) -> Result<Vec<Theme>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{THEME_SELECT} ORDER BY name"))
            .map_err(db_err("Prepare"))?;
        let themes = stmt
            .query_map([], row_to_theme)
            .map_err(db_err("Query"))?
            .filter_map(|r| r.ok())
            .collect();
        Ok(themes)
    }
}
