//! Installed-mod registry.
//!
//! One row per installed mod. Insertion order (`seq`) defines the uninstall
//! traversal order: strictly last-in, first-out.

use crate::descriptor::ModDescriptor;
use crate::error::Result;
use crate::store::Store;
use rusqlite::{params, OptionalExtension, Row};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryEntry {
    pub seq: i64,
    pub uuid: String,
    pub name: String,
    pub desc: String,
    pub author: String,
    pub version: i64,
    pub date: String,
    pub category: String,
}

impl RegistryEntry {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(RegistryEntry {
            seq: row.get(0)?,
            uuid: row.get(1)?,
            name: row.get(2)?,
            desc: row.get(3)?,
            author: row.get(4)?,
            version: row.get(5)?,
            date: row.get(6)?,
            category: row.get(7)?,
        })
    }
}

const COLS: &str = "seq, uuid, name, desc, author, version, date, category";

/// Commit a mod to the registry. The install date defaults to now (RFC 3339)
/// when the descriptor carries none.
pub fn insert(store: &Store, desc: &ModDescriptor) -> Result<()> {
    let date = desc
        .date
        .clone()
        .unwrap_or_else(|| chrono::Utc::now().to_rfc3339());
    store.conn().execute(
        "INSERT INTO mods (uuid, name, desc, author, version, date, category)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            desc.uuid,
            desc.name,
            desc.desc,
            desc.author,
            desc.version,
            date,
            desc.category
        ],
    )?;
    Ok(())
}

pub fn find(store: &Store, uuid: &str) -> Result<Option<RegistryEntry>> {
    Ok(store
        .conn()
        .query_row(
            &format!("SELECT {COLS} FROM mods WHERE uuid = ?1"),
            params![uuid],
            RegistryEntry::from_row,
        )
        .optional()?)
}

/// Installed-mod names in registry (installation) order.
pub fn names(store: &Store) -> Result<Vec<String>> {
    let conn = store.conn();
    let mut stmt = conn.prepare("SELECT name FROM mods ORDER BY seq ASC")?;
    let rows = stmt.query_map([], |r| r.get(0))?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

/// Full metadata for the mod at a zero-based registry position.
pub fn at_position(store: &Store, position: usize) -> Result<Option<RegistryEntry>> {
    Ok(store
        .conn()
        .query_row(
            &format!("SELECT {COLS} FROM mods ORDER BY seq ASC LIMIT 1 OFFSET ?1"),
            params![position as i64],
            RegistryEntry::from_row,
        )
        .optional()?)
}

/// Every registry row with `seq` ≥ the given row's, newest first. This is the
/// LIFO traversal an uninstall must follow.
pub fn installed_since(store: &Store, seq: i64) -> Result<Vec<RegistryEntry>> {
    let conn = store.conn();
    let mut stmt = conn.prepare(&format!(
        "SELECT {COLS} FROM mods WHERE seq >= ?1 ORDER BY seq DESC"
    ))?;
    let rows = stmt.query_map(params![seq], RegistryEntry::from_row)?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

pub fn delete(store: &Store, uuid: &str) -> Result<()> {
    store
        .conn()
        .execute("DELETE FROM mods WHERE uuid = ?1", params![uuid])?;
    Ok(())
}
