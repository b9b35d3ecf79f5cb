//! Persistent store context.
//!
//! One SQLite connection, threaded explicitly through every operation instead
//! of process-wide globals. Six logical tables back the engine: `files`,
//! `spaces`, `revert`, `mods`, `deps`, `vars`.

use crate::error::Result;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS files (
    id      INTEGER PRIMARY KEY AUTOINCREMENT,
    path    TEXT NOT NULL UNIQUE
);
CREATE TABLE IF NOT EXISTS spaces (
    id          TEXT NOT NULL PRIMARY KEY,
    parent_id   TEXT,
    file_id     INTEGER NOT NULL REFERENCES files(id),
    kind        TEXT NOT NULL CHECK (kind IN ('Free', 'Used')),
    owner       TEXT,
    start       INTEGER NOT NULL,
    end         INTEGER NOT NULL,
    reserved_by TEXT
);
CREATE INDEX IF NOT EXISTS idx_spaces_file ON spaces(file_id, kind);
CREATE INDEX IF NOT EXISTS idx_spaces_owner ON spaces(owner);
CREATE TABLE IF NOT EXISTS revert (
    range_id  TEXT NOT NULL PRIMARY KEY,
    old_bytes TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS mods (
    seq      INTEGER PRIMARY KEY AUTOINCREMENT,
    uuid     TEXT NOT NULL UNIQUE,
    name     TEXT NOT NULL,
    desc     TEXT NOT NULL DEFAULT '',
    author   TEXT NOT NULL DEFAULT '',
    version  INTEGER NOT NULL,
    date     TEXT NOT NULL,
    category TEXT NOT NULL DEFAULT ''
);
CREATE TABLE IF NOT EXISTS deps (
    parent TEXT NOT NULL,
    child  TEXT NOT NULL,
    PRIMARY KEY (parent, child)
);
CREATE TABLE IF NOT EXISTS vars (
    uuid        TEXT NOT NULL PRIMARY KEY,
    owner       TEXT NOT NULL,
    kind        TEXT NOT NULL,
    public_kind TEXT NOT NULL DEFAULT '',
    desc        TEXT NOT NULL DEFAULT '',
    value       TEXT NOT NULL
);
";

/// Store handle. Owns the connection; all engine modules operate through it.
pub struct Store {
    conn: Connection,
}

impl Store {
    /// Open (or create) a store at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::init(conn)
    }

    /// In-memory store, used by tests and dry runs.
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Store { conn })
    }

    pub(crate) fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Look up the FileID for a target path, assigning one lazily on first
    /// use. Ledger rows reference files by this id, never by path.
    pub fn file_id(&mut self, path: &str) -> Result<i64> {
        let existing: Option<i64> = self
            .conn
            .query_row("SELECT id FROM files WHERE path = ?1", params![path], |r| {
                r.get(0)
            })
            .optional()?;
        if let Some(id) = existing {
            return Ok(id);
        }
        self.conn
            .execute("INSERT INTO files (path) VALUES (?1)", params![path])?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Path for a FileID, if one was ever assigned.
    pub fn file_path(&self, file_id: i64) -> Result<Option<String>> {
        Ok(self
            .conn
            .query_row(
                "SELECT path FROM files WHERE id = ?1",
                params![file_id],
                |r| r.get(0),
            )
            .optional()?)
    }

    /// Bulk-load the baseline Free ranges of one target file.
    ///
    /// Baseline ranges pre-exist any mod and carry no owner. Batched in one
    /// transaction; everything else in the engine writes row-at-a-time.
    pub fn load_baseline(&mut self, path: &str, ranges: &[(u64, u64)]) -> Result<i64> {
        let file_id = self.file_id(path)?;
        let tx = self.conn.transaction()?;
        for &(start, end) in ranges {
            let id = crate::ledger::derived_id(file_id, start, end);
            tx.execute(
                "INSERT INTO spaces (id, file_id, kind, owner, start, end)
                 VALUES (?1, ?2, 'Free', NULL, ?3, ?4)",
                params![id, file_id, start as i64, end as i64],
            )?;
        }
        tx.commit()?;
        tracing::debug!(path, ranges = ranges.len(), "baseline free ranges loaded");
        Ok(file_id)
    }
}
