//! Space Ledger and allocator.
//!
//! The Ledger is the persistent table of byte ranges per target file, each
//! tagged Free or Used, with an owning mod and a stable identifier. The
//! allocator finds, claims, splits, and releases ranges under size and
//! location constraints.
//!
//! Best-fit selection is by ascending length: a small patch never consumes a
//! large free block a later, bigger patch might need. Adjacent Free ranges
//! are never coalesced; uninstall can leave split remainders as separate rows.

use crate::error::{Error, Result};
use crate::store::Store;
use rusqlite::{params, OptionalExtension, Row};

/// Range kind within the Ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpaceKind {
    Free,
    Used,
}

impl SpaceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SpaceKind::Free => "Free",
            SpaceKind::Used => "Used",
        }
    }

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "Free" => Ok(SpaceKind::Free),
            "Used" => Ok(SpaceKind::Used),
            other => Err(Error::Corrupt(format!("unknown space kind {other:?}"))),
        }
    }
}

/// One Ledger row: a half-open byte interval `[start, end)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpaceRecord {
    pub id: String,
    /// Lineage pointer to the range this row was derived from (reservation
    /// re-key or split remainder). The original stable id resolves through it.
    pub parent_id: Option<String>,
    pub file_id: i64,
    pub kind: SpaceKind,
    pub owner: Option<String>,
    pub start: u64,
    pub end: u64,
    pub reserved_by: Option<String>,
}

impl SpaceRecord {
    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(SpaceRecord {
            id: row.get(0)?,
            parent_id: row.get(1)?,
            file_id: row.get(2)?,
            kind: SpaceKind::from_str(&row.get::<_, String>(3)?).map_err(|_| {
                rusqlite::Error::InvalidColumnType(3, "kind".into(), rusqlite::types::Type::Text)
            })?,
            owner: row.get(4)?,
            start: row.get::<_, i64>(5)? as u64,
            end: row.get::<_, i64>(6)? as u64,
            reserved_by: row.get(7)?,
        })
    }
}

const COLS: &str = "id, parent_id, file_id, kind, owner, start, end, reserved_by";

/// Deterministic id for ranges not named by a descriptor patch. Both offsets
/// participate, so a split remainder that starts where its parent did still
/// gets a fresh id and the parent's id keeps resolving through the lineage.
pub(crate) fn derived_id(file_id: i64, start: u64, end: u64) -> String {
    format!("F{file_id}@{start:08X}..{end:08X}")
}

/// Best-fit search: the smallest unreserved range of `kind` in `file_id` with
/// length ≥ `min_len`, fully contained in `[lo, hi)`. Ties break by ascending
/// start. `Ok(None)` is the normal no-space outcome, not an error.
pub fn find_space(
    store: &Store,
    file_id: i64,
    kind: SpaceKind,
    min_len: u64,
    lo: u64,
    hi: u64,
) -> Result<Option<SpaceRecord>> {
    // Offsets are stored as i64; an unbounded u64 window clamps to the
    // largest representable offset.
    let lo = lo.min(i64::MAX as u64) as i64;
    let hi = hi.min(i64::MAX as u64) as i64;
    let rec = store
        .conn()
        .query_row(
            &format!(
                "SELECT {COLS} FROM spaces
                 WHERE file_id = ?1 AND kind = ?2 AND reserved_by IS NULL
                   AND start >= ?3 AND end <= ?4 AND (end - start) >= ?5
                 ORDER BY (end - start) ASC, start ASC
                 LIMIT 1"
            ),
            params![file_id, kind.as_str(), lo, hi, min_len as i64],
            SpaceRecord::from_row,
        )
        .optional()?;
    Ok(rec)
}

/// Fetch a range by stable id, following lineage: an exact id match wins;
/// otherwise the id is looked up as a parent reference, preferring the Used
/// descendant.
pub fn resolve(store: &Store, id: &str) -> Result<Option<SpaceRecord>> {
    let direct = store
        .conn()
        .query_row(
            &format!("SELECT {COLS} FROM spaces WHERE id = ?1"),
            params![id],
            SpaceRecord::from_row,
        )
        .optional()?;
    if direct.is_some() {
        return Ok(direct);
    }
    Ok(store
        .conn()
        .query_row(
            &format!(
                "SELECT {COLS} FROM spaces WHERE parent_id = ?1
                 ORDER BY kind DESC, start ASC LIMIT 1"
            ),
            params![id],
            SpaceRecord::from_row,
        )
        .optional()?)
}

/// Pre-claim a matched Free range for `owner` without writing bytes.
///
/// The row is re-keyed under the reserving patch's id; the previous id moves
/// into `parent_id` so it still resolves. A later patch of the same mod fills
/// the reservation by referencing `new_id`.
pub fn reserve(store: &Store, record: &SpaceRecord, new_id: &str, owner: &str) -> Result<()> {
    let updated = store.conn().execute(
        "UPDATE spaces SET id = ?1, parent_id = ?2, reserved_by = ?3 WHERE id = ?4",
        params![new_id, record.id, owner, record.id],
    )?;
    if updated != 1 {
        return Err(Error::UnresolvedRange(record.id.clone()));
    }
    tracing::debug!(id = new_id, owner, "range reserved");
    Ok(())
}

/// Claim `length` bytes out of a Free record as a Used range for `owner`,
/// splitting off head and tail remainders.
///
/// The Used range starts at `max(wanted_start, free.start)` and carries the
/// caller-supplied stable `id`. Head + used + tail lengths always sum to the
/// consumed record's length. Remainders inherit the consumed record's owner
/// and reservation, and point back at it through `parent_id`.
pub fn claim_and_split(
    store: &mut Store,
    free: &SpaceRecord,
    wanted_start: u64,
    length: u64,
    id: &str,
    owner: &str,
) -> Result<SpaceRecord> {
    let used_start = wanted_start.max(free.start);
    let used_end = used_start + length;
    if free.kind != SpaceKind::Free {
        return Err(Error::Corrupt(format!("claim of non-Free range {}", free.id)));
    }
    if used_end > free.end {
        return Err(Error::OutOfSpace {
            file_id: free.file_id,
            needed: length,
            lo: used_start,
            hi: free.end,
        });
    }

    let conn = store.conn();
    conn.execute("DELETE FROM spaces WHERE id = ?1", params![free.id])?;

    let used = SpaceRecord {
        id: id.to_string(),
        parent_id: Some(free.id.clone()),
        file_id: free.file_id,
        kind: SpaceKind::Used,
        owner: Some(owner.to_string()),
        start: used_start,
        end: used_end,
        reserved_by: None,
    };
    conn.execute(
        "INSERT INTO spaces (id, parent_id, file_id, kind, owner, start, end, reserved_by)
         VALUES (?1, ?2, ?3, 'Used', ?4, ?5, ?6, NULL)",
        params![
            used.id,
            used.parent_id,
            used.file_id,
            owner,
            used_start as i64,
            used_end as i64
        ],
    )?;

    // Head and tail remainders stay Free, keeping the consumed record's
    // owner/reservation and a lineage pointer back to it.
    for (rem_start, rem_end) in [(free.start, used_start), (used_end, free.end)] {
        if rem_end > rem_start {
            conn.execute(
                "INSERT INTO spaces (id, parent_id, file_id, kind, owner, start, end, reserved_by)
                 VALUES (?1, ?2, ?3, 'Free', ?4, ?5, ?6, ?7)",
                params![
                    derived_id(free.file_id, rem_start, rem_end),
                    free.id,
                    free.file_id,
                    free.owner,
                    rem_start as i64,
                    rem_end as i64,
                    free.reserved_by
                ],
            )?;
        }
    }

    tracing::debug!(
        id = used.id,
        owner,
        start = format_args!("{used_start:#x}"),
        len = length,
        "range claimed"
    );
    Ok(used)
}

/// Register `[start, end)` in `file_id` as Free space owned by `owner`,
/// keyed under `id`.
///
/// Hard error if the range overlaps a Used record owned by a *different*
/// mod. An exactly-matching existing Free record is re-keyed under `id` and
/// re-owned instead of duplicated; its previous id moves into `parent_id` so
/// it still resolves.
pub fn mark_clear(
    store: &mut Store,
    file_id: i64,
    start: u64,
    end: u64,
    id: &str,
    owner: &str,
) -> Result<()> {
    let conn = store.conn();
    // Used rows may carry no owner, so the column maps as an Option.
    let foreign: Option<Option<String>> = conn
        .query_row(
            "SELECT owner FROM spaces
             WHERE file_id = ?1 AND kind = 'Used'
               AND start < ?2 AND end > ?3 AND owner IS NOT ?4
             LIMIT 1",
            params![file_id, end as i64, start as i64, owner],
            |r| r.get(0),
        )
        .optional()?;
    if let Some(other) = foreign {
        return Err(Error::SpaceConflict {
            file_id,
            start,
            end,
            owner: other.unwrap_or_default(),
        });
    }

    let existing: Option<String> = conn
        .query_row(
            "SELECT id FROM spaces
             WHERE file_id = ?1 AND kind = 'Free' AND start = ?2 AND end = ?3",
            params![file_id, start as i64, end as i64],
            |r| r.get(0),
        )
        .optional()?;
    match existing {
        Some(old) if old == id => {
            conn.execute(
                "UPDATE spaces SET owner = ?1 WHERE id = ?2",
                params![owner, id],
            )?;
        }
        Some(old) => {
            conn.execute(
                "UPDATE spaces SET owner = ?1, id = ?2, parent_id = ?3 WHERE id = ?3",
                params![owner, id, old],
            )?;
        }
        None => {
            conn.execute(
                "INSERT INTO spaces (id, file_id, kind, owner, start, end)
                 VALUES (?1, ?2, 'Free', ?3, ?4, ?5)",
                params![id, file_id, owner, start as i64, end as i64],
            )?;
        }
    }
    tracing::debug!(owner, start = format_args!("{start:#x}"), "range cleared");
    Ok(())
}

/// All ranges of `kind` owned by `owner`, ordered by file and start.
pub fn owned_by(store: &Store, owner: &str, kind: SpaceKind) -> Result<Vec<SpaceRecord>> {
    let conn = store.conn();
    let mut stmt = conn.prepare(&format!(
        "SELECT {COLS} FROM spaces WHERE owner = ?1 AND kind = ?2
         ORDER BY file_id ASC, start ASC"
    ))?;
    let rows = stmt.query_map(params![owner, kind.as_str()], SpaceRecord::from_row)?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

/// Replace a Used row with an ownerless Free row over the same span.
///
/// Used by uninstall after the original bytes are restored: the span returns
/// to the free pool as its own fragment. Fragments are never recombined with
/// adjacent Free rows.
pub fn release_to_free(store: &Store, rec: &SpaceRecord) -> Result<()> {
    let conn = store.conn();
    conn.execute("DELETE FROM spaces WHERE id = ?1", params![rec.id])?;
    conn.execute(
        "INSERT INTO spaces (id, file_id, kind, owner, start, end)
         VALUES (?1, ?2, 'Free', NULL, ?3, ?4)",
        params![
            derived_id(rec.file_id, rec.start, rec.end),
            rec.file_id,
            rec.start as i64,
            rec.end as i64
        ],
    )?;
    Ok(())
}

/// Delete a Ledger row by exact id.
pub fn delete(store: &Store, id: &str) -> Result<()> {
    store
        .conn()
        .execute("DELETE FROM spaces WHERE id = ?1", params![id])?;
    Ok(())
}

/// Release every reservation `owner` holds on ranges it did not create.
pub fn clear_reservations(store: &Store, owner: &str) -> Result<usize> {
    Ok(store.conn().execute(
        "UPDATE spaces SET reserved_by = NULL WHERE reserved_by = ?1",
        params![owner],
    )?)
}

/// Net bytes `owner` occupies in `file_id`: the sum of its Used lengths minus
/// the sum of the Free (cleared) lengths it owns.
pub fn net_bytes(store: &Store, file_id: i64, owner: &str) -> Result<i64> {
    let conn = store.conn();
    let used: i64 = conn.query_row(
        "SELECT COALESCE(SUM(end - start), 0) FROM spaces
         WHERE file_id = ?1 AND owner = ?2 AND kind = 'Used'",
        params![file_id, owner],
        |r| r.get(0),
    )?;
    let cleared: i64 = conn.query_row(
        "SELECT COALESCE(SUM(end - start), 0) FROM spaces
         WHERE file_id = ?1 AND owner = ?2 AND kind = 'Free'",
        params![file_id, owner],
        |r| r.get(0),
    )?;
    Ok(used - cleared)
}
