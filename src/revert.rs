//! Revert Log.
//!
//! Before any Used-range write, the previous on-disk bytes of exactly that
//! range are hex-encoded and stored keyed by the range's stable id. Uninstall
//! consumes the entry to restore the original bytes; entry and Ledger row are
//! deleted together so no orphaned revert data accumulates.

use crate::error::Result;
use crate::store::Store;
use rusqlite::{params, OptionalExtension};

/// Record the pre-overwrite content of a range. Must run before the write.
pub fn record(store: &Store, range_id: &str, old_bytes: &[u8]) -> Result<()> {
    store.conn().execute(
        "INSERT OR REPLACE INTO revert (range_id, old_bytes) VALUES (?1, ?2)",
        params![range_id, hex::encode(old_bytes)],
    )?;
    Ok(())
}

/// Fetch and delete the entry for a range in one step.
pub fn take(store: &Store, range_id: &str) -> Result<Option<Vec<u8>>> {
    let encoded: Option<String> = store
        .conn()
        .query_row(
            "SELECT old_bytes FROM revert WHERE range_id = ?1",
            params![range_id],
            |r| r.get(0),
        )
        .optional()?;
    let Some(encoded) = encoded else {
        return Ok(None);
    };
    store
        .conn()
        .execute("DELETE FROM revert WHERE range_id = ?1", params![range_id])?;
    Ok(Some(hex::decode(encoded)?))
}
