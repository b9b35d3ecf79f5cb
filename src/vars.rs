//! Typed scalar variable store.
//!
//! Variables are addressed by UUID and owned by the mod that first wrote
//! them. A `Default` write creates the row only if absent; an `Update` write
//! (value prefixed `+` in the descriptor) applies a read-modify-write delta in
//! the declared type's native width and signedness, wrapping on overflow, so
//! several mods can cooperatively adjust a shared counter.

use crate::descriptor::VariableDef;
use crate::error::{Error, Result};
use crate::store::Store;
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VarType {
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
    F32,
    F64,
}

impl VarType {
    pub fn as_str(&self) -> &'static str {
        match self {
            VarType::I8 => "I8",
            VarType::U8 => "U8",
            VarType::I16 => "I16",
            VarType::U16 => "U16",
            VarType::I32 => "I32",
            VarType::U32 => "U32",
            VarType::F32 => "F32",
            VarType::F64 => "F64",
        }
    }

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s {
            "I8" => VarType::I8,
            "U8" => VarType::U8,
            "I16" => VarType::I16,
            "U16" => VarType::U16,
            "I32" => VarType::I32,
            "U32" => VarType::U32,
            "F32" => VarType::F32,
            "F64" => VarType::F64,
            other => {
                return Err(Error::BadVariableValue {
                    kind: other.to_string(),
                    value: String::new(),
                })
            }
        })
    }

    /// Wrapping addition in this type's native width, returned in the store's
    /// decimal text form.
    fn add(&self, current: &str, delta: &str) -> Result<String> {
        let bad = |v: &str| Error::BadVariableValue {
            kind: self.as_str().to_string(),
            value: v.to_string(),
        };
        macro_rules! wrap_add {
            ($ty:ty) => {{
                let cur: $ty = current.parse().map_err(|_| bad(current))?;
                let d: $ty = delta.parse().map_err(|_| bad(delta))?;
                cur.wrapping_add(d).to_string()
            }};
        }
        Ok(match self {
            VarType::I8 => wrap_add!(i8),
            VarType::U8 => wrap_add!(u8),
            VarType::I16 => wrap_add!(i16),
            VarType::U16 => wrap_add!(u16),
            VarType::I32 => wrap_add!(i32),
            VarType::U32 => wrap_add!(u32),
            VarType::F32 => {
                let cur: f32 = current.parse().map_err(|_| bad(current))?;
                let d: f32 = delta.parse().map_err(|_| bad(delta))?;
                (cur + d).to_string()
            }
            VarType::F64 => {
                let cur: f64 = current.parse().map_err(|_| bad(current))?;
                let d: f64 = delta.parse().map_err(|_| bad(delta))?;
                (cur + d).to_string()
            }
        })
    }
}

/// One stored variable row.
#[derive(Debug, Clone, PartialEq)]
pub struct VariableRecord {
    pub uuid: String,
    pub owner: String,
    pub kind: VarType,
    pub public_kind: String,
    pub desc: String,
    pub value: String,
}

/// Fetch a variable by UUID.
pub fn get(store: &Store, uuid: &str) -> Result<Option<VariableRecord>> {
    let row = store
        .conn()
        .query_row(
            "SELECT uuid, owner, kind, public_kind, desc, value FROM vars WHERE uuid = ?1",
            params![uuid],
            |r| {
                Ok((
                    r.get::<_, String>(0)?,
                    r.get::<_, String>(1)?,
                    r.get::<_, String>(2)?,
                    r.get::<_, String>(3)?,
                    r.get::<_, String>(4)?,
                    r.get::<_, String>(5)?,
                ))
            },
        )
        .optional()?;
    match row {
        None => Ok(None),
        Some((uuid, owner, kind, public_kind, desc, value)) => Ok(Some(VariableRecord {
            uuid,
            owner,
            kind: VarType::from_str(&kind)?,
            public_kind,
            desc,
            value,
        })),
    }
}

/// Apply one variable declaration from a descriptor on behalf of `owner`.
///
/// `Default` creates the row only if absent (the first writer becomes the
/// owner); `Update` applies a typed delta to an existing or fresh row. An
/// `Update` against a missing row creates it with the delta as the value.
pub fn apply(store: &Store, owner: &str, def: &VariableDef) -> Result<()> {
    if let Some(update) = &def.update {
        let delta = update.strip_prefix('+').unwrap_or(update);
        match get(store, &def.uuid)? {
            Some(existing) => {
                let next = existing.kind.add(&existing.value, delta)?;
                store.conn().execute(
                    "UPDATE vars SET value = ?1 WHERE uuid = ?2",
                    params![next, def.uuid],
                )?;
            }
            None => insert(store, owner, def, delta)?,
        }
        return Ok(());
    }
    if let Some(default) = &def.default {
        if get(store, &def.uuid)?.is_none() {
            insert(store, owner, def, default)?;
        }
        return Ok(());
    }
    Err(Error::BadVariableValue {
        kind: def.kind.as_str().to_string(),
        value: format!("variable {} declares neither Default nor Update", def.uuid),
    })
}

fn insert(store: &Store, owner: &str, def: &VariableDef, value: &str) -> Result<()> {
    // Validate the literal parses in the declared type before storing.
    def.kind.add(value, "0")?;
    store.conn().execute(
        "INSERT INTO vars (uuid, owner, kind, public_kind, desc, value)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            def.uuid,
            owner,
            def.kind.as_str(),
            def.public_kind,
            def.desc,
            value
        ],
    )?;
    Ok(())
}

/// Delete every variable owned by a mod.
pub fn delete_owned(store: &Store, owner: &str) -> Result<usize> {
    Ok(store
        .conn()
        .execute("DELETE FROM vars WHERE owner = ?1", params![owner])?)
}
