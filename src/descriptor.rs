//! Parsed mod descriptor model.
//!
//! A descriptor is supplied already-parsed by a collaborator (the packaging
//! toolkit or a UI front-end); the engine treats it as immutable input. The
//! field names mirror the external vocabulary exactly, so a descriptor can be
//! deserialized straight from its JSON form.

use crate::error::{Error, Result};
use serde::{Deserialize, Deserializer, Serialize};

/// One declarative patch operation.
///
/// The mode vocabulary is closed and reproduced verbatim from the descriptor
/// format: `Add`, `Clear`, `Repl`, `Move`, `Copy`, `Reserve`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PatchMode {
    Add,
    Clear,
    Repl,
    Move,
    Copy,
    Reserve,
}

impl PatchMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            PatchMode::Add => "Add",
            PatchMode::Clear => "Clear",
            PatchMode::Repl => "Repl",
            PatchMode::Move => "Move",
            PatchMode::Copy => "Copy",
            PatchMode::Reserve => "Reserve",
        }
    }
}

/// Where an `Add`-family patch takes its payload from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ByteSourceKind {
    /// Inline hex string in the patch's `Value` field.
    Bytes,
    /// The payload is the 4-byte little-endian start offset of a named range.
    #[serde(rename = "UUIDPointer")]
    UuidPointer,
}

/// Which edge of a referenced range an expression anchors to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Anchor {
    Start,
    End,
}

/// A resolved-at-install-time offset.
///
/// Descriptors may give offsets as plain integers or as toolkit expressions of
/// the form `"$ Start.<UUID> + <offset>"` (also `End.<UUID>`, bare or with a
/// `-` delta, decimal or `0x` literals). The delta operator is space-delimited,
/// so hyphens inside the referenced UUID are kept as part of the id.
/// Expressions are parsed once, here, into a small AST; nothing downstream
/// re-parses strings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OffsetExpr {
    Literal(u64),
    RangeRef {
        anchor: Anchor,
        id: String,
        delta: i64,
    },
}

impl OffsetExpr {
    pub fn parse(input: &str) -> Result<Self> {
        let s = input.trim().trim_start_matches('$').trim_start();
        if s.is_empty() {
            return Err(Error::BadOffsetExpr(input.to_string()));
        }

        if let Some(rest) = s.strip_prefix("Start.") {
            return Self::parse_ref(Anchor::Start, rest, input);
        }
        if let Some(rest) = s.strip_prefix("End.") {
            return Self::parse_ref(Anchor::End, rest, input);
        }

        parse_int(s)
            .map(OffsetExpr::Literal)
            .ok_or_else(|| Error::BadOffsetExpr(input.to_string()))
    }

    fn parse_ref(anchor: Anchor, rest: &str, original: &str) -> Result<Self> {
        // Only a space-delimited " + "/" - " separates the delta; a bare
        // hyphen belongs to the UUID.
        let plus = rest.find(" + ").map(|pos| (pos, 1i64));
        let minus = rest.find(" - ").map(|pos| (pos, -1i64));
        let op = match (plus, minus) {
            (Some(p), Some(m)) => Some(if m.0 < p.0 { m } else { p }),
            (p, m) => p.or(m),
        };
        let (id, delta) = match op {
            Some((pos, sign)) => {
                let id = rest[..pos].trim();
                let magnitude = parse_int(rest[pos + 3..].trim())
                    .ok_or_else(|| Error::BadOffsetExpr(original.to_string()))?;
                (id, sign * magnitude as i64)
            }
            None => (rest.trim(), 0),
        };
        if id.is_empty() {
            return Err(Error::BadOffsetExpr(original.to_string()));
        }
        Ok(OffsetExpr::RangeRef {
            anchor,
            id: id.to_string(),
            delta,
        })
    }
}

impl<'de> Deserialize<'de> for OffsetExpr {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Num(u64),
            Expr(String),
        }
        match Raw::deserialize(deserializer)? {
            Raw::Num(n) => Ok(OffsetExpr::Literal(n)),
            Raw::Expr(s) => OffsetExpr::parse(&s).map_err(serde::de::Error::custom),
        }
    }
}

/// Parse a decimal or `0x`-prefixed integer.
pub(crate) fn parse_int(s: &str) -> Option<u64> {
    let s = s.trim();
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16).ok()
    } else {
        s.parse().ok()
    }
}

/// One patch entry from a descriptor's patch list.
#[derive(Debug, Clone, Deserialize)]
pub struct Patch {
    #[serde(rename = "ID", default)]
    pub id: Option<String>,

    #[serde(rename = "Mode")]
    pub mode: PatchMode,

    /// Target file, relative to the validated installation root.
    #[serde(rename = "File")]
    pub file: String,

    #[serde(rename = "Start", default)]
    pub start: Option<OffsetExpr>,

    #[serde(rename = "End", default)]
    pub end: Option<OffsetExpr>,

    #[serde(rename = "SrcStart", default)]
    pub src_start: Option<OffsetExpr>,

    #[serde(rename = "SrcEnd", default)]
    pub src_end: Option<OffsetExpr>,

    #[serde(rename = "AddType", default)]
    pub add_type: Option<ByteSourceKind>,

    /// Inline hex payload (`Bytes`), referenced range UUID (`UUIDPointer`),
    /// or the requested length for `Reserve`.
    #[serde(rename = "Value", default)]
    pub value: Option<String>,
}

/// A declared dependency on another mod.
#[derive(Debug, Clone, Deserialize)]
pub struct Dependency {
    #[serde(rename = "UUID")]
    pub uuid: String,

    /// Minimum acceptable installed version.
    #[serde(rename = "Ver")]
    pub min_version: i64,

    #[serde(rename = "Name", default)]
    pub name: String,

    #[serde(rename = "Auth", default)]
    pub author: String,
}

/// A variable declaration from a descriptor's variable list.
///
/// Exactly one of `default` / `update` is expected: `Default` creates the row
/// only if absent, `Update` applies a typed delta to the stored value.
#[derive(Debug, Clone, Deserialize)]
pub struct VariableDef {
    #[serde(rename = "UUID")]
    pub uuid: String,

    #[serde(rename = "Type")]
    pub kind: crate::vars::VarType,

    #[serde(rename = "Desc", default)]
    pub desc: String,

    /// Presentation hint for a UI collaborator (plain, hex, checkbox, enum).
    /// Opaque to the engine.
    #[serde(rename = "PublicType", default)]
    pub public_kind: String,

    #[serde(rename = "Default", default)]
    pub default: Option<String>,

    #[serde(rename = "Update", default)]
    pub update: Option<String>,
}

/// Parsed mod metadata. Immutable, read-only input to the engine.
#[derive(Debug, Clone, Deserialize)]
pub struct ModDescriptor {
    #[serde(rename = "UUID")]
    pub uuid: String,

    #[serde(rename = "Name")]
    pub name: String,

    #[serde(rename = "Author", default)]
    pub author: String,

    #[serde(rename = "Version")]
    pub version: i64,

    #[serde(rename = "Desc", default)]
    pub desc: String,

    #[serde(rename = "Category", default)]
    pub category: String,

    #[serde(rename = "Date", alias = "InstallDate", default)]
    pub date: Option<String>,

    /// Required loader version, `MAJOR.MINOR.BUGFIX`.
    #[serde(rename = "LoaderVersion")]
    pub loader_version: String,

    #[serde(rename = "Dependencies", default)]
    pub dependencies: Vec<Dependency>,

    #[serde(rename = "Patches", default)]
    pub patches: Vec<Patch>,

    #[serde(rename = "Variables", default)]
    pub variables: Vec<VariableDef>,
}

impl ModDescriptor {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}
