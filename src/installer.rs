//! Install/uninstall orchestrator.
//!
//! Sequences compatibility, conflict, and dependency checks, applies or
//! unwinds patches, and keeps the mod registry current. The engine is
//! single-threaded and synchronous; the caller serializes requests.

use crate::descriptor::{
    Anchor, ByteSourceKind, ModDescriptor, OffsetExpr, Patch, PatchMode,
};
use crate::error::{Error, Result};
use crate::ledger::{self, SpaceKind, SpaceRecord};
use crate::store::Store;
use crate::target::{self, TargetSpec};
use crate::{deps, registry, revert, vars};
use std::fmt;
use std::path::{Path, PathBuf};

/// Engine loader version. Descriptors requiring a newer loader are rejected
/// before any mutation.
pub const ENGINE_VERSION: &str = "2.4.0";

pub fn engine_version() -> semver::Version {
    semver::Version::parse(ENGINE_VERSION).expect("ENGINE_VERSION is valid semver")
}

/// Install state machine phases, for logging and failure context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Loaded,
    CompatChecked,
    ConflictChecked,
    DepChecked,
    Installing,
    Committed,
    RolledBack,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Phase::Loaded => "Loaded",
            Phase::CompatChecked => "CompatChecked",
            Phase::ConflictChecked => "ConflictChecked",
            Phase::DepChecked => "DepChecked",
            Phase::Installing => "Installing",
            Phase::Committed => "Committed",
            Phase::RolledBack => "RolledBack",
        };
        f.write_str(s)
    }
}

/// Caller decisions for version conflicts, evaluated once per install, at
/// whole-mod granularity, before any patch is applied.
#[derive(Debug, Clone, Copy, Default)]
pub struct InstallOptions {
    /// Replace an older installed version.
    pub upgrade: bool,
    /// Reinstall the same version (repair).
    pub repair: bool,
    /// Replace a newer installed version. Declining is a cancellation, not an
    /// error.
    pub downgrade: bool,
}

enum Conflict {
    Fresh,
    Replace,
}

type ProgressFn = Box<dyn FnMut(usize, usize)>;

/// The patch engine: store handle plus validated installation root, threaded
/// explicitly through every operation.
pub struct Engine {
    store: Store,
    root: PathBuf,
    progress: Option<ProgressFn>,
}

impl Engine {
    pub fn new(store: Store, root: impl Into<PathBuf>) -> Self {
        Engine {
            store,
            root: root.into(),
            progress: None,
        }
    }

    /// Install a progress callback, invoked between patches with
    /// `(completed, total)`.
    pub fn with_progress(mut self, f: impl FnMut(usize, usize) + 'static) -> Self {
        self.progress = Some(Box::new(f));
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Register the baseline Free ranges of a target file.
    pub fn load_baseline(&mut self, path: &str, ranges: &[(u64, u64)]) -> Result<i64> {
        self.store.load_baseline(path, ranges)
    }

    /// Verify a target file against its whitelist entry.
    pub fn verify_target(&self, spec: &TargetSpec) -> Result<()> {
        target::verify(&self.root, spec)
    }

    // ---- queries ----------------------------------------------------------

    /// Installed mod names in registry (installation) order.
    pub fn installed_mods(&self) -> Result<Vec<String>> {
        registry::names(&self.store)
    }

    /// Full metadata for the mod at a zero-based registry position.
    pub fn mod_at(&self, position: usize) -> Result<Option<registry::RegistryEntry>> {
        registry::at_position(&self.store, position)
    }

    /// Net bytes a mod occupies in a target file.
    pub fn net_bytes(&mut self, path: &str, uuid: &str) -> Result<i64> {
        let file_id = self.store.file_id(path)?;
        ledger::net_bytes(&self.store, file_id, uuid)
    }

    // ---- install ----------------------------------------------------------

    /// Install a mod from its descriptor.
    ///
    /// Runs the compat, conflict, and dependency gates in order; nothing is
    /// mutated until all three pass (a confirmed replace uninstalls the
    /// existing version between the conflict and dependency gates). A patch
    /// failure during `Installing` unwinds everything the partial install
    /// applied and reports the original failure.
    pub fn install(&mut self, desc: &ModDescriptor, options: InstallOptions) -> Result<()> {
        tracing::info!(uuid = desc.uuid, name = desc.name, phase = %Phase::Loaded, "install");

        self.check_compat(desc)?;
        tracing::debug!(uuid = desc.uuid, phase = %Phase::CompatChecked, "ok");

        let conflict = self.check_conflict(desc, options)?;
        tracing::debug!(uuid = desc.uuid, phase = %Phase::ConflictChecked, "ok");
        if let Conflict::Replace = conflict {
            self.uninstall(&desc.uuid)?;
        }

        match deps::check(&self.store, desc)? {
            deps::DepCheck::Satisfied => {}
            deps::DepCheck::Missing(list) => return Err(Error::MissingDependencies(list)),
        }
        tracing::debug!(uuid = desc.uuid, phase = %Phase::DepChecked, "ok");

        tracing::debug!(
            uuid = desc.uuid,
            patches = desc.patches.len(),
            phase = %Phase::Installing,
            "applying patches"
        );
        if let Err(err) = self.apply_patches(desc) {
            tracing::warn!(
                uuid = desc.uuid,
                error = %err,
                phase = %Phase::RolledBack,
                "install failed, unwinding partial application"
            );
            // The only supported recovery is undoing what was applied. If
            // the unwind itself fails, the caller still needs the original
            // patch error; the cleanup failure is logged.
            if let Err(cleanup) = self.remove_mod(&desc.uuid) {
                tracing::error!(uuid = desc.uuid, error = %cleanup, "rollback incomplete");
            }
            return Err(err);
        }

        registry::insert(&self.store, desc)?;
        for def in &desc.variables {
            vars::apply(&self.store, &desc.uuid, def)?;
        }
        tracing::info!(uuid = desc.uuid, phase = %Phase::Committed, "installed");
        Ok(())
    }

    fn check_compat(&self, desc: &ModDescriptor) -> Result<()> {
        let required = semver::Version::parse(&desc.loader_version)
            .map_err(|_| Error::BadLoaderVersion(desc.loader_version.clone()))?;
        let engine = engine_version();
        if required > engine {
            return Err(Error::LoaderTooOld {
                required: required.to_string(),
                engine: engine.to_string(),
            });
        }
        Ok(())
    }

    fn check_conflict(&self, desc: &ModDescriptor, options: InstallOptions) -> Result<Conflict> {
        let Some(existing) = registry::find(&self.store, &desc.uuid)? else {
            return Ok(Conflict::Fresh);
        };
        if existing.version < desc.version {
            if options.upgrade {
                return Ok(Conflict::Replace);
            }
            return Err(Error::Cancelled);
        }
        if existing.version == desc.version {
            if options.repair {
                return Ok(Conflict::Replace);
            }
            return Err(Error::AlreadyInstalled {
                uuid: desc.uuid.clone(),
                version: existing.version,
            });
        }
        // Installed version is newer; declining a downgrade is a user
        // decision, not a hard error.
        if options.downgrade {
            Ok(Conflict::Replace)
        } else {
            Err(Error::Cancelled)
        }
    }

    fn apply_patches(&mut self, desc: &ModDescriptor) -> Result<()> {
        let total = desc.patches.len();
        for (index, patch) in desc.patches.iter().enumerate() {
            tracing::debug!(
                uuid = desc.uuid,
                index,
                mode = patch.mode.as_str(),
                file = patch.file,
                "applying patch"
            );
            self.apply_patch(desc, index, patch)?;
            if let Some(progress) = &mut self.progress {
                progress(index + 1, total);
            }
        }
        Ok(())
    }

    fn apply_patch(&mut self, desc: &ModDescriptor, index: usize, patch: &Patch) -> Result<()> {
        let file_id = self.store.file_id(&patch.file)?;
        match patch.mode {
            PatchMode::Add => {
                let payload = self.payload(patch, index)?;
                let lo = self.resolve_offset(patch.start.as_ref(), 0)?;
                let hi = self.resolve_offset(patch.end.as_ref(), u64::MAX)?;
                self.add_bytes(desc, patch, index, file_id, lo, hi, &payload)?;
            }
            PatchMode::Clear => {
                let (lo, hi) = self.required_window(patch, index)?;
                let id = patch
                    .id
                    .clone()
                    .unwrap_or_else(|| ledger::derived_id(file_id, lo, hi));
                ledger::mark_clear(&mut self.store, file_id, lo, hi, &id, &desc.uuid)?;
            }
            PatchMode::Repl => {
                let payload = self.payload(patch, index)?;
                let (lo, hi) = self.required_window(patch, index)?;
                let id = patch
                    .id
                    .clone()
                    .unwrap_or_else(|| ledger::derived_id(file_id, lo, hi));
                // Clear then Add over the same range, reusing one stable id
                // so uninstall sees a single continuous history. The Add half
                // claims exactly the record the clear produced; unrelated
                // Free rows inside the window stay untouched.
                ledger::mark_clear(&mut self.store, file_id, lo, hi, &id, &desc.uuid)?;
                let free = ledger::resolve(&self.store, &id)?
                    .ok_or_else(|| Error::UnresolvedRange(id.clone()))?;
                self.write_into(patch, index, &free, lo, &id, &desc.uuid, &payload)?;
            }
            PatchMode::Move => {
                let (src_lo, src_hi) = self.required_src(patch, index)?;
                let (lo, hi) = (
                    self.resolve_offset(patch.start.as_ref(), 0)?,
                    self.resolve_offset(patch.end.as_ref(), u64::MAX)?,
                );
                let payload = target::read_range(&self.root, &patch.file, src_lo, src_hi)?;
                let src_id = ledger::derived_id(file_id, src_lo, src_hi);
                ledger::mark_clear(&mut self.store, file_id, src_lo, src_hi, &src_id, &desc.uuid)?;
                self.add_bytes(desc, patch, index, file_id, lo, hi, &payload)?;
            }
            PatchMode::Copy => {
                let (src_lo, src_hi) = self.required_src(patch, index)?;
                let lo = self.resolve_offset(patch.start.as_ref(), 0)?;
                let hi = self.resolve_offset(patch.end.as_ref(), u64::MAX)?;
                let payload = target::read_range(&self.root, &patch.file, src_lo, src_hi)?;
                self.add_bytes(desc, patch, index, file_id, lo, hi, &payload)?;
            }
            PatchMode::Reserve => {
                let lo = self.resolve_offset(patch.start.as_ref(), 0)?;
                let hi = self.resolve_offset(patch.end.as_ref(), u64::MAX)?;
                let length = match &patch.value {
                    Some(v) => crate::descriptor::parse_int(v).ok_or(Error::MalformedPatch {
                        index,
                        mode: patch.mode.as_str(),
                        field: "Value",
                        detail: format!("not a length: {v:?}"),
                    })?,
                    None if hi != u64::MAX => hi - lo,
                    None => {
                        return Err(Error::MalformedPatch {
                            index,
                            mode: patch.mode.as_str(),
                            field: "Value",
                            detail: "Reserve needs a length or an explicit window".to_string(),
                        })
                    }
                };
                let record = ledger::find_space(&self.store, file_id, SpaceKind::Free, length, lo, hi)?
                    .ok_or(Error::OutOfSpace {
                        file_id,
                        needed: length,
                        lo,
                        hi,
                    })?;
                let id = patch
                    .id
                    .clone()
                    .unwrap_or_else(|| ledger::derived_id(file_id, record.start, record.end));
                ledger::reserve(&self.store, &record, &id, &desc.uuid)?;
            }
        }
        Ok(())
    }

    /// Find space for `payload` in `[lo, hi)`, then claim and overwrite it.
    fn add_bytes(
        &mut self,
        desc: &ModDescriptor,
        patch: &Patch,
        index: usize,
        file_id: i64,
        lo: u64,
        hi: u64,
        payload: &[u8],
    ) -> Result<()> {
        let length = payload.len() as u64;

        // A range reserved earlier by this mod is claimable by direct UUID
        // reference, even though the finder never returns reserved rows.
        let reserved = self.own_reservation(patch, &desc.uuid)?;
        let free = match reserved {
            Some(rec) if rec.len() >= length => rec,
            _ => ledger::find_space(&self.store, file_id, SpaceKind::Free, length, lo, hi)?
                .ok_or(Error::OutOfSpace {
                    file_id,
                    needed: length,
                    lo,
                    hi,
                })?,
        };

        let start = lo.max(free.start);
        let id = patch
            .id
            .clone()
            .unwrap_or_else(|| ledger::derived_id(file_id, start, start + length));
        self.write_into(patch, index, &free, lo, &id, &desc.uuid, payload)
    }

    /// Claim `payload.len()` bytes out of a specific Free record, write the
    /// revert entry, then overwrite the target bytes.
    fn write_into(
        &mut self,
        patch: &Patch,
        index: usize,
        free: &SpaceRecord,
        wanted_start: u64,
        id: &str,
        owner: &str,
        payload: &[u8],
    ) -> Result<()> {
        if payload.is_empty() {
            return Err(Error::MalformedPatch {
                index,
                mode: patch.mode.as_str(),
                field: "Value",
                detail: "empty payload".to_string(),
            });
        }
        let used = ledger::claim_and_split(
            &mut self.store,
            free,
            wanted_start,
            payload.len() as u64,
            id,
            owner,
        )?;

        let old = target::read_range(&self.root, &patch.file, used.start, used.end)?;
        revert::record(&self.store, &used.id, &old)?;
        target::write_range(&self.root, &patch.file, used.start, payload)?;
        Ok(())
    }

    /// The Free record a `Start` UUID reference points at, when it is a
    /// reservation held by this mod.
    fn own_reservation(&self, patch: &Patch, uuid: &str) -> Result<Option<SpaceRecord>> {
        let Some(OffsetExpr::RangeRef { id, .. }) = &patch.start else {
            return Ok(None);
        };
        let Some(rec) = ledger::resolve(&self.store, id)? else {
            return Err(Error::UnresolvedRange(id.clone()));
        };
        if rec.kind == SpaceKind::Free && rec.reserved_by.as_deref() == Some(uuid) {
            Ok(Some(rec))
        } else {
            Ok(None)
        }
    }

    fn resolve_offset(&self, expr: Option<&OffsetExpr>, default: u64) -> Result<u64> {
        let Some(expr) = expr else {
            return Ok(default);
        };
        match expr {
            OffsetExpr::Literal(n) => Ok(*n),
            OffsetExpr::RangeRef { anchor, id, delta } => {
                let rec = ledger::resolve(&self.store, id)?
                    .ok_or_else(|| Error::UnresolvedRange(id.clone()))?;
                let base = match anchor {
                    Anchor::Start => rec.start,
                    Anchor::End => rec.end,
                };
                let resolved = base as i128 + *delta as i128;
                u64::try_from(resolved)
                    .map_err(|_| Error::BadOffsetExpr(format!("{id} resolves to {resolved}")))
            }
        }
    }

    fn required_window(&self, patch: &Patch, index: usize) -> Result<(u64, u64)> {
        let (Some(start), Some(end)) = (patch.start.as_ref(), patch.end.as_ref()) else {
            return Err(Error::MalformedPatch {
                index,
                mode: patch.mode.as_str(),
                field: "Start/End",
                detail: "both offsets are required".to_string(),
            });
        };
        let lo = self.resolve_offset(Some(start), 0)?;
        let hi = self.resolve_offset(Some(end), 0)?;
        if hi <= lo {
            return Err(Error::MalformedPatch {
                index,
                mode: patch.mode.as_str(),
                field: "Start/End",
                detail: format!("empty or inverted range [{lo:#x},{hi:#x})"),
            });
        }
        Ok((lo, hi))
    }

    fn required_src(&self, patch: &Patch, index: usize) -> Result<(u64, u64)> {
        let (Some(start), Some(end)) = (patch.src_start.as_ref(), patch.src_end.as_ref()) else {
            return Err(Error::MalformedPatch {
                index,
                mode: patch.mode.as_str(),
                field: "SrcStart/SrcEnd",
                detail: "both source offsets are required".to_string(),
            });
        };
        let lo = self.resolve_offset(Some(start), 0)?;
        let hi = self.resolve_offset(Some(end), 0)?;
        if hi <= lo {
            return Err(Error::MalformedPatch {
                index,
                mode: patch.mode.as_str(),
                field: "SrcStart/SrcEnd",
                detail: format!("empty or inverted range [{lo:#x},{hi:#x})"),
            });
        }
        Ok((lo, hi))
    }

    /// Resolve a patch's payload bytes.
    fn payload(&self, patch: &Patch, index: usize) -> Result<Vec<u8>> {
        let malformed = |field: &'static str, detail: String| Error::MalformedPatch {
            index,
            mode: patch.mode.as_str(),
            field,
            detail,
        };
        match patch.mode {
            PatchMode::Add | PatchMode::Repl => {}
            _ => {
                return Err(malformed(
                    "AddType",
                    "payload only valid for Add/Repl".to_string(),
                ))
            }
        }
        let value = patch
            .value
            .as_deref()
            .ok_or_else(|| malformed("Value", "missing payload".to_string()))?;
        match patch.add_type.unwrap_or(ByteSourceKind::Bytes) {
            ByteSourceKind::Bytes => {
                hex::decode(value).map_err(|e| malformed("Value", e.to_string()))
            }
            ByteSourceKind::UuidPointer => {
                // The payload is the referenced range's 4-byte LE start
                // offset, with an optional expression delta.
                let expr = OffsetExpr::parse(value)?;
                let offset = self.resolve_offset(Some(&expr), 0)?;
                let offset = u32::try_from(offset).map_err(|_| {
                    malformed("Value", format!("offset {offset:#x} exceeds 32 bits"))
                })?;
                Ok(offset.to_le_bytes().to_vec())
            }
        }
    }

    // ---- uninstall --------------------------------------------------------

    /// Uninstall a mod, refusing while other installed mods depend on it.
    ///
    /// Registry rows are processed strictly LIFO from the most recently
    /// installed mod back to (and including) the target: later mods may have
    /// carved space out of this mod's ranges, so reverse order is mandatory.
    pub fn uninstall(&mut self, uuid: &str) -> Result<()> {
        let entry = registry::find(&self.store, uuid)?
            .ok_or_else(|| Error::NotInstalled(uuid.to_string()))?;

        let dependents = deps::dependents_of(&self.store, uuid)?;
        if !dependents.is_empty() {
            return Err(Error::DependentsExist {
                uuid: uuid.to_string(),
                dependents,
            });
        }

        for mod_entry in registry::installed_since(&self.store, entry.seq)? {
            tracing::info!(uuid = mod_entry.uuid, "uninstalling");
            self.remove_mod(&mod_entry.uuid)?;
        }
        Ok(())
    }

    /// Undo everything one mod put in place: restore bytes for its Used
    /// ranges (consuming the paired revert entries), drop its Free ranges and
    /// reservations, its dependency edges, variables, and registry row.
    ///
    /// Also the compensating action for a failed partial install, where the
    /// registry row does not exist yet and the newest Used ranges may not
    /// have reached the overwrite step.
    fn remove_mod(&mut self, uuid: &str) -> Result<()> {
        for rec in ledger::owned_by(&self.store, uuid, SpaceKind::Used)? {
            match revert::take(&self.store, &rec.id)? {
                Some(old) => {
                    if old.len() as u64 != rec.len() {
                        return Err(Error::Corrupt(format!(
                            "revert entry for {} is {} bytes, range is {}",
                            rec.id,
                            old.len(),
                            rec.len()
                        )));
                    }
                    let path = self.store.file_path(rec.file_id)?.ok_or_else(|| {
                        Error::Corrupt(format!("no path for file id {}", rec.file_id))
                    })?;
                    target::write_range(&self.root, &path, rec.start, &old)?;
                }
                // The claim was made but the overwrite never happened.
                None => tracing::warn!(id = rec.id, "no revert entry; bytes left as found"),
            }
            // The span returns to the free pool as its own fragment; adjacent
            // Free rows are never recombined.
            ledger::release_to_free(&self.store, &rec)?;
        }
        for rec in ledger::owned_by(&self.store, uuid, SpaceKind::Free)? {
            ledger::delete(&self.store, &rec.id)?;
        }
        ledger::clear_reservations(&self.store, uuid)?;
        deps::delete_declared_by(&self.store, uuid)?;
        vars::delete_owned(&self.store, uuid)?;
        registry::delete(&self.store, uuid)?;
        Ok(())
    }
}
