//! # Patchvault - Safe Byte-Range Patching for Game Binaries
//!
//! `patchvault` retrofits patches (byte insertions, deletions, replacements,
//! moves, copies) into externally-owned binary files, such as a game
//! executable and its resource files. Patches contributed by
//! independently-authored mods never corrupt byte ranges another installed
//! mod depends on.
//!
//! The engine is built from:
//!
//! - a persistent **Space Ledger** of Free/Used byte ranges per target file,
//!   with a best-fit allocator that claims, splits, and releases ranges
//! - a **Revert Log** holding the pre-overwrite bytes of every claimed range,
//!   so any mod can be removed byte-exactly later
//! - a typed **Variable Store** with create vs. typed-delta write semantics
//! - a **Dependency Graph** that blocks out-of-order removal
//! - an **Orchestrator** that gates installs on compatibility, conflict, and
//!   dependency checks, and unwinds partial installs on failure
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use patchvault::{Engine, InstallOptions, ModDescriptor, Store, Result};
//!
//! # fn main() -> Result<()> {
//! let store = Store::open("vault.db")?;
//! let mut engine = Engine::new(store, "/path/to/game");
//!
//! // Register the free ranges discovered in the target binary.
//! engine.load_baseline("game.exe", &[(0x1000, 0x2000)])?;
//!
//! // Install a mod from its parsed descriptor.
//! let desc = ModDescriptor::from_json(r#"{ "UUID": "...", "Name": "...",
//!     "Version": 1, "LoaderVersion": "1.0.0" }"#)?;
//! engine.install(&desc, InstallOptions::default())?;
//!
//! // And remove it again, byte-exactly.
//! engine.uninstall(&desc.uuid)?;
//! # Ok(())
//! # }
//! ```

pub mod deps;
pub mod descriptor;
pub mod error;
pub mod installer;
pub mod ledger;
pub mod registry;
pub mod revert;
pub mod store;
pub mod target;
pub mod vars;

#[cfg(test)]
mod integration_tests;

pub use descriptor::{ByteSourceKind, ModDescriptor, OffsetExpr, Patch, PatchMode};
pub use error::{Error, MissingDep, Result, Severity};
pub use installer::{engine_version, Engine, InstallOptions, Phase, ENGINE_VERSION};
pub use ledger::{SpaceKind, SpaceRecord};
pub use registry::RegistryEntry;
pub use store::Store;
pub use target::TargetSpec;
pub use vars::VarType;
