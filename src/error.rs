use thiserror::Error;

/// How an error should be handled by the caller.
///
/// - `UserAbort`: a decision, not a failure. Stop, take no further action.
/// - `Critical`: unrecoverable for the current operation (store/filesystem
///   failure, invariant violation). Unwind without partial commits.
/// - `Warning`: recoverable and user-actionable. Only the current
///   install/uninstall is aborted; prior state is left intact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    UserAbort,
    Critical,
    Warning,
}

/// A dependency declared by a mod that is not satisfied by the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissingDep {
    pub uuid: String,
    pub name: String,
    pub author: String,
    pub min_version: i64,
}

#[derive(Error, Debug)]
pub enum Error {
    /// The user declined a conflict prompt. Not a failure.
    #[error("installation cancelled by user decision")]
    Cancelled,

    #[error("store error: {0}")]
    Store(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Two Used ranges owned by different mods would overlap.
    #[error("range [{start:#x},{end:#x}) in file {file_id} overlaps a range owned by mod {owner}")]
    SpaceConflict {
        file_id: i64,
        start: u64,
        end: u64,
        owner: String,
    },

    /// A patch referenced a range UUID that no Ledger row resolves to.
    #[error("unresolved range reference: {0}")]
    UnresolvedRange(String),

    /// No eligible free range satisfied the request.
    #[error("insufficient free space in file {file_id}: need {needed:#x} bytes in [{lo:#x},{hi:#x})")]
    OutOfSpace {
        file_id: i64,
        needed: u64,
        lo: u64,
        hi: u64,
    },

    #[error("patch {index} ({mode}): malformed field {field}: {detail}")]
    MalformedPatch {
        index: usize,
        mode: &'static str,
        field: &'static str,
        detail: String,
    },

    #[error("invalid offset expression: {0}")]
    BadOffsetExpr(String),

    #[error("invalid variable value {value:?} for type {kind}")]
    BadVariableValue { kind: String, value: String },

    #[error("mod requires loader {required}, engine is {engine}")]
    LoaderTooOld { required: String, engine: String },

    #[error("malformed loader version string: {0}")]
    BadLoaderVersion(String),

    #[error("mod {uuid} is already installed at version {version}")]
    AlreadyInstalled { uuid: String, version: i64 },

    #[error("missing dependencies: {0:?}")]
    MissingDependencies(Vec<MissingDep>),

    /// Uninstall refused: other installed mods still depend on this one.
    #[error("mod {uuid} is required by installed mods: {dependents:?}")]
    DependentsExist {
        uuid: String,
        dependents: Vec<String>,
    },

    #[error("mod {0} is not installed")]
    NotInstalled(String),

    #[error("target file {path}: {detail}")]
    TargetFile { path: String, detail: String },

    #[error("hex decode error: {0}")]
    Hex(#[from] hex::FromHexError),

    /// A Ledger row contradicts its own invariants.
    #[error("ledger invariant violated: {0}")]
    Corrupt(String),
}

impl Error {
    /// Classify per the error-handling taxonomy.
    pub fn severity(&self) -> Severity {
        match self {
            Error::Cancelled => Severity::UserAbort,
            Error::Store(_)
            | Error::Io(_)
            | Error::SpaceConflict { .. }
            | Error::UnresolvedRange(_)
            | Error::Corrupt(_) => Severity::Critical,
            Error::Serialization(_)
            | Error::OutOfSpace { .. }
            | Error::MalformedPatch { .. }
            | Error::BadOffsetExpr(_)
            | Error::BadVariableValue { .. }
            | Error::LoaderTooOld { .. }
            | Error::BadLoaderVersion(_)
            | Error::AlreadyInstalled { .. }
            | Error::MissingDependencies(_)
            | Error::DependentsExist { .. }
            | Error::NotInstalled(_)
            | Error::TargetFile { .. }
            | Error::Hex(_) => Severity::Warning,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
