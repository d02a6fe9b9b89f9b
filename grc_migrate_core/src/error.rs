//! Errors raised while planning or running migrations.

use crate::migration::Direction;
use crate::store::BackendError;
use crate::version::Version;

/// Errors that can occur during migration operations.
#[derive(Debug, thiserror::Error)]
pub enum MigrationError {
    /// A catalog probe failed. The unit is aborted; no partial state is assumed.
    #[error("Migration {version}: probe for {query} failed: {source}")]
    GuardQuery {
        /// The unit being run.
        version: Version,
        /// The probe, as text.
        query: String,
        /// The backend error.
        #[source]
        source: BackendError,
    },

    /// A statement failed. The unit's transaction is rolled back when it has one.
    #[error("Migration {version}: statement failed: {source}\n    {statement}")]
    StatementExecution {
        /// The unit being run.
        version: Version,
        /// The failing statement text.
        statement: String,
        /// The backend error.
        #[source]
        source: BackendError,
    },

    /// A unit would run before (or be rolled back while) a unit it depends on is
    /// absent. Detected before any statement executes.
    #[error("Migration {version} requires migration {prerequisite} to be applied")]
    OrderingViolation {
        /// The dependent unit.
        version: Version,
        /// The missing prerequisite.
        prerequisite: Version,
    },

    /// An applied unit's checksum doesn't match the code.
    #[error("Migration {version} ({name}) checksum mismatch: expected {expected}, found {found}")]
    ChecksumMismatch {
        /// The version of the migration with mismatched checksum.
        version: Version,
        /// The recorded name.
        name: String,
        /// The checksum that was expected (from the database).
        expected: String,
        /// The checksum that was found (from the code).
        found: String,
    },

    /// A pending unit is older than the latest applied one and strict ordering is on.
    #[error("Migration {version} is older than the latest applied migration {latest}")]
    OutOfOrder {
        /// The pending unit.
        version: Version,
        /// The latest applied unit.
        latest: Version,
    },

    /// A non-transactional unit stopped part way. Resolve it before continuing.
    #[error(
        "Migration {version} was interrupted while running {direction}; \
         fix the schema by hand and resolve it before continuing"
    )]
    DirtyState {
        /// The interrupted unit.
        version: Version,
        /// What it was doing.
        direction: Direction,
    },

    /// Rollback refused.
    #[error("Migration {version} cannot be rolled back: {reason}")]
    Irreversible {
        /// The unit.
        version: Version,
        /// Why.
        reason: &'static str,
    },

    /// The applied units changed between planning a rollback and running it.
    /// Nothing was rolled back.
    #[error(
        "Rollback plan is out of date: planned [{}], now [{}]",
        join(.planned),
        join(.found)
    )]
    PlanChanged {
        /// The versions in the accepted plan, newest first.
        planned: Vec<Version>,
        /// The versions the rollback would undo now.
        found: Vec<Version>,
    },

    /// The version is not in the registry.
    #[error("Unknown migration version {0}")]
    UnknownVersion(Version),

    /// There is no dirty marker for the version.
    #[error("Migration {0} has nothing to resolve")]
    NothingToResolve(Version),

    /// Another runner holds the lock.
    #[error("Another migration runner holds the lock `{0}`")]
    LockUnavailable(String),

    /// The unit set cannot form a registry.
    #[error("Invalid migration registry: {0}")]
    InvalidRegistry(String),

    /// An identifier failed the allow-list.
    #[error("Invalid SQL identifier `{0}`")]
    InvalidIdentifier(String),

    /// A version is not a digit string.
    #[error("Invalid migration version `{0}`")]
    InvalidVersion(String),

    /// Bookkeeping, transaction or connection failure.
    #[error("Database error: {0}")]
    Backend(#[from] BackendError),

    /// A unit failed; earlier units stay applied.
    #[error(
        "Migration {version} failed (last successfully applied: {}): {source}",
        .last_applied.as_ref().map(Version::as_str).unwrap_or("none")
    )]
    UnitFailed {
        /// The failing unit.
        version: Version,
        /// The highest version applied when the runner stopped.
        last_applied: Option<Version>,
        /// What went wrong.
        #[source]
        source: Box<MigrationError>,
    },
}

/// A lossy rollback that went ahead. Not an error; carried in reports.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct RollbackWarning {
    /// The unit rolled back.
    pub version: Version,
    /// What was lost.
    pub reason: &'static str,
}

impl std::fmt::Display for RollbackWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Migration {} rolled back with data loss: {}", self.version, self.reason)
    }
}

fn join(versions: &[Version]) -> String {
    versions
        .iter()
        .map(Version::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

impl MigrationError {
    /// The inner error of [`MigrationError::UnitFailed`], or `self`.
    pub fn root(&self) -> &MigrationError {
        match self {
            MigrationError::UnitFailed { source, .. } => source.root(),
            other => other,
        }
    }
}
