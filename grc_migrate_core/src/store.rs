//! Storage backends the migrator runs against.
//!
//! A [`MigrationStore`] hands out one dedicated [`StoreConnection`] per
//! operation. The connection carries the lock, the bookkeeping tables and the
//! transaction state for the whole run, so nothing observed through it is
//! shared with other sessions until it commits.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::guard::SchemaGuardQuery;
use crate::ident::Ident;
use crate::migration::Direction;
use crate::migrator::MigratorConfig;
use crate::statement::Statement;
use crate::version::Version;

/// Errors raised by a backend.
pub type BackendError = Box<dyn std::error::Error + Send + Sync>;

/// Record of a migration that has been applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AppliedMigration {
    /// The version of the migration.
    pub version: Version,
    /// The name of the migration at the time it was applied.
    pub description: String,
    /// When the migration was applied.
    pub applied_at: DateTime<Utc>,
    /// The checksum recorded when the migration was applied.
    pub checksum: String,
}

/// Left behind while a non-transactional unit runs.
///
/// A marker that survives the run means the unit failed or was interrupted
/// part way and the schema needs a manual look.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DirtyMarker {
    /// The unit that was running.
    pub version: Version,
    /// Whether it was being applied or rolled back.
    pub direction: Direction,
    /// When it started.
    pub started_at: DateTime<Utc>,
}

/// How to behave when another runner holds the lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LockMode {
    /// Block until the lock is released.
    #[default]
    Wait,
    /// Fail immediately with [`MigrationError::LockUnavailable`](crate::MigrationError::LockUnavailable).
    NoWait,
}

/// Statement execution and catalog access, as seen by migration units.
#[async_trait]
pub trait Executor: Send {
    /// Answers a catalog probe.
    async fn probe(&mut self, query: &SchemaGuardQuery) -> Result<bool, BackendError>;

    /// Executes a statement and returns the number of rows affected.
    async fn execute(&mut self, statement: &Statement) -> Result<u64, BackendError>;

    /// Returns every value of an integer column, ascending.
    async fn fetch_ids(&mut self, table: &Ident, column: &Ident) -> Result<Vec<i64>, BackendError>;

    /// Counts the rows of a table.
    async fn count_rows(&mut self, table: &Ident) -> Result<u64, BackendError>;
}

/// A dedicated session used by the migrator for one operation.
#[async_trait]
pub trait StoreConnection: Executor {
    /// Acquires the runner lock. Returns `false` when `mode` is
    /// [`LockMode::NoWait`] and another session holds it.
    async fn lock(&mut self, name: &str, mode: LockMode) -> Result<bool, BackendError>;

    /// Releases the runner lock.
    async fn unlock(&mut self, name: &str) -> Result<(), BackendError>;

    /// Creates the bookkeeping tables when they are missing.
    async fn ensure_bookkeeping(&mut self) -> Result<(), BackendError>;

    /// All applied records, in any order.
    async fn applied(&mut self) -> Result<Vec<AppliedMigration>, BackendError>;

    /// All dirty markers, in any order.
    async fn dirty(&mut self) -> Result<Vec<DirtyMarker>, BackendError>;

    /// Opens a transaction.
    async fn begin(&mut self) -> Result<(), BackendError>;

    /// Commits the open transaction.
    async fn commit(&mut self) -> Result<(), BackendError>;

    /// Rolls back the open transaction.
    async fn rollback(&mut self) -> Result<(), BackendError>;

    /// Inserts an applied record.
    async fn record_applied(&mut self, record: &AppliedMigration) -> Result<(), BackendError>;

    /// Deletes an applied record.
    async fn remove_applied(&mut self, version: &Version) -> Result<(), BackendError>;

    /// Inserts a dirty marker.
    async fn mark_dirty(&mut self, marker: &DirtyMarker) -> Result<(), BackendError>;

    /// Deletes a dirty marker.
    async fn clear_dirty(&mut self, version: &Version) -> Result<(), BackendError>;

    /// Ends the session.
    async fn close(self) -> Result<(), BackendError>
    where
        Self: Sized;
}

/// A database the migrator can open sessions against.
#[async_trait]
pub trait MigrationStore: Send + Sync {
    /// The session type.
    type Connection: StoreConnection;

    /// Opens a dedicated session configured from `config`.
    async fn connect(&self, config: &MigratorConfig) -> Result<Self::Connection, BackendError>;
}
