//! # grc_migrate core
//!
//! Versioned, guarded schema migrations with forward and backward transforms.
//!
//! A [`Migration`] is one versioned change. Its `up` and `down` run against a
//! [`MigrationContext`], which answers catalog probes and executes
//! [`Statement`]s on the dedicated session of a [`MigrationStore`]. The
//! [`Migrator`] orders units through a [`Registry`], tracks which have been
//! applied and runs pending ones one transaction at a time.

#![deny(missing_docs)]

/// Data backfill helpers
pub mod backfill;
mod error;
/// Catalog existence probes
pub mod guard;
mod ident;
/// Migration units and their context
pub mod migration;
/// The migration runner
pub mod migrator;
mod registry;
/// Structured DDL and DML statements
pub mod statement;
/// Storage backend traits
pub mod store;
mod version;

pub use backfill::{BackfillReport, FulfillmentStatus, TenantSelection};
pub use error::{MigrationError, RollbackWarning};
pub use guard::{GuardPolicy, SchemaGuardQuery};
pub use ident::{Ident, MAX_IDENT_LEN};
pub use migration::{Direction, Migration, MigrationContext, Reversibility, UnitReport, UnitState};
pub use migrator::{
    MigrationReport, MigrationStatus, Migrator, MigratorConfig, OutOfOrderPolicy, Resolution,
    RollbackReport, RollbackStep, StatusEntry,
};
pub use registry::{Registry, RegistryEntry};
pub use store::{
    AppliedMigration, BackendError, DirtyMarker, Executor, LockMode, MigrationStore,
    StoreConnection,
};
pub use version::Version;

pub mod prelude {
    //! The prelude module for the `grc_migrate_core` crate.
    pub use super::statement::{
        ColumnDef, ColumnType, ForeignKeyDef, IndexDef, InsertSelect, OnDelete, Projection,
        Statement, TableDef, Value,
    };
    pub use super::{
        BackfillReport, Direction, FulfillmentStatus, GuardPolicy, Ident, LockMode, Migration,
        MigrationContext, MigrationError, MigrationStore, Migrator, MigratorConfig, Registry,
        Reversibility, SchemaGuardQuery, Version,
    };
}
