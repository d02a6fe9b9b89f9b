//! # grc_migrate memory store
//!
//! An in-memory implementation of [`MigrationStore`](grc_migrate_core::MigrationStore),
//! primarily for testing and dry runs.
//!
//! The store models the parts of a relational catalog that migrations touch:
//! tables with typed columns and defaults, a global index namespace, primary
//! key, unique and foreign key constraints, and the rows needed by backfills.
//! Statements fail where PostgreSQL would fail, so a unit that runs cleanly
//! here has had its guards exercised.
//!
//! ```ignore
//! use grc_migrate_core::{Migrator, Registry};
//! use grc_migrate_mem::InMemoryStore;
//!
//! let store = InMemoryStore::new();
//! let migrator = Migrator::new(store.clone(), Registry::new(units)?);
//! migrator.migrate(None).await?;
//!
//! assert!(store.catalog().tables.contains_key("tenant"));
//! ```

#![deny(missing_docs)]

mod database;
mod error;
mod store;

pub use database::{CatalogSnapshot, Constraint, IndexEntry, Row, TableSnapshot};
pub use error::MemError;
pub use store::{InMemoryConnection, InMemoryStore};

/// A migrator running against an [`InMemoryStore`].
pub type InMemoryMigrator = grc_migrate_core::Migrator<InMemoryStore>;
