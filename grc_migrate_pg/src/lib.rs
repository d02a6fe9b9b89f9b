//! # grc_migrate postgres store
//!
//! Runs migrations against PostgreSQL through a `sqlx` pool. Each operation
//! detaches one connection from the pool and keeps it for the whole run:
//! the advisory lock, the bookkeeping reads and the unit transactions all
//! live on that session. Dropping the session closes the socket, which makes
//! the server roll back whatever was open and release the lock.

#![deny(missing_docs)]

mod error;
mod render;
mod store;

pub use error::PgStoreError;
pub use store::{PgStore, PgStoreConnection};

/// A migrator running against a [`PgStore`].
pub type PgMigrator = grc_migrate_core::Migrator<PgStore>;
