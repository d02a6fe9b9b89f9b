//! # grc_migrate
//!
//! The schema history of the ISMS database and the `grc-migrate` runner.
//!
//! [`migrations::registry`] returns every unit of the history; hand it to a
//! [`Migrator`](grc_migrate_core::Migrator) over PostgreSQL for real
//! databases or over the in-memory store for dry runs and tests.

#![deny(missing_docs)]

pub mod cli;
pub mod migrations;

/// The in-memory store.
pub mod mem {
    //! Re-exports of `grc_migrate_mem`.
    pub use grc_migrate_mem::*;
}

/// The PostgreSQL store.
pub mod pg {
    //! Re-exports of `grc_migrate_pg`.
    pub use grc_migrate_pg::*;
}

pub mod prelude {
    //! The prelude module for the `grc_migrate` crate.
    pub use grc_migrate_core::prelude::*;

    pub use super::mem::{InMemoryMigrator, InMemoryStore};
    pub use super::migrations;
    pub use super::pg::{PgMigrator, PgStore};
}
