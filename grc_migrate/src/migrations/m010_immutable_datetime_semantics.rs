//! Migration 20251118235900: immutable timestamp semantics.
//!
//! Timestamp columns became immutable values in the application. The
//! `TIMESTAMPTZ` columns already carry that meaning, so the unit changes
//! nothing in the schema. It stays in the history to keep version numbering
//! aligned across deployments.

use async_trait::async_trait;
use grc_migrate_core::prelude::*;

/// Records the switch to immutable timestamps.
pub struct ImmutableDatetimeSemantics;

#[async_trait]
impl Migration for ImmutableDatetimeSemantics {
    fn version(&self) -> &'static str {
        "20251118235900"
    }

    fn name(&self) -> &'static str {
        "immutable_datetime_semantics"
    }

    fn description(&self) -> &'static str {
        "Switch timestamp columns to immutable semantics (no schema change)"
    }

    fn transactional(&self) -> bool {
        false
    }

    async fn up(&self, ctx: &mut MigrationContext<'_>) -> Result<(), MigrationError> {
        log::debug!("Migration {}: no schema change", ctx.version());
        Ok(())
    }

    async fn down(&self, ctx: &mut MigrationContext<'_>) -> Result<(), MigrationError> {
        log::debug!("Migration {}: no schema change", ctx.version());
        Ok(())
    }
}
