//! Migration 20251118000000: re-create `corporate_governance`.
//!
//! Databases that ran an early build of 20251117000000 ended up with a
//! table missing its scope key. The table holds nothing that is not derived
//! from `tenant`, so this fixup drops it, creates it again and re-seeds it.

use async_trait::async_trait;
use grc_migrate_core::prelude::*;

use super::m007_create_corporate_governance::{backfill_governance, create_governance};

/// Drops and re-creates `corporate_governance`.
pub struct RecreateCorporateGovernance;

#[async_trait]
impl Migration for RecreateCorporateGovernance {
    fn version(&self) -> &'static str {
        "20251118000000"
    }

    fn name(&self) -> &'static str {
        "recreate_corporate_governance"
    }

    fn description(&self) -> &'static str {
        "Recreate corporate governance table with scope key"
    }

    fn requires(&self) -> &'static [&'static str] {
        &["20251117000000"]
    }

    async fn up(&self, ctx: &mut MigrationContext<'_>) -> Result<(), MigrationError> {
        ctx.drop_table_if_exists("corporate_governance").await?;
        create_governance(ctx).await?;
        backfill_governance(ctx).await?;
        Ok(())
    }

    /// The re-created table is what 20251117000000 creates, so there is
    /// nothing to undo.
    async fn down(&self, _ctx: &mut MigrationContext<'_>) -> Result<(), MigrationError> {
        Ok(())
    }
}
