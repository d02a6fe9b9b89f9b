//! Migration 20251117000000: corporate governance per scope.
//!
//! Each subsidiary tenant records, per scope, whether it inherits, shares or
//! runs its own ISMS relative to its parent. The tenant-level
//! `governance_model` seeds the `default` scope.

use async_trait::async_trait;
use grc_migrate_core::prelude::*;

use super::schema::{
    create_indexes, integer, opt_integer, opt_text, opt_varchar, timestamps, varchar,
};

/// Creates `corporate_governance` and seeds it from tenants with a parent.
pub struct CreateCorporateGovernance;

pub(super) fn governance_table() -> TableDef {
    timestamps(
        TableDef::new("corporate_governance")
            .with_id()
            .column(integer("tenant_id"))
            .column(integer("parent_id"))
            .column(varchar("scope", 50).default("default"))
            .column(opt_varchar("scope_id", 100))
            .column(varchar("governance_model", 50))
            .column(opt_integer("created_by_id"))
            .column(opt_text("notes"))
            .unique("uniq_corporate_governance_scope", ["tenant_id", "scope"]),
    )
}

pub(super) async fn create_governance(
    ctx: &mut MigrationContext<'_>,
) -> Result<(), MigrationError> {
    ctx.create_table_if_missing(governance_table()).await?;
    create_indexes(
        ctx,
        "corporate_governance",
        &[
            ("idx_corporate_governance_tenant", "tenant_id"),
            ("idx_corporate_governance_parent", "parent_id"),
            ("idx_corporate_governance_created_by", "created_by_id"),
        ],
    )
    .await?;
    ctx.add_foreign_key_if_missing(
        ForeignKeyDef::new(
            "fk_corporate_governance_tenant",
            "corporate_governance",
            "tenant_id",
            "tenant",
        )
        .on_delete(OnDelete::Cascade),
    )
    .await?;
    ctx.add_foreign_key_if_missing(
        ForeignKeyDef::new(
            "fk_corporate_governance_parent",
            "corporate_governance",
            "parent_id",
            "tenant",
        )
        .on_delete(OnDelete::Cascade),
    )
    .await?;
    Ok(())
}

/// Seeds the `default` scope of every subsidiary from its tenant row.
pub(super) async fn backfill_governance(
    ctx: &mut MigrationContext<'_>,
) -> Result<BackfillReport, MigrationError> {
    ctx.backfill(
        InsertSelect::new("corporate_governance", "tenant")
            .copy("tenant_id", "id")
            .copy("parent_id", "parent_id")
            .project("scope", Projection::Constant("default".into()))
            .copy("governance_model", "governance_model")
            .project("created_at", Projection::Now)
            .where_not_null("parent_id")
            .where_not_null("governance_model"),
    )
    .await
}

#[async_trait]
impl Migration for CreateCorporateGovernance {
    fn version(&self) -> &'static str {
        "20251117000000"
    }

    fn name(&self) -> &'static str {
        "create_corporate_governance"
    }

    fn description(&self) -> &'static str {
        "Create granular corporate governance table and migrate tenant governance models"
    }

    fn requires(&self) -> &'static [&'static str] {
        &["20251101000000"]
    }

    async fn up(&self, ctx: &mut MigrationContext<'_>) -> Result<(), MigrationError> {
        let created = !ctx.table_exists("corporate_governance").await?;
        create_governance(ctx).await?;
        if created {
            backfill_governance(ctx).await?;
        } else {
            log::info!("corporate_governance already exists, leaving its rows alone");
        }
        Ok(())
    }

    async fn down(&self, ctx: &mut MigrationContext<'_>) -> Result<(), MigrationError> {
        ctx.drop_table_if_exists("corporate_governance").await?;
        Ok(())
    }
}
