//! Migration 20251118234732: per-user dashboard layouts.
//!
//! Also links `corporate_governance.created_by_id` to `users`, which
//! 20251118000000 left unconstrained.

use async_trait::async_trait;
use grc_migrate_core::prelude::*;

use super::schema::{create_indexes, integer, opt_timestamp};

/// Creates `dashboard_layouts`.
pub struct DashboardLayouts;

#[async_trait]
impl Migration for DashboardLayouts {
    fn version(&self) -> &'static str {
        "20251118234732"
    }

    fn name(&self) -> &'static str {
        "dashboard_layouts"
    }

    fn description(&self) -> &'static str {
        "Create dashboard_layouts table for per-user widget layouts"
    }

    fn requires(&self) -> &'static [&'static str] {
        &["20251101000000"]
    }

    async fn up(&self, ctx: &mut MigrationContext<'_>) -> Result<(), MigrationError> {
        ctx.create_table_if_missing(
            TableDef::new("dashboard_layouts")
                .with_id()
                .column(integer("user_id"))
                .column(integer("tenant_id"))
                .column(ColumnDef::new("layout_config", ColumnType::Json))
                .column(ColumnDef::new("created_at", ColumnType::Timestamp))
                .column(opt_timestamp("updated_at")),
        )
        .await?;
        create_indexes(
            ctx,
            "dashboard_layouts",
            &[
                ("idx_dashboard_user", "user_id"),
                ("idx_dashboard_tenant", "tenant_id"),
            ],
        )
        .await?;
        ctx.add_foreign_key_if_missing(
            ForeignKeyDef::new("fk_dashboard_layouts_user", "dashboard_layouts", "user_id", "users")
                .on_delete(OnDelete::Cascade),
        )
        .await?;
        ctx.add_foreign_key_if_missing(
            ForeignKeyDef::new(
                "fk_dashboard_layouts_tenant",
                "dashboard_layouts",
                "tenant_id",
                "tenant",
            )
            .on_delete(OnDelete::Cascade),
        )
        .await?;

        if ctx.table_exists("corporate_governance").await? {
            ctx.add_foreign_key_if_missing(
                ForeignKeyDef::new(
                    "fk_corporate_governance_created_by",
                    "corporate_governance",
                    "created_by_id",
                    "users",
                )
                .on_delete(OnDelete::SetNull),
            )
            .await?;
        }
        Ok(())
    }

    async fn down(&self, ctx: &mut MigrationContext<'_>) -> Result<(), MigrationError> {
        if ctx.table_exists("corporate_governance").await? {
            ctx.drop_foreign_key_if_exists(
                "corporate_governance",
                "fk_corporate_governance_created_by",
            )
            .await?;
        }
        ctx.drop_table_if_exists("dashboard_layouts").await?;
        Ok(())
    }
}
