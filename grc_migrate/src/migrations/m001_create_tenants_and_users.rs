//! Migration 20251101000000: tenants and users.
//!
//! A tenant is one organisation. Subsidiaries point at their corporate
//! parent through `parent_id`; `governance_model` records how the parent's
//! ISMS applies to them.

use async_trait::async_trait;
use grc_migrate_core::prelude::*;

use super::schema::{
    boolean, drop_tables, opt_integer, opt_json, opt_text, opt_timestamp, opt_varchar, timestamps,
    varchar,
};

/// Creates the `tenant` and `users` tables.
pub struct CreateTenantsAndUsers;

#[async_trait]
impl Migration for CreateTenantsAndUsers {
    fn version(&self) -> &'static str {
        "20251101000000"
    }

    fn name(&self) -> &'static str {
        "create_tenants_and_users"
    }

    fn description(&self) -> &'static str {
        "Create tenant and users tables for multi-tenancy"
    }

    async fn up(&self, ctx: &mut MigrationContext<'_>) -> Result<(), MigrationError> {
        ctx.create_table_if_missing(timestamps(
            TableDef::new("tenant")
                .with_id()
                .column(varchar("code", 50))
                .column(varchar("name", 255))
                .column(opt_text("description"))
                .column(opt_varchar("logo_path", 255))
                .column(boolean("is_active", true))
                .column(opt_json("settings"))
                .column(opt_varchar("governance_model", 50))
                .column(opt_integer("parent_id"))
                .column(boolean("is_corporate_parent", false))
                .unique("uniq_tenant_code", ["code"]),
        ))
        .await?;
        ctx.create_index_if_missing(IndexDef::new("idx_tenant_parent", "tenant", ["parent_id"]))
            .await?;
        ctx.add_foreign_key_if_missing(
            ForeignKeyDef::new("fk_tenant_parent", "tenant", "parent_id", "tenant")
                .on_delete(OnDelete::SetNull),
        )
        .await?;

        ctx.create_table_if_missing(timestamps(
            TableDef::new("users")
                .with_id()
                .column(opt_integer("tenant_id"))
                .column(varchar("email", 180))
                .column(varchar("first_name", 100))
                .column(varchar("last_name", 100))
                .column(ColumnDef::new("roles", ColumnType::Json).default("[]"))
                .column(opt_varchar("password", 255))
                .column(opt_varchar("auth_provider", 50))
                .column(boolean("is_active", true))
                .column(opt_timestamp("last_login_at"))
                .unique("uniq_users_email", ["email"]),
        ))
        .await?;
        ctx.create_index_if_missing(IndexDef::new("idx_users_tenant", "users", ["tenant_id"]))
            .await?;
        ctx.add_foreign_key_if_missing(
            ForeignKeyDef::new("fk_users_tenant", "users", "tenant_id", "tenant")
                .on_delete(OnDelete::SetNull),
        )
        .await?;
        Ok(())
    }

    async fn down(&self, ctx: &mut MigrationContext<'_>) -> Result<(), MigrationError> {
        drop_tables(ctx, &["users", "tenant"]).await
    }
}
