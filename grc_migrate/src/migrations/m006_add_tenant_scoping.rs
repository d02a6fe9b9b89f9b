//! Migration 20251113000001: tenant scoping for the remaining registers.
//!
//! Only tables on the allow-list are touched, and only those present in the
//! database: several belong to optional modules.

use async_trait::async_trait;
use grc_migrate_core::prelude::*;

use super::schema::{add_tenant_scope, drop_tenant_scope};

/// Tables that gain `tenant_id`, `fk_<table>_tenant` and `idx_<table>_tenant`.
pub const TENANT_SCOPED_TABLES: &[&str] = &[
    "business_process",
    "isms_context",
    "isms_objective",
    "internal_audit",
    "management_review",
    "training",
    "vulnerabilities",
    "patches",
    "crisis_teams",
    "audit_checklist",
    "workflows",
    "workflow_instances",
    "workflow_steps",
];

/// Adds `tenant_id` to every allow-listed table that exists.
pub struct AddTenantScoping;

#[async_trait]
impl Migration for AddTenantScoping {
    fn version(&self) -> &'static str {
        "20251113000001"
    }

    fn name(&self) -> &'static str {
        "add_tenant_scoping"
    }

    fn description(&self) -> &'static str {
        "Add tenant_id foreign keys to entities for complete multi-tenancy support (only if tables exist)"
    }

    fn reversibility(&self) -> Reversibility {
        Reversibility::LossyReversible("tenant assignments of scoped records are lost")
    }

    fn requires(&self) -> &'static [&'static str] {
        &["20251101000000"]
    }

    async fn up(&self, ctx: &mut MigrationContext<'_>) -> Result<(), MigrationError> {
        for &table in TENANT_SCOPED_TABLES {
            add_tenant_scope(ctx, Ident::from(table)).await?;
        }
        Ok(())
    }

    async fn down(&self, ctx: &mut MigrationContext<'_>) -> Result<(), MigrationError> {
        for &table in TENANT_SCOPED_TABLES {
            drop_tenant_scope(ctx, Ident::from(table)).await?;
        }
        Ok(())
    }
}
