//! Migration 20251119010000: tenant-scoped compliance fulfillment.
//!
//! Requirements are global definitions, but their fulfillment fields were
//! shared by every tenant. Fulfillment moves into its own table keyed on
//! `(tenant_id, requirement_id)`. Existing global values are copied to the
//! primary tenant (lowest id); other tenants start empty. The deprecated
//! columns on `compliance_requirement` are left in place.

use async_trait::async_trait;
use grc_migrate_core::prelude::*;

use super::schema::{
    boolean, create_indexes, integer, opt_date, opt_integer, opt_text, timestamps, varchar,
};

const TABLE: &str = "compliance_requirement_fulfillment";

/// Creates `compliance_requirement_fulfillment` and migrates global values.
pub struct ComplianceRequirementFulfillment;

fn fulfillment_table() -> TableDef {
    timestamps(
        TableDef::new(TABLE)
            .with_id()
            .column(integer("tenant_id"))
            .column(integer("requirement_id"))
            .column(boolean("applicable", true))
            .column(opt_text("applicability_justification"))
            .column(integer("fulfillment_percentage").default(0_i64))
            .column(opt_text("fulfillment_notes"))
            .column(opt_text("evidence_description"))
            .column(opt_date("last_review_date"))
            .column(opt_date("next_review_date"))
            .column(opt_integer("responsible_person_id"))
            .column(opt_integer("last_updated_by_id"))
            .column(varchar("status", 50).default(FulfillmentStatus::NotStarted.as_str()))
            .unique("unique_tenant_requirement", ["tenant_id", "requirement_id"]),
    )
}

fn global_fulfillment() -> InsertSelect {
    InsertSelect::new(TABLE, "compliance_requirement")
        .copy("requirement_id", "id")
        .copy("applicable", "applicable")
        .copy("applicability_justification", "applicability_justification")
        .copy("fulfillment_percentage", "fulfillment_percentage")
        .copy("fulfillment_notes", "fulfillment_notes")
        .copy("evidence_description", "evidence_description")
        .copy("last_review_date", "last_assessment_date")
        .project(
            "status",
            Projection::PercentageStatus("fulfillment_percentage".into()),
        )
        .project("created_at", Projection::Now)
}

#[async_trait]
impl Migration for ComplianceRequirementFulfillment {
    fn version(&self) -> &'static str {
        "20251119010000"
    }

    fn name(&self) -> &'static str {
        "compliance_requirement_fulfillment"
    }

    fn description(&self) -> &'static str {
        "Create tenant-specific compliance requirement fulfillment and migrate global data"
    }

    fn reversibility(&self) -> Reversibility {
        Reversibility::LossyReversible("tenant-specific fulfillment data is deleted")
    }

    fn requires(&self) -> &'static [&'static str] {
        &["20251101000000", "20251110000000"]
    }

    async fn up(&self, ctx: &mut MigrationContext<'_>) -> Result<(), MigrationError> {
        ctx.create_table_if_missing(fulfillment_table()).await?;
        create_indexes(
            ctx,
            TABLE,
            &[
                ("idx_fulfillment_tenant", "tenant_id"),
                ("idx_fulfillment_requirement", "requirement_id"),
                ("idx_fulfillment_percentage", "fulfillment_percentage"),
                ("idx_fulfillment_responsible", "responsible_person_id"),
                ("idx_fulfillment_last_updated_by", "last_updated_by_id"),
            ],
        )
        .await?;

        let keys = [
            ForeignKeyDef::new("fk_fulfillment_tenant", TABLE, "tenant_id", "tenant")
                .on_delete(OnDelete::Cascade),
            ForeignKeyDef::new(
                "fk_fulfillment_requirement",
                TABLE,
                "requirement_id",
                "compliance_requirement",
            )
            .on_delete(OnDelete::Cascade),
            ForeignKeyDef::new(
                "fk_fulfillment_responsible",
                TABLE,
                "responsible_person_id",
                "users",
            )
            .on_delete(OnDelete::SetNull),
            ForeignKeyDef::new(
                "fk_fulfillment_last_updated_by",
                TABLE,
                "last_updated_by_id",
                "users",
            )
            .on_delete(OnDelete::SetNull),
        ];
        for key in keys {
            ctx.add_foreign_key_if_missing(key).await?;
        }

        let existing = ctx.count_rows(TABLE).await?;
        if existing > 0 {
            log::warn!(
                "Migration {}: {TABLE} already holds {existing} rows; not copying global fulfillment data",
                ctx.version()
            );
            return Ok(());
        }
        ctx.backfill_to_primary_tenant("tenant", "tenant_id", global_fulfillment())
            .await?;
        Ok(())
    }

    async fn down(&self, ctx: &mut MigrationContext<'_>) -> Result<(), MigrationError> {
        if ctx.drop_table_if_exists(TABLE).await? {
            log::warn!(
                "Migration {}: dropped {TABLE}; global values remain on compliance_requirement",
                ctx.version()
            );
        }
        Ok(())
    }
}
