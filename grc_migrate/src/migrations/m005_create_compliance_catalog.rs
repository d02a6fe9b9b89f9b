//! Migration 20251110000000: compliance frameworks and requirements.
//!
//! Requirements still carry their fulfillment fields globally here;
//! 20251119010000 moves them per tenant.

use async_trait::async_trait;
use grc_migrate_core::prelude::*;

use super::schema::{
    boolean, create_indexes, drop_tables, integer, opt_date, opt_json, opt_text, opt_varchar,
    timestamps, varchar,
};

/// Creates `compliance_framework` and `compliance_requirement`.
pub struct CreateComplianceCatalog;

#[async_trait]
impl Migration for CreateComplianceCatalog {
    fn version(&self) -> &'static str {
        "20251110000000"
    }

    fn name(&self) -> &'static str {
        "create_compliance_catalog"
    }

    fn description(&self) -> &'static str {
        "Create compliance framework and requirement catalog (ISO 27001, GDPR, NIS2)"
    }

    async fn up(&self, ctx: &mut MigrationContext<'_>) -> Result<(), MigrationError> {
        ctx.create_table_if_missing(timestamps(
            TableDef::new("compliance_framework")
                .with_id()
                .column(varchar("code", 50))
                .column(varchar("name", 255))
                .column(varchar("version", 50))
                .column(opt_text("description"))
                .column(opt_varchar("applicable_industry", 100))
                .column(opt_varchar("regulatory_body", 255))
                .column(boolean("mandatory", false))
                .column(opt_json("required_modules"))
                .column(boolean("active", true))
                .unique("uniq_compliance_framework_code", ["code"]),
        ))
        .await?;

        ctx.create_table_if_missing(timestamps(
            TableDef::new("compliance_requirement")
                .with_id()
                .column(integer("framework_id"))
                .column(varchar("requirement_id", 50))
                .column(varchar("title", 255))
                .column(opt_text("description"))
                .column(opt_varchar("category", 100))
                .column(varchar("priority", 20))
                .column(boolean("applicable", true))
                .column(opt_text("applicability_justification"))
                .column(integer("fulfillment_percentage").default(0_i64))
                .column(opt_text("fulfillment_notes"))
                .column(opt_text("evidence_description"))
                .column(opt_date("last_assessment_date")),
        ))
        .await?;
        create_indexes(
            ctx,
            "compliance_requirement",
            &[
                ("idx_compliance_requirement_framework", "framework_id"),
                ("idx_compliance_requirement_priority", "priority"),
            ],
        )
        .await?;
        ctx.add_foreign_key_if_missing(
            ForeignKeyDef::new(
                "fk_compliance_requirement_framework",
                "compliance_requirement",
                "framework_id",
                "compliance_framework",
            )
            .on_delete(OnDelete::Cascade),
        )
        .await?;
        Ok(())
    }

    async fn down(&self, ctx: &mut MigrationContext<'_>) -> Result<(), MigrationError> {
        drop_tables(ctx, &["compliance_requirement", "compliance_framework"]).await
    }
}
