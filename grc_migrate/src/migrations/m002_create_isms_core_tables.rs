//! Migration 20251105000000: the ISO 27001 core registers.
//!
//! Assets, risks, the Annex A controls, incidents, audits, management
//! reviews, trainings and the ISMS context and objectives. The four
//! registers every tenant owns from day one carry `tenant_id` here; the rest
//! are scoped by 20251113000001.

use async_trait::async_trait;
use grc_migrate_core::prelude::*;

use super::schema::{
    boolean, create_join_table, date, drop_tables, integer, opt_date, opt_integer, opt_text,
    opt_timestamp, opt_varchar, text, timestamps, varchar,
};

/// Dropped in this order on the way down.
const TABLES: &[&str] = &[
    "incident_control",
    "control_risk",
    "isms_objective",
    "isms_context",
    "training",
    "management_review",
    "internal_audit",
    "incident",
    "control",
    "risk",
    "asset",
];

/// Creates all ISMS core tables.
pub struct CreateIsmsCoreTables;

#[async_trait]
impl Migration for CreateIsmsCoreTables {
    fn version(&self) -> &'static str {
        "20251105000000"
    }

    fn name(&self) -> &'static str {
        "create_isms_core_tables"
    }

    fn description(&self) -> &'static str {
        "Create all ISMS core tables for ISO 27001 management"
    }

    fn requires(&self) -> &'static [&'static str] {
        &["20251101000000"]
    }

    async fn up(&self, ctx: &mut MigrationContext<'_>) -> Result<(), MigrationError> {
        ctx.create_table_if_missing(timestamps(
            TableDef::new("asset")
                .with_id()
                .column(opt_integer("tenant_id"))
                .column(varchar("name", 255))
                .column(opt_text("description"))
                .column(varchar("asset_type", 100))
                .column(varchar("owner", 100))
                .column(opt_varchar("location", 100))
                .column(integer("confidentiality_value"))
                .column(integer("integrity_value"))
                .column(integer("availability_value"))
                .column(varchar("status", 50)),
        ))
        .await?;

        ctx.create_table_if_missing(timestamps(
            TableDef::new("risk")
                .with_id()
                .column(opt_integer("tenant_id"))
                .column(opt_integer("asset_id"))
                .column(varchar("title", 255))
                .column(text("description"))
                .column(opt_text("threat"))
                .column(opt_text("vulnerability"))
                .column(integer("probability"))
                .column(integer("impact"))
                .column(integer("residual_probability"))
                .column(integer("residual_impact"))
                .column(varchar("treatment_strategy", 50))
                .column(opt_text("treatment_description"))
                .column(opt_varchar("risk_owner", 100))
                .column(varchar("status", 50))
                .column(opt_date("review_date")),
        ))
        .await?;
        ctx.create_index_if_missing(IndexDef::new("idx_risk_asset", "risk", ["asset_id"]))
            .await?;
        ctx.add_foreign_key_if_missing(ForeignKeyDef::new(
            "fk_risk_asset",
            "risk",
            "asset_id",
            "asset",
        ))
        .await?;

        ctx.create_table_if_missing(timestamps(
            TableDef::new("control")
                .with_id()
                .column(opt_integer("tenant_id"))
                .column(varchar("control_id", 20))
                .column(varchar("name", 255))
                .column(text("description"))
                .column(varchar("category", 100))
                .column(boolean("applicable", true))
                .column(opt_text("justification"))
                .column(opt_text("implementation_notes"))
                .column(varchar("implementation_status", 50))
                .column(opt_integer("implementation_percentage"))
                .column(opt_varchar("responsible_person", 100))
                .column(opt_date("target_date"))
                .column(opt_date("last_review_date"))
                .column(opt_date("next_review_date")),
        ))
        .await?;

        ctx.create_table_if_missing(timestamps(
            TableDef::new("incident")
                .with_id()
                .column(opt_integer("tenant_id"))
                .column(varchar("incident_number", 50))
                .column(varchar("title", 255))
                .column(text("description"))
                .column(varchar("category", 100))
                .column(varchar("severity", 50))
                .column(varchar("status", 50))
                .column(ColumnDef::new("detected_at", ColumnType::Timestamp))
                .column(opt_timestamp("occurred_at"))
                .column(varchar("reported_by", 100))
                .column(opt_varchar("assigned_to", 100))
                .column(opt_text("immediate_actions"))
                .column(opt_text("root_cause"))
                .column(opt_text("corrective_actions"))
                .column(opt_text("preventive_actions"))
                .column(opt_text("lessons_learned"))
                .column(opt_timestamp("resolved_at"))
                .column(opt_timestamp("closed_at"))
                .column(boolean("data_breach_occurred", false))
                .column(boolean("notification_required", false)),
        ))
        .await?;

        for table in ["asset", "risk", "control", "incident"] {
            let table = Ident::from(table);
            ctx.create_index_if_missing(IndexDef::new(
                table.decorate("idx_", "_tenant")?,
                table.clone(),
                ["tenant_id"],
            ))
            .await?;
            ctx.add_foreign_key_if_missing(ForeignKeyDef::new(
                table.decorate("fk_", "_tenant")?,
                table,
                "tenant_id",
                "tenant",
            ))
            .await?;
        }

        create_join_table(
            ctx,
            "control_risk",
            ("control_id", "idx_control_risk_control"),
            ("risk_id", "idx_control_risk_risk"),
        )
        .await?;
        ctx.add_foreign_key_if_missing(
            ForeignKeyDef::new("fk_control_risk_control", "control_risk", "control_id", "control")
                .on_delete(OnDelete::Cascade),
        )
        .await?;
        ctx.add_foreign_key_if_missing(
            ForeignKeyDef::new("fk_control_risk_risk", "control_risk", "risk_id", "risk")
                .on_delete(OnDelete::Cascade),
        )
        .await?;

        create_join_table(
            ctx,
            "incident_control",
            ("incident_id", "idx_incident_control_incident"),
            ("control_id", "idx_incident_control_control"),
        )
        .await?;
        ctx.add_foreign_key_if_missing(
            ForeignKeyDef::new(
                "fk_incident_control_incident",
                "incident_control",
                "incident_id",
                "incident",
            )
            .on_delete(OnDelete::Cascade),
        )
        .await?;
        ctx.add_foreign_key_if_missing(
            ForeignKeyDef::new(
                "fk_incident_control_control",
                "incident_control",
                "control_id",
                "control",
            )
            .on_delete(OnDelete::Cascade),
        )
        .await?;

        ctx.create_table_if_missing(timestamps(
            TableDef::new("internal_audit")
                .with_id()
                .column(varchar("audit_number", 50))
                .column(varchar("title", 255))
                .column(opt_text("scope"))
                .column(opt_text("objectives"))
                .column(date("planned_date"))
                .column(opt_date("actual_date"))
                .column(varchar("lead_auditor", 100))
                .column(opt_text("audit_team"))
                .column(opt_text("audited_departments"))
                .column(varchar("status", 50))
                .column(opt_text("findings"))
                .column(opt_text("non_conformities"))
                .column(opt_text("observations"))
                .column(opt_text("recommendations"))
                .column(opt_text("conclusion"))
                .column(opt_date("report_date")),
        ))
        .await?;

        ctx.create_table_if_missing(timestamps(
            TableDef::new("management_review")
                .with_id()
                .column(varchar("title", 255))
                .column(date("review_date"))
                .column(opt_text("participants"))
                .column(opt_text("changes_relevant_to_isms"))
                .column(opt_text("feedback_from_interested_parties"))
                .column(opt_text("audit_results"))
                .column(opt_text("performance_evaluation"))
                .column(opt_text("non_conformities_status"))
                .column(opt_text("corrective_actions_status"))
                .column(opt_text("previous_review_actions"))
                .column(opt_text("opportunities_for_improvement"))
                .column(opt_text("resource_needs"))
                .column(opt_text("decisions"))
                .column(opt_text("action_items"))
                .column(varchar("status", 50)),
        ))
        .await?;

        ctx.create_table_if_missing(timestamps(
            TableDef::new("training")
                .with_id()
                .column(varchar("title", 255))
                .column(opt_text("description"))
                .column(varchar("training_type", 100))
                .column(date("scheduled_date"))
                .column(opt_integer("duration_minutes"))
                .column(varchar("trainer", 100))
                .column(opt_text("target_audience"))
                .column(opt_text("participants"))
                .column(opt_integer("attendee_count"))
                .column(varchar("status", 50))
                .column(opt_text("materials"))
                .column(opt_text("feedback"))
                .column(opt_date("completion_date")),
        ))
        .await?;

        ctx.create_table_if_missing(timestamps(
            TableDef::new("isms_context")
                .with_id()
                .column(varchar("organization_name", 255))
                .column(opt_text("isms_scope"))
                .column(opt_text("scope_exclusions"))
                .column(opt_text("external_issues"))
                .column(opt_text("internal_issues"))
                .column(opt_text("interested_parties"))
                .column(opt_text("interested_parties_requirements"))
                .column(opt_text("legal_requirements"))
                .column(opt_text("regulatory_requirements"))
                .column(opt_text("contractual_obligations"))
                .column(opt_text("isms_policy"))
                .column(opt_text("roles_and_responsibilities"))
                .column(opt_date("last_review_date"))
                .column(opt_date("next_review_date")),
        ))
        .await?;

        ctx.create_table_if_missing(timestamps(
            TableDef::new("isms_objective")
                .with_id()
                .column(varchar("title", 255))
                .column(text("description"))
                .column(varchar("category", 100))
                .column(opt_text("measurable_indicators"))
                .column(ColumnDef::new("target_value", ColumnType::Decimal(10, 2)).nullable())
                .column(ColumnDef::new("current_value", ColumnType::Decimal(10, 2)).nullable())
                .column(opt_varchar("unit", 50))
                .column(varchar("responsible_person", 100))
                .column(date("target_date"))
                .column(varchar("status", 50))
                .column(opt_text("progress_notes"))
                .column(opt_date("achieved_date")),
        ))
        .await?;
        Ok(())
    }

    async fn down(&self, ctx: &mut MigrationContext<'_>) -> Result<(), MigrationError> {
        drop_tables(ctx, TABLES).await
    }
}
