//! Migration 20251108000001: ISO compliance improvements.
//!
//! Adds supplier management (ISO 27001 A.15), interested parties (4.2),
//! business continuity plans and exercises (ISO 22301) and ISMS change
//! requests, each with their link tables. Risks gain formal acceptance
//! approval fields.

use async_trait::async_trait;
use grc_migrate_core::prelude::*;

use super::schema::{
    boolean, create_indexes, create_join_table, date, drop_tables, integer, opt_date,
    opt_integer, opt_json, opt_text, opt_varchar, text, timestamps, varchar,
};

/// Link tables as `(table, (left column, index), (right column, index))`.
const JOIN_TABLES: &[(&str, (&str, &str), (&str, &str))] = &[
    (
        "supplier_asset",
        ("supplier_id", "idx_supplier_asset_supplier"),
        ("asset_id", "idx_supplier_asset_asset"),
    ),
    (
        "supplier_risk",
        ("supplier_id", "idx_supplier_risk_supplier"),
        ("risk_id", "idx_supplier_risk_risk"),
    ),
    (
        "supplier_document",
        ("supplier_id", "idx_supplier_document_supplier"),
        ("document_id", "idx_supplier_document_document"),
    ),
    (
        "bc_plan_supplier",
        ("business_continuity_plan_id", "idx_bc_plan_supplier_plan"),
        ("supplier_id", "idx_bc_plan_supplier_supplier"),
    ),
    (
        "bc_plan_asset",
        ("business_continuity_plan_id", "idx_bc_plan_asset_plan"),
        ("asset_id", "idx_bc_plan_asset_asset"),
    ),
    (
        "bc_plan_document",
        ("business_continuity_plan_id", "idx_bc_plan_document_plan"),
        ("document_id", "idx_bc_plan_document_document"),
    ),
    (
        "bc_exercise_plan",
        ("bc_exercise_id", "idx_bc_exercise_plan_exercise"),
        ("business_continuity_plan_id", "idx_bc_exercise_plan_plan"),
    ),
    (
        "bc_exercise_document",
        ("bc_exercise_id", "idx_bc_exercise_document_exercise"),
        ("document_id", "idx_bc_exercise_document_document"),
    ),
    (
        "change_request_asset",
        ("change_request_id", "idx_change_request_asset_change"),
        ("asset_id", "idx_change_request_asset_asset"),
    ),
    (
        "change_request_control",
        ("change_request_id", "idx_change_request_control_change"),
        ("control_id", "idx_change_request_control_control"),
    ),
    (
        "change_request_business_process",
        ("change_request_id", "idx_change_request_process_change"),
        ("business_process_id", "idx_change_request_process_process"),
    ),
    (
        "change_request_risk",
        ("change_request_id", "idx_change_request_risk_change"),
        ("risk_id", "idx_change_request_risk_risk"),
    ),
    (
        "change_request_document",
        ("change_request_id", "idx_change_request_document_change"),
        ("document_id", "idx_change_request_document_document"),
    ),
];

const ENTITY_TABLES: &[&str] = &[
    "change_request",
    "bc_exercise",
    "business_continuity_plan",
    "interested_party",
    "supplier",
];

const RISK_ACCEPTANCE_COLUMNS: &[&str] = &[
    "acceptance_approved_by",
    "acceptance_approved_at",
    "acceptance_justification",
    "formally_accepted",
];

/// Supplier, interested party, continuity and change management entities.
pub struct IsoComplianceImprovements;

#[async_trait]
impl Migration for IsoComplianceImprovements {
    fn version(&self) -> &'static str {
        "20251108000001"
    }

    fn name(&self) -> &'static str {
        "iso_compliance_improvements"
    }

    fn description(&self) -> &'static str {
        "ISO compliance improvements: Supplier, InterestedParty, BC Plan, BC Exercise, \
         Change Request entities + Risk acceptance approval"
    }

    fn reversibility(&self) -> Reversibility {
        Reversibility::LossyReversible("risk acceptance approvals are dropped with their columns")
    }

    async fn up(&self, ctx: &mut MigrationContext<'_>) -> Result<(), MigrationError> {
        ctx.create_table_if_missing(timestamps(
            TableDef::new("supplier")
                .with_id()
                .column(varchar("name", 255))
                .column(opt_text("description"))
                .column(opt_varchar("contact_person", 100))
                .column(opt_varchar("email", 255))
                .column(opt_varchar("phone", 50))
                .column(opt_text("address"))
                .column(text("service_provided"))
                .column(varchar("criticality", 50))
                .column(varchar("status", 50))
                .column(opt_integer("security_score"))
                .column(opt_date("last_security_assessment"))
                .column(opt_date("next_assessment_date"))
                .column(opt_text("assessment_findings"))
                .column(opt_text("non_conformities"))
                .column(opt_json("contractual_slas"))
                .column(opt_date("contract_start_date"))
                .column(opt_date("contract_end_date"))
                .column(opt_text("security_requirements"))
                .column(boolean("has_iso27001", false))
                .column(boolean("has_iso22301", false))
                .column(opt_text("certifications"))
                .column(boolean("has_dpa", false))
                .column(opt_date("dpa_signed_date")),
        ))
        .await?;
        create_indexes(
            ctx,
            "supplier",
            &[
                ("idx_supplier_criticality", "criticality"),
                ("idx_supplier_next_assessment", "next_assessment_date"),
                ("idx_supplier_status", "status"),
            ],
        )
        .await?;

        ctx.create_table_if_missing(timestamps(
            TableDef::new("interested_party")
                .with_id()
                .column(varchar("name", 255))
                .column(varchar("party_type", 100))
                .column(opt_text("description"))
                .column(opt_varchar("contact_person", 100))
                .column(opt_varchar("email", 255))
                .column(opt_varchar("phone", 50))
                .column(varchar("importance", 50))
                .column(text("requirements"))
                .column(opt_json("legal_requirements"))
                .column(opt_text("how_addressed"))
                .column(opt_varchar("communication_frequency", 100))
                .column(opt_text("communication_method"))
                .column(opt_date("last_communication"))
                .column(opt_date("next_communication"))
                .column(opt_text("feedback"))
                .column(opt_integer("satisfaction_level"))
                .column(opt_text("issues")),
        ))
        .await?;
        create_indexes(
            ctx,
            "interested_party",
            &[
                ("idx_party_type", "party_type"),
                ("idx_party_importance", "importance"),
            ],
        )
        .await?;

        ctx.create_table_if_missing(timestamps(
            TableDef::new("business_continuity_plan")
                .with_id()
                .column(integer("business_process_id"))
                .column(varchar("name", 255))
                .column(opt_text("description"))
                .column(varchar("plan_owner", 100))
                .column(opt_text("bc_team"))
                .column(varchar("status", 50))
                .column(text("activation_criteria"))
                .column(opt_text("roles_and_responsibilities"))
                .column(opt_json("response_team"))
                .column(text("recovery_procedures"))
                .column(opt_text("communication_plan"))
                .column(opt_json("stakeholder_contacts"))
                .column(opt_text("alternative_site"))
                .column(opt_text("backup_procedures"))
                .column(opt_text("restore_procedures"))
                .column(opt_json("required_resources"))
                .column(varchar("version", 20))
                .column(opt_date("last_tested"))
                .column(opt_date("next_test_date"))
                .column(opt_date("last_review_date"))
                .column(opt_date("next_review_date"))
                .column(opt_text("review_notes")),
        ))
        .await?;
        create_indexes(
            ctx,
            "business_continuity_plan",
            &[
                ("idx_bc_plan_status", "status"),
                ("idx_bc_plan_last_tested", "last_tested"),
                ("idx_bc_plan_next_review", "next_review_date"),
                ("idx_bc_plan_business_process", "business_process_id"),
            ],
        )
        .await?;

        ctx.create_table_if_missing(timestamps(
            TableDef::new("bc_exercise")
                .with_id()
                .column(varchar("name", 255))
                .column(varchar("exercise_type", 50))
                .column(opt_text("description"))
                .column(text("scope"))
                .column(text("objectives"))
                .column(opt_text("scenario"))
                .column(date("exercise_date"))
                .column(opt_integer("duration_hours"))
                .column(text("participants"))
                .column(varchar("facilitator", 100))
                .column(opt_text("observers"))
                .column(varchar("status", 50))
                .column(opt_text("results"))
                .column(opt_text("what_went_well"))
                .column(opt_text("areas_for_improvement"))
                .column(opt_text("findings"))
                .column(opt_text("action_items"))
                .column(opt_text("lessons_learned"))
                .column(opt_text("plan_updates_required"))
                .column(opt_json("success_criteria"))
                .column(opt_integer("success_rating"))
                .column(boolean("report_completed", false))
                .column(opt_date("report_date")),
        ))
        .await?;
        create_indexes(
            ctx,
            "bc_exercise",
            &[
                ("idx_bc_exercise_type", "exercise_type"),
                ("idx_bc_exercise_date", "exercise_date"),
                ("idx_bc_exercise_status", "status"),
            ],
        )
        .await?;

        ctx.create_table_if_missing(timestamps(
            TableDef::new("change_request")
                .with_id()
                .column(varchar("change_number", 50))
                .column(varchar("title", 255))
                .column(varchar("change_type", 50))
                .column(text("description"))
                .column(text("justification"))
                .column(varchar("requested_by", 100))
                .column(date("requested_date"))
                .column(varchar("priority", 50))
                .column(varchar("status", 50))
                .column(opt_text("isms_impact"))
                .column(opt_text("risk_assessment"))
                .column(opt_text("implementation_plan"))
                .column(opt_text("rollback_plan"))
                .column(opt_text("testing_requirements"))
                .column(opt_date("planned_implementation_date"))
                .column(opt_date("actual_implementation_date"))
                .column(opt_varchar("approved_by", 100))
                .column(opt_date("approved_date"))
                .column(opt_text("approval_comments"))
                .column(opt_varchar("implemented_by", 100))
                .column(opt_text("implementation_notes"))
                .column(opt_varchar("verified_by", 100))
                .column(opt_date("verified_date"))
                .column(opt_text("verification_results"))
                .column(opt_date("closed_date"))
                .column(opt_text("closure_notes")),
        ))
        .await?;
        create_indexes(
            ctx,
            "change_request",
            &[
                ("idx_change_type", "change_type"),
                ("idx_change_priority", "priority"),
                ("idx_change_status", "status"),
                ("idx_change_planned_date", "planned_implementation_date"),
            ],
        )
        .await?;

        for &(table, left, right) in JOIN_TABLES {
            create_join_table(ctx, table, left, right).await?;
        }

        ctx.add_column_if_missing("risk", opt_varchar("acceptance_approved_by", 100))
            .await?;
        ctx.add_column_if_missing("risk", opt_date("acceptance_approved_at"))
            .await?;
        ctx.add_column_if_missing("risk", opt_text("acceptance_justification"))
            .await?;
        ctx.add_column_if_missing("risk", boolean("formally_accepted", false))
            .await?;
        Ok(())
    }

    async fn down(&self, ctx: &mut MigrationContext<'_>) -> Result<(), MigrationError> {
        for &column in RISK_ACCEPTANCE_COLUMNS {
            ctx.drop_column_if_exists("risk", column).await?;
        }
        for &(table, ..) in JOIN_TABLES.iter().rev() {
            ctx.drop_table_if_exists(table).await?;
        }
        drop_tables(ctx, ENTITY_TABLES).await
    }
}
