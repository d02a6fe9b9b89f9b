//! Migration 20251108000004: person and location records for data reuse.
//!
//! People and places used to be typed in as free text on every record.
//! This unit introduces `person` and `location` and links the tables that
//! mention them. Several of those tables belong to optional modules, so
//! every link is added only where its table exists.

use async_trait::async_trait;
use grc_migrate_core::prelude::*;

use super::schema::{
    boolean, create_indexes, create_join_table, opt_date, opt_integer, opt_text, opt_varchar,
    timestamps, varchar,
};

/// Introduces `person` and `location` and links existing registers to them.
pub struct PersonLocationDataReuse;

/// An optional reference column with its index and foreign key.
struct Link {
    table: &'static str,
    column: &'static str,
    index: &'static str,
    key: &'static str,
    references: &'static str,
}

const LINKS: &[Link] = &[
    Link {
        table: "physical_access_log",
        column: "person_id",
        index: "idx_physical_access_log_person",
        key: "fk_physical_access_log_person",
        references: "person",
    },
    Link {
        table: "physical_access_log",
        column: "location_entity_id",
        index: "idx_physical_access_log_location",
        key: "fk_physical_access_log_location",
        references: "location",
    },
    Link {
        table: "cryptographic_operation",
        column: "related_asset_id",
        index: "idx_cryptographic_operation_asset",
        key: "fk_cryptographic_operation_asset",
        references: "asset",
    },
    Link {
        table: "asset",
        column: "physical_location_id",
        index: "idx_asset_location",
        key: "fk_asset_location",
        references: "location",
    },
    Link {
        table: "incident",
        column: "originating_threat_id",
        index: "idx_incident_threat",
        key: "fk_incident_threat",
        references: "threat_intelligence",
    },
];

/// Free-text columns on `physical_access_log` superseded by the links.
const LEGACY_COLUMNS: &[&str] = &["person_name", "location"];

async fn set_legacy_nullable(
    ctx: &mut MigrationContext<'_>,
    nullable: bool,
) -> Result<(), MigrationError> {
    for &column in LEGACY_COLUMNS {
        if ctx.column_exists("physical_access_log", column).await? {
            ctx.execute(Statement::SetNullable {
                table: "physical_access_log".into(),
                column: column.into(),
                nullable,
            })
            .await?;
        }
    }
    Ok(())
}

impl Link {
    async fn add(&self, ctx: &mut MigrationContext<'_>) -> Result<(), MigrationError> {
        if !ctx.table_exists(self.references).await? {
            log::info!(
                "Table {} does not exist, not linking {}.{}",
                self.references,
                self.table,
                self.column
            );
            return Ok(());
        }
        ctx.add_column_if_missing(self.table, opt_integer(self.column))
            .await?;
        ctx.create_index_if_missing(IndexDef::new(self.index, self.table, [self.column]))
            .await?;
        ctx.add_foreign_key_if_missing(ForeignKeyDef::new(
            self.key,
            self.table,
            self.column,
            self.references,
        ))
        .await?;
        Ok(())
    }

    async fn remove(&self, ctx: &mut MigrationContext<'_>) -> Result<(), MigrationError> {
        if !ctx.table_exists(self.table).await? {
            return Ok(());
        }
        ctx.drop_foreign_key_if_exists(self.table, self.key).await?;
        ctx.drop_index_if_exists(self.table, self.index).await?;
        ctx.drop_column_if_exists(self.table, self.column).await?;
        Ok(())
    }
}

#[async_trait]
impl Migration for PersonLocationDataReuse {
    fn version(&self) -> &'static str {
        "20251108000004"
    }

    fn name(&self) -> &'static str {
        "person_location_data_reuse"
    }

    fn description(&self) -> &'static str {
        "Add Person and Location entities for data reuse and link access logs, \
         threat intelligence, cryptographic operations, assets and incidents"
    }

    fn requires(&self) -> &'static [&'static str] {
        &["20251105000000"]
    }

    async fn up(&self, ctx: &mut MigrationContext<'_>) -> Result<(), MigrationError> {
        ctx.create_table_if_missing(timestamps(
            TableDef::new("person")
                .with_id()
                .column(opt_integer("linked_user_id"))
                .column(opt_integer("tenant_id"))
                .column(varchar("full_name", 255))
                .column(varchar("person_type", 50))
                .column(opt_varchar("badge_id", 100))
                .column(opt_varchar("company", 255))
                .column(opt_varchar("email", 255))
                .column(opt_varchar("phone", 50))
                .column(opt_varchar("department", 100))
                .column(opt_varchar("job_title", 100))
                .column(boolean("active", true))
                .column(opt_text("notes"))
                .column(opt_date("access_valid_from"))
                .column(opt_date("access_valid_until"))
                .unique("uniq_person_badge", ["badge_id"]),
        ))
        .await?;
        create_indexes(
            ctx,
            "person",
            &[
                ("idx_person_type", "person_type"),
                ("idx_person_company", "company"),
                ("idx_person_user", "linked_user_id"),
                ("idx_person_tenant", "tenant_id"),
            ],
        )
        .await?;
        ctx.add_foreign_key_if_missing(ForeignKeyDef::new(
            "fk_person_user",
            "person",
            "linked_user_id",
            "users",
        ))
        .await?;
        ctx.add_foreign_key_if_missing(ForeignKeyDef::new(
            "fk_person_tenant",
            "person",
            "tenant_id",
            "tenant",
        ))
        .await?;

        ctx.create_table_if_missing(timestamps(
            TableDef::new("location")
                .with_id()
                .column(opt_integer("parent_location_id"))
                .column(opt_integer("tenant_id"))
                .column(varchar("name", 255))
                .column(varchar("location_type", 100))
                .column(opt_varchar("code", 50))
                .column(opt_text("description"))
                .column(opt_text("address"))
                .column(opt_varchar("city", 100))
                .column(opt_varchar("country", 100))
                .column(opt_varchar("postal_code", 20))
                .column(varchar("security_level", 50))
                .column(boolean("requires_badge_access", false))
                .column(boolean("requires_escort", false))
                .column(boolean("camera_monitored", false))
                .column(opt_varchar("access_control_system", 255))
                .column(opt_varchar("responsible_person", 255))
                .column(opt_integer("capacity"))
                .column(ColumnDef::new("square_meters", ColumnType::Decimal(10, 2)).nullable())
                .column(boolean("active", true))
                .column(opt_text("notes")),
        ))
        .await?;
        create_indexes(
            ctx,
            "location",
            &[
                ("idx_location_type", "location_type"),
                ("idx_location_active", "active"),
                ("idx_location_parent", "parent_location_id"),
                ("idx_location_tenant", "tenant_id"),
            ],
        )
        .await?;
        ctx.add_foreign_key_if_missing(ForeignKeyDef::new(
            "fk_location_parent",
            "location",
            "parent_location_id",
            "location",
        ))
        .await?;
        ctx.add_foreign_key_if_missing(ForeignKeyDef::new(
            "fk_location_tenant",
            "location",
            "tenant_id",
            "tenant",
        ))
        .await?;

        for link in LINKS {
            if ctx.table_exists(link.table).await? {
                link.add(ctx).await?;
            } else {
                log::info!("Table {} does not exist, skipping its links", link.table);
            }
        }

        set_legacy_nullable(ctx, true).await?;

        if ctx.table_exists("threat_intelligence").await? {
            create_join_table(
                ctx,
                "threat_intelligence_affected_assets",
                ("threat_intelligence_id", "idx_threat_asset_threat"),
                ("asset_id", "idx_threat_asset_asset"),
            )
            .await?;
            ctx.add_foreign_key_if_missing(
                ForeignKeyDef::new(
                    "fk_threat_asset_threat",
                    "threat_intelligence_affected_assets",
                    "threat_intelligence_id",
                    "threat_intelligence",
                )
                .on_delete(OnDelete::Cascade),
            )
            .await?;
            ctx.add_foreign_key_if_missing(
                ForeignKeyDef::new(
                    "fk_threat_asset_asset",
                    "threat_intelligence_affected_assets",
                    "asset_id",
                    "asset",
                )
                .on_delete(OnDelete::Cascade),
            )
            .await?;
        }

        create_join_table(
            ctx,
            "incident_failed_controls",
            ("incident_id", "idx_incident_failed_controls_incident"),
            ("control_id", "idx_incident_failed_controls_control"),
        )
        .await?;
        ctx.add_foreign_key_if_missing(
            ForeignKeyDef::new(
                "fk_incident_failed_controls_incident",
                "incident_failed_controls",
                "incident_id",
                "incident",
            )
            .on_delete(OnDelete::Cascade),
        )
        .await?;
        ctx.add_foreign_key_if_missing(
            ForeignKeyDef::new(
                "fk_incident_failed_controls_control",
                "incident_failed_controls",
                "control_id",
                "control",
            )
            .on_delete(OnDelete::Cascade),
        )
        .await?;
        Ok(())
    }

    async fn down(&self, ctx: &mut MigrationContext<'_>) -> Result<(), MigrationError> {
        ctx.drop_table_if_exists("incident_failed_controls").await?;
        ctx.drop_table_if_exists("threat_intelligence_affected_assets")
            .await?;
        for link in LINKS.iter().rev() {
            link.remove(ctx).await?;
        }
        set_legacy_nullable(ctx, false).await?;
        ctx.drop_table_if_exists("location").await?;
        ctx.drop_table_if_exists("person").await?;
        Ok(())
    }
}
