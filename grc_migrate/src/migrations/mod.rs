//! The ISMS schema history.
//!
//! Every unit is a struct implementing [`Migration`], one per file, named
//! after its version's position in the history. Units are guarded: each
//! statement checks the live catalog first, so the history can run against
//! databases that were partly patched by hand or that lack optional modules.
//!
//! # Usage
//!
//! ```rust,ignore
//! use grc_migrate::migrations;
//! use grc_migrate::prelude::*;
//!
//! let migrator = PgMigrator::new(PgStore::new(pool), migrations::registry()?);
//! let report = migrator.migrate(None).await?;
//! println!("Applied {} migrations", report.applied.len());
//! ```
//!
//! # Adding New Migrations
//!
//! 1. Create a new file `mXXX_description.rs` in this directory
//! 2. Implement the `Migration` trait, guarding every statement
//! 3. Add the unit to [`all`]
//!
//! Versions are timestamps. A fixup for an already released unit may carry
//! an older version than the latest one; declare the unit it repairs in
//! `requires`.

mod schema;

mod m001_create_tenants_and_users;
mod m002_create_isms_core_tables;
mod m003_iso_compliance_improvements;
mod m004_person_location_data_reuse;
mod m005_create_compliance_catalog;
mod m006_add_tenant_scoping;
mod m007_create_corporate_governance;
mod m008_recreate_corporate_governance;
mod m009_dashboard_layouts;
mod m010_immutable_datetime_semantics;
mod m011_compliance_requirement_fulfillment;

pub use m001_create_tenants_and_users::CreateTenantsAndUsers;
pub use m002_create_isms_core_tables::CreateIsmsCoreTables;
pub use m003_iso_compliance_improvements::IsoComplianceImprovements;
pub use m004_person_location_data_reuse::PersonLocationDataReuse;
pub use m005_create_compliance_catalog::CreateComplianceCatalog;
pub use m006_add_tenant_scoping::{AddTenantScoping, TENANT_SCOPED_TABLES};
pub use m007_create_corporate_governance::CreateCorporateGovernance;
pub use m008_recreate_corporate_governance::RecreateCorporateGovernance;
pub use m009_dashboard_layouts::DashboardLayouts;
pub use m010_immutable_datetime_semantics::ImmutableDatetimeSemantics;
pub use m011_compliance_requirement_fulfillment::ComplianceRequirementFulfillment;

use grc_migrate_core::{Migration, MigrationError, Registry};

/// All units of the history, oldest first. Add new units to the end.
pub fn all() -> Vec<Box<dyn Migration>> {
    vec![
        Box::new(CreateTenantsAndUsers),
        Box::new(CreateIsmsCoreTables),
        Box::new(IsoComplianceImprovements),
        Box::new(PersonLocationDataReuse),
        Box::new(CreateComplianceCatalog),
        Box::new(AddTenantScoping),
        Box::new(CreateCorporateGovernance),
        Box::new(RecreateCorporateGovernance),
        Box::new(DashboardLayouts),
        Box::new(ImmutableDatetimeSemantics),
        Box::new(ComplianceRequirementFulfillment),
    ]
}

/// The validated registry of [`all`].
pub fn registry() -> Result<Registry, MigrationError> {
    Registry::new(all())
}
