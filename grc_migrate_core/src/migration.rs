//! Migration units and the context they run in.

use std::fmt;

use async_trait::async_trait;
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::backfill::{BackfillReport, TenantSelection};
use crate::error::MigrationError;
use crate::guard::{GuardPolicy, SchemaGuardQuery};
use crate::ident::Ident;
use crate::statement::{
    ColumnDef, ForeignKeyDef, IndexDef, InsertSelect, Projection, Statement, TableDef, Value,
};
use crate::store::Executor;
use crate::version::Version;

/// Which transform of a unit runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// `up`.
    Forward,
    /// `down`.
    Backward,
}

impl Direction {
    /// Stored form.
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Forward => "forward",
            Direction::Backward => "backward",
        }
    }

    /// Parses the stored form.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "forward" => Some(Direction::Forward),
            "backward" => Some(Direction::Backward),
            _ => None,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How faithfully `down` undoes `up`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "reason", rename_all = "snake_case")]
pub enum Reversibility {
    /// `down` restores the previous catalog state and data.
    FullyReversible,
    /// `down` restores the catalog but loses data.
    LossyReversible(&'static str),
    /// There is no meaningful `down`; rollback is refused.
    Irreversible(&'static str),
}

/// Lifecycle of a unit against one database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitState {
    /// Not applied.
    Pending,
    /// `up` is running.
    Applying,
    /// `up` succeeded and the record exists.
    Applied,
    /// `down` is running.
    RollingBack,
    /// A run stopped part way and left the unit needing manual attention.
    Failed,
}

impl fmt::Display for UnitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            UnitState::Pending => "pending",
            UnitState::Applying => "applying",
            UnitState::Applied => "applied",
            UnitState::RollingBack => "rolling back",
            UnitState::Failed => "failed",
        })
    }
}

/// A single versioned schema change.
///
/// Units are structs implementing this trait. `up` and `down` receive a
/// [`MigrationContext`] through which every statement and probe goes; the
/// migrator owns the transaction, so units never commit or roll back.
///
/// # Example
///
/// ```rust,ignore
/// use async_trait::async_trait;
/// use grc_migrate_core::prelude::*;
///
/// pub struct AddStatus;
///
/// #[async_trait]
/// impl Migration for AddStatus {
///     fn version(&self) -> &'static str { "20251120000000" }
///
///     fn name(&self) -> &'static str { "add_status" }
///
///     async fn up(&self, ctx: &mut MigrationContext<'_>) -> Result<(), MigrationError> {
///         ctx.add_column_if_missing("t", ColumnDef::new("status", ColumnType::Text).nullable())
///             .await?;
///         Ok(())
///     }
///
///     async fn down(&self, ctx: &mut MigrationContext<'_>) -> Result<(), MigrationError> {
///         ctx.drop_column_if_exists("t", "status").await?;
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait Migration: Send + Sync {
    /// Sortable version key, e.g. `"20251119010000"`.
    ///
    /// Must be unique across the registry.
    fn version(&self) -> &'static str;

    /// Short snake_case name.
    fn name(&self) -> &'static str;

    /// Human-readable description, recorded when the unit is applied.
    fn description(&self) -> &'static str {
        self.name()
    }

    /// Forward transform.
    async fn up(&self, ctx: &mut MigrationContext<'_>) -> Result<(), MigrationError>;

    /// Backward transform. Authored per unit; not necessarily `up` reversed.
    async fn down(&self, ctx: &mut MigrationContext<'_>) -> Result<(), MigrationError>;

    /// Whether the unit runs inside a transaction.
    fn transactional(&self) -> bool {
        true
    }

    /// How faithfully `down` undoes `up`.
    fn reversibility(&self) -> Reversibility {
        Reversibility::FullyReversible
    }

    /// Versions that must be applied before this one.
    fn requires(&self) -> &'static [&'static str] {
        &[]
    }

    /// Returns the checksum of this unit for tamper detection.
    ///
    /// Default implementation computes SHA-256 of version + name.
    fn checksum(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.version().as_bytes());
        hasher.update([0u8]);
        hasher.update(self.name().as_bytes());
        format!("{:x}", hasher.finalize())
    }

    /// Runs the transform for `direction`.
    async fn apply(
        &self,
        direction: Direction,
        ctx: &mut MigrationContext<'_>,
    ) -> Result<(), MigrationError> {
        match direction {
            Direction::Forward => self.up(ctx).await,
            Direction::Backward => self.down(ctx).await,
        }
    }
}

/// What one unit did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnitReport {
    /// The unit.
    pub version: Version,
    /// Its name.
    pub name: String,
    /// Which transform ran.
    pub direction: Direction,
    /// Statements executed.
    pub statements_executed: usize,
    /// Guarded statements skipped because the schema already matched.
    pub guards_skipped: usize,
    /// Backfill outcomes, in execution order.
    pub backfills: Vec<BackfillReport>,
}

/// The handle a unit uses to inspect and change the schema.
///
/// Every call goes to the live catalog; nothing is cached between calls.
pub struct MigrationContext<'c> {
    executor: &'c mut dyn Executor,
    policy: GuardPolicy,
    report: UnitReport,
}

impl<'c> MigrationContext<'c> {
    /// Creates a context for one run of one unit.
    pub fn new(
        executor: &'c mut dyn Executor,
        policy: GuardPolicy,
        version: Version,
        name: &str,
        direction: Direction,
    ) -> Self {
        Self {
            executor,
            policy,
            report: UnitReport {
                version,
                name: name.to_string(),
                direction,
                statements_executed: 0,
                guards_skipped: 0,
                backfills: Vec::new(),
            },
        }
    }

    /// The unit being run.
    pub fn version(&self) -> &Version {
        &self.report.version
    }

    /// Consumes the context, returning what the unit did.
    pub fn into_report(self) -> UnitReport {
        self.report
    }

    /// Answers a catalog probe according to the configured [`GuardPolicy`].
    pub async fn exists(&mut self, query: SchemaGuardQuery) -> Result<bool, MigrationError> {
        query.validate()?;
        match self.executor.probe(&query).await {
            Ok(found) => Ok(found),
            Err(source) => match self.policy {
                GuardPolicy::Strict => Err(MigrationError::GuardQuery {
                    version: self.report.version.clone(),
                    query: query.to_string(),
                    source,
                }),
                GuardPolicy::AssumeAbsent => {
                    log::warn!(
                        "Migration {}: probe for {} failed ({}); assuming absent",
                        self.report.version,
                        query,
                        source
                    );
                    Ok(false)
                }
            },
        }
    }

    /// Does the table exist?
    pub async fn table_exists(&mut self, table: impl Into<Ident>) -> Result<bool, MigrationError> {
        self.exists(SchemaGuardQuery::table(table)).await
    }

    /// Does the column exist?
    pub async fn column_exists(
        &mut self,
        table: impl Into<Ident>,
        column: impl Into<Ident>,
    ) -> Result<bool, MigrationError> {
        self.exists(SchemaGuardQuery::column(table, column)).await
    }

    /// Does the index exist?
    pub async fn index_exists(
        &mut self,
        table: impl Into<Ident>,
        index: impl Into<Ident>,
    ) -> Result<bool, MigrationError> {
        self.exists(SchemaGuardQuery::index(table, index)).await
    }

    /// Does the constraint exist?
    pub async fn constraint_exists(
        &mut self,
        table: impl Into<Ident>,
        constraint: impl Into<Ident>,
    ) -> Result<bool, MigrationError> {
        self.exists(SchemaGuardQuery::constraint(table, constraint))
            .await
    }

    /// Executes a statement unconditionally and returns the rows affected.
    pub async fn execute(&mut self, statement: Statement) -> Result<u64, MigrationError> {
        statement.validate()?;
        log::debug!("Migration {}: {}", self.report.version, statement);
        match self.executor.execute(&statement).await {
            Ok(rows) => {
                self.report.statements_executed += 1;
                Ok(rows)
            }
            Err(source) => Err(MigrationError::StatementExecution {
                version: self.report.version.clone(),
                statement: statement.to_string(),
                source,
            }),
        }
    }

    /// Executes `statement` only when `query` answers `expected`.
    ///
    /// Returns whether the statement ran.
    pub async fn execute_if(
        &mut self,
        query: SchemaGuardQuery,
        expected: bool,
        statement: Statement,
    ) -> Result<bool, MigrationError> {
        if self.exists(query.clone()).await? != expected {
            log::debug!(
                "Migration {}: skipping `{}`: {} {}",
                self.report.version,
                statement,
                query,
                if expected { "is absent" } else { "already exists" }
            );
            self.report.guards_skipped += 1;
            return Ok(false);
        }
        self.execute(statement).await?;
        Ok(true)
    }

    /// Creates the table unless it exists.
    pub async fn create_table_if_missing(&mut self, table: TableDef) -> Result<bool, MigrationError> {
        let query = SchemaGuardQuery::table(table.name.clone());
        self.execute_if(query, false, Statement::CreateTable(table))
            .await
    }

    /// Drops the table if it exists.
    pub async fn drop_table_if_exists(
        &mut self,
        table: impl Into<Ident>,
    ) -> Result<bool, MigrationError> {
        let table = table.into();
        let query = SchemaGuardQuery::table(table.clone());
        self.execute_if(query, true, Statement::DropTable { table })
            .await
    }

    /// Adds the column unless it exists. Skipped when the table is missing.
    pub async fn add_column_if_missing(
        &mut self,
        table: impl Into<Ident>,
        column: ColumnDef,
    ) -> Result<bool, MigrationError> {
        let table = table.into();
        if !self.table_exists(table.clone()).await? {
            log::info!(
                "Migration {}: table {} does not exist, not adding column {}",
                self.report.version,
                table,
                column.name
            );
            self.report.guards_skipped += 1;
            return Ok(false);
        }
        let query = SchemaGuardQuery::column(table.clone(), column.name.clone());
        self.execute_if(query, false, Statement::AddColumn { table, column })
            .await
    }

    /// Drops the column if it exists.
    pub async fn drop_column_if_exists(
        &mut self,
        table: impl Into<Ident>,
        column: impl Into<Ident>,
    ) -> Result<bool, MigrationError> {
        let (table, column) = (table.into(), column.into());
        let query = SchemaGuardQuery::column(table.clone(), column.clone());
        self.execute_if(query, true, Statement::DropColumn { table, column })
            .await
    }

    /// Creates the index unless it exists.
    pub async fn create_index_if_missing(&mut self, index: IndexDef) -> Result<bool, MigrationError> {
        let query = SchemaGuardQuery::index(index.table.clone(), index.name.clone());
        self.execute_if(query, false, Statement::CreateIndex(index))
            .await
    }

    /// Drops the index if it exists.
    pub async fn drop_index_if_exists(
        &mut self,
        table: impl Into<Ident>,
        name: impl Into<Ident>,
    ) -> Result<bool, MigrationError> {
        let (table, name) = (table.into(), name.into());
        let query = SchemaGuardQuery::index(table.clone(), name.clone());
        self.execute_if(query, true, Statement::DropIndex { table, name })
            .await
    }

    /// Adds the foreign key unless a constraint with its name exists.
    pub async fn add_foreign_key_if_missing(
        &mut self,
        key: ForeignKeyDef,
    ) -> Result<bool, MigrationError> {
        let query = SchemaGuardQuery::constraint(key.table.clone(), key.name.clone());
        self.execute_if(query, false, Statement::AddForeignKey(key))
            .await
    }

    /// Drops the foreign key if it exists.
    pub async fn drop_foreign_key_if_exists(
        &mut self,
        table: impl Into<Ident>,
        name: impl Into<Ident>,
    ) -> Result<bool, MigrationError> {
        let (table, name) = (table.into(), name.into());
        let query = SchemaGuardQuery::constraint(table.clone(), name.clone());
        self.execute_if(query, true, Statement::DropForeignKey { table, name })
            .await
    }

    /// Reads an integer column, ascending.
    pub async fn fetch_ids(
        &mut self,
        table: impl Into<Ident>,
        column: impl Into<Ident>,
    ) -> Result<Vec<i64>, MigrationError> {
        let (table, column) = (table.into(), column.into());
        table.validate()?;
        column.validate()?;
        self.executor
            .fetch_ids(&table, &column)
            .await
            .map_err(|source| MigrationError::StatementExecution {
                version: self.report.version.clone(),
                statement: format!("SELECT \"{column}\" FROM \"{table}\" ORDER BY \"{column}\""),
                source,
            })
    }

    /// Counts the rows of a table.
    pub async fn count_rows(&mut self, table: impl Into<Ident>) -> Result<u64, MigrationError> {
        let table = table.into();
        table.validate()?;
        self.executor
            .count_rows(&table)
            .await
            .map_err(|source| MigrationError::StatementExecution {
                version: self.report.version.clone(),
                statement: format!("SELECT COUNT(*) FROM \"{table}\""),
                source,
            })
    }

    /// Copies legacy rows that had no tenant into the primary tenant.
    ///
    /// Tenants are read from `tenant_table.id`. With no tenants the copy is
    /// skipped and reported; with one tenant every row goes to it; with
    /// several, every row goes to the lowest id and the others are reported
    /// as receiving nothing. The chosen id is written to `tenant_column` of
    /// the target as a bound constant.
    pub async fn backfill_to_primary_tenant(
        &mut self,
        tenant_table: impl Into<Ident>,
        tenant_column: impl Into<Ident>,
        copy: InsertSelect,
    ) -> Result<BackfillReport, MigrationError> {
        let tenant_table = tenant_table.into();
        let ids = self.fetch_ids(tenant_table.clone(), "id").await?;
        let selection = TenantSelection::from_ids(&ids);

        let Some(tenant) = selection.tenant() else {
            log::warn!(
                "Migration {}: no rows in {}; skipping backfill into {}",
                self.report.version,
                tenant_table,
                copy.target
            );
            let report =
                BackfillReport::skipped(copy.target, format!("no rows in {tenant_table}"));
            self.report.backfills.push(report.clone());
            return Ok(report);
        };

        let statement = copy.project(tenant_column, Projection::Constant(Value::Int(tenant)));
        let target = statement.target.clone();
        let rows_migrated = self.execute(Statement::InsertSelect(statement)).await?;

        match selection {
            TenantSelection::Primary { excluded, .. } => {
                log::warn!(
                    "Migration {}: {} tenants found; migrated {} rows into {} for primary tenant {}; \
                     {} other tenant(s) received no rows",
                    self.report.version,
                    ids.len(),
                    rows_migrated,
                    target,
                    tenant,
                    excluded
                );
            }
            _ => {
                log::info!(
                    "Migration {}: migrated {} rows into {} for tenant {}",
                    self.report.version,
                    rows_migrated,
                    target,
                    tenant
                );
            }
        }

        let report = BackfillReport {
            target,
            tenant: Some(tenant),
            rows_migrated,
            tenants_without_rows: selection.excluded(),
            skipped: None,
        };
        self.report.backfills.push(report.clone());
        Ok(report)
    }

    /// Runs a copy that needs no tenant context and reports it.
    pub async fn backfill(&mut self, copy: InsertSelect) -> Result<BackfillReport, MigrationError> {
        let target = copy.target.clone();
        let rows_migrated = self.execute(Statement::InsertSelect(copy)).await?;
        log::info!(
            "Migration {}: migrated {} rows into {}",
            self.report.version,
            rows_migrated,
            target
        );
        let report = BackfillReport {
            target,
            tenant: None,
            rows_migrated,
            tenants_without_rows: 0,
            skipped: None,
        };
        self.report.backfills.push(report.clone());
        Ok(report)
    }
}
