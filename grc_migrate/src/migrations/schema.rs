//! Column and table shorthands shared by the history units.

use grc_migrate_core::prelude::*;

pub(crate) fn varchar(name: &'static str, len: u16) -> ColumnDef {
    ColumnDef::new(name, ColumnType::Varchar(len))
}

pub(crate) fn opt_varchar(name: &'static str, len: u16) -> ColumnDef {
    varchar(name, len).nullable()
}

pub(crate) fn text(name: &'static str) -> ColumnDef {
    ColumnDef::new(name, ColumnType::Text)
}

pub(crate) fn opt_text(name: &'static str) -> ColumnDef {
    text(name).nullable()
}

pub(crate) fn integer(name: &'static str) -> ColumnDef {
    ColumnDef::new(name, ColumnType::Integer)
}

pub(crate) fn opt_integer(name: &'static str) -> ColumnDef {
    integer(name).nullable()
}

pub(crate) fn boolean(name: &'static str, default: bool) -> ColumnDef {
    ColumnDef::new(name, ColumnType::Boolean).default(default)
}

pub(crate) fn date(name: &'static str) -> ColumnDef {
    ColumnDef::new(name, ColumnType::Date)
}

pub(crate) fn opt_date(name: &'static str) -> ColumnDef {
    date(name).nullable()
}

pub(crate) fn opt_timestamp(name: &'static str) -> ColumnDef {
    ColumnDef::new(name, ColumnType::Timestamp).nullable()
}

pub(crate) fn opt_json(name: &'static str) -> ColumnDef {
    ColumnDef::new(name, ColumnType::Json).nullable()
}

/// Appends `created_at` (required) and `updated_at` (optional).
pub(crate) fn timestamps(table: TableDef) -> TableDef {
    table
        .column(ColumnDef::new("created_at", ColumnType::Timestamp))
        .column(opt_timestamp("updated_at"))
}

/// A many-to-many table keyed on both columns.
pub(crate) fn join_table(name: &'static str, left: &'static str, right: &'static str) -> TableDef {
    TableDef::new(name)
        .column(integer(left))
        .column(integer(right))
        .primary_key([left, right])
}

/// Creates a join table with one index per side.
pub(crate) async fn create_join_table(
    ctx: &mut MigrationContext<'_>,
    name: &'static str,
    (left, left_index): (&'static str, &'static str),
    (right, right_index): (&'static str, &'static str),
) -> Result<(), MigrationError> {
    ctx.create_table_if_missing(join_table(name, left, right))
        .await?;
    ctx.create_index_if_missing(IndexDef::new(left_index, name, [left]))
        .await?;
    ctx.create_index_if_missing(IndexDef::new(right_index, name, [right]))
        .await?;
    Ok(())
}

/// Creates single-column indexes, each given as `(index, column)`.
pub(crate) async fn create_indexes(
    ctx: &mut MigrationContext<'_>,
    table: &'static str,
    indexes: &[(&'static str, &'static str)],
) -> Result<(), MigrationError> {
    for &(index, column) in indexes {
        ctx.create_index_if_missing(IndexDef::new(index, table, [column]))
            .await?;
    }
    Ok(())
}

/// Drops tables in the given order, skipping the ones already gone.
pub(crate) async fn drop_tables(
    ctx: &mut MigrationContext<'_>,
    tables: &[&'static str],
) -> Result<(), MigrationError> {
    for &table in tables {
        ctx.drop_table_if_exists(table).await?;
    }
    Ok(())
}

/// Adds a nullable, indexed `tenant_id` referencing `tenant(id)`.
///
/// Constraint and index are named `fk_<table>_tenant` and
/// `idx_<table>_tenant`. Nothing happens when the table is missing.
pub(crate) async fn add_tenant_scope(
    ctx: &mut MigrationContext<'_>,
    table: Ident,
) -> Result<(), MigrationError> {
    if !ctx.table_exists(table.clone()).await? {
        log::debug!("Table {table} does not exist, not scoping it to a tenant");
        return Ok(());
    }
    ctx.add_column_if_missing(table.clone(), opt_integer("tenant_id"))
        .await?;
    let key = ForeignKeyDef::new(
        table.decorate("fk_", "_tenant")?,
        table.clone(),
        "tenant_id",
        "tenant",
    );
    ctx.add_foreign_key_if_missing(key).await?;
    let index = IndexDef::new(table.decorate("idx_", "_tenant")?, table, ["tenant_id"]);
    ctx.create_index_if_missing(index).await?;
    Ok(())
}

/// Reverses [`add_tenant_scope`].
pub(crate) async fn drop_tenant_scope(
    ctx: &mut MigrationContext<'_>,
    table: Ident,
) -> Result<(), MigrationError> {
    if !ctx.table_exists(table.clone()).await? {
        return Ok(());
    }
    ctx.drop_foreign_key_if_exists(table.clone(), table.decorate("fk_", "_tenant")?)
        .await?;
    ctx.drop_index_if_exists(table.clone(), table.decorate("idx_", "_tenant")?)
        .await?;
    ctx.drop_column_if_exists(table, "tenant_id").await?;
    Ok(())
}
