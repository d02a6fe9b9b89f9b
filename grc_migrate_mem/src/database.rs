use std::collections::BTreeMap;

use chrono::Utc;
use grc_migrate_core::statement::{
    ColumnDef, ColumnType, Filter, ForeignKeyDef, IndexDef, InsertSelect, OnDelete, Projection,
    Statement, TableDef, Value,
};
use grc_migrate_core::{AppliedMigration, DirtyMarker, FulfillmentStatus, SchemaGuardQuery, Version};

use crate::error::MemError;

/// A stored row, keyed by column name.
pub type Row = BTreeMap<String, Value>;

/// A table constraint.
#[derive(Debug, Clone, PartialEq)]
pub enum Constraint {
    /// `PRIMARY KEY`, backed by an index of the same name.
    PrimaryKey {
        /// Key columns.
        columns: Vec<String>,
    },
    /// `UNIQUE`, backed by an index of the same name.
    Unique {
        /// Covered columns.
        columns: Vec<String>,
    },
    /// `FOREIGN KEY`.
    ForeignKey {
        /// Referencing columns.
        columns: Vec<String>,
        /// Referenced table.
        references: String,
        /// Referenced columns.
        referenced_columns: Vec<String>,
        /// Delete behaviour.
        on_delete: OnDelete,
    },
}

impl Constraint {
    fn columns(&self) -> &[String] {
        match self {
            Constraint::PrimaryKey { columns }
            | Constraint::Unique { columns }
            | Constraint::ForeignKey { columns, .. } => columns,
        }
    }

    fn is_index_backed(&self) -> bool {
        !matches!(self, Constraint::ForeignKey { .. })
    }
}

/// An index.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexEntry {
    /// Indexed table.
    pub table: String,
    /// Indexed columns.
    pub columns: Vec<String>,
    /// Whether the index enforces uniqueness.
    pub unique: bool,
}

/// A table's shape, without rows.
#[derive(Debug, Clone, PartialEq)]
pub struct TableSnapshot {
    /// Columns in order.
    pub columns: Vec<ColumnDef>,
    /// Constraints by name.
    pub constraints: BTreeMap<String, Constraint>,
}

/// The observable catalog: every table, column, constraint and index.
///
/// Bookkeeping tables are not part of it.
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogSnapshot {
    /// Tables by name.
    pub tables: BTreeMap<String, TableSnapshot>,
    /// Indexes by name.
    pub indexes: BTreeMap<String, IndexEntry>,
}

#[derive(Debug, Clone)]
struct Table {
    columns: Vec<ColumnDef>,
    constraints: BTreeMap<String, Constraint>,
    rows: Vec<Row>,
    next_id: i64,
}

impl Table {
    fn new(columns: Vec<ColumnDef>) -> Self {
        Self {
            columns,
            constraints: BTreeMap::new(),
            rows: Vec::new(),
            next_id: 1,
        }
    }

    fn column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name.as_str() == name)
    }

    fn has_column(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    fn next_serial(&mut self) -> Value {
        let id = self.next_id;
        self.next_id += 1;
        Value::Int(id)
    }

    /// Fills omitted columns and checks nullability.
    fn complete_row(&mut self, table: &str, mut provided: Row) -> Result<Row, MemError> {
        if let Some(unknown) = provided.keys().find(|k| !self.has_column(k)) {
            return Err(MemError::NoSuchColumn {
                table: table.to_string(),
                column: unknown.clone(),
            });
        }
        let mut row = Row::new();
        for column in self.columns.clone() {
            let name = column.name.as_str();
            let value = match provided.remove(name) {
                Some(value) => {
                    if let (ColumnType::Serial, Value::Int(id)) = (column.ty, &value) {
                        self.next_id = self.next_id.max(id + 1);
                    }
                    value
                }
                None if column.ty == ColumnType::Serial => self.next_serial(),
                None => column.default.clone().unwrap_or(Value::Null),
            };
            if value.is_null() && (!column.nullable || column.ty == ColumnType::Serial) {
                return Err(MemError::NotNull {
                    table: table.to_string(),
                    column: name.to_string(),
                });
            }
            row.insert(name.to_string(), value);
        }
        Ok(row)
    }
}

fn cell<'a>(row: &'a Row, column: &str) -> &'a Value {
    static NULL: Value = Value::Null;
    row.get(column).unwrap_or(&NULL)
}

fn names<'a>(idents: impl IntoIterator<Item = &'a grc_migrate_core::Ident>) -> Vec<String> {
    idents.into_iter().map(|i| i.to_string()).collect()
}

fn has_duplicates(rows: &[Row], columns: &[String]) -> bool {
    let keys: Vec<Vec<&Value>> = rows
        .iter()
        .map(|row| columns.iter().map(|c| cell(row, c)).collect::<Vec<_>>())
        .filter(|key| !key.iter().any(|v| v.is_null()))
        .collect();
    keys.iter()
        .enumerate()
        .any(|(i, key)| keys[i + 1..].contains(key))
}

/// The whole in-memory database: schema, rows and bookkeeping.
#[derive(Debug, Clone, Default)]
pub(crate) struct MemDatabase {
    tables: BTreeMap<String, Table>,
    indexes: BTreeMap<String, IndexEntry>,
    bookkeeping: bool,
    applied: BTreeMap<Version, AppliedMigration>,
    dirty: BTreeMap<Version, DirtyMarker>,
}

impl MemDatabase {
    fn table(&self, name: &str) -> Result<&Table, MemError> {
        self.tables
            .get(name)
            .ok_or_else(|| MemError::NoSuchTable(name.to_string()))
    }

    fn table_mut(&mut self, name: &str) -> Result<&mut Table, MemError> {
        self.tables
            .get_mut(name)
            .ok_or_else(|| MemError::NoSuchTable(name.to_string()))
    }

    fn require_columns<'a>(
        &self,
        table: &str,
        columns: impl IntoIterator<Item = &'a String>,
    ) -> Result<(), MemError> {
        let t = self.table(table)?;
        for column in columns {
            if !t.has_column(column) {
                return Err(MemError::NoSuchColumn {
                    table: table.to_string(),
                    column: column.clone(),
                });
            }
        }
        Ok(())
    }

    /// Foreign keys on other tables that reference `table`, optionally
    /// restricted to those covering `column`.
    fn referencing(&self, table: &str, column: Option<&str>) -> Option<String> {
        self.tables
            .iter()
            .filter(|(name, _)| name.as_str() != table)
            .flat_map(|(name, t)| t.constraints.iter().map(move |(c, k)| (name, c, k)))
            .find_map(|(name, constraint, kind)| match kind {
                Constraint::ForeignKey {
                    references,
                    referenced_columns,
                    ..
                } if references == table
                    && column.is_none_or(|col| referenced_columns.iter().any(|c| c == col)) =>
                {
                    Some(format!("constraint {constraint} on table {name}"))
                }
                _ => None,
            })
    }

    /// Checks unique indexes and foreign keys of `name` as if it held `candidate`.
    fn check_table(&self, name: &str, candidate: &Table) -> Result<(), MemError> {
        for (index, entry) in self.indexes.iter().filter(|(_, e)| e.unique && e.table == name) {
            if has_duplicates(&candidate.rows, &entry.columns) {
                return Err(MemError::UniqueViolation(index.clone()));
            }
        }
        for (constraint, kind) in &candidate.constraints {
            let Constraint::ForeignKey {
                columns,
                references,
                referenced_columns,
                ..
            } = kind
            else {
                continue;
            };
            let referenced = if references == name {
                candidate
            } else {
                self.table(references)?
            };
            for row in &candidate.rows {
                let key: Vec<&Value> = columns.iter().map(|c| cell(row, c)).collect();
                if key.iter().any(|v| v.is_null()) {
                    continue;
                }
                let found = referenced.rows.iter().any(|r| {
                    referenced_columns
                        .iter()
                        .zip(&key)
                        .all(|(c, v)| cell(r, c) == *v)
                });
                if !found {
                    return Err(MemError::ForeignKeyViolation {
                        table: name.to_string(),
                        constraint: constraint.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    pub(crate) fn probe(&self, query: &SchemaGuardQuery) -> bool {
        match query {
            SchemaGuardQuery::Table { table } => self.tables.contains_key(table.as_str()),
            SchemaGuardQuery::Column { table, column } => self
                .tables
                .get(table.as_str())
                .is_some_and(|t| t.has_column(column.as_str())),
            SchemaGuardQuery::Index { table, index } => self
                .indexes
                .get(index.as_str())
                .is_some_and(|i| i.table == table.as_str()),
            SchemaGuardQuery::Constraint { table, constraint } => self
                .tables
                .get(table.as_str())
                .is_some_and(|t| t.constraints.contains_key(constraint.as_str())),
        }
    }

    pub(crate) fn execute(&mut self, statement: &Statement) -> Result<u64, MemError> {
        match statement {
            Statement::CreateTable(def) => self.create_table(def).map(|_| 0),
            Statement::DropTable { table } => self.drop_table(table.as_str()).map(|_| 0),
            Statement::AddColumn { table, column } => {
                self.add_column(table.as_str(), column).map(|_| 0)
            }
            Statement::DropColumn { table, column } => {
                self.drop_column(table.as_str(), column.as_str()).map(|_| 0)
            }
            Statement::SetNullable {
                table,
                column,
                nullable,
            } => self
                .set_nullable(table.as_str(), column.as_str(), *nullable)
                .map(|_| 0),
            Statement::CreateIndex(def) => self.create_index(def).map(|_| 0),
            Statement::DropIndex { name, .. } => self.drop_index(name.as_str()).map(|_| 0),
            Statement::RenameIndex { from, to, .. } => {
                self.rename_index(from.as_str(), to.as_str()).map(|_| 0)
            }
            Statement::AddForeignKey(def) => self.add_foreign_key(def).map(|_| 0),
            Statement::DropForeignKey { table, name } => {
                self.drop_constraint(table.as_str(), name.as_str()).map(|_| 0)
            }
            Statement::InsertSelect(copy) => self.insert_select(copy),
        }
    }

    fn create_table(&mut self, def: &TableDef) -> Result<(), MemError> {
        let name = def.name.as_str();
        if self.tables.contains_key(name) {
            return Err(MemError::RelationExists(name.to_string()));
        }
        let mut columns: Vec<ColumnDef> = Vec::with_capacity(def.columns.len());
        for column in &def.columns {
            if columns.iter().any(|c| c.name == column.name) {
                return Err(MemError::ColumnExists {
                    table: name.to_string(),
                    column: column.name.to_string(),
                });
            }
            let mut column = column.clone();
            if def.primary_key.contains(&column.name) {
                column.nullable = false;
            }
            columns.push(column);
        }
        let mut table = Table::new(columns);

        let mut backed = Vec::new();
        if !def.primary_key.is_empty() {
            backed.push((
                format!("{name}_pkey"),
                Constraint::PrimaryKey {
                    columns: names(&def.primary_key),
                },
            ));
        }
        for unique in &def.uniques {
            backed.push((
                unique.name.to_string(),
                Constraint::Unique {
                    columns: names(&unique.columns),
                },
            ));
        }
        for (i, (index, constraint)) in backed.iter().enumerate() {
            if self.indexes.contains_key(index) || backed[..i].iter().any(|(n, _)| n == index) {
                return Err(MemError::RelationExists(index.clone()));
            }
            if let Some(column) = constraint.columns().iter().find(|c| !table.has_column(c)) {
                return Err(MemError::NoSuchColumn {
                    table: name.to_string(),
                    column: column.clone(),
                });
            }
        }

        for (index, constraint) in backed {
            self.indexes.insert(
                index.clone(),
                IndexEntry {
                    table: name.to_string(),
                    columns: constraint.columns().to_vec(),
                    unique: true,
                },
            );
            table.constraints.insert(index, constraint);
        }
        self.tables.insert(name.to_string(), table);
        Ok(())
    }

    fn drop_table(&mut self, name: &str) -> Result<(), MemError> {
        self.table(name)?;
        if let Some(dependent) = self.referencing(name, None) {
            return Err(MemError::Dependency {
                object: format!("table {name}"),
                dependent,
            });
        }
        self.indexes.retain(|_, entry| entry.table != name);
        self.tables.remove(name);
        Ok(())
    }

    fn add_column(&mut self, name: &str, column: &ColumnDef) -> Result<(), MemError> {
        let table = self.table_mut(name)?;
        if table.has_column(column.name.as_str()) {
            return Err(MemError::ColumnExists {
                table: name.to_string(),
                column: column.name.to_string(),
            });
        }
        let serial = column.ty == ColumnType::Serial;
        if !table.rows.is_empty() && !column.nullable && column.default.is_none() && !serial {
            return Err(MemError::NotNull {
                table: name.to_string(),
                column: column.name.to_string(),
            });
        }
        for i in 0..table.rows.len() {
            let value = if serial {
                table.next_serial()
            } else {
                column.default.clone().unwrap_or(Value::Null)
            };
            table.rows[i].insert(column.name.to_string(), value);
        }
        table.columns.push(column.clone());
        Ok(())
    }

    fn drop_column(&mut self, name: &str, column: &str) -> Result<(), MemError> {
        self.require_columns(name, [&column.to_string()])?;
        if let Some(dependent) = self.referencing(name, Some(column)) {
            return Err(MemError::Dependency {
                object: format!("column {column} of table {name}"),
                dependent,
            });
        }
        self.indexes
            .retain(|_, entry| !(entry.table == name && entry.columns.iter().any(|c| c == column)));
        let table = self.table_mut(name)?;
        table
            .constraints
            .retain(|_, constraint| !constraint.columns().iter().any(|c| c == column));
        table.columns.retain(|c| c.name.as_str() != column);
        for row in &mut table.rows {
            row.remove(column);
        }
        Ok(())
    }

    fn set_nullable(&mut self, name: &str, column: &str, nullable: bool) -> Result<(), MemError> {
        self.require_columns(name, [&column.to_string()])?;
        let table = self.table_mut(name)?;
        if !nullable && table.rows.iter().any(|r| cell(r, column).is_null()) {
            return Err(MemError::NotNull {
                table: name.to_string(),
                column: column.to_string(),
            });
        }
        for def in table.columns.iter_mut().filter(|c| c.name.as_str() == column) {
            def.nullable = nullable;
        }
        Ok(())
    }

    fn create_index(&mut self, def: &IndexDef) -> Result<(), MemError> {
        let table = def.table.as_str();
        let columns = names(&def.columns);
        self.require_columns(table, &columns)?;
        if self.indexes.contains_key(def.name.as_str()) {
            return Err(MemError::RelationExists(def.name.to_string()));
        }
        if def.unique && has_duplicates(&self.table(table)?.rows, &columns) {
            return Err(MemError::UniqueViolation(def.name.to_string()));
        }
        self.indexes.insert(
            def.name.to_string(),
            IndexEntry {
                table: table.to_string(),
                columns,
                unique: def.unique,
            },
        );
        Ok(())
    }

    fn backing_constraint(&self, index: &str) -> Option<(&String, &Constraint)> {
        let entry = self.indexes.get(index)?;
        self.tables
            .get(&entry.table)?
            .constraints
            .get_key_value(index)
            .filter(|(_, c)| c.is_index_backed())
    }

    fn drop_index(&mut self, name: &str) -> Result<(), MemError> {
        if !self.indexes.contains_key(name) {
            return Err(MemError::NoSuchIndex(name.to_string()));
        }
        if let Some((constraint, _)) = self.backing_constraint(name) {
            return Err(MemError::Dependency {
                object: format!("index {name}"),
                dependent: format!("constraint {constraint}"),
            });
        }
        self.indexes.remove(name);
        Ok(())
    }

    fn rename_index(&mut self, from: &str, to: &str) -> Result<(), MemError> {
        if self.indexes.contains_key(to) {
            return Err(MemError::RelationExists(to.to_string()));
        }
        let backed = self.backing_constraint(from).is_some();
        let entry = self
            .indexes
            .remove(from)
            .ok_or_else(|| MemError::NoSuchIndex(from.to_string()))?;
        if backed {
            let table = self.table_mut(&entry.table)?;
            if let Some(constraint) = table.constraints.remove(from) {
                table.constraints.insert(to.to_string(), constraint);
            }
        }
        self.indexes.insert(to.to_string(), entry);
        Ok(())
    }

    fn add_foreign_key(&mut self, def: &ForeignKeyDef) -> Result<(), MemError> {
        let name = def.table.as_str();
        let references = def.references.as_str();
        let columns = names(&def.columns);
        let referenced_columns = names(&def.referenced_columns);
        self.require_columns(name, &columns)?;
        self.require_columns(references, &referenced_columns)?;
        if self.table(name)?.constraints.contains_key(def.name.as_str()) {
            return Err(MemError::ConstraintExists {
                table: name.to_string(),
                constraint: def.name.to_string(),
            });
        }
        let keyed = self
            .indexes
            .values()
            .any(|e| e.unique && e.table == references && e.columns == referenced_columns);
        if !keyed {
            return Err(MemError::NoUniqueKey(references.to_string()));
        }

        let mut candidate = self.table(name)?.clone();
        candidate.constraints.insert(
            def.name.to_string(),
            Constraint::ForeignKey {
                columns,
                references: references.to_string(),
                referenced_columns,
                on_delete: def.on_delete,
            },
        );
        self.check_table(name, &candidate)?;
        self.tables.insert(name.to_string(), candidate);
        Ok(())
    }

    fn drop_constraint(&mut self, name: &str, constraint: &str) -> Result<(), MemError> {
        let kind = self
            .table(name)?
            .constraints
            .get(constraint)
            .cloned()
            .ok_or_else(|| MemError::NoSuchConstraint {
                table: name.to_string(),
                constraint: constraint.to_string(),
            })?;
        if kind.is_index_backed() {
            let dependent = self.tables.iter().find_map(|(other, t)| {
                t.constraints.iter().find_map(|(c, k)| match k {
                    Constraint::ForeignKey {
                        references,
                        referenced_columns,
                        ..
                    } if references == name && referenced_columns == kind.columns() => {
                        Some(format!("constraint {c} on table {other}"))
                    }
                    _ => None,
                })
            });
            if let Some(dependent) = dependent {
                return Err(MemError::Dependency {
                    object: format!("constraint {constraint} on table {name}"),
                    dependent,
                });
            }
            self.indexes.remove(constraint);
        }
        self.table_mut(name)?.constraints.remove(constraint);
        Ok(())
    }

    fn insert_select(&mut self, copy: &InsertSelect) -> Result<u64, MemError> {
        let target = copy.target.as_str();
        let source = copy.source.as_str();
        let mut source_columns: Vec<String> = Vec::new();
        for (_, projection) in &copy.projections {
            if let Projection::Column(c) | Projection::PercentageStatus(c) = projection {
                source_columns.push(c.to_string());
            }
        }
        for Filter::NotNull(c) in &copy.filters {
            source_columns.push(c.to_string());
        }
        self.require_columns(source, &source_columns)?;

        let selected: Vec<Row> = self
            .table(source)?
            .rows
            .iter()
            .filter(|row| {
                copy.filters
                    .iter()
                    .all(|Filter::NotNull(c)| !cell(row, c.as_str()).is_null())
            })
            .cloned()
            .collect();

        let now = Utc::now();
        let mut candidate = self.table(target)?.clone();
        for row in &selected {
            let mut provided = Row::new();
            for (column, projection) in &copy.projections {
                let value = match projection {
                    Projection::Column(c) => cell(row, c.as_str()).clone(),
                    Projection::Constant(value) => value.clone(),
                    Projection::Now => Value::Timestamp(now),
                    Projection::PercentageStatus(c) => {
                        let percentage = match cell(row, c.as_str()) {
                            Value::Int(n) => Some(*n),
                            Value::Null => None,
                            _ => {
                                return Err(MemError::NotAnInteger {
                                    table: source.to_string(),
                                    column: c.to_string(),
                                });
                            }
                        };
                        Value::from(FulfillmentStatus::from_percentage(percentage).as_str())
                    }
                };
                provided.insert(column.to_string(), value);
            }
            let completed = candidate.complete_row(target, provided)?;
            candidate.rows.push(completed);
        }
        self.check_table(target, &candidate)?;
        self.tables.insert(target.to_string(), candidate);
        Ok(selected.len() as u64)
    }

    pub(crate) fn insert_row(&mut self, name: &str, provided: Row) -> Result<Row, MemError> {
        let mut candidate = self.table(name)?.clone();
        let row = candidate.complete_row(name, provided)?;
        candidate.rows.push(row.clone());
        self.check_table(name, &candidate)?;
        self.tables.insert(name.to_string(), candidate);
        Ok(row)
    }

    pub(crate) fn rows(&self, name: &str) -> Result<Vec<Row>, MemError> {
        Ok(self.table(name)?.rows.clone())
    }

    pub(crate) fn fetch_ids(&self, name: &str, column: &str) -> Result<Vec<i64>, MemError> {
        self.require_columns(name, [&column.to_string()])?;
        let mut ids = Vec::new();
        for row in &self.table(name)?.rows {
            match cell(row, column) {
                Value::Int(id) => ids.push(*id),
                Value::Null => {}
                _ => {
                    return Err(MemError::NotAnInteger {
                        table: name.to_string(),
                        column: column.to_string(),
                    });
                }
            }
        }
        ids.sort_unstable();
        Ok(ids)
    }

    pub(crate) fn count_rows(&self, name: &str) -> Result<u64, MemError> {
        Ok(self.table(name)?.rows.len() as u64)
    }

    pub(crate) fn catalog(&self) -> CatalogSnapshot {
        CatalogSnapshot {
            tables: self
                .tables
                .iter()
                .map(|(name, t)| {
                    (
                        name.clone(),
                        TableSnapshot {
                            columns: t.columns.clone(),
                            constraints: t.constraints.clone(),
                        },
                    )
                })
                .collect(),
            indexes: self.indexes.clone(),
        }
    }

    pub(crate) fn ensure_bookkeeping(&mut self) {
        self.bookkeeping = true;
    }

    fn require_bookkeeping(&self) -> Result<(), MemError> {
        if self.bookkeeping {
            Ok(())
        } else {
            Err(MemError::MissingBookkeeping)
        }
    }

    pub(crate) fn applied(&self) -> Result<Vec<AppliedMigration>, MemError> {
        self.require_bookkeeping()?;
        Ok(self.applied.values().cloned().collect())
    }

    pub(crate) fn dirty(&self) -> Result<Vec<DirtyMarker>, MemError> {
        self.require_bookkeeping()?;
        Ok(self.dirty.values().cloned().collect())
    }

    pub(crate) fn record_applied(&mut self, record: &AppliedMigration) -> Result<(), MemError> {
        self.require_bookkeeping()?;
        if self.applied.contains_key(&record.version) {
            return Err(MemError::DuplicateRecord {
                table: "_grc_migrations",
                version: record.version.to_string(),
            });
        }
        self.applied.insert(record.version.clone(), record.clone());
        Ok(())
    }

    pub(crate) fn remove_applied(&mut self, version: &Version) -> Result<(), MemError> {
        self.require_bookkeeping()?;
        self.applied.remove(version);
        Ok(())
    }

    pub(crate) fn mark_dirty(&mut self, marker: &DirtyMarker) -> Result<(), MemError> {
        self.require_bookkeeping()?;
        if self.dirty.contains_key(&marker.version) {
            return Err(MemError::DuplicateRecord {
                table: "_grc_migrations_dirty",
                version: marker.version.to_string(),
            });
        }
        self.dirty.insert(marker.version.clone(), marker.clone());
        Ok(())
    }

    pub(crate) fn clear_dirty(&mut self, version: &Version) -> Result<(), MemError> {
        self.require_bookkeeping()?;
        self.dirty.remove(version);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tenant_table() -> Statement {
        Statement::CreateTable(
            TableDef::new("tenant")
                .with_id()
                .column(ColumnDef::new("code", ColumnType::Varchar(50)))
                .unique("uniq_tenant_code", ["code"]),
        )
    }

    fn row(values: &[(&str, Value)]) -> Row {
        values
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn create_table_registers_key_indexes() {
        let mut db = MemDatabase::default();
        db.execute(&tenant_table()).unwrap();
        assert!(db.probe(&SchemaGuardQuery::index("tenant", "tenant_pkey")));
        assert!(db.probe(&SchemaGuardQuery::constraint("tenant", "uniq_tenant_code")));
        assert!(matches!(
            db.execute(&tenant_table()),
            Err(MemError::RelationExists(name)) if name == "tenant"
        ));
    }

    #[test]
    fn serial_ids_follow_explicit_ids() {
        let mut db = MemDatabase::default();
        db.execute(&tenant_table()).unwrap();
        db.insert_row("tenant", row(&[("id", Value::Int(5)), ("code", "a".into())]))
            .unwrap();
        let second = db.insert_row("tenant", row(&[("code", "b".into())])).unwrap();
        assert_eq!(second["id"], Value::Int(6));
        assert!(matches!(
            db.insert_row("tenant", row(&[("code", "b".into())])),
            Err(MemError::UniqueViolation(name)) if name == "uniq_tenant_code"
        ));
        assert_eq!(db.count_rows("tenant").unwrap(), 2);
    }

    #[test]
    fn not_null_column_needs_default_on_populated_table() {
        let mut db = MemDatabase::default();
        db.execute(&tenant_table()).unwrap();
        db.insert_row("tenant", row(&[("code", "a".into())])).unwrap();
        let add = |column: ColumnDef| Statement::AddColumn {
            table: "tenant".into(),
            column,
        };
        assert!(matches!(
            db.execute(&add(ColumnDef::new("status", ColumnType::Text))),
            Err(MemError::NotNull { .. })
        ));
        db.execute(&add(ColumnDef::new("status", ColumnType::Text).default("active")))
            .unwrap();
        assert_eq!(db.rows("tenant").unwrap()[0]["status"], Value::from("active"));
    }

    #[test]
    fn referenced_objects_cannot_be_dropped() {
        let mut db = MemDatabase::default();
        db.execute(&tenant_table()).unwrap();
        db.execute(&Statement::CreateTable(
            TableDef::new("risk")
                .with_id()
                .column(ColumnDef::new("tenant_id", ColumnType::Integer).nullable()),
        ))
        .unwrap();
        db.execute(&Statement::AddForeignKey(ForeignKeyDef::new(
            "fk_risk_tenant",
            "risk",
            "tenant_id",
            "tenant",
        )))
        .unwrap();

        assert!(matches!(
            db.execute(&Statement::DropTable {
                table: "tenant".into()
            }),
            Err(MemError::Dependency { .. })
        ));
        assert!(matches!(
            db.insert_row("risk", row(&[("tenant_id", Value::Int(99))])),
            Err(MemError::ForeignKeyViolation { .. })
        ));

        db.execute(&Statement::DropColumn {
            table: "risk".into(),
            column: "tenant_id".into(),
        })
        .unwrap();
        assert!(!db.probe(&SchemaGuardQuery::constraint("risk", "fk_risk_tenant")));
        db.execute(&Statement::DropTable {
            table: "tenant".into(),
        })
        .unwrap();
        assert!(!db.probe(&SchemaGuardQuery::index("tenant", "uniq_tenant_code")));
    }

    #[test]
    fn constraint_indexes_follow_renames() {
        let mut db = MemDatabase::default();
        db.execute(&tenant_table()).unwrap();
        assert!(matches!(
            db.execute(&Statement::DropIndex {
                table: "tenant".into(),
                name: "uniq_tenant_code".into()
            }),
            Err(MemError::Dependency { .. })
        ));
        db.execute(&Statement::RenameIndex {
            table: "tenant".into(),
            from: "uniq_tenant_code".into(),
            to: "uniq_4e59c462".into(),
        })
        .unwrap();
        assert!(db.probe(&SchemaGuardQuery::constraint("tenant", "uniq_4e59c462")));
        assert!(!db.probe(&SchemaGuardQuery::index("tenant", "uniq_tenant_code")));
    }

    #[test]
    fn insert_select_maps_percentages() {
        let mut db = MemDatabase::default();
        db.execute(&Statement::CreateTable(
            TableDef::new("requirement")
                .with_id()
                .column(ColumnDef::new("fulfillment_percentage", ColumnType::Integer).nullable()),
        ))
        .unwrap();
        db.execute(&Statement::CreateTable(
            TableDef::new("fulfillment")
                .with_id()
                .column(ColumnDef::new("requirement_id", ColumnType::Integer))
                .column(ColumnDef::new("status", ColumnType::Varchar(20)))
                .unique("uniq_fulfillment_requirement", ["requirement_id"]),
        ))
        .unwrap();
        for percentage in [Value::Null, Value::Int(40), Value::Int(100)] {
            db.insert_row("requirement", row(&[("fulfillment_percentage", percentage)]))
                .unwrap();
        }

        let copy = InsertSelect::new("fulfillment", "requirement")
            .copy("requirement_id", "id")
            .project(
                "status",
                Projection::PercentageStatus("fulfillment_percentage".into()),
            );
        assert_eq!(db.execute(&Statement::InsertSelect(copy.clone())).unwrap(), 3);
        let statuses: Vec<Value> = db
            .rows("fulfillment")
            .unwrap()
            .into_iter()
            .map(|mut r| r.remove("status").unwrap())
            .collect();
        assert_eq!(
            statuses,
            ["not_started", "in_progress", "implemented"].map(Value::from)
        );

        assert!(matches!(
            db.execute(&Statement::InsertSelect(copy)),
            Err(MemError::UniqueViolation(_))
        ));
        assert_eq!(db.count_rows("fulfillment").unwrap(), 3);
    }

    #[test]
    fn bookkeeping_must_exist_before_use() {
        let mut db = MemDatabase::default();
        assert!(matches!(db.applied(), Err(MemError::MissingBookkeeping)));
        db.ensure_bookkeeping();
        assert!(db.applied().unwrap().is_empty());
    }
}
