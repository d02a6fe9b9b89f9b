//! Statements executed by migration units.
//!
//! Statements are structured data rather than SQL strings. Every name is an
//! [`Ident`], every value is a [`Value`], and backends decide how to render
//! them. The `Display` implementation renders PostgreSQL text with values
//! inlined as literals; it is what error reports quote as the failing
//! statement.

use std::fmt::{self, Write as _};

use chrono::{DateTime, Utc};

use crate::backfill::FulfillmentStatus;
use crate::error::MigrationError;
use crate::ident::Ident;

/// A scalar value used for defaults, constants and in-memory rows.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// SQL `NULL`.
    Null,
    /// A boolean.
    Bool(bool),
    /// An integer.
    Int(i64),
    /// A string.
    Text(String),
    /// A point in time.
    Timestamp(DateTime<Utc>),
}

impl Value {
    /// Writes the value as a SQL literal.
    pub fn write_literal(&self, out: &mut impl fmt::Write) -> fmt::Result {
        match self {
            Value::Null => out.write_str("NULL"),
            Value::Bool(true) => out.write_str("TRUE"),
            Value::Bool(false) => out.write_str("FALSE"),
            Value::Int(n) => write!(out, "{n}"),
            Value::Text(s) => write!(out, "'{}'", s.replace('\'', "''")),
            Value::Timestamp(ts) => write!(out, "'{}'::TIMESTAMPTZ", ts.to_rfc3339()),
        }
    }

    /// Returns `true` for [`Value::Null`].
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

/// Column types available to migrations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    /// Auto-incrementing integer key.
    Serial,
    /// 32-bit integer.
    Integer,
    /// 64-bit integer.
    BigInt,
    /// Bounded string.
    Varchar(u16),
    /// Unbounded string.
    Text,
    /// Boolean flag.
    Boolean,
    /// Calendar date.
    Date,
    /// Timestamp with time zone.
    Timestamp,
    /// JSON document.
    Json,
    /// `NUMERIC(precision, scale)`.
    Decimal(u8, u8),
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnType::Serial => f.write_str("INTEGER GENERATED BY DEFAULT AS IDENTITY"),
            ColumnType::Integer => f.write_str("INTEGER"),
            ColumnType::BigInt => f.write_str("BIGINT"),
            ColumnType::Varchar(len) => write!(f, "VARCHAR({len})"),
            ColumnType::Text => f.write_str("TEXT"),
            ColumnType::Boolean => f.write_str("BOOLEAN"),
            ColumnType::Date => f.write_str("DATE"),
            ColumnType::Timestamp => f.write_str("TIMESTAMPTZ"),
            ColumnType::Json => f.write_str("JSONB"),
            ColumnType::Decimal(precision, scale) => write!(f, "NUMERIC({precision}, {scale})"),
        }
    }
}

/// A column definition.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDef {
    /// Column name.
    pub name: Ident,
    /// Column type.
    pub ty: ColumnType,
    /// Whether `NULL` is allowed.
    pub nullable: bool,
    /// Default applied when an insert omits the column.
    pub default: Option<Value>,
}

impl ColumnDef {
    /// A `NOT NULL` column without default.
    pub fn new(name: impl Into<Ident>, ty: ColumnType) -> Self {
        Self {
            name: name.into(),
            ty,
            nullable: false,
            default: None,
        }
    }

    /// The conventional `id` auto-increment key.
    pub fn id() -> Self {
        Self::new("id", ColumnType::Serial)
    }

    /// Allows `NULL`.
    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    /// Sets the column default.
    pub fn default(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    fn write_sql(&self, out: &mut impl fmt::Write) -> fmt::Result {
        write!(out, "\"{}\" {}", self.name, self.ty)?;
        if let Some(default) = &self.default {
            out.write_str(" DEFAULT ")?;
            default.write_literal(out)?;
        }
        if !self.nullable || self.ty == ColumnType::Serial {
            out.write_str(" NOT NULL")?;
        }
        Ok(())
    }
}

/// A named `UNIQUE` constraint declared with a table.
#[derive(Debug, Clone, PartialEq)]
pub struct UniqueDef {
    /// Constraint name.
    pub name: Ident,
    /// Covered columns.
    pub columns: Vec<Ident>,
}

/// A table definition.
#[derive(Debug, Clone, PartialEq)]
pub struct TableDef {
    /// Table name.
    pub name: Ident,
    /// Columns in declaration order.
    pub columns: Vec<ColumnDef>,
    /// Primary key columns.
    pub primary_key: Vec<Ident>,
    /// Unique constraints.
    pub uniques: Vec<UniqueDef>,
}

impl TableDef {
    /// Starts a table definition.
    pub fn new(name: impl Into<Ident>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
            primary_key: Vec::new(),
            uniques: Vec::new(),
        }
    }

    /// Adds an `id` serial column and makes it the primary key.
    pub fn with_id(self) -> Self {
        self.column(ColumnDef::id()).primary_key(["id"])
    }

    /// Adds a column.
    pub fn column(mut self, column: ColumnDef) -> Self {
        self.columns.push(column);
        self
    }

    /// Sets the primary key.
    pub fn primary_key<I: Into<Ident>>(mut self, columns: impl IntoIterator<Item = I>) -> Self {
        self.primary_key = columns.into_iter().map(Into::into).collect();
        self
    }

    /// Adds a unique constraint.
    pub fn unique<I: Into<Ident>>(
        mut self,
        name: impl Into<Ident>,
        columns: impl IntoIterator<Item = I>,
    ) -> Self {
        self.uniques.push(UniqueDef {
            name: name.into(),
            columns: columns.into_iter().map(Into::into).collect(),
        });
        self
    }

    /// Name Postgres gives the primary key constraint.
    pub fn primary_key_name(table: &Ident) -> Result<Ident, MigrationError> {
        table.decorate("", "_pkey")
    }
}

/// An index definition.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexDef {
    /// Index name.
    pub name: Ident,
    /// Indexed table.
    pub table: Ident,
    /// Indexed columns.
    pub columns: Vec<Ident>,
    /// Whether the index enforces uniqueness.
    pub unique: bool,
}

impl IndexDef {
    /// A non-unique index.
    pub fn new<I: Into<Ident>>(
        name: impl Into<Ident>,
        table: impl Into<Ident>,
        columns: impl IntoIterator<Item = I>,
    ) -> Self {
        Self {
            name: name.into(),
            table: table.into(),
            columns: columns.into_iter().map(Into::into).collect(),
            unique: false,
        }
    }

    /// Makes the index unique.
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }
}

/// Referential action on delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OnDelete {
    /// Reject deletes of referenced rows.
    #[default]
    Restrict,
    /// Delete referencing rows.
    Cascade,
    /// Null out referencing columns.
    SetNull,
}

impl fmt::Display for OnDelete {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OnDelete::Restrict => f.write_str("RESTRICT"),
            OnDelete::Cascade => f.write_str("CASCADE"),
            OnDelete::SetNull => f.write_str("SET NULL"),
        }
    }
}

/// A foreign key constraint.
#[derive(Debug, Clone, PartialEq)]
pub struct ForeignKeyDef {
    /// Constraint name.
    pub name: Ident,
    /// Referencing table.
    pub table: Ident,
    /// Referencing columns.
    pub columns: Vec<Ident>,
    /// Referenced table.
    pub references: Ident,
    /// Referenced columns.
    pub referenced_columns: Vec<Ident>,
    /// Delete behaviour.
    pub on_delete: OnDelete,
}

impl ForeignKeyDef {
    /// Single-column key referencing `references(id)`.
    pub fn new(
        name: impl Into<Ident>,
        table: impl Into<Ident>,
        column: impl Into<Ident>,
        references: impl Into<Ident>,
    ) -> Self {
        Self {
            name: name.into(),
            table: table.into(),
            columns: vec![column.into()],
            references: references.into(),
            referenced_columns: vec![Ident::from_static("id")],
            on_delete: OnDelete::default(),
        }
    }

    /// Sets the delete behaviour.
    pub fn on_delete(mut self, action: OnDelete) -> Self {
        self.on_delete = action;
        self
    }
}

/// A value produced for one target column of an [`InsertSelect`].
#[derive(Debug, Clone, PartialEq)]
pub enum Projection {
    /// Copy a source column.
    Column(Ident),
    /// A constant, bound as a parameter by backends that support it.
    Constant(Value),
    /// The current timestamp.
    Now,
    /// Map a percentage source column onto a [`FulfillmentStatus`].
    PercentageStatus(Ident),
}

/// Row filter for an [`InsertSelect`].
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// Keep rows where the column is not `NULL`.
    NotNull(Ident),
}

/// A bounded copy: `INSERT INTO target (...) SELECT ... FROM source WHERE ...`.
#[derive(Debug, Clone, PartialEq)]
pub struct InsertSelect {
    /// Destination table.
    pub target: Ident,
    /// Source table.
    pub source: Ident,
    /// Target column and the value it receives.
    pub projections: Vec<(Ident, Projection)>,
    /// Conjunctive row filters on the source.
    pub filters: Vec<Filter>,
}

impl InsertSelect {
    /// Starts a copy from `source` into `target`.
    pub fn new(target: impl Into<Ident>, source: impl Into<Ident>) -> Self {
        Self {
            target: target.into(),
            source: source.into(),
            projections: Vec::new(),
            filters: Vec::new(),
        }
    }

    /// Copies `source_column` into `target_column`.
    pub fn copy(self, target_column: impl Into<Ident>, source_column: impl Into<Ident>) -> Self {
        self.project(target_column, Projection::Column(source_column.into()))
    }

    /// Adds a projection.
    pub fn project(mut self, target_column: impl Into<Ident>, projection: Projection) -> Self {
        self.projections.push((target_column.into(), projection));
        self
    }

    /// Adds a `column IS NOT NULL` filter.
    pub fn where_not_null(mut self, column: impl Into<Ident>) -> Self {
        self.filters.push(Filter::NotNull(column.into()));
        self
    }

    /// Writes the statement; `constant` renders each constant projection.
    pub fn write_sql<W: fmt::Write>(
        &self,
        out: &mut W,
        mut constant: impl FnMut(&mut W, &Value) -> fmt::Result,
    ) -> fmt::Result {
        write!(out, "INSERT INTO \"{}\" (", self.target)?;
        write_idents(out, self.projections.iter().map(|(column, _)| column))?;
        out.write_str(") SELECT ")?;
        for (i, (_, projection)) in self.projections.iter().enumerate() {
            if i > 0 {
                out.write_str(", ")?;
            }
            match projection {
                Projection::Column(column) => write!(out, "\"{column}\"")?,
                Projection::Constant(value) => constant(out, value)?,
                Projection::Now => out.write_str("NOW()")?,
                Projection::PercentageStatus(column) => write!(
                    out,
                    "CASE WHEN \"{column}\" >= {full} THEN '{implemented}' \
                     WHEN \"{column}\" > 0 THEN '{in_progress}' ELSE '{not_started}' END",
                    full = FulfillmentStatus::FULL_PERCENTAGE,
                    implemented = FulfillmentStatus::Implemented.as_str(),
                    in_progress = FulfillmentStatus::InProgress.as_str(),
                    not_started = FulfillmentStatus::NotStarted.as_str(),
                )?,
            }
        }
        write!(out, " FROM \"{}\"", self.source)?;
        for (i, filter) in self.filters.iter().enumerate() {
            out.write_str(if i == 0 { " WHERE " } else { " AND " })?;
            match filter {
                Filter::NotNull(column) => write!(out, "\"{column}\" IS NOT NULL")?,
            }
        }
        Ok(())
    }
}

/// One step of a migration unit.
#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    /// `CREATE TABLE`.
    CreateTable(TableDef),
    /// `DROP TABLE`.
    DropTable {
        /// Table to drop.
        table: Ident,
    },
    /// `ALTER TABLE ... ADD COLUMN`.
    AddColumn {
        /// Altered table.
        table: Ident,
        /// New column.
        column: ColumnDef,
    },
    /// `ALTER TABLE ... DROP COLUMN`.
    DropColumn {
        /// Altered table.
        table: Ident,
        /// Dropped column.
        column: Ident,
    },
    /// `ALTER TABLE ... ALTER COLUMN ... [SET|DROP] NOT NULL`.
    SetNullable {
        /// Altered table.
        table: Ident,
        /// Altered column.
        column: Ident,
        /// Target nullability.
        nullable: bool,
    },
    /// `CREATE [UNIQUE] INDEX`.
    CreateIndex(IndexDef),
    /// `DROP INDEX`.
    DropIndex {
        /// Indexed table, used by catalog probes.
        table: Ident,
        /// Index name.
        name: Ident,
    },
    /// `ALTER INDEX ... RENAME TO`.
    RenameIndex {
        /// Indexed table, used by catalog probes.
        table: Ident,
        /// Current name.
        from: Ident,
        /// New name.
        to: Ident,
    },
    /// `ALTER TABLE ... ADD CONSTRAINT ... FOREIGN KEY`.
    AddForeignKey(ForeignKeyDef),
    /// `ALTER TABLE ... DROP CONSTRAINT`.
    DropForeignKey {
        /// Constrained table.
        table: Ident,
        /// Constraint name.
        name: Ident,
    },
    /// Bounded data copy.
    InsertSelect(InsertSelect),
}

impl Statement {
    /// The table this statement touches, if any.
    pub fn table(&self) -> Option<&Ident> {
        match self {
            Statement::CreateTable(def) => Some(&def.name),
            Statement::DropTable { table }
            | Statement::AddColumn { table, .. }
            | Statement::DropColumn { table, .. }
            | Statement::SetNullable { table, .. }
            | Statement::DropIndex { table, .. }
            | Statement::RenameIndex { table, .. }
            | Statement::DropForeignKey { table, .. } => Some(table),
            Statement::CreateIndex(def) => Some(&def.table),
            Statement::AddForeignKey(def) => Some(&def.table),
            Statement::InsertSelect(copy) => Some(&copy.target),
        }
    }

    /// Checks every identifier carried by the statement.
    pub fn validate(&self) -> Result<(), MigrationError> {
        let mut idents: Vec<&Ident> = Vec::new();
        match self {
            Statement::CreateTable(def) => {
                idents.push(&def.name);
                idents.extend(def.columns.iter().map(|c| &c.name));
                idents.extend(def.primary_key.iter());
                for unique in &def.uniques {
                    idents.push(&unique.name);
                    idents.extend(unique.columns.iter());
                }
            }
            Statement::DropTable { table } => idents.push(table),
            Statement::AddColumn { table, column } => idents.extend([table, &column.name]),
            Statement::DropColumn { table, column }
            | Statement::SetNullable { table, column, .. } => idents.extend([table, column]),
            Statement::CreateIndex(def) => {
                idents.extend([&def.name, &def.table]);
                idents.extend(def.columns.iter());
            }
            Statement::DropIndex { table, name } | Statement::DropForeignKey { table, name } => {
                idents.extend([table, name])
            }
            Statement::RenameIndex { table, from, to } => idents.extend([table, from, to]),
            Statement::AddForeignKey(def) => {
                idents.extend([&def.name, &def.table, &def.references]);
                idents.extend(def.columns.iter());
                idents.extend(def.referenced_columns.iter());
            }
            Statement::InsertSelect(copy) => {
                idents.extend([&copy.target, &copy.source]);
                for (column, projection) in &copy.projections {
                    idents.push(column);
                    if let Projection::Column(c) | Projection::PercentageStatus(c) = projection {
                        idents.push(c);
                    }
                }
                for Filter::NotNull(column) in &copy.filters {
                    idents.push(column);
                }
            }
        }
        idents.into_iter().try_for_each(Ident::validate)
    }
}

fn write_idents<'a>(
    out: &mut impl fmt::Write,
    idents: impl IntoIterator<Item = &'a Ident>,
) -> fmt::Result {
    for (i, ident) in idents.into_iter().enumerate() {
        if i > 0 {
            out.write_str(", ")?;
        }
        write!(out, "\"{ident}\"")?;
    }
    Ok(())
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Statement::CreateTable(def) => {
                write!(f, "CREATE TABLE \"{}\" (", def.name)?;
                for (i, column) in def.columns.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    column.write_sql(f)?;
                }
                if !def.primary_key.is_empty() {
                    f.write_str(", PRIMARY KEY (")?;
                    write_idents(f, &def.primary_key)?;
                    f.write_char(')')?;
                }
                for unique in &def.uniques {
                    write!(f, ", CONSTRAINT \"{}\" UNIQUE (", unique.name)?;
                    write_idents(f, &unique.columns)?;
                    f.write_char(')')?;
                }
                f.write_char(')')
            }
            Statement::DropTable { table } => write!(f, "DROP TABLE \"{table}\""),
            Statement::AddColumn { table, column } => {
                write!(f, "ALTER TABLE \"{table}\" ADD COLUMN ")?;
                column.write_sql(f)
            }
            Statement::DropColumn { table, column } => {
                write!(f, "ALTER TABLE \"{table}\" DROP COLUMN \"{column}\"")
            }
            Statement::SetNullable {
                table,
                column,
                nullable,
            } => write!(
                f,
                "ALTER TABLE \"{table}\" ALTER COLUMN \"{column}\" {} NOT NULL",
                if *nullable { "DROP" } else { "SET" }
            ),
            Statement::CreateIndex(def) => {
                write!(
                    f,
                    "CREATE {}INDEX \"{}\" ON \"{}\" (",
                    if def.unique { "UNIQUE " } else { "" },
                    def.name,
                    def.table
                )?;
                write_idents(f, &def.columns)?;
                f.write_char(')')
            }
            Statement::DropIndex { name, .. } => write!(f, "DROP INDEX \"{name}\""),
            Statement::RenameIndex { from, to, .. } => {
                write!(f, "ALTER INDEX \"{from}\" RENAME TO \"{to}\"")
            }
            Statement::AddForeignKey(def) => {
                write!(
                    f,
                    "ALTER TABLE \"{}\" ADD CONSTRAINT \"{}\" FOREIGN KEY (",
                    def.table, def.name
                )?;
                write_idents(f, &def.columns)?;
                write!(f, ") REFERENCES \"{}\" (", def.references)?;
                write_idents(f, &def.referenced_columns)?;
                write!(f, ") ON DELETE {}", def.on_delete)
            }
            Statement::DropForeignKey { table, name } => {
                write!(f, "ALTER TABLE \"{table}\" DROP CONSTRAINT \"{name}\"")
            }
            Statement::InsertSelect(copy) => copy.write_sql(f, |f, value| value.write_literal(f)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_create_table() {
        let statement = Statement::CreateTable(
            TableDef::new("t")
                .with_id()
                .column(ColumnDef::new("name", ColumnType::Varchar(255)))
                .column(ColumnDef::new("active", ColumnType::Boolean).default(true))
                .unique("uniq_t_name", ["name"]),
        );
        assert_eq!(
            statement.to_string(),
            "CREATE TABLE \"t\" (\"id\" INTEGER GENERATED BY DEFAULT AS IDENTITY NOT NULL, \
             \"name\" VARCHAR(255) NOT NULL, \"active\" BOOLEAN DEFAULT TRUE NOT NULL, \
             PRIMARY KEY (\"id\"), CONSTRAINT \"uniq_t_name\" UNIQUE (\"name\"))"
        );
    }

    #[test]
    fn renders_foreign_key() {
        let statement = Statement::AddForeignKey(
            ForeignKeyDef::new("fk_risk_asset", "risk", "asset_id", "asset")
                .on_delete(OnDelete::Cascade),
        );
        assert_eq!(
            statement.to_string(),
            "ALTER TABLE \"risk\" ADD CONSTRAINT \"fk_risk_asset\" FOREIGN KEY (\"asset_id\") \
             REFERENCES \"asset\" (\"id\") ON DELETE CASCADE"
        );
    }

    #[test]
    fn renders_insert_select_with_status_mapping() {
        let copy = InsertSelect::new("fulfillment", "requirement")
            .project("tenant_id", Projection::Constant(Value::Int(7)))
            .copy("requirement_id", "id")
            .project("status", Projection::PercentageStatus("fulfillment_percentage".into()))
            .project("created_at", Projection::Now)
            .where_not_null("id");
        assert_eq!(
            Statement::InsertSelect(copy).to_string(),
            "INSERT INTO \"fulfillment\" (\"tenant_id\", \"requirement_id\", \"status\", \"created_at\") \
             SELECT 7, \"id\", CASE WHEN \"fulfillment_percentage\" >= 100 THEN 'implemented' \
             WHEN \"fulfillment_percentage\" > 0 THEN 'in_progress' ELSE 'not_started' END, NOW() \
             FROM \"requirement\" WHERE \"id\" IS NOT NULL"
        );
    }

    #[test]
    fn text_literals_are_escaped() {
        let mut out = String::new();
        Value::Text("it's".into()).write_literal(&mut out).unwrap();
        assert_eq!(out, "'it''s'");
    }

    #[test]
    fn validate_rejects_bad_identifiers_anywhere() {
        let statement = Statement::CreateIndex(IndexDef::new("idx_ok", "t", ["Bad Column"]));
        assert!(matches!(
            statement.validate(),
            Err(MigrationError::InvalidIdentifier(name)) if name == "Bad Column"
        ));
        let statement = Statement::DropColumn {
            table: "t".into(),
            column: "status".into(),
        };
        assert!(statement.validate().is_ok());
    }
}
