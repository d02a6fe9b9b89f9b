//! Catalog existence probes.

use std::fmt;

use crate::error::MigrationError;
use crate::ident::Ident;

/// A read-only question about the live schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaGuardQuery {
    /// Does the table exist?
    Table {
        /// Table name.
        table: Ident,
    },
    /// Does the column exist on the table?
    Column {
        /// Table name.
        table: Ident,
        /// Column name.
        column: Ident,
    },
    /// Does the index exist on the table?
    Index {
        /// Table name.
        table: Ident,
        /// Index name.
        index: Ident,
    },
    /// Does the constraint (foreign key, unique, primary key) exist on the table?
    Constraint {
        /// Table name.
        table: Ident,
        /// Constraint name.
        constraint: Ident,
    },
}

impl SchemaGuardQuery {
    /// Probe for a table.
    pub fn table(table: impl Into<Ident>) -> Self {
        Self::Table {
            table: table.into(),
        }
    }

    /// Probe for a column.
    pub fn column(table: impl Into<Ident>, column: impl Into<Ident>) -> Self {
        Self::Column {
            table: table.into(),
            column: column.into(),
        }
    }

    /// Probe for an index.
    pub fn index(table: impl Into<Ident>, index: impl Into<Ident>) -> Self {
        Self::Index {
            table: table.into(),
            index: index.into(),
        }
    }

    /// Probe for a constraint.
    pub fn constraint(table: impl Into<Ident>, constraint: impl Into<Ident>) -> Self {
        Self::Constraint {
            table: table.into(),
            constraint: constraint.into(),
        }
    }

    /// The table the probe is scoped to.
    pub fn table_name(&self) -> &Ident {
        match self {
            Self::Table { table }
            | Self::Column { table, .. }
            | Self::Index { table, .. }
            | Self::Constraint { table, .. } => table,
        }
    }

    /// Checks every identifier in the probe.
    pub fn validate(&self) -> Result<(), MigrationError> {
        self.table_name().validate()?;
        match self {
            Self::Table { .. } => Ok(()),
            Self::Column { column: name, .. }
            | Self::Index { index: name, .. }
            | Self::Constraint {
                constraint: name, ..
            } => name.validate(),
        }
    }
}

impl fmt::Display for SchemaGuardQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Table { table } => write!(f, "table {table}"),
            Self::Column { table, column } => write!(f, "column {table}.{column}"),
            Self::Index { table, index } => write!(f, "index {index} on {table}"),
            Self::Constraint { table, constraint } => {
                write!(f, "constraint {constraint} on {table}")
            }
        }
    }
}

/// What to do when a catalog probe itself fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GuardPolicy {
    /// Abort the unit with [`MigrationError::GuardQuery`].
    #[default]
    Strict,
    /// Log a warning and treat the object as absent.
    AssumeAbsent,
}
