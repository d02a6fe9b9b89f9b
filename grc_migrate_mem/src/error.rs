/// Errors returned by the in-memory store.
///
/// Messages follow the wording PostgreSQL uses for the same failures.
#[derive(Debug, thiserror::Error)]
pub enum MemError {
    /// The table does not exist.
    #[error("relation \"{0}\" does not exist")]
    NoSuchTable(String),
    /// A table or index with the name already exists.
    #[error("relation \"{0}\" already exists")]
    RelationExists(String),
    /// The column does not exist.
    #[error("column \"{column}\" of relation \"{table}\" does not exist")]
    NoSuchColumn {
        /// Table name.
        table: String,
        /// Column name.
        column: String,
    },
    /// The column already exists.
    #[error("column \"{column}\" of relation \"{table}\" already exists")]
    ColumnExists {
        /// Table name.
        table: String,
        /// Column name.
        column: String,
    },
    /// The index does not exist.
    #[error("index \"{0}\" does not exist")]
    NoSuchIndex(String),
    /// The constraint does not exist.
    #[error("constraint \"{constraint}\" of relation \"{table}\" does not exist")]
    NoSuchConstraint {
        /// Table name.
        table: String,
        /// Constraint name.
        constraint: String,
    },
    /// The constraint already exists.
    #[error("constraint \"{constraint}\" for relation \"{table}\" already exists")]
    ConstraintExists {
        /// Table name.
        table: String,
        /// Constraint name.
        constraint: String,
    },
    /// Another object depends on the one being dropped.
    #[error("cannot drop {object} because {dependent} depends on it")]
    Dependency {
        /// The object being dropped.
        object: String,
        /// What depends on it.
        dependent: String,
    },
    /// A `NOT NULL` column would hold `NULL`.
    #[error("null value in column \"{column}\" of relation \"{table}\" violates not-null constraint")]
    NotNull {
        /// Table name.
        table: String,
        /// Column name.
        column: String,
    },
    /// A unique index would hold duplicates.
    #[error("duplicate key value violates unique constraint \"{0}\"")]
    UniqueViolation(String),
    /// A foreign key would point at a missing row.
    #[error("insert or update on table \"{table}\" violates foreign key constraint \"{constraint}\"")]
    ForeignKeyViolation {
        /// Referencing table.
        table: String,
        /// Constraint name.
        constraint: String,
    },
    /// A foreign key references columns without a unique index.
    #[error("there is no unique constraint matching given keys for referenced table \"{0}\"")]
    NoUniqueKey(String),
    /// An integer was expected.
    #[error("column \"{column}\" of relation \"{table}\" holds a non-integer value")]
    NotAnInteger {
        /// Table name.
        table: String,
        /// Column name.
        column: String,
    },
    /// `begin` while a transaction is open.
    #[error("there is already a transaction in progress")]
    TransactionInProgress,
    /// `commit` or `rollback` without a transaction.
    #[error("there is no transaction in progress")]
    NoTransaction,
    /// The bookkeeping tables were read before being created.
    #[error("relation \"_grc_migrations\" does not exist")]
    MissingBookkeeping,
    /// A bookkeeping row already exists.
    #[error("duplicate key value violates unique constraint \"{table}_pkey\" for version {version}")]
    DuplicateRecord {
        /// Bookkeeping table.
        table: &'static str,
        /// The version.
        version: String,
    },
    /// Failure injected by a test.
    #[error("injected failure: {0}")]
    Injected(String),
}
