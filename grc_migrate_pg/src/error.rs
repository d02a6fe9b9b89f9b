/// Errors raised by the Postgres store.
#[derive(Debug, thiserror::Error)]
pub enum PgStoreError {
    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A bookkeeping row could not be read back.
    #[error("Invalid row in {table}: {reason}")]
    InvalidRecord {
        /// The bookkeeping table.
        table: &'static str,
        /// What was wrong with the row.
        reason: String,
    },
}
