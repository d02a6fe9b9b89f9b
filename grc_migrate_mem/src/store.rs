use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use grc_migrate_core::statement::{Statement, Value};
use grc_migrate_core::{
    AppliedMigration, BackendError, DirtyMarker, Executor, Ident, LockMode, MigrationStore,
    MigratorConfig, SchemaGuardQuery, StoreConnection, Version,
};

use crate::database::{CatalogSnapshot, MemDatabase, Row};
use crate::error::MemError;

#[derive(Debug, Default)]
struct Faults {
    statements: Vec<String>,
    probes: bool,
    history: bool,
}

#[derive(Debug, Default)]
struct Shared {
    db: MemDatabase,
    faults: Faults,
}

/// An in-memory migration store.
///
/// Useful for tests and dry runs. Clones share the same database, so a test
/// can hand one clone to a [`Migrator`](grc_migrate_core::Migrator) and
/// inspect rows and catalog through another. Uncommitted changes are visible
/// to every session; the runner lock keeps writers apart.
#[derive(Clone, Debug, Default)]
pub struct InMemoryStore {
    shared: Arc<Mutex<Shared>>,
    locks: Arc<Mutex<HashMap<String, Arc<AsyncMutex<()>>>>>,
}

impl InMemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        log::debug!("Creating a new InMemoryStore");
        Self::default()
    }

    fn shared(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Inserts a row, filling omitted columns from defaults, and returns it.
    pub fn insert_row(&self, table: &str, values: &[(&str, Value)]) -> Result<Row, MemError> {
        let row = values
            .iter()
            .map(|(column, value)| (column.to_string(), value.clone()))
            .collect();
        self.shared().db.insert_row(table, row)
    }

    /// All rows of a table, in insertion order.
    pub fn rows(&self, table: &str) -> Result<Vec<Row>, MemError> {
        self.shared().db.rows(table)
    }

    /// The current catalog.
    pub fn catalog(&self) -> CatalogSnapshot {
        self.shared().db.catalog()
    }

    /// Answers a catalog probe directly.
    pub fn has(&self, query: &SchemaGuardQuery) -> bool {
        self.shared().db.probe(query)
    }

    /// Makes every statement whose SQL text contains `pattern` fail.
    pub fn fail_statements_matching(&self, pattern: impl Into<String>) {
        self.shared().faults.statements.push(pattern.into());
    }

    /// Makes every catalog probe fail while `failing` is set.
    pub fn fail_probes(&self, failing: bool) {
        self.shared().faults.probes = failing;
    }

    /// Makes reading the applied history fail while `failing` is set.
    pub fn fail_history_reads(&self, failing: bool) {
        self.shared().faults.history = failing;
    }

    /// Removes every injected failure.
    pub fn clear_faults(&self) {
        self.shared().faults = Faults::default();
    }

    fn named_lock(&self, name: &str) -> Arc<AsyncMutex<()>> {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(name.to_string())
            .or_default()
            .clone()
    }
}

#[async_trait]
impl MigrationStore for InMemoryStore {
    type Connection = InMemoryConnection;

    async fn connect(&self, config: &MigratorConfig) -> Result<InMemoryConnection, BackendError> {
        if let Some(timeout) = config.statement_timeout {
            log::debug!("Ignoring statement timeout of {timeout:?} on the in-memory store");
        }
        Ok(InMemoryConnection {
            store: self.clone(),
            held: HashMap::new(),
            snapshot: None,
        })
    }
}

/// A session on an [`InMemoryStore`].
///
/// A transaction snapshots the whole database on `begin` and restores it on
/// `rollback`. Dropping a session with an open transaction rolls it back and
/// releases its locks.
#[derive(Debug)]
pub struct InMemoryConnection {
    store: InMemoryStore,
    held: HashMap<String, OwnedMutexGuard<()>>,
    snapshot: Option<MemDatabase>,
}

impl InMemoryConnection {
    fn with_db<T>(&self, f: impl FnOnce(&mut MemDatabase) -> Result<T, MemError>) -> Result<T, BackendError> {
        let mut shared = self.store.shared();
        f(&mut shared.db).map_err(Into::into)
    }

    fn restore(&mut self) {
        if let Some(snapshot) = self.snapshot.take() {
            log::debug!("Rolling back open in-memory transaction");
            self.store.shared().db = snapshot;
        }
    }
}

impl Drop for InMemoryConnection {
    fn drop(&mut self) {
        self.restore();
    }
}

#[async_trait]
impl Executor for InMemoryConnection {
    async fn probe(&mut self, query: &SchemaGuardQuery) -> Result<bool, BackendError> {
        let shared = self.store.shared();
        if shared.faults.probes {
            return Err(MemError::Injected(format!("probe for {query}")).into());
        }
        Ok(shared.db.probe(query))
    }

    async fn execute(&mut self, statement: &Statement) -> Result<u64, BackendError> {
        let mut shared = self.store.shared();
        let sql = statement.to_string();
        if shared.faults.statements.iter().any(|p| sql.contains(p.as_str())) {
            return Err(MemError::Injected(sql).into());
        }
        Ok(shared.db.execute(statement)?)
    }

    async fn fetch_ids(&mut self, table: &Ident, column: &Ident) -> Result<Vec<i64>, BackendError> {
        self.with_db(|db| db.fetch_ids(table.as_str(), column.as_str()))
    }

    async fn count_rows(&mut self, table: &Ident) -> Result<u64, BackendError> {
        self.with_db(|db| db.count_rows(table.as_str()))
    }
}

#[async_trait]
impl StoreConnection for InMemoryConnection {
    async fn lock(&mut self, name: &str, mode: LockMode) -> Result<bool, BackendError> {
        if self.held.contains_key(name) {
            return Ok(true);
        }
        let lock = self.store.named_lock(name);
        let guard = match mode {
            LockMode::Wait => lock.lock_owned().await,
            LockMode::NoWait => match lock.try_lock_owned() {
                Ok(guard) => guard,
                Err(_) => return Ok(false),
            },
        };
        self.held.insert(name.to_string(), guard);
        Ok(true)
    }

    async fn unlock(&mut self, name: &str) -> Result<(), BackendError> {
        if self.held.remove(name).is_none() {
            log::warn!("Lock `{name}` is not held by this session");
        }
        Ok(())
    }

    async fn ensure_bookkeeping(&mut self) -> Result<(), BackendError> {
        self.with_db(|db| {
            db.ensure_bookkeeping();
            Ok(())
        })
    }

    async fn applied(&mut self) -> Result<Vec<AppliedMigration>, BackendError> {
        if self.store.shared().faults.history {
            return Err(MemError::Injected("read of the applied history".to_string()).into());
        }
        self.with_db(|db| db.applied())
    }

    async fn dirty(&mut self) -> Result<Vec<DirtyMarker>, BackendError> {
        self.with_db(|db| db.dirty())
    }

    async fn begin(&mut self) -> Result<(), BackendError> {
        if self.snapshot.is_some() {
            return Err(MemError::TransactionInProgress.into());
        }
        self.snapshot = Some(self.store.shared().db.clone());
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), BackendError> {
        match self.snapshot.take() {
            Some(_) => Ok(()),
            None => Err(MemError::NoTransaction.into()),
        }
    }

    async fn rollback(&mut self) -> Result<(), BackendError> {
        if self.snapshot.is_none() {
            return Err(MemError::NoTransaction.into());
        }
        self.restore();
        Ok(())
    }

    async fn record_applied(&mut self, record: &AppliedMigration) -> Result<(), BackendError> {
        self.with_db(|db| db.record_applied(record))
    }

    async fn remove_applied(&mut self, version: &Version) -> Result<(), BackendError> {
        self.with_db(|db| db.remove_applied(version))
    }

    async fn mark_dirty(&mut self, marker: &DirtyMarker) -> Result<(), BackendError> {
        self.with_db(|db| db.mark_dirty(marker))
    }

    async fn clear_dirty(&mut self, version: &Version) -> Result<(), BackendError> {
        self.with_db(|db| db.clear_dirty(version))
    }

    async fn close(mut self) -> Result<(), BackendError> {
        self.restore();
        Ok(())
    }
}
