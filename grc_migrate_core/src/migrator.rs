//! The migration runner.
//!
//! Every operation opens one dedicated session from the [`MigrationStore`],
//! takes the runner lock on it, makes sure the bookkeeping tables exist and
//! then reads state. Nothing is cached between operations.
//!
//! # Usage
//!
//! ```rust,ignore
//! use grc_migrate_core::prelude::*;
//!
//! let migrator = Migrator::new(store, Registry::new(units)?);
//!
//! let report = migrator.migrate(None).await?;
//! println!("Applied {} migrations", report.applied.len());
//!
//! let rolled_back = migrator.rollback(1).await?;
//! ```

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::{MigrationError, RollbackWarning};
use crate::guard::GuardPolicy;
use crate::migration::{Direction, MigrationContext, Reversibility, UnitReport, UnitState};
use crate::registry::{Registry, RegistryEntry};
use crate::store::{AppliedMigration, DirtyMarker, LockMode, MigrationStore, StoreConnection};
use crate::version::Version;

/// Default name of the runner lock.
pub const DEFAULT_LOCK_NAME: &str = "grc_migrate";

/// What to do with a pending unit older than the latest applied one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[non_exhaustive]
pub enum OutOfOrderPolicy {
    /// Apply it and report a warning.
    #[default]
    Allow,
    /// Refuse with [`MigrationError::OutOfOrder`].
    Reject,
}

/// Configuration for the migrator.
#[derive(Debug, Clone)]
pub struct MigratorConfig {
    /// How probe failures are treated.
    pub guard_policy: GuardPolicy,

    /// Whether to wait for another runner to finish.
    pub lock_mode: LockMode,

    /// How out-of-order pending units are treated.
    pub out_of_order: OutOfOrderPolicy,

    /// Statement timeout applied to the dedicated session.
    ///
    /// `None` leaves the server default in place.
    pub statement_timeout: Option<Duration>,

    /// Name the runner lock is keyed on.
    ///
    /// Runners using different names do not exclude each other.
    pub lock_name: String,
}

impl Default for MigratorConfig {
    fn default() -> Self {
        Self {
            guard_policy: GuardPolicy::default(),
            lock_mode: LockMode::default(),
            out_of_order: OutOfOrderPolicy::default(),
            statement_timeout: None,
            lock_name: DEFAULT_LOCK_NAME.to_string(),
        }
    }
}

/// Result of [`Migrator::migrate`].
#[derive(Debug, Clone, Serialize)]
pub struct MigrationReport {
    /// Units applied by this run, in order.
    pub applied: Vec<UnitReport>,
    /// Units applied although a later version was already applied.
    pub out_of_order: Vec<Version>,
    /// Highest applied version after the run.
    pub last_applied: Option<Version>,
}

/// One step of a rollback plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RollbackStep {
    /// The unit.
    pub version: Version,
    /// Its name.
    pub name: String,
    /// How faithfully its `down` restores state.
    pub reversibility: Reversibility,
}

impl RollbackStep {
    /// The reason a lossy step loses data.
    pub fn loss(&self) -> Option<&'static str> {
        match self.reversibility {
            Reversibility::LossyReversible(reason) => Some(reason),
            _ => None,
        }
    }
}

/// Result of [`Migrator::rollback`].
#[derive(Debug, Clone, Serialize)]
pub struct RollbackReport {
    /// Units rolled back, most recent first.
    pub rolled_back: Vec<UnitReport>,
    /// Lossy rollbacks that went ahead.
    pub warnings: Vec<RollbackWarning>,
    /// Highest applied version after the rollback.
    pub current_version: Option<Version>,
}

/// State of one known unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusEntry {
    /// The unit.
    pub version: Version,
    /// Its name.
    pub name: String,
    /// Where it stands.
    pub state: UnitState,
    /// When it was applied.
    pub applied_at: Option<DateTime<Utc>>,
}

/// Result of [`Migrator::status`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationStatus {
    /// Every known unit, ascending.
    pub entries: Vec<StatusEntry>,
    /// Applied records whose version is not in the registry.
    pub orphaned: Vec<AppliedMigration>,
    /// Dirty markers left by interrupted non-transactional units.
    pub dirty: Vec<DirtyMarker>,
}

impl MigrationStatus {
    /// Versions in the [`UnitState::Applied`] state.
    pub fn applied_versions(&self) -> Vec<&Version> {
        self.entries_in(UnitState::Applied)
    }

    /// Versions in the [`UnitState::Pending`] state.
    pub fn pending_versions(&self) -> Vec<&Version> {
        self.entries_in(UnitState::Pending)
    }

    fn entries_in(&self, state: UnitState) -> Vec<&Version> {
        self.entries
            .iter()
            .filter(|e| e.state == state)
            .map(|e| &e.version)
            .collect()
    }
}

/// Which side an interrupted unit ended up on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// The unit's changes are in place; record it as applied.
    Applied,
    /// The unit's changes are absent; record it as not applied.
    Pending,
}

/// Applies and rolls back the units of a [`Registry`] against a store.
pub struct Migrator<S> {
    store: S,
    registry: Registry,
    config: MigratorConfig,
}

impl<S: MigrationStore> Migrator<S> {
    /// Creates a migrator with the default configuration.
    pub fn new(store: S, registry: Registry) -> Self {
        Self::with_config(store, registry, MigratorConfig::default())
    }

    /// Creates a migrator with a custom configuration.
    pub fn with_config(store: S, registry: Registry, config: MigratorConfig) -> Self {
        Self {
            store,
            registry,
            config,
        }
    }

    /// The known units.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// The configuration.
    pub fn config(&self) -> &MigratorConfig {
        &self.config
    }

    /// The store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Applies pending units up to and including `target`, or all of them.
    ///
    /// Each transactional unit runs in its own transaction together with its
    /// record. When a unit fails its transaction is rolled back, the run
    /// stops, and earlier units stay applied.
    pub async fn migrate(
        &self,
        target: Option<&Version>,
    ) -> Result<MigrationReport, MigrationError> {
        let mut conn = self.open().await?;
        let result = self.migrate_locked(&mut conn, target).await;
        self.release(conn).await;
        result
    }

    /// Lists the most recently applied `steps` units, newest first, without
    /// running anything.
    pub async fn plan_rollback(&self, steps: usize) -> Result<Vec<RollbackStep>, MigrationError> {
        let mut conn = self.open().await?;
        let result = self.plan_rollback_locked(&mut conn, steps).await;
        self.release(conn).await;
        result
    }

    /// Runs `down` for the most recently applied `steps` units, newest first.
    pub async fn rollback(&self, steps: usize) -> Result<RollbackReport, MigrationError> {
        let mut conn = self.open().await?;
        let result = self.rollback_locked(&mut conn, steps, None).await;
        self.release(conn).await;
        result
    }

    /// Rolls back exactly the steps of `plan`, as returned by
    /// [`plan_rollback`](Self::plan_rollback).
    ///
    /// The plan is computed again under the lock. When it no longer matches,
    /// because another runner applied or rolled back units in between, the
    /// call fails with [`MigrationError::PlanChanged`] and runs nothing.
    pub async fn rollback_plan(
        &self,
        plan: &[RollbackStep],
    ) -> Result<RollbackReport, MigrationError> {
        let mut conn = self.open().await?;
        let result = self.rollback_locked(&mut conn, plan.len(), Some(plan)).await;
        self.release(conn).await;
        result
    }

    /// Reports every known unit, orphaned records and dirty markers.
    pub async fn status(&self) -> Result<MigrationStatus, MigrationError> {
        let mut conn = self.open().await?;
        let result = self.status_locked(&mut conn).await;
        self.release(conn).await;
        result
    }

    /// Known units that are not applied, ascending.
    pub async fn pending(&self) -> Result<Vec<&RegistryEntry>, MigrationError> {
        let mut conn = self.open().await?;
        let result = applied_versions(&mut conn).await;
        self.release(conn).await;
        let applied = result?;
        Ok(self
            .registry
            .iter()
            .filter(|e| !applied.contains(e.version()))
            .collect())
    }

    /// The highest applied version, if any.
    pub async fn current_version(&self) -> Result<Option<Version>, MigrationError> {
        let mut conn = self.open().await?;
        let result = applied_versions(&mut conn).await;
        self.release(conn).await;
        Ok(result?.into_iter().max())
    }

    /// Clears the dirty marker of `version` after the schema was fixed by
    /// hand, recording the unit as applied or not applied.
    pub async fn resolve_dirty(
        &self,
        version: &Version,
        resolution: Resolution,
    ) -> Result<(), MigrationError> {
        let mut conn = self.open().await?;
        let result = self.resolve_locked(&mut conn, version, resolution).await;
        self.release(conn).await;
        result
    }

    async fn open(&self) -> Result<S::Connection, MigrationError> {
        let mut conn = self.store.connect(&self.config).await?;
        let name = &self.config.lock_name;

        log::debug!("Acquiring migration lock `{name}`");
        let acquired = match conn.lock(name, self.config.lock_mode).await {
            Ok(acquired) => acquired,
            Err(e) => {
                close_quietly(conn).await;
                return Err(e.into());
            }
        };
        if !acquired {
            close_quietly(conn).await;
            return Err(MigrationError::LockUnavailable(name.clone()));
        }
        log::info!("Acquired migration lock `{name}`");

        if let Err(e) = conn.ensure_bookkeeping().await {
            self.release(conn).await;
            return Err(e.into());
        }
        Ok(conn)
    }

    async fn release(&self, mut conn: S::Connection) {
        if let Err(e) = conn.unlock(&self.config.lock_name).await {
            log::warn!(
                "Failed to release migration lock `{}`: {}",
                self.config.lock_name,
                e
            );
        }
        close_quietly(conn).await;
    }

    async fn migrate_locked(
        &self,
        conn: &mut S::Connection,
        target: Option<&Version>,
    ) -> Result<MigrationReport, MigrationError> {
        if let Some(target) = target {
            if !self.registry.contains(target) {
                return Err(MigrationError::UnknownVersion(target.clone()));
            }
        }
        ensure_clean(conn).await?;

        let applied = conn.applied().await?;
        self.verify_checksums(&applied)?;
        let applied: HashSet<Version> = applied.into_iter().map(|r| r.version).collect();
        let latest = applied.iter().max().cloned();

        let plan: Vec<&RegistryEntry> = self
            .registry
            .iter()
            .filter(|e| !applied.contains(e.version()))
            .take_while(|e| target.is_none_or(|t| e.version() <= t))
            .collect();

        let mut out_of_order = Vec::new();
        if let Some(latest) = &latest {
            for entry in plan.iter().filter(|e| e.version() < latest) {
                match self.config.out_of_order {
                    OutOfOrderPolicy::Reject => {
                        return Err(MigrationError::OutOfOrder {
                            version: entry.version().clone(),
                            latest: latest.clone(),
                        });
                    }
                    OutOfOrderPolicy::Allow => {
                        log::warn!(
                            "Migration {} ({}) is older than the latest applied migration {}; \
                             applying it out of order",
                            entry.version(),
                            entry.unit().name(),
                            latest
                        );
                        out_of_order.push(entry.version().clone());
                    }
                }
            }
        }

        let mut available: HashSet<&Version> = applied.iter().collect();
        for entry in &plan {
            for prerequisite in entry.requires() {
                if !available.contains(prerequisite) {
                    return Err(MigrationError::OrderingViolation {
                        version: entry.version().clone(),
                        prerequisite: prerequisite.clone(),
                    });
                }
            }
            available.insert(entry.version());
        }

        if plan.is_empty() {
            log::info!("No pending migrations");
        }

        let mut last_applied = latest;
        let mut reports = Vec::with_capacity(plan.len());
        for entry in plan {
            let version = entry.version();
            log::info!("Running migration {} ({})...", version, entry.unit().name());
            match self.run_unit(conn, entry, Direction::Forward).await {
                Ok(report) => {
                    log::info!(
                        "Migration {} ({}) applied successfully",
                        version,
                        entry.unit().name()
                    );
                    reports.push(report);
                    if last_applied.as_ref().is_none_or(|l| version > l) {
                        last_applied = Some(version.clone());
                    }
                }
                Err(source) => {
                    log::error!("Migration {version} failed: {source}");
                    return Err(MigrationError::UnitFailed {
                        version: version.clone(),
                        last_applied,
                        source: Box::new(source),
                    });
                }
            }
        }

        Ok(MigrationReport {
            applied: reports,
            out_of_order,
            last_applied,
        })
    }

    fn verify_checksums(&self, applied: &[AppliedMigration]) -> Result<(), MigrationError> {
        for record in applied {
            let Some(entry) = self.registry.get(&record.version) else {
                log::warn!(
                    "Applied migration {} ({}) is not known to this build",
                    record.version,
                    record.description
                );
                continue;
            };
            let found = entry.unit().checksum();
            if found != record.checksum {
                return Err(MigrationError::ChecksumMismatch {
                    version: record.version.clone(),
                    name: record.description.clone(),
                    expected: record.checksum.clone(),
                    found,
                });
            }
        }
        Ok(())
    }

    async fn plan_rollback_locked(
        &self,
        conn: &mut S::Connection,
        steps: usize,
    ) -> Result<Vec<RollbackStep>, MigrationError> {
        let mut applied: Vec<Version> = applied_versions(conn).await?.into_iter().collect();
        applied.sort();

        let split = applied.len().saturating_sub(steps);
        let (remaining, planned) = applied.split_at(split);

        let mut plan = Vec::with_capacity(planned.len());
        for version in planned.iter().rev() {
            let entry = self
                .registry
                .get(version)
                .ok_or_else(|| MigrationError::UnknownVersion(version.clone()))?;
            if let Reversibility::Irreversible(reason) = entry.unit().reversibility() {
                return Err(MigrationError::Irreversible {
                    version: version.clone(),
                    reason,
                });
            }
            plan.push(RollbackStep {
                version: version.clone(),
                name: entry.unit().name().to_string(),
                reversibility: entry.unit().reversibility(),
            });
        }

        let rolled_back: HashSet<&Version> = planned.iter().collect();
        for version in remaining {
            let Some(entry) = self.registry.get(version) else {
                continue;
            };
            if let Some(prerequisite) = entry.requires().iter().find(|p| rolled_back.contains(p)) {
                return Err(MigrationError::OrderingViolation {
                    version: version.clone(),
                    prerequisite: prerequisite.clone(),
                });
            }
        }

        Ok(plan)
    }

    async fn rollback_locked(
        &self,
        conn: &mut S::Connection,
        steps: usize,
        accepted: Option<&[RollbackStep]>,
    ) -> Result<RollbackReport, MigrationError> {
        ensure_clean(conn).await?;
        let plan = self.plan_rollback_locked(conn, steps).await?;
        if let Some(accepted) = accepted {
            if plan != accepted {
                return Err(MigrationError::PlanChanged {
                    planned: accepted.iter().map(|s| s.version.clone()).collect(),
                    found: plan.iter().map(|s| s.version.clone()).collect(),
                });
            }
        }
        if plan.is_empty() {
            log::info!("No applied migrations to roll back");
        }

        let mut rolled_back = Vec::with_capacity(plan.len());
        let mut warnings = Vec::new();
        for step in plan {
            let entry = self
                .registry
                .get(&step.version)
                .ok_or_else(|| MigrationError::UnknownVersion(step.version.clone()))?;
            log::info!("Rolling back migration {} ({})...", step.version, step.name);
            match self.run_unit(conn, entry, Direction::Backward).await {
                Ok(report) => {
                    rolled_back.push(report);
                    if let Some(reason) = step.loss() {
                        log::warn!(
                            "Migration {} ({}) rolled back with data loss: {}",
                            step.version,
                            step.name,
                            reason
                        );
                        warnings.push(RollbackWarning {
                            version: step.version.clone(),
                            reason,
                        });
                    } else {
                        log::info!("Migration {} ({}) rolled back", step.version, step.name);
                    }
                }
                Err(source) => {
                    log::error!("Rollback of migration {} failed: {}", step.version, source);
                    // The unit's error wins over a failure to read the history.
                    let last_applied = applied_versions(conn)
                        .await
                        .ok()
                        .and_then(|applied| applied.into_iter().max());
                    return Err(MigrationError::UnitFailed {
                        version: step.version,
                        last_applied,
                        source: Box::new(source),
                    });
                }
            }
        }

        let current_version = applied_versions(conn).await?.into_iter().max();
        Ok(RollbackReport {
            rolled_back,
            warnings,
            current_version,
        })
    }

    async fn status_locked(
        &self,
        conn: &mut S::Connection,
    ) -> Result<MigrationStatus, MigrationError> {
        let mut applied: HashMap<Version, AppliedMigration> = conn
            .applied()
            .await?
            .into_iter()
            .map(|r| (r.version.clone(), r))
            .collect();
        let mut dirty = conn.dirty().await?;
        dirty.sort_by(|a, b| a.version.cmp(&b.version));
        let failed: HashSet<&Version> = dirty.iter().map(|m| &m.version).collect();

        let entries = self
            .registry
            .iter()
            .map(|entry| {
                let record = applied.remove(entry.version());
                let state = if failed.contains(entry.version()) {
                    UnitState::Failed
                } else if record.is_some() {
                    UnitState::Applied
                } else {
                    UnitState::Pending
                };
                StatusEntry {
                    version: entry.version().clone(),
                    name: entry.unit().name().to_string(),
                    state,
                    applied_at: record.map(|r| r.applied_at),
                }
            })
            .collect();

        let mut orphaned: Vec<AppliedMigration> = applied.into_values().collect();
        orphaned.sort_by(|a, b| a.version.cmp(&b.version));

        Ok(MigrationStatus {
            entries,
            orphaned,
            dirty,
        })
    }

    async fn resolve_locked(
        &self,
        conn: &mut S::Connection,
        version: &Version,
        resolution: Resolution,
    ) -> Result<(), MigrationError> {
        let marker = conn
            .dirty()
            .await?
            .into_iter()
            .find(|m| &m.version == version)
            .ok_or_else(|| MigrationError::NothingToResolve(version.clone()))?;
        let recorded = applied_versions(conn).await?.contains(version);

        conn.begin().await?;
        let result = async {
            match resolution {
                Resolution::Applied if !recorded => {
                    let entry = self
                        .registry
                        .get(version)
                        .ok_or_else(|| MigrationError::UnknownVersion(version.clone()))?;
                    conn.record_applied(&applied_record(entry)).await?;
                }
                Resolution::Pending if recorded => conn.remove_applied(version).await?,
                _ => {}
            }
            conn.clear_dirty(version).await?;
            Ok::<_, MigrationError>(())
        }
        .await;
        settle(conn, result).await?;

        log::info!(
            "Resolved interrupted {} run of migration {} as {}",
            marker.direction,
            version,
            match resolution {
                Resolution::Applied => "applied",
                Resolution::Pending => "pending",
            }
        );
        Ok(())
    }

    async fn run_unit(
        &self,
        conn: &mut S::Connection,
        entry: &RegistryEntry,
        direction: Direction,
    ) -> Result<UnitReport, MigrationError> {
        if entry.unit().transactional() {
            conn.begin().await?;
            let result = async {
                let report = self.apply_unit(conn, entry, direction).await?;
                record(conn, entry, direction).await?;
                Ok::<_, MigrationError>(report)
            }
            .await;
            return settle(conn, result).await;
        }

        conn.mark_dirty(&DirtyMarker {
            version: entry.version().clone(),
            direction,
            started_at: Utc::now(),
        })
        .await?;

        // A failure here leaves the marker in place.
        let report = self.apply_unit(conn, entry, direction).await?;

        conn.begin().await?;
        let result = async {
            record(conn, entry, direction).await?;
            conn.clear_dirty(entry.version()).await?;
            Ok::<_, MigrationError>(report)
        }
        .await;
        settle(conn, result).await
    }

    async fn apply_unit(
        &self,
        conn: &mut S::Connection,
        entry: &RegistryEntry,
        direction: Direction,
    ) -> Result<UnitReport, MigrationError> {
        let unit = entry.unit();
        let mut ctx = MigrationContext::new(
            conn,
            self.config.guard_policy,
            entry.version().clone(),
            unit.name(),
            direction,
        );
        unit.apply(direction, &mut ctx).await?;
        Ok(ctx.into_report())
    }
}

fn applied_record(entry: &RegistryEntry) -> AppliedMigration {
    AppliedMigration {
        version: entry.version().clone(),
        description: entry.unit().description().to_string(),
        applied_at: Utc::now(),
        checksum: entry.unit().checksum(),
    }
}

async fn record<C: StoreConnection>(
    conn: &mut C,
    entry: &RegistryEntry,
    direction: Direction,
) -> Result<(), MigrationError> {
    match direction {
        Direction::Forward => conn.record_applied(&applied_record(entry)).await?,
        Direction::Backward => conn.remove_applied(entry.version()).await?,
    }
    Ok(())
}

async fn applied_versions<C: StoreConnection>(
    conn: &mut C,
) -> Result<HashSet<Version>, MigrationError> {
    Ok(conn.applied().await?.into_iter().map(|r| r.version).collect())
}

async fn ensure_clean<C: StoreConnection>(conn: &mut C) -> Result<(), MigrationError> {
    let dirty = conn.dirty().await?;
    match dirty.into_iter().min_by(|a, b| a.version.cmp(&b.version)) {
        Some(marker) => Err(MigrationError::DirtyState {
            version: marker.version,
            direction: marker.direction,
        }),
        None => Ok(()),
    }
}

/// Commits on success, rolls back on failure.
async fn settle<C: StoreConnection, T>(
    conn: &mut C,
    result: Result<T, MigrationError>,
) -> Result<T, MigrationError> {
    match result {
        Ok(value) => {
            conn.commit().await?;
            Ok(value)
        }
        Err(e) => {
            if let Err(rollback_err) = conn.rollback().await {
                log::error!("Failed to roll back transaction: {rollback_err}");
            }
            Err(e)
        }
    }
}

async fn close_quietly<C: StoreConnection>(conn: C) {
    if let Err(e) = conn.close().await {
        log::warn!("Failed to close migration session: {e}");
    }
}
