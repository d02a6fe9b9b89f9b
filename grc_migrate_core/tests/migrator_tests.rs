use async_trait::async_trait;
use grc_migrate_core::prelude::*;
use grc_migrate_core::{MigrationStatus, OutOfOrderPolicy, Resolution, StoreConnection, UnitState};
use grc_migrate_mem::{InMemoryMigrator, InMemoryStore};

#[derive(Clone, Copy)]
enum Step {
    Table {
        table: &'static str,
        index: &'static str,
    },
    AddStatus,
    BackfillSources,
    Backfill,
    Noop,
}

struct TestUnit {
    version: &'static str,
    name: &'static str,
    step: Step,
    transactional: bool,
    reversibility: Reversibility,
    requires: &'static [&'static str],
}

impl TestUnit {
    fn new(version: &'static str, name: &'static str, step: Step) -> Self {
        Self {
            version,
            name,
            step,
            transactional: true,
            reversibility: Reversibility::FullyReversible,
            requires: &[],
        }
    }

    fn non_transactional(mut self) -> Self {
        self.transactional = false;
        self
    }

    fn lossy(mut self, reason: &'static str) -> Self {
        self.reversibility = Reversibility::LossyReversible(reason);
        self
    }

    fn irreversible(mut self, reason: &'static str) -> Self {
        self.reversibility = Reversibility::Irreversible(reason);
        self
    }

    fn requiring(mut self, requires: &'static [&'static str]) -> Self {
        self.requires = requires;
        self
    }
}

#[async_trait]
impl Migration for TestUnit {
    fn version(&self) -> &'static str {
        self.version
    }

    fn name(&self) -> &'static str {
        self.name
    }

    fn transactional(&self) -> bool {
        self.transactional
    }

    fn reversibility(&self) -> Reversibility {
        self.reversibility
    }

    fn requires(&self) -> &'static [&'static str] {
        self.requires
    }

    async fn up(&self, ctx: &mut MigrationContext<'_>) -> Result<(), MigrationError> {
        match self.step {
            Step::Table { table, index } => {
                ctx.create_table_if_missing(
                    TableDef::new(table)
                        .with_id()
                        .column(ColumnDef::new("name", ColumnType::Text).nullable()),
                )
                .await?;
                ctx.create_index_if_missing(IndexDef::new(index, table, ["name"]))
                    .await?;
            }
            Step::AddStatus => {
                ctx.add_column_if_missing(
                    "t",
                    ColumnDef::new("status", ColumnType::Varchar(20)).nullable(),
                )
                .await?;
            }
            Step::BackfillSources => {
                ctx.create_table_if_missing(
                    TableDef::new("tenant")
                        .with_id()
                        .column(ColumnDef::new("code", ColumnType::Varchar(50))),
                )
                .await?;
                ctx.create_table_if_missing(
                    TableDef::new("legacy")
                        .with_id()
                        .column(ColumnDef::new("percentage", ColumnType::Integer).nullable()),
                )
                .await?;
            }
            Step::Backfill => {
                ctx.create_table_if_missing(
                    TableDef::new("scoped")
                        .with_id()
                        .column(ColumnDef::new("tenant_id", ColumnType::Integer))
                        .column(ColumnDef::new("legacy_id", ColumnType::Integer))
                        .column(ColumnDef::new("status", ColumnType::Varchar(20))),
                )
                .await?;
                ctx.add_foreign_key_if_missing(ForeignKeyDef::new(
                    "fk_scoped_tenant",
                    "scoped",
                    "tenant_id",
                    "tenant",
                ))
                .await?;
                ctx.backfill_to_primary_tenant(
                    "tenant",
                    "tenant_id",
                    InsertSelect::new("scoped", "legacy")
                        .copy("legacy_id", "id")
                        .project("status", Projection::PercentageStatus("percentage".into())),
                )
                .await?;
            }
            Step::Noop => {}
        }
        Ok(())
    }

    async fn down(&self, ctx: &mut MigrationContext<'_>) -> Result<(), MigrationError> {
        match self.step {
            Step::Table { table, .. } => {
                ctx.drop_table_if_exists(table).await?;
            }
            Step::AddStatus => {
                ctx.drop_column_if_exists("t", "status").await?;
            }
            Step::BackfillSources => {
                ctx.drop_table_if_exists("legacy").await?;
                ctx.drop_table_if_exists("tenant").await?;
            }
            Step::Backfill => {
                ctx.drop_table_if_exists("scoped").await?;
            }
            Step::Noop => {}
        }
        Ok(())
    }
}

fn v1() -> TestUnit {
    TestUnit::new(
        "1",
        "create_t",
        Step::Table {
            table: "t",
            index: "idx_t_name",
        },
    )
}

fn v2() -> TestUnit {
    TestUnit::new("2", "add_t_status", Step::AddStatus)
}

fn table_unit(version: &'static str, table: &'static str, index: &'static str) -> TestUnit {
    TestUnit::new(version, table, Step::Table { table, index })
}

fn version(v: &str) -> Version {
    Version::parse(v).unwrap()
}

fn migrator(store: &InMemoryStore, units: Vec<TestUnit>) -> InMemoryMigrator {
    migrator_with(store, units, MigratorConfig::default())
}

fn migrator_with(
    store: &InMemoryStore,
    units: Vec<TestUnit>,
    config: MigratorConfig,
) -> InMemoryMigrator {
    let _ = env_logger::builder().is_test(true).try_init();
    let units = units
        .into_iter()
        .map(|u| Box::new(u) as Box<dyn Migration>);
    Migrator::with_config(store.clone(), Registry::new(units).unwrap(), config)
}

fn state_of(status: &MigrationStatus, v: &str) -> UnitState {
    status
        .entries
        .iter()
        .find(|e| e.version == version(v))
        .map(|e| e.state)
        .unwrap()
}

#[tokio::test]
async fn migrate_applies_pending_units_once() {
    let store = InMemoryStore::new();
    let migrator = migrator(&store, vec![v1(), v2()]);

    let report = migrator.migrate(None).await.unwrap();
    assert_eq!(report.applied.len(), 2);
    assert_eq!(report.last_applied, Some(version("2")));
    assert!(store.has(&SchemaGuardQuery::column("t", "status")));

    let status = migrator.status().await.unwrap();
    assert_eq!(status.applied_versions(), [&version("1"), &version("2")]);
    assert!(status.entries.iter().all(|e| e.applied_at.is_some()));

    let again = migrator.migrate(None).await.unwrap();
    assert!(again.applied.is_empty());
    assert_eq!(again.last_applied, Some(version("2")));
    assert_eq!(migrator.current_version().await.unwrap(), Some(version("2")));
    assert!(migrator.pending().await.unwrap().is_empty());
}

#[tokio::test]
async fn rollback_restores_previous_catalog() {
    let store = InMemoryStore::new();
    let migrator = migrator(&store, vec![v1(), v2()]);

    migrator.migrate(Some(&version("1"))).await.unwrap();
    let after_v1 = store.catalog();
    assert_eq!(migrator.pending().await.unwrap().len(), 1);

    migrator.migrate(None).await.unwrap();
    assert_ne!(store.catalog(), after_v1);

    let report = migrator.rollback(1).await.unwrap();
    assert_eq!(report.rolled_back.len(), 1);
    assert_eq!(report.rolled_back[0].direction, Direction::Backward);
    assert_eq!(report.current_version, Some(version("1")));
    assert!(report.warnings.is_empty());
    assert_eq!(store.catalog(), after_v1);
    assert!(!store.has(&SchemaGuardQuery::column("t", "status")));

    let status = migrator.status().await.unwrap();
    assert_eq!(status.applied_versions(), [&version("1")]);
    assert_eq!(status.pending_versions(), [&version("2")]);

    migrator.migrate(None).await.unwrap();
    assert!(store.has(&SchemaGuardQuery::column("t", "status")));
}

#[tokio::test]
async fn guarded_add_column_is_a_no_op_when_present() {
    let store = InMemoryStore::new();
    let again = TestUnit::new("3", "add_t_status_again", Step::AddStatus);
    let migrator = migrator(&store, vec![v1(), v2(), again]);

    let report = migrator.migrate(None).await.unwrap();
    let duplicate = &report.applied[2];
    assert_eq!(duplicate.statements_executed, 0);
    assert_eq!(duplicate.guards_skipped, 1);
    assert_eq!(store.catalog().tables["t"].columns.len(), 3);
}

#[tokio::test]
async fn failing_unit_halts_the_run_and_rolls_back() {
    let store = InMemoryStore::new();
    let migrator = migrator(
        &store,
        vec![
            v1(),
            v2(),
            table_unit("3", "u", "idx_u_name"),
            table_unit("4", "w", "idx_w_name"),
        ],
    );
    store.fail_statements_matching("CREATE INDEX \"idx_u_name\"");

    let err = migrator.migrate(None).await.unwrap_err();
    match &err {
        MigrationError::UnitFailed {
            version: failed,
            last_applied,
            source,
        } => {
            assert_eq!(failed, &version("3"));
            assert_eq!(last_applied, &Some(version("2")));
            assert!(matches!(
                source.as_ref(),
                MigrationError::StatementExecution { statement, .. } if statement.contains("idx_u_name")
            ));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(err.to_string().contains("last successfully applied: 2"));
    assert!(!store.has(&SchemaGuardQuery::table("u")));
    assert!(!store.has(&SchemaGuardQuery::table("w")));

    let status = migrator.status().await.unwrap();
    assert_eq!(status.applied_versions(), [&version("1"), &version("2")]);
    assert_eq!(status.pending_versions(), [&version("3"), &version("4")]);

    store.clear_faults();
    let report = migrator.migrate(None).await.unwrap();
    assert_eq!(report.applied.len(), 2);
    assert!(store.has(&SchemaGuardQuery::index("u", "idx_u_name")));
}

#[tokio::test]
async fn non_transactional_failure_leaves_a_dirty_marker() {
    let store = InMemoryStore::new();
    let unit = table_unit("2", "u", "idx_u_name").non_transactional();
    let migrator = migrator(&store, vec![v1(), unit]);
    store.fail_statements_matching("CREATE INDEX \"idx_u_name\"");

    let err = migrator.migrate(None).await.unwrap_err();
    assert!(matches!(err.root(), MigrationError::StatementExecution { .. }));
    assert!(store.has(&SchemaGuardQuery::table("u")));

    let status = migrator.status().await.unwrap();
    assert_eq!(state_of(&status, "2"), UnitState::Failed);
    assert_eq!(status.dirty.len(), 1);
    assert_eq!(status.dirty[0].direction, Direction::Forward);

    store.clear_faults();
    assert!(matches!(
        migrator.migrate(None).await,
        Err(MigrationError::DirtyState { version: v, direction: Direction::Forward }) if v == version("2")
    ));
    assert!(matches!(
        migrator.rollback(1).await,
        Err(MigrationError::DirtyState { .. })
    ));

    migrator
        .resolve_dirty(&version("2"), Resolution::Pending)
        .await
        .unwrap();
    let report = migrator.migrate(None).await.unwrap();
    assert_eq!(report.applied.len(), 1);
    assert_eq!(report.applied[0].guards_skipped, 1);
    assert!(migrator.status().await.unwrap().dirty.is_empty());

    assert!(matches!(
        migrator.resolve_dirty(&version("2"), Resolution::Pending).await,
        Err(MigrationError::NothingToResolve(_))
    ));
}

#[tokio::test]
async fn resolving_as_applied_records_the_unit() {
    let store = InMemoryStore::new();
    let unit = table_unit("2", "u", "idx_u_name").non_transactional();
    let migrator = migrator(&store, vec![v1(), unit]);
    store.fail_statements_matching("CREATE INDEX \"idx_u_name\"");
    migrator.migrate(None).await.unwrap_err();
    store.clear_faults();

    migrator
        .resolve_dirty(&version("2"), Resolution::Applied)
        .await
        .unwrap();
    let status = migrator.status().await.unwrap();
    assert_eq!(state_of(&status, "2"), UnitState::Applied);
    assert!(migrator.migrate(None).await.unwrap().applied.is_empty());
}

#[tokio::test]
async fn zero_statement_unit_can_run_outside_a_transaction() {
    let store = InMemoryStore::new();
    let unit = TestUnit::new("2", "reinterpret_timestamps", Step::Noop).non_transactional();
    let migrator = migrator(&store, vec![v1(), unit]);

    let report = migrator.migrate(None).await.unwrap();
    assert_eq!(report.applied[1].statements_executed, 0);
    let status = migrator.status().await.unwrap();
    assert!(status.dirty.is_empty());
    assert_eq!(state_of(&status, "2"), UnitState::Applied);
}

#[tokio::test]
async fn concurrent_runners_apply_each_unit_once() {
    let store = InMemoryStore::new();
    let first = migrator(&store, vec![v1(), v2()]);
    let second = migrator(&store, vec![v1(), v2()]);

    let (a, b) = tokio::join!(first.migrate(None), second.migrate(None));
    let applied = a.unwrap().applied.len() + b.unwrap().applied.len();
    assert_eq!(applied, 2);

    let status = first.status().await.unwrap();
    assert_eq!(status.applied_versions().len(), 2);
}

#[tokio::test]
async fn no_wait_runner_fails_while_the_lock_is_held() {
    let store = InMemoryStore::new();
    let config = MigratorConfig {
        lock_mode: LockMode::NoWait,
        ..MigratorConfig::default()
    };
    let migrator = migrator_with(&store, vec![v1()], config.clone());

    let mut holder = store.connect(&config).await.unwrap();
    assert!(holder.lock("grc_migrate", LockMode::Wait).await.unwrap());
    assert!(matches!(
        migrator.migrate(None).await,
        Err(MigrationError::LockUnavailable(name)) if name == "grc_migrate"
    ));

    holder.unlock("grc_migrate").await.unwrap();
    assert_eq!(migrator.migrate(None).await.unwrap().applied.len(), 1);
}

#[tokio::test]
async fn checksum_drift_is_detected_before_running() {
    let store = InMemoryStore::new();
    migrator(&store, vec![v1()]).migrate(None).await.unwrap();

    let renamed = TestUnit::new(
        "1",
        "create_t_renamed",
        Step::Table {
            table: "t",
            index: "idx_t_name",
        },
    );
    let drifted = migrator(&store, vec![renamed, v2()]);
    assert!(matches!(
        drifted.migrate(None).await,
        Err(MigrationError::ChecksumMismatch { version: v, .. }) if v == version("1")
    ));
    assert!(!store.has(&SchemaGuardQuery::column("t", "status")));
}

#[tokio::test]
async fn unmet_prerequisite_is_reported_before_execution() {
    let store = InMemoryStore::new();
    let fixup = || TestUnit::new("2", "fix_t", Step::AddStatus).requiring(&["3"]);
    let w = || table_unit("3", "w", "idx_w_name");

    let fresh = migrator(&store, vec![v1(), fixup(), w()]);
    assert!(matches!(
        fresh.migrate(None).await,
        Err(MigrationError::OrderingViolation { version: v, prerequisite: p })
            if v == version("2") && p == version("3")
    ));
    assert!(!store.has(&SchemaGuardQuery::table("t")));
}

#[tokio::test]
async fn back_dated_fixup_runs_out_of_order() {
    let store = InMemoryStore::new();
    let fixup = || TestUnit::new("2", "fix_t", Step::AddStatus).requiring(&["3"]);
    let w = || table_unit("3", "w", "idx_w_name");
    migrator(&store, vec![v1(), w()]).migrate(None).await.unwrap();

    let strict = migrator_with(
        &store,
        vec![v1(), fixup(), w()],
        MigratorConfig {
            out_of_order: OutOfOrderPolicy::Reject,
            ..MigratorConfig::default()
        },
    );
    assert!(matches!(
        strict.migrate(None).await,
        Err(MigrationError::OutOfOrder { version: v, latest }) if v == version("2") && latest == version("3")
    ));

    let lenient = migrator(&store, vec![v1(), fixup(), w()]);
    let report = lenient.migrate(None).await.unwrap();
    assert_eq!(report.out_of_order, [version("2")]);
    assert_eq!(report.last_applied, Some(version("3")));
    assert!(store.has(&SchemaGuardQuery::column("t", "status")));

    assert!(matches!(
        lenient.rollback(1).await,
        Err(MigrationError::OrderingViolation { version: v, prerequisite: p })
            if v == version("2") && p == version("3")
    ));
    assert!(lenient.rollback(2).await.is_ok());
}

#[tokio::test]
async fn probe_failures_follow_the_guard_policy() {
    let store = InMemoryStore::new();
    store.fail_probes(true);

    let strict = migrator(&store, vec![v1()]);
    let err = strict.migrate(None).await.unwrap_err();
    assert!(matches!(err.root(), MigrationError::GuardQuery { .. }));
    assert!(!store.has(&SchemaGuardQuery::table("t")));

    let lenient = migrator_with(
        &store,
        vec![v1()],
        MigratorConfig {
            guard_policy: GuardPolicy::AssumeAbsent,
            ..MigratorConfig::default()
        },
    );
    let report = lenient.migrate(None).await.unwrap();
    assert_eq!(report.applied[0].statements_executed, 2);
    store.fail_probes(false);
    assert!(store.has(&SchemaGuardQuery::table("t")));
}

#[tokio::test]
async fn lossy_rollback_is_reported_not_refused() {
    let store = InMemoryStore::new();
    let lossy = v2().lossy("status values are lost");
    let migrator = migrator(&store, vec![v1(), lossy]);
    migrator.migrate(None).await.unwrap();

    let plan = migrator.plan_rollback(2).await.unwrap();
    assert_eq!(plan.len(), 2);
    assert_eq!(plan[0].version, version("2"));
    assert_eq!(plan[0].loss(), Some("status values are lost"));
    assert_eq!(plan[1].loss(), None);

    let report = migrator.rollback(1).await.unwrap();
    assert_eq!(report.warnings.len(), 1);
    assert_eq!(report.warnings[0].reason, "status values are lost");
}

#[tokio::test]
async fn irreversible_units_refuse_rollback() {
    let store = InMemoryStore::new();
    let migrator = migrator(&store, vec![v1().irreversible("drops legacy tables")]);
    migrator.migrate(None).await.unwrap();

    assert!(matches!(
        migrator.plan_rollback(1).await,
        Err(MigrationError::Irreversible { .. })
    ));
    assert!(matches!(
        migrator.rollback(1).await,
        Err(MigrationError::Irreversible { reason, .. }) if reason == "drops legacy tables"
    ));
    assert!(store.has(&SchemaGuardQuery::table("t")));
}

#[tokio::test]
async fn unknown_versions_are_rejected() {
    let store = InMemoryStore::new();
    let full = migrator(&store, vec![v1(), v2()]);
    assert!(matches!(
        full.migrate(Some(&version("9"))).await,
        Err(MigrationError::UnknownVersion(_))
    ));
    full.migrate(None).await.unwrap();

    let older = migrator(&store, vec![v1()]);
    let status = older.status().await.unwrap();
    assert_eq!(status.orphaned.len(), 1);
    assert_eq!(status.orphaned[0].version, version("2"));
    assert!(matches!(
        older.rollback(1).await,
        Err(MigrationError::UnknownVersion(v)) if v == version("2")
    ));
}

#[tokio::test]
async fn status_serializes_as_json() {
    let store = InMemoryStore::new();
    let migrator = migrator(&store, vec![v1(), v2()]);
    migrator.migrate(Some(&version("1"))).await.unwrap();

    let json = serde_json::to_value(migrator.status().await.unwrap()).unwrap();
    assert_eq!(json["entries"][0]["version"], "1");
    assert_eq!(json["entries"][0]["state"], "applied");
    assert_eq!(json["entries"][1]["state"], "pending");
    assert!(json["entries"][1]["applied_at"].is_null());
}

#[tokio::test]
async fn failed_down_keeps_the_record() {
    let store = InMemoryStore::new();
    let migrator = migrator(&store, vec![v1(), v2()]);
    migrator.migrate(None).await.unwrap();
    store.fail_statements_matching("DROP COLUMN");

    let err = migrator.rollback(1).await.unwrap_err();
    match &err {
        MigrationError::UnitFailed {
            version: failed,
            last_applied,
            source,
        } => {
            assert_eq!(failed, &version("2"));
            assert_eq!(last_applied, &Some(version("2")));
            assert!(matches!(
                source.as_ref(),
                MigrationError::StatementExecution { statement, .. } if statement.contains("DROP COLUMN")
            ));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(store.has(&SchemaGuardQuery::column("t", "status")));

    let status = migrator.status().await.unwrap();
    assert_eq!(state_of(&status, "2"), UnitState::Applied);
    assert!(status.dirty.is_empty());

    store.clear_faults();
    migrator.rollback(1).await.unwrap();
    assert!(!store.has(&SchemaGuardQuery::column("t", "status")));
}

#[tokio::test]
async fn failed_down_reports_its_error_when_the_history_is_unreadable() {
    struct BreaksHistory(InMemoryStore);

    #[async_trait]
    impl Migration for BreaksHistory {
        fn version(&self) -> &'static str {
            "2"
        }

        fn name(&self) -> &'static str {
            "breaks_history"
        }

        async fn up(&self, _ctx: &mut MigrationContext<'_>) -> Result<(), MigrationError> {
            Ok(())
        }

        async fn down(&self, ctx: &mut MigrationContext<'_>) -> Result<(), MigrationError> {
            self.0.fail_history_reads(true);
            ctx.drop_table_if_exists("t").await?;
            Ok(())
        }
    }

    let _ = env_logger::builder().is_test(true).try_init();
    let store = InMemoryStore::new();
    let units: Vec<Box<dyn Migration>> =
        vec![Box::new(v1()), Box::new(BreaksHistory(store.clone()))];
    let migrator = Migrator::new(store.clone(), Registry::new(units).unwrap());
    migrator.migrate(None).await.unwrap();
    store.fail_statements_matching("DROP TABLE");

    match migrator.rollback(1).await {
        Err(MigrationError::UnitFailed {
            version: failed,
            last_applied,
            source,
        }) => {
            assert_eq!(failed, version("2"));
            assert_eq!(last_applied, None);
            assert!(matches!(*source, MigrationError::StatementExecution { .. }));
        }
        other => panic!("unexpected result: {other:?}"),
    }

    store.clear_faults();
    let status = migrator.status().await.unwrap();
    assert_eq!(state_of(&status, "2"), UnitState::Applied);
}

#[tokio::test]
async fn rollback_refuses_while_a_dependent_stays_applied() {
    let store = InMemoryStore::new();
    let w = || table_unit("3", "w", "idx_w_name");
    migrator(&store, vec![v1(), w()]).migrate(None).await.unwrap();

    let fixup = TestUnit::new("2", "fix_t", Step::AddStatus).requiring(&["3"]);
    let migrator = migrator(&store, vec![v1(), fixup, w()]);
    migrator.migrate(None).await.unwrap();
    let before = store.catalog();

    assert!(matches!(
        migrator.plan_rollback(1).await,
        Err(MigrationError::OrderingViolation { version: v, prerequisite: p })
            if v == version("2") && p == version("3")
    ));
    assert!(matches!(
        migrator.rollback(1).await,
        Err(MigrationError::OrderingViolation { .. })
    ));
    assert_eq!(store.catalog(), before);
    assert!(store.has(&SchemaGuardQuery::table("w")));

    let status = migrator.status().await.unwrap();
    assert_eq!(status.applied_versions().len(), 3);
}

#[tokio::test]
async fn accepted_plan_goes_stale_when_units_are_applied_in_between() {
    let store = InMemoryStore::new();
    let migrator = migrator(&store, vec![v1(), v2().lossy("status values are lost")]);
    migrator.migrate(Some(&version("1"))).await.unwrap();

    let plan = migrator.plan_rollback(1).await.unwrap();
    assert_eq!(plan.len(), 1);
    assert_eq!(plan[0].loss(), None);

    migrator.migrate(None).await.unwrap();

    assert!(matches!(
        migrator.rollback_plan(&plan).await,
        Err(MigrationError::PlanChanged { planned, found })
            if planned == [version("1")] && found == [version("2")]
    ));
    assert!(store.has(&SchemaGuardQuery::column("t", "status")));
    assert_eq!(migrator.current_version().await.unwrap(), Some(version("2")));

    let plan = migrator.plan_rollback(1).await.unwrap();
    let report = migrator.rollback_plan(&plan).await.unwrap();
    assert_eq!(report.rolled_back[0].version, version("2"));
    assert_eq!(report.warnings.len(), 1);
    assert_eq!(report.current_version, Some(version("1")));
}

mod backfill {
    use super::*;

    fn units() -> Vec<TestUnit> {
        vec![
            TestUnit::new("1", "create_sources", Step::BackfillSources),
            TestUnit::new("2", "scope_legacy_rows", Step::Backfill).lossy("tenant copies are lost"),
        ]
    }

    async fn run(tenants: &[i64], percentages: &[Option<i64>]) -> (InMemoryStore, BackfillReport) {
        let store = InMemoryStore::new();
        let migrator = migrator(&store, units());
        migrator.migrate(Some(&version("1"))).await.unwrap();
        for (i, id) in tenants.iter().enumerate() {
            let code = format!("tenant-{i}");
            store
                .insert_row("tenant", &[("id", Value::Int(*id)), ("code", code.as_str().into())])
                .unwrap();
        }
        for percentage in percentages {
            let value = percentage.map(Value::Int).unwrap_or(Value::Null);
            store.insert_row("legacy", &[("percentage", value)]).unwrap();
        }

        let mut report = migrator.migrate(None).await.unwrap();
        let backfill = report.applied.remove(0).backfills.remove(0);
        (store, backfill)
    }

    #[tokio::test]
    async fn zero_tenants_skips_without_error() {
        let (store, report) = run(&[], &[Some(10), Some(100)]).await;
        assert_eq!(report.rows_migrated, 0);
        assert_eq!(report.tenant, None);
        assert!(report.skipped.is_some());
        assert!(store.rows("scoped").unwrap().is_empty());
    }

    #[tokio::test]
    async fn single_tenant_receives_every_row() {
        let (store, report) = run(&[4], &[Some(10), None, Some(100)]).await;
        assert_eq!(report.rows_migrated, 3);
        assert_eq!(report.tenant, Some(4));
        assert_eq!(report.tenants_without_rows, 0);
        let rows = store.rows("scoped").unwrap();
        assert!(rows.iter().all(|r| r["tenant_id"] == Value::Int(4)));
    }

    #[tokio::test]
    async fn many_tenants_fall_back_to_the_lowest_id() {
        let (store, report) = run(&[7, 3, 12], &[Some(0), Some(55), Some(100), None]).await;
        assert_eq!(report.rows_migrated, 4);
        assert_eq!(report.tenant, Some(3));
        assert_eq!(report.tenants_without_rows, 2);

        let rows = store.rows("scoped").unwrap();
        assert!(rows.iter().all(|r| r["tenant_id"] == Value::Int(3)));
        let statuses: Vec<&Value> = rows.iter().map(|r| &r["status"]).collect();
        assert_eq!(
            statuses,
            [
                &Value::from("not_started"),
                &Value::from("in_progress"),
                &Value::from("implemented"),
                &Value::from("not_started"),
            ]
        );
    }
}
