mod common;

use async_trait::async_trait;
use grc_migrate_core::prelude::*;
use grc_migrate_core::{Resolution, UnitState};
use grc_migrate_pg::{PgMigrator, PgStore};
use serial_test::serial;
use sqlx::PgPool;

const TABLES: &[&str] = &["pg_t", "pg_u"];

struct CreateT;

#[async_trait]
impl Migration for CreateT {
    fn version(&self) -> &'static str {
        "1"
    }

    fn name(&self) -> &'static str {
        "create_pg_t"
    }

    async fn up(&self, ctx: &mut MigrationContext<'_>) -> Result<(), MigrationError> {
        ctx.create_table_if_missing(
            TableDef::new("pg_t")
                .with_id()
                .column(ColumnDef::new("name", ColumnType::Text).nullable()),
        )
        .await?;
        Ok(())
    }

    async fn down(&self, ctx: &mut MigrationContext<'_>) -> Result<(), MigrationError> {
        ctx.drop_table_if_exists("pg_t").await?;
        Ok(())
    }
}

struct AddStatus;

#[async_trait]
impl Migration for AddStatus {
    fn version(&self) -> &'static str {
        "2"
    }

    fn name(&self) -> &'static str {
        "add_pg_t_status"
    }

    async fn up(&self, ctx: &mut MigrationContext<'_>) -> Result<(), MigrationError> {
        ctx.add_column_if_missing(
            "pg_t",
            ColumnDef::new("status", ColumnType::Varchar(20)).nullable(),
        )
        .await?;
        Ok(())
    }

    async fn down(&self, ctx: &mut MigrationContext<'_>) -> Result<(), MigrationError> {
        ctx.drop_column_if_exists("pg_t", "status").await?;
        Ok(())
    }
}

/// Creates `pg_u` and then fails on a duplicate index.
struct Broken {
    transactional: bool,
}

#[async_trait]
impl Migration for Broken {
    fn version(&self) -> &'static str {
        "3"
    }

    fn name(&self) -> &'static str {
        "broken"
    }

    fn transactional(&self) -> bool {
        self.transactional
    }

    async fn up(&self, ctx: &mut MigrationContext<'_>) -> Result<(), MigrationError> {
        ctx.create_table_if_missing(TableDef::new("pg_u").with_id())
            .await?;
        let index = Statement::CreateIndex(IndexDef::new("idx_pg_u_id", "pg_u", ["id"]));
        ctx.execute(index.clone()).await?;
        ctx.execute(index).await?;
        Ok(())
    }

    async fn down(&self, ctx: &mut MigrationContext<'_>) -> Result<(), MigrationError> {
        ctx.drop_table_if_exists("pg_u").await?;
        Ok(())
    }
}

fn migrator(pool: &PgPool, broken: Option<bool>) -> PgMigrator {
    let mut units: Vec<Box<dyn Migration>> = vec![Box::new(CreateT), Box::new(AddStatus)];
    if let Some(transactional) = broken {
        units.push(Box::new(Broken { transactional }));
    }
    Migrator::new(PgStore::new(pool.clone()), Registry::new(units).unwrap())
}

async fn table_exists(pool: &PgPool, table: &str) -> bool {
    let (exists,): (bool,) = sqlx::query_as(
        r#"
        SELECT EXISTS (
            SELECT 1 FROM information_schema.tables
            WHERE table_schema = current_schema() AND table_name = $1
        )
        "#,
    )
    .bind(table)
    .fetch_one(pool)
    .await
    .expect("Failed to query information_schema");
    exists
}

async fn column_exists(pool: &PgPool, table: &str, column: &str) -> bool {
    let (exists,): (bool,) = sqlx::query_as(
        r#"
        SELECT EXISTS (
            SELECT 1 FROM information_schema.columns
            WHERE table_schema = current_schema() AND table_name = $1 AND column_name = $2
        )
        "#,
    )
    .bind(table)
    .bind(column)
    .fetch_one(pool)
    .await
    .expect("Failed to query information_schema");
    exists
}

#[tokio::test]
#[serial]
async fn test_migrate_status_and_rollback() {
    let pool = common::get_pg_pool().await;
    common::teardown(&pool, TABLES).await;

    let migrator = migrator(&pool, None);
    let report = migrator.migrate(None).await.expect("Should run migrations");
    assert_eq!(report.applied.len(), 2);
    assert!(column_exists(&pool, "pg_t", "status").await);

    let status = migrator.status().await.unwrap();
    assert_eq!(status.applied_versions().len(), 2);

    let again = migrator.migrate(None).await.unwrap();
    assert!(again.applied.is_empty(), "Second run should apply nothing");

    let rolled_back = migrator.rollback(1).await.unwrap();
    assert_eq!(rolled_back.rolled_back.len(), 1);
    assert!(!column_exists(&pool, "pg_t", "status").await);
    assert!(table_exists(&pool, "pg_t").await);
    assert_eq!(
        migrator.current_version().await.unwrap(),
        Some(Version::parse("1").unwrap())
    );

    common::teardown(&pool, TABLES).await;
}

#[tokio::test]
#[serial]
async fn test_failing_unit_rolls_back_its_ddl() {
    let pool = common::get_pg_pool().await;
    common::teardown(&pool, TABLES).await;

    let migrator = migrator(&pool, Some(true));
    let err = migrator.migrate(None).await.unwrap_err();
    assert!(matches!(
        err.root(),
        MigrationError::StatementExecution { statement, .. } if statement.contains("idx_pg_u_id")
    ));
    assert!(err.to_string().contains("last successfully applied: 2"));
    assert!(!table_exists(&pool, "pg_u").await);

    let status = migrator.status().await.unwrap();
    assert_eq!(status.applied_versions().len(), 2);
    assert_eq!(status.pending_versions().len(), 1);

    common::teardown(&pool, TABLES).await;
}

#[tokio::test]
#[serial]
async fn test_non_transactional_failure_is_resolvable() {
    let pool = common::get_pg_pool().await;
    common::teardown(&pool, TABLES).await;

    let migrator = migrator(&pool, Some(false));
    migrator.migrate(None).await.unwrap_err();
    assert!(table_exists(&pool, "pg_u").await, "Non-transactional DDL stays");

    let status = migrator.status().await.unwrap();
    let broken = status
        .entries
        .iter()
        .find(|e| e.version.as_str() == "3")
        .unwrap();
    assert_eq!(broken.state, UnitState::Failed);
    assert!(matches!(
        migrator.migrate(None).await,
        Err(MigrationError::DirtyState { .. })
    ));

    migrator
        .resolve_dirty(&Version::parse("3").unwrap(), Resolution::Applied)
        .await
        .unwrap();
    let status = migrator.status().await.unwrap();
    assert_eq!(status.applied_versions().len(), 3);
    assert!(status.dirty.is_empty());

    common::teardown(&pool, TABLES).await;
}

#[tokio::test]
#[serial]
async fn test_concurrent_runners_apply_once() {
    let pool = common::get_pg_pool().await;
    common::teardown(&pool, TABLES).await;

    let first = migrator(&pool, None);
    let second = migrator(&pool, None);
    let (a, b) = tokio::join!(first.migrate(None), second.migrate(None));
    let total = a.unwrap().applied.len() + b.unwrap().applied.len();
    assert_eq!(total, 2, "Each unit should be applied exactly once");

    common::teardown(&pool, TABLES).await;
}
