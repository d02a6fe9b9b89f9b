mod common;

use std::time::Duration;

use grc_migrate_core::prelude::*;
use grc_migrate_core::{Executor, StoreConnection};
use grc_migrate_pg::PgStore;
use serial_test::serial;

const TABLES: &[&str] = &["probe_child", "probe_parent"];

fn parent() -> Statement {
    Statement::CreateTable(
        TableDef::new("probe_parent")
            .with_id()
            .column(ColumnDef::new("code", ColumnType::Varchar(50)))
            .unique("uniq_probe_parent_code", ["code"]),
    )
}

fn child() -> Statement {
    Statement::CreateTable(
        TableDef::new("probe_child")
            .with_id()
            .column(ColumnDef::new("parent_id", ColumnType::Integer).nullable()),
    )
}

#[tokio::test]
#[serial]
async fn test_probes_answer_from_the_catalog() {
    let pool = common::get_pg_pool().await;
    common::teardown(&pool, TABLES).await;

    let store = PgStore::new(pool.clone());
    let mut conn = store.connect(&MigratorConfig::default()).await.unwrap();

    assert!(!conn.probe(&SchemaGuardQuery::table("probe_parent")).await.unwrap());
    conn.execute(&parent()).await.unwrap();
    conn.execute(&child()).await.unwrap();
    conn.execute(&Statement::CreateIndex(IndexDef::new(
        "idx_probe_child_parent",
        "probe_child",
        ["parent_id"],
    )))
    .await
    .unwrap();
    conn.execute(&Statement::AddForeignKey(ForeignKeyDef::new(
        "fk_probe_child_parent",
        "probe_child",
        "parent_id",
        "probe_parent",
    )))
    .await
    .unwrap();

    assert!(conn.probe(&SchemaGuardQuery::table("probe_parent")).await.unwrap());
    assert!(conn.probe(&SchemaGuardQuery::column("probe_parent", "code")).await.unwrap());
    assert!(!conn.probe(&SchemaGuardQuery::column("probe_parent", "name")).await.unwrap());
    assert!(conn
        .probe(&SchemaGuardQuery::index("probe_child", "idx_probe_child_parent"))
        .await
        .unwrap());
    assert!(conn
        .probe(&SchemaGuardQuery::constraint("probe_child", "fk_probe_child_parent"))
        .await
        .unwrap());
    assert!(conn
        .probe(&SchemaGuardQuery::constraint("probe_parent", "uniq_probe_parent_code"))
        .await
        .unwrap());
    assert!(!conn
        .probe(&SchemaGuardQuery::constraint("probe_parent", "fk_probe_child_parent"))
        .await
        .unwrap());

    conn.close().await.unwrap();
    common::teardown(&pool, TABLES).await;
}

#[tokio::test]
#[serial]
async fn test_rollback_discards_ddl() {
    let pool = common::get_pg_pool().await;
    common::teardown(&pool, TABLES).await;

    let store = PgStore::new(pool.clone());
    let mut conn = store.connect(&MigratorConfig::default()).await.unwrap();
    conn.begin().await.unwrap();
    conn.execute(&parent()).await.unwrap();
    assert!(conn.probe(&SchemaGuardQuery::table("probe_parent")).await.unwrap());
    conn.rollback().await.unwrap();
    assert!(!conn.probe(&SchemaGuardQuery::table("probe_parent")).await.unwrap());

    conn.close().await.unwrap();
    common::teardown(&pool, TABLES).await;
}

#[tokio::test]
#[serial]
async fn test_dropped_session_rolls_back_and_unlocks() {
    let pool = common::get_pg_pool().await;
    common::teardown(&pool, TABLES).await;

    let store = PgStore::new(pool.clone());
    let config = MigratorConfig::default();
    {
        let mut conn = store.connect(&config).await.unwrap();
        assert!(conn.lock("grc_migrate_test", LockMode::NoWait).await.unwrap());
        conn.begin().await.unwrap();
        conn.execute(&parent()).await.unwrap();
    }

    let mut conn = store.connect(&config).await.unwrap();
    // The server notices the closed socket asynchronously.
    let mut acquired = false;
    for _ in 0..50 {
        if conn.lock("grc_migrate_test", LockMode::NoWait).await.unwrap() {
            acquired = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    assert!(acquired, "advisory lock should be released with the session");
    assert!(!conn.probe(&SchemaGuardQuery::table("probe_parent")).await.unwrap());
    conn.unlock("grc_migrate_test").await.unwrap();

    conn.close().await.unwrap();
    common::teardown(&pool, TABLES).await;
}

#[tokio::test]
#[serial]
async fn test_no_wait_lock_fails_while_held() {
    let pool = common::get_pg_pool().await;
    let store = PgStore::new(pool.clone());
    let config = MigratorConfig::default();

    let mut first = store.connect(&config).await.unwrap();
    let mut second = store.connect(&config).await.unwrap();
    assert!(first.lock("grc_migrate_test", LockMode::NoWait).await.unwrap());
    assert!(!second.lock("grc_migrate_test", LockMode::NoWait).await.unwrap());

    first.unlock("grc_migrate_test").await.unwrap();
    assert!(second.lock("grc_migrate_test", LockMode::NoWait).await.unwrap());
    second.unlock("grc_migrate_test").await.unwrap();

    first.close().await.unwrap();
    second.close().await.unwrap();
}

#[tokio::test]
#[serial]
async fn test_bookkeeping_round_trip() {
    let pool = common::get_pg_pool().await;
    common::teardown(&pool, TABLES).await;

    let store = PgStore::new(pool.clone());
    let mut conn = store.connect(&MigratorConfig::default()).await.unwrap();
    conn.ensure_bookkeeping().await.unwrap();
    conn.ensure_bookkeeping().await.unwrap();
    assert!(conn.applied().await.unwrap().is_empty());

    let version = Version::parse("20251101000000").unwrap();
    let record = grc_migrate_core::AppliedMigration {
        version: version.clone(),
        description: "create_tenants_and_users".to_string(),
        applied_at: chrono::Utc::now(),
        checksum: "abc".to_string(),
    };
    conn.record_applied(&record).await.unwrap();
    let applied = conn.applied().await.unwrap();
    assert_eq!(applied.len(), 1);
    assert_eq!(applied[0].version, version);
    assert_eq!(applied[0].description, "create_tenants_and_users");

    conn.mark_dirty(&grc_migrate_core::DirtyMarker {
        version: version.clone(),
        direction: Direction::Backward,
        started_at: chrono::Utc::now(),
    })
    .await
    .unwrap();
    let dirty = conn.dirty().await.unwrap();
    assert_eq!(dirty.len(), 1);
    assert_eq!(dirty[0].direction, Direction::Backward);

    conn.clear_dirty(&version).await.unwrap();
    conn.remove_applied(&version).await.unwrap();
    assert!(conn.dirty().await.unwrap().is_empty());
    assert!(conn.applied().await.unwrap().is_empty());

    conn.close().await.unwrap();
    common::teardown(&pool, TABLES).await;
}

#[tokio::test]
#[serial]
async fn test_statement_timeout_applies_to_the_session() {
    let pool = common::get_pg_pool().await;
    let store = PgStore::new(pool.clone());
    let config = MigratorConfig {
        statement_timeout: Some(Duration::from_millis(200)),
        ..MigratorConfig::default()
    };

    let mut conn = store.connect(&config).await.unwrap();
    let timeout: String = sqlx::query_scalar("SHOW statement_timeout")
        .fetch_one(conn.connection())
        .await
        .unwrap();
    assert_eq!(timeout, "200ms");

    let result = sqlx::query("SELECT pg_sleep(2)")
        .execute(conn.connection())
        .await;
    assert!(result.is_err(), "statement should hit the timeout");

    conn.close().await.unwrap();
}

#[tokio::test]
#[serial]
async fn test_fetch_ids_and_count_rows() {
    let pool = common::get_pg_pool().await;
    common::teardown(&pool, TABLES).await;

    let store = PgStore::new(pool.clone());
    let mut conn = store.connect(&MigratorConfig::default()).await.unwrap();
    conn.execute(&parent()).await.unwrap();
    for (id, code) in [(5, "b"), (2, "a"), (9, "c")] {
        sqlx::query("INSERT INTO probe_parent (id, code) VALUES ($1, $2)")
            .bind(id)
            .bind(code)
            .execute(&pool)
            .await
            .unwrap();
    }

    let ids = conn
        .fetch_ids(&Ident::from("probe_parent"), &Ident::from("id"))
        .await
        .unwrap();
    assert_eq!(ids, [2, 5, 9]);
    assert_eq!(conn.count_rows(&Ident::from("probe_parent")).await.unwrap(), 3);

    conn.close().await.unwrap();
    common::teardown(&pool, TABLES).await;
}
