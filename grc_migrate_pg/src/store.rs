use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgConnection, PgPoolOptions};
use sqlx::{Connection, PgPool, Row};

use grc_migrate_core::statement::Statement;
use grc_migrate_core::{
    AppliedMigration, BackendError, Direction, DirtyMarker, Executor, Ident, LockMode,
    MigrationStore, MigratorConfig, SchemaGuardQuery, StoreConnection, Version,
};

use crate::error::PgStoreError;
use crate::render::render;

const APPLIED_TABLE: &str = "_grc_migrations";
const DIRTY_TABLE: &str = "_grc_migrations_dirty";

/// A PostgreSQL migration store backed by a connection pool.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Creates a new store with the given connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connects a small pool for a single runner, which holds one detached
    /// session at a time.
    pub async fn connect_url(url: &str) -> Result<Self, PgStoreError> {
        let pool = PgPoolOptions::new().max_connections(2).connect(url).await?;
        Ok(Self::new(pool))
    }

    /// The underlying pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl MigrationStore for PgStore {
    type Connection = PgStoreConnection;

    async fn connect(&self, config: &MigratorConfig) -> Result<PgStoreConnection, BackendError> {
        // Detached so that dropping the session closes it instead of handing
        // an open transaction or a held advisory lock back to the pool.
        let mut conn = self.pool.acquire().await?.detach();
        if let Some(timeout) = config.statement_timeout {
            log::debug!("Setting statement timeout to {timeout:?}");
            sqlx::query("SELECT set_config('statement_timeout', $1, false)")
                .bind(format!("{}ms", timeout.as_millis()))
                .execute(&mut conn)
                .await?;
        }
        Ok(PgStoreConnection { conn })
    }
}

/// A dedicated session on a [`PgStore`].
#[derive(Debug)]
pub struct PgStoreConnection {
    conn: PgConnection,
}

impl PgStoreConnection {
    /// The underlying session, for queries outside the statement model.
    pub fn connection(&mut self) -> &mut PgConnection {
        &mut self.conn
    }
}

fn parse_version(table: &'static str, value: &str) -> Result<Version, PgStoreError> {
    Version::parse(value).map_err(|e| PgStoreError::InvalidRecord {
        table,
        reason: e.to_string(),
    })
}

#[async_trait]
impl Executor for PgStoreConnection {
    async fn probe(&mut self, query: &SchemaGuardQuery) -> Result<bool, BackendError> {
        let (exists,): (bool,) = match query {
            SchemaGuardQuery::Table { table } => {
                sqlx::query_as(
                    r#"
                    SELECT EXISTS (
                        SELECT 1 FROM information_schema.tables
                        WHERE table_schema = current_schema() AND table_name = $1
                    )
                    "#,
                )
                .bind(table.as_str())
                .fetch_one(&mut self.conn)
                .await?
            }
            SchemaGuardQuery::Column { table, column } => {
                sqlx::query_as(
                    r#"
                    SELECT EXISTS (
                        SELECT 1 FROM information_schema.columns
                        WHERE table_schema = current_schema()
                          AND table_name = $1
                          AND column_name = $2
                    )
                    "#,
                )
                .bind(table.as_str())
                .bind(column.as_str())
                .fetch_one(&mut self.conn)
                .await?
            }
            SchemaGuardQuery::Index { table, index } => {
                sqlx::query_as(
                    r#"
                    SELECT EXISTS (
                        SELECT 1 FROM pg_indexes
                        WHERE schemaname = current_schema()
                          AND tablename = $1
                          AND indexname = $2
                    )
                    "#,
                )
                .bind(table.as_str())
                .bind(index.as_str())
                .fetch_one(&mut self.conn)
                .await?
            }
            SchemaGuardQuery::Constraint { table, constraint } => {
                sqlx::query_as(
                    r#"
                    SELECT EXISTS (
                        SELECT 1 FROM information_schema.table_constraints
                        WHERE constraint_schema = current_schema()
                          AND table_name = $1
                          AND constraint_name = $2
                    )
                    "#,
                )
                .bind(table.as_str())
                .bind(constraint.as_str())
                .fetch_one(&mut self.conn)
                .await?
            }
        };
        Ok(exists)
    }

    async fn execute(&mut self, statement: &Statement) -> Result<u64, BackendError> {
        let rendered = render(statement)?;
        let result = rendered.query().execute(&mut self.conn).await?;
        Ok(result.rows_affected())
    }

    async fn fetch_ids(&mut self, table: &Ident, column: &Ident) -> Result<Vec<i64>, BackendError> {
        let sql = format!(
            "SELECT \"{column}\"::BIGINT FROM \"{table}\" WHERE \"{column}\" IS NOT NULL ORDER BY 1"
        );
        let rows: Vec<(i64,)> = sqlx::query_as(&sql).fetch_all(&mut self.conn).await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    async fn count_rows(&mut self, table: &Ident) -> Result<u64, BackendError> {
        let sql = format!("SELECT COUNT(*) FROM \"{table}\"");
        let (count,): (i64,) = sqlx::query_as(&sql).fetch_one(&mut self.conn).await?;
        Ok(count.try_into()?)
    }
}

#[async_trait]
impl StoreConnection for PgStoreConnection {
    /// Takes a session advisory lock keyed on an MD5 of `name`, split into
    /// two int4 halves for a 64-bit key space.
    async fn lock(&mut self, name: &str, mode: LockMode) -> Result<bool, BackendError> {
        match mode {
            LockMode::Wait => {
                sqlx::query(
                    r#"
                    SELECT pg_advisory_lock(
                        ('x' || substr(md5($1), 1, 8))::bit(32)::int,
                        ('x' || substr(md5($1), 9, 8))::bit(32)::int
                    )
                    "#,
                )
                .bind(name)
                .execute(&mut self.conn)
                .await?;
                Ok(true)
            }
            LockMode::NoWait => {
                let (acquired,): (bool,) = sqlx::query_as(
                    r#"
                    SELECT pg_try_advisory_lock(
                        ('x' || substr(md5($1), 1, 8))::bit(32)::int,
                        ('x' || substr(md5($1), 9, 8))::bit(32)::int
                    )
                    "#,
                )
                .bind(name)
                .fetch_one(&mut self.conn)
                .await?;
                Ok(acquired)
            }
        }
    }

    async fn unlock(&mut self, name: &str) -> Result<(), BackendError> {
        let (released,): (bool,) = sqlx::query_as(
            r#"
            SELECT pg_advisory_unlock(
                ('x' || substr(md5($1), 1, 8))::bit(32)::int,
                ('x' || substr(md5($1), 9, 8))::bit(32)::int
            )
            "#,
        )
        .bind(name)
        .fetch_one(&mut self.conn)
        .await?;
        if !released {
            log::warn!("Advisory lock `{name}` was not held by this session");
        }
        Ok(())
    }

    async fn ensure_bookkeeping(&mut self) -> Result<(), BackendError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS _grc_migrations (
                version VARCHAR(32) PRIMARY KEY,
                description TEXT NOT NULL,
                applied_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                checksum VARCHAR(64) NOT NULL
            )
            "#,
        )
        .execute(&mut self.conn)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS _grc_migrations_dirty (
                version VARCHAR(32) PRIMARY KEY,
                direction VARCHAR(16) NOT NULL,
                started_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&mut self.conn)
        .await?;

        Ok(())
    }

    async fn applied(&mut self) -> Result<Vec<AppliedMigration>, BackendError> {
        let rows = sqlx::query(
            r#"
            SELECT version, description, applied_at, checksum
            FROM _grc_migrations
            "#,
        )
        .fetch_all(&mut self.conn)
        .await?;

        let mut applied = Vec::with_capacity(rows.len());
        for row in rows {
            let version: String = row.get("version");
            applied.push(AppliedMigration {
                version: parse_version(APPLIED_TABLE, &version)?,
                description: row.get("description"),
                applied_at: row.get("applied_at"),
                checksum: row.get("checksum"),
            });
        }
        Ok(applied)
    }

    async fn dirty(&mut self) -> Result<Vec<DirtyMarker>, BackendError> {
        let rows = sqlx::query(
            r#"
            SELECT version, direction, started_at
            FROM _grc_migrations_dirty
            "#,
        )
        .fetch_all(&mut self.conn)
        .await?;

        let mut markers = Vec::with_capacity(rows.len());
        for row in rows {
            let version: String = row.get("version");
            let direction: String = row.get("direction");
            let started_at: DateTime<Utc> = row.get("started_at");
            let direction =
                Direction::parse(&direction).ok_or_else(|| PgStoreError::InvalidRecord {
                    table: DIRTY_TABLE,
                    reason: format!("unknown direction `{direction}`"),
                })?;
            markers.push(DirtyMarker {
                version: parse_version(DIRTY_TABLE, &version)?,
                direction,
                started_at,
            });
        }
        Ok(markers)
    }

    async fn begin(&mut self) -> Result<(), BackendError> {
        sqlx::query("BEGIN").execute(&mut self.conn).await?;
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), BackendError> {
        sqlx::query("COMMIT").execute(&mut self.conn).await?;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), BackendError> {
        sqlx::query("ROLLBACK").execute(&mut self.conn).await?;
        Ok(())
    }

    async fn record_applied(&mut self, record: &AppliedMigration) -> Result<(), BackendError> {
        sqlx::query(
            r#"
            INSERT INTO _grc_migrations (version, description, applied_at, checksum)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(record.version.as_str())
        .bind(&record.description)
        .bind(record.applied_at)
        .bind(&record.checksum)
        .execute(&mut self.conn)
        .await?;
        Ok(())
    }

    async fn remove_applied(&mut self, version: &Version) -> Result<(), BackendError> {
        sqlx::query("DELETE FROM _grc_migrations WHERE version = $1")
            .bind(version.as_str())
            .execute(&mut self.conn)
            .await?;
        Ok(())
    }

    async fn mark_dirty(&mut self, marker: &DirtyMarker) -> Result<(), BackendError> {
        sqlx::query(
            r#"
            INSERT INTO _grc_migrations_dirty (version, direction, started_at)
            VALUES ($1, $2, $3)
            "#,
        )
        .bind(marker.version.as_str())
        .bind(marker.direction.as_str())
        .bind(marker.started_at)
        .execute(&mut self.conn)
        .await?;
        Ok(())
    }

    async fn clear_dirty(&mut self, version: &Version) -> Result<(), BackendError> {
        sqlx::query("DELETE FROM _grc_migrations_dirty WHERE version = $1")
            .bind(version.as_str())
            .execute(&mut self.conn)
            .await?;
        Ok(())
    }

    async fn close(self) -> Result<(), BackendError> {
        self.conn.close().await?;
        Ok(())
    }
}
