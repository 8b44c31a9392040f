//! Postgres-backed store implementation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::debug;
use uuid::Uuid;

use crate::error::{StoreError, StoreResult};
use crate::store::ControlStore;
use crate::types::*;

/// Embedded schema, applied statement by statement on startup.
const SCHEMA: &str = include_str!("schema.sql");

/// Split the embedded schema into executable statements, skipping
/// comment-only fragments.
fn schema_statements(schema: &str) -> Vec<&str> {
    schema
        .split(';')
        .filter_map(|statement| {
            let trimmed = statement.trim();
            let has_sql = trimmed.lines().any(|line| {
                let line = line.trim();
                !line.is_empty() && !line.starts_with("--")
            });
            has_sql.then_some(trimmed)
        })
        .collect()
}

/// Shared-state store over a bounded Postgres connection pool.
///
/// Cloning is cheap; all clones share the pool. Each adapter call acquires a
/// connection, runs one transaction and releases it.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Connect to the shared store and bootstrap the schema.
    pub async fn connect(dsn: &str, max_connections: u32) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(dsn)
            .await?;
        let store = Self { pool };
        store.ensure_schema().await?;
        debug!(max_connections, "shared-state store connected");
        Ok(store)
    }

    /// Wrap an existing pool (tests against a scratch database).
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn ensure_schema(&self) -> StoreResult<()> {
        for statement in schema_statements(SCHEMA) {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl ControlStore for PgStore {
    async fn ping(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1").fetch_one(&self.pool).await?;
        Ok(())
    }

    async fn controller_status(&self) -> StoreResult<ControllerStatus> {
        let status: Option<ControllerStatus> =
            sqlx::query_as("SELECT scaling, last_heartbeat FROM controller_status LIMIT 1")
                .fetch_optional(&self.pool)
                .await?;
        status.ok_or(StoreError::NoRows)
    }

    async fn register_controller(&self) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;
        // Read-modify-write on the single heartbeat row; serializable so two
        // racing controllers cannot both keep their row.
        sqlx::query("SET TRANSACTION ISOLATION LEVEL SERIALIZABLE")
            .execute(&mut *tx)
            .await?;

        // Carry the scaling flag across takeovers; it lives in the store
        // precisely because the controller can die at any time.
        let scaling: Option<(bool,)> =
            sqlx::query_as("SELECT scaling FROM controller_status LIMIT 1")
                .fetch_optional(&mut *tx)
                .await?;
        let scaling = scaling.map(|row| row.0).unwrap_or(false);

        sqlx::query("DELETE FROM controller_status")
            .execute(&mut *tx)
            .await?;
        sqlx::query("INSERT INTO controller_status (scaling, last_heartbeat) VALUES ($1, $2)")
            .bind(scaling)
            .bind(Utc::now())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        debug!(scaling, "controller registered");
        Ok(())
    }

    async fn heartbeat(&self) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL SERIALIZABLE")
            .execute(&mut *tx)
            .await?;

        let scaling: Option<(bool,)> =
            sqlx::query_as("SELECT scaling FROM controller_status LIMIT 1")
                .fetch_optional(&mut *tx)
                .await?;
        let Some((scaling,)) = scaling else {
            return Err(StoreError::Terminal(
                "no controller registered; cannot refresh heartbeat".into(),
            ));
        };

        sqlx::query("DELETE FROM controller_status")
            .execute(&mut *tx)
            .await?;
        sqlx::query("INSERT INTO controller_status (scaling, last_heartbeat) VALUES ($1, $2)")
            .bind(scaling)
            .bind(Utc::now())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn list_workers(&self) -> StoreResult<Vec<WorkerMetric>> {
        let workers = sqlx::query_as(
            "SELECT id, last_heartbeat, uptime_us, reads, writes, db_availability
             FROM worker_metrics",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(workers)
    }

    async fn get_worker(&self, id: Uuid) -> StoreResult<WorkerMetric> {
        let worker: Option<WorkerMetric> = sqlx::query_as(
            "SELECT id, last_heartbeat, uptime_us, reads, writes, db_availability
             FROM worker_metrics WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        worker.ok_or(StoreError::NoRows)
    }

    async fn delete_worker(&self, id: Uuid) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;
        let result = sqlx::query("DELETE FROM worker_metrics WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::Terminal(format!(
                "serving worker {id} does not exist"
            )));
        }
        tx.commit().await?;
        debug!(worker_id = %id, "serving worker removed");
        Ok(())
    }

    async fn insert_migration_worker(&self, worker: &MigrationWorker) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "INSERT INTO migration_workers
                 (id, last_heartbeat, uptime_us, working_on_from, working_on_to)
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(worker.id)
        .bind(worker.last_heartbeat)
        .bind(worker.uptime_us)
        .bind(&worker.working_on_from)
        .bind(&worker.working_on_to)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        debug!(worker_id = %worker.id, "migration worker inserted");
        Ok(())
    }

    async fn delete_migration_worker(&self, id: Uuid) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;
        let result = sqlx::query("DELETE FROM migration_workers WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::Terminal(format!(
                "migration worker {id} does not exist"
            )));
        }
        tx.commit().await?;
        debug!(worker_id = %id, "migration worker removed");
        Ok(())
    }

    async fn delete_migration_worker_cascade(&self, id: Uuid) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM migration_worker_jobs WHERE worker_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM db_migrations WHERE m_worker_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("DELETE FROM migration_workers WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::Terminal(format!(
                "migration worker {id} does not exist"
            )));
        }
        tx.commit().await?;
        debug!(worker_id = %id, "migration worker and jobs removed");
        Ok(())
    }

    async fn list_migration_workers(&self) -> StoreResult<Vec<MigrationWorker>> {
        let workers = sqlx::query_as(
            "SELECT id, last_heartbeat, uptime_us, working_on_from, working_on_to
             FROM migration_workers",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(workers)
    }

    async fn free_migration_worker(&self) -> StoreResult<Uuid> {
        let row: Option<(Uuid,)> = sqlx::query_as(
            "SELECT mw.id FROM migration_workers mw
             WHERE NOT EXISTS (
                 SELECT 1 FROM db_migrations dm WHERE dm.m_worker_id = mw.id
             )
             LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await?;
        row.map(|(id,)| id).ok_or(StoreError::NoRows)
    }

    async fn list_db_instances(&self) -> StoreResult<Vec<DbInstance>> {
        let instances = sqlx::query_as(
            "SELECT url, max_space, occupied_space, collection_count, last_queried
             FROM db_instances ORDER BY url",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(instances)
    }

    async fn list_mappings(&self) -> StoreResult<Vec<DbMapping>> {
        let mappings = sqlx::query_as(
            "SELECT id, url, range_start, size FROM db_mappings ORDER BY range_start",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(mappings)
    }

    async fn create_mapping(&self, url: &str, range_start: &str) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("INSERT INTO db_mappings (id, url, range_start) VALUES ($1, $2, $3)")
            .bind(Uuid::new_v4())
            .bind(url)
            .bind(range_start)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        debug!(url, range_start, "mapping created");
        Ok(())
    }

    async fn mapping_for_range(&self, range_start: &str) -> StoreResult<DbMapping> {
        let mapping: Option<DbMapping> = sqlx::query_as(
            "SELECT id, url, range_start, size FROM db_mappings WHERE range_start = $1",
        )
        .bind(range_start)
        .fetch_optional(&self.pool)
        .await?;
        mapping.ok_or(StoreError::NoRows)
    }

    async fn insert_migration(&self, migration: &DbMigration) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "INSERT INTO db_migrations (id, url, m_worker_id, range_from, range_to, status)
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(migration.id)
        .bind(&migration.url)
        .bind(migration.m_worker_id)
        .bind(&migration.range_from)
        .bind(&migration.range_to)
        .bind(migration.status.as_str())
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        debug!(migration_id = %migration.id, worker_id = %migration.m_worker_id, "migration job inserted");
        Ok(())
    }

    async fn insert_worker_job(&self, worker_id: Uuid, migration_id: Uuid) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("INSERT INTO migration_worker_jobs (worker_id, migration_id) VALUES ($1, $2)")
            .bind(worker_id)
            .bind(migration_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn list_conn_errors(&self) -> StoreResult<Vec<DbConnErr>> {
        let errors =
            sqlx::query_as("SELECT worker_id, db_url, fail_time FROM db_conn_errors")
                .fetch_all(&self.pool)
                .await?;
        Ok(errors)
    }

    async fn delete_conn_err(
        &self,
        worker_id: Uuid,
        db_url: &str,
        fail_time: DateTime<Utc>,
    ) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;
        let result = sqlx::query(
            "DELETE FROM db_conn_errors
             WHERE worker_id = $1 AND db_url = $2 AND fail_time = $3",
        )
        .bind(worker_id)
        .bind(db_url)
        .bind(fail_time)
        .execute(&mut *tx)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::Terminal(format!(
                "connection error ({worker_id}, {db_url}) does not exist"
            )));
        }
        tx.commit().await?;
        Ok(())
    }
}
