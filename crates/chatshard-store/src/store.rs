//! The store adapter trait.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::StoreResult;
use crate::types::*;

/// Typed access to the shared-state tables.
///
/// Every method runs inside exactly one transaction: all reads and writes of
/// the operation commit together or not at all. There is no multi-method
/// transaction; cross-task ordering is provided solely by the store's
/// serializable transactions.
///
/// Failure contract: a write that affects zero rows where the caller's
/// precondition required at least one returns [`StoreError::Terminal`];
/// constraint violations are terminal; anything else is reconcilable.
/// Lookups that can legitimately come up empty return [`StoreError::NoRows`].
///
/// [`StoreError::Terminal`]: crate::error::StoreError::Terminal
/// [`StoreError::NoRows`]: crate::error::StoreError::NoRows
#[async_trait]
pub trait ControlStore: Send + Sync {
    /// Cheap reachability probe.
    async fn ping(&self) -> StoreResult<()>;

    // ── Controller heartbeat ───────────────────────────────────────

    /// Read the controller heartbeat row. `NoRows` when no controller has
    /// ever registered (or the row was wiped).
    async fn controller_status(&self) -> StoreResult<ControllerStatus>;

    /// Register this process as the controller: delete any existing
    /// heartbeat row and insert a fresh one, preserving the `scaling` flag.
    /// Tolerates the no-prior-row case (first boot).
    async fn register_controller(&self) -> StoreResult<()>;

    /// Refresh the heartbeat: within one transaction, read the current
    /// `scaling` flag, delete all rows, insert a fresh row stamped now.
    async fn heartbeat(&self) -> StoreResult<()>;

    // ── Serving workers ────────────────────────────────────────────

    async fn list_workers(&self) -> StoreResult<Vec<WorkerMetric>>;

    /// `NoRows` when the worker has already disappeared.
    async fn get_worker(&self, id: Uuid) -> StoreResult<WorkerMetric>;

    /// Terminal when the worker does not exist.
    async fn delete_worker(&self, id: Uuid) -> StoreResult<()>;

    // ── Migration workers ──────────────────────────────────────────

    async fn insert_migration_worker(&self, worker: &MigrationWorker) -> StoreResult<()>;

    /// Delete a single migration worker row (compensating rollback path).
    async fn delete_migration_worker(&self, id: Uuid) -> StoreResult<()>;

    /// Delete a migration worker together with all of its migrations and
    /// join rows, in one transaction.
    async fn delete_migration_worker_cascade(&self, id: Uuid) -> StoreResult<()>;

    async fn list_migration_workers(&self) -> StoreResult<Vec<MigrationWorker>>;

    /// The id of any migration worker that currently has no migration rows,
    /// or `NoRows` when every worker is busy (or none exist).
    async fn free_migration_worker(&self) -> StoreResult<Uuid>;

    // ── Backend databases and mappings ─────────────────────────────

    async fn list_db_instances(&self) -> StoreResult<Vec<DbInstance>>;

    async fn list_mappings(&self) -> StoreResult<Vec<DbMapping>>;

    async fn create_mapping(&self, url: &str, range_start: &str) -> StoreResult<()>;

    /// The mapping currently hosting the range with this start. `NoRows`
    /// when no such range exists — the precondition check of the migration
    /// pipeline.
    async fn mapping_for_range(&self, range_start: &str) -> StoreResult<DbMapping>;

    // ── Migrations ─────────────────────────────────────────────────

    async fn insert_migration(&self, migration: &DbMigration) -> StoreResult<()>;

    async fn insert_worker_job(&self, worker_id: Uuid, migration_id: Uuid) -> StoreResult<()>;

    // ── Connection errors ──────────────────────────────────────────

    async fn list_conn_errors(&self) -> StoreResult<Vec<DbConnErr>>;

    async fn delete_conn_err(
        &self,
        worker_id: Uuid,
        db_url: &str,
        fail_time: DateTime<Utc>,
    ) -> StoreResult<()>;
}
