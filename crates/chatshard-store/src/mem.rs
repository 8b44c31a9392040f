//! In-memory store implementation.
//!
//! Mirrors the constraint behavior of the Postgres backend — uniqueness and
//! foreign keys fail terminal, missing rows report `NoRows`, zero-row
//! deletes fail terminal — so control logic can be tested without a
//! database.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::{StoreError, StoreResult};
use crate::store::ControlStore;
use crate::types::*;

#[derive(Default)]
struct Inner {
    controller: Option<ControllerStatus>,
    instances: Vec<DbInstance>,
    mappings: Vec<DbMapping>,
    workers: Vec<WorkerMetric>,
    migration_workers: Vec<MigrationWorker>,
    migrations: Vec<DbMigration>,
    jobs: Vec<MigrationWorkerJob>,
    conn_errors: Vec<DbConnErr>,
    /// Urls for which `create_mapping` fails terminally (fault injection).
    failing_mapping_urls: HashSet<String>,
}

/// In-memory shared-state store for tests.
///
/// Clones share state, so a test can hand a clone to the component under
/// test and inspect the tables afterwards through the snapshot accessors.
#[derive(Clone, Default)]
pub struct MemStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // ── Seeding ────────────────────────────────────────────────────

    pub fn seed_db_instance(&self, instance: DbInstance) {
        self.lock().instances.push(instance);
    }

    pub fn seed_worker(&self, worker: WorkerMetric) {
        self.lock().workers.push(worker);
    }

    pub fn seed_migration_worker(&self, worker: MigrationWorker) {
        self.lock().migration_workers.push(worker);
    }

    pub fn seed_conn_err(&self, err: DbConnErr) {
        self.lock().conn_errors.push(err);
    }

    /// Delete one migration row, simulating a worker completing its job.
    pub fn complete_migration(&self, migration_id: Uuid) {
        self.lock().migrations.retain(|m| m.id != migration_id);
    }

    /// Make `create_mapping` fail terminally for one url.
    pub fn fail_mapping_writes_for(&self, url: &str) {
        self.lock().failing_mapping_urls.insert(url.to_string());
    }

    /// Flip the scaling flag, standing in for the scaling module that owns
    /// it in production.
    pub fn set_scaling(&self, scaling: bool) {
        if let Some(controller) = self.lock().controller.as_mut() {
            controller.scaling = scaling;
        }
    }

    // ── Snapshots ──────────────────────────────────────────────────

    pub fn controller(&self) -> Option<ControllerStatus> {
        self.lock().controller.clone()
    }

    pub fn mappings(&self) -> Vec<DbMapping> {
        self.lock().mappings.clone()
    }

    pub fn workers(&self) -> Vec<WorkerMetric> {
        self.lock().workers.clone()
    }

    pub fn migration_workers(&self) -> Vec<MigrationWorker> {
        self.lock().migration_workers.clone()
    }

    pub fn migrations(&self) -> Vec<DbMigration> {
        self.lock().migrations.clone()
    }

    pub fn worker_jobs(&self) -> Vec<MigrationWorkerJob> {
        self.lock().jobs.clone()
    }

    pub fn conn_errors(&self) -> Vec<DbConnErr> {
        self.lock().conn_errors.clone()
    }
}

#[async_trait]
impl ControlStore for MemStore {
    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }

    async fn controller_status(&self) -> StoreResult<ControllerStatus> {
        self.lock().controller.clone().ok_or(StoreError::NoRows)
    }

    async fn register_controller(&self) -> StoreResult<()> {
        let mut inner = self.lock();
        let scaling = inner.controller.as_ref().map(|c| c.scaling).unwrap_or(false);
        inner.controller = Some(ControllerStatus {
            scaling,
            last_heartbeat: Utc::now(),
        });
        Ok(())
    }

    async fn heartbeat(&self) -> StoreResult<()> {
        let mut inner = self.lock();
        let Some(current) = inner.controller.as_ref() else {
            return Err(StoreError::Terminal(
                "no controller registered; cannot refresh heartbeat".into(),
            ));
        };
        let scaling = current.scaling;
        inner.controller = Some(ControllerStatus {
            scaling,
            last_heartbeat: Utc::now(),
        });
        Ok(())
    }

    async fn list_workers(&self) -> StoreResult<Vec<WorkerMetric>> {
        Ok(self.lock().workers.clone())
    }

    async fn get_worker(&self, id: Uuid) -> StoreResult<WorkerMetric> {
        self.lock()
            .workers
            .iter()
            .find(|w| w.id == id)
            .cloned()
            .ok_or(StoreError::NoRows)
    }

    async fn delete_worker(&self, id: Uuid) -> StoreResult<()> {
        let mut inner = self.lock();
        let before = inner.workers.len();
        inner.workers.retain(|w| w.id != id);
        if inner.workers.len() == before {
            return Err(StoreError::Terminal(format!(
                "serving worker {id} does not exist"
            )));
        }
        Ok(())
    }

    async fn insert_migration_worker(&self, worker: &MigrationWorker) -> StoreResult<()> {
        let mut inner = self.lock();
        if inner.migration_workers.iter().any(|w| w.id == worker.id) {
            return Err(StoreError::Terminal(format!(
                "duplicate migration worker id {}",
                worker.id
            )));
        }
        inner.migration_workers.push(worker.clone());
        Ok(())
    }

    async fn delete_migration_worker(&self, id: Uuid) -> StoreResult<()> {
        let mut inner = self.lock();
        let before = inner.migration_workers.len();
        inner.migration_workers.retain(|w| w.id != id);
        if inner.migration_workers.len() == before {
            return Err(StoreError::Terminal(format!(
                "migration worker {id} does not exist"
            )));
        }
        Ok(())
    }

    async fn delete_migration_worker_cascade(&self, id: Uuid) -> StoreResult<()> {
        let mut inner = self.lock();
        let before = inner.migration_workers.len();
        inner.jobs.retain(|j| j.worker_id != id);
        inner.migrations.retain(|m| m.m_worker_id != id);
        inner.migration_workers.retain(|w| w.id != id);
        if inner.migration_workers.len() == before {
            return Err(StoreError::Terminal(format!(
                "migration worker {id} does not exist"
            )));
        }
        Ok(())
    }

    async fn list_migration_workers(&self) -> StoreResult<Vec<MigrationWorker>> {
        Ok(self.lock().migration_workers.clone())
    }

    async fn free_migration_worker(&self) -> StoreResult<Uuid> {
        let inner = self.lock();
        inner
            .migration_workers
            .iter()
            .find(|w| !inner.migrations.iter().any(|m| m.m_worker_id == w.id))
            .map(|w| w.id)
            .ok_or(StoreError::NoRows)
    }

    async fn list_db_instances(&self) -> StoreResult<Vec<DbInstance>> {
        let mut instances = self.lock().instances.clone();
        instances.sort_by(|a, b| a.url.cmp(&b.url));
        Ok(instances)
    }

    async fn list_mappings(&self) -> StoreResult<Vec<DbMapping>> {
        let mut mappings = self.lock().mappings.clone();
        mappings.sort_by(|a, b| a.range_start.cmp(&b.range_start));
        Ok(mappings)
    }

    async fn create_mapping(&self, url: &str, range_start: &str) -> StoreResult<()> {
        let mut inner = self.lock();
        if inner.failing_mapping_urls.contains(url) {
            return Err(StoreError::Terminal(format!(
                "injected write failure for {url}"
            )));
        }
        if !inner.instances.iter().any(|i| i.url == url) {
            return Err(StoreError::Terminal(format!(
                "foreign key violation: unknown database instance {url}"
            )));
        }
        if inner
            .mappings
            .iter()
            .any(|m| m.url == url && m.range_start == range_start)
        {
            return Err(StoreError::Terminal(format!(
                "duplicate mapping ({url}, {range_start})"
            )));
        }
        inner.mappings.push(DbMapping {
            id: Uuid::new_v4(),
            url: url.to_string(),
            range_start: range_start.to_string(),
            size: 0,
        });
        Ok(())
    }

    async fn mapping_for_range(&self, range_start: &str) -> StoreResult<DbMapping> {
        self.lock()
            .mappings
            .iter()
            .find(|m| m.range_start == range_start)
            .cloned()
            .ok_or(StoreError::NoRows)
    }

    async fn insert_migration(&self, migration: &DbMigration) -> StoreResult<()> {
        let mut inner = self.lock();
        if !inner
            .migration_workers
            .iter()
            .any(|w| w.id == migration.m_worker_id)
        {
            return Err(StoreError::Terminal(format!(
                "foreign key violation: unknown migration worker {}",
                migration.m_worker_id
            )));
        }
        if inner
            .migrations
            .iter()
            .any(|m| m.m_worker_id == migration.m_worker_id && !m.status.is_terminal())
        {
            return Err(StoreError::Terminal(format!(
                "unique violation: migration worker {} already has an active migration",
                migration.m_worker_id
            )));
        }
        inner.migrations.push(migration.clone());
        Ok(())
    }

    async fn insert_worker_job(&self, worker_id: Uuid, migration_id: Uuid) -> StoreResult<()> {
        let mut inner = self.lock();
        if !inner.migration_workers.iter().any(|w| w.id == worker_id) {
            return Err(StoreError::Terminal(format!(
                "foreign key violation: unknown migration worker {worker_id}"
            )));
        }
        if !inner.migrations.iter().any(|m| m.id == migration_id) {
            return Err(StoreError::Terminal(format!(
                "foreign key violation: unknown migration {migration_id}"
            )));
        }
        if inner
            .jobs
            .iter()
            .any(|j| j.worker_id == worker_id && j.migration_id == migration_id)
        {
            return Err(StoreError::Terminal(format!(
                "duplicate worker job ({worker_id}, {migration_id})"
            )));
        }
        inner.jobs.push(MigrationWorkerJob {
            worker_id,
            migration_id,
        });
        Ok(())
    }

    async fn list_conn_errors(&self) -> StoreResult<Vec<DbConnErr>> {
        Ok(self.lock().conn_errors.clone())
    }

    async fn delete_conn_err(
        &self,
        worker_id: Uuid,
        db_url: &str,
        fail_time: DateTime<Utc>,
    ) -> StoreResult<()> {
        let mut inner = self.lock();
        let before = inner.conn_errors.len();
        inner
            .conn_errors
            .retain(|e| !(e.worker_id == worker_id && e.db_url == db_url && e.fail_time == fail_time));
        if inner.conn_errors.len() == before {
            return Err(StoreError::Terminal(format!(
                "connection error ({worker_id}, {db_url}) does not exist"
            )));
        }
        Ok(())
    }
}
