//! Reconciler — liveness and health of everything around the controller.
//!
//! All checks are best-effort and self-healing: a reconcilable store error
//! aborts the current sweep but never the loop; terminal errors bubble up so
//! the shell can step the leader down.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use chatshard_store::{ControlStore, OpCtx, RetryPolicy, StoreError};

use crate::error::{ControlError, ControlResult};
use crate::failure::{FailureMatrix, FAILURE_RATE_THRESHOLD, FAILURE_RATE_WINDOW_MINUTES};

/// Liveness bounds, read from the environment at startup.
#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    /// Leader heartbeat age after which the shadow presumes a crash.
    pub controller_timeout: Duration,
    /// Worker heartbeat age after which eviction starts.
    pub worker_timeout: Duration,
    /// Minimum uptime a serving worker must report while the system is not
    /// scaling.
    pub minimum_uptime: Duration,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            controller_timeout: Duration::from_secs(10),
            worker_timeout: Duration::from_secs(5),
            minimum_uptime: Duration::from_secs(5),
        }
    }
}

/// Whether a heartbeat is still within its allowed age.
fn heartbeat_ok(last: DateTime<Utc>, now: DateTime<Utc>, timeout: Duration) -> bool {
    let limit = chrono::Duration::from_std(timeout).unwrap_or(chrono::Duration::MAX);
    now.signed_duration_since(last) <= limit
}

/// What a per-worker re-check verifies before deleting.
#[derive(Debug, Clone, Copy)]
enum Recheck {
    Heartbeat,
    Uptime,
}

/// Periodic health checks over the shared store.
pub struct Reconciler<S> {
    store: S,
    retry: RetryPolicy,
    config: ReconcilerConfig,
}

impl<S> Reconciler<S>
where
    S: ControlStore + Clone + 'static,
{
    pub fn new(store: S, retry: RetryPolicy, config: ReconcilerConfig) -> Self {
        Self {
            store,
            retry,
            config,
        }
    }

    /// Store reachability; the leader's fatal path and `/health` both sit
    /// on this.
    pub async fn ping(&self, ctx: &OpCtx) -> ControlResult<()> {
        self.retry.run(ctx, || self.store.ping()).await?;
        Ok(())
    }

    pub async fn register_controller(&self, ctx: &OpCtx) -> ControlResult<()> {
        self.retry
            .run(ctx, || self.store.register_controller())
            .await?;
        Ok(())
    }

    pub async fn heartbeat(&self, ctx: &OpCtx) -> ControlResult<()> {
        self.retry.run(ctx, || self.store.heartbeat()).await?;
        Ok(())
    }

    /// Shadow-side check of the leader's heartbeat.
    ///
    /// Returns [`ControlError::ControllerCrashed`] when the heartbeat row is
    /// missing or older than the configured timeout; the shell reacts by
    /// promoting the shadow.
    pub async fn check_controller_up(&self, ctx: &OpCtx) -> ControlResult<()> {
        let status = match self.retry.run(ctx, || self.store.controller_status()).await {
            Ok(status) => status,
            Err(StoreError::NoRows) => {
                warn!("controller heartbeat row is missing; presuming crash");
                return Err(ControlError::ControllerCrashed);
            }
            Err(err) => return Err(err.into()),
        };

        let now = Utc::now();
        let age = now.signed_duration_since(status.last_heartbeat);
        debug!(
            seconds = age.num_milliseconds() as f64 / 1000.0,
            "time since last controller heartbeat"
        );

        if !heartbeat_ok(status.last_heartbeat, now, self.config.controller_timeout) {
            warn!(
                timeout = ?self.config.controller_timeout,
                "controller surpassed its heartbeat timeout; activating shadow"
            );
            return Err(ControlError::ControllerCrashed);
        }
        Ok(())
    }

    // ── Serving-worker liveness ────────────────────────────────────

    /// One sweep over the serving workers.
    ///
    /// A delinquent heartbeat or (outside of scaling) a too-low uptime does
    /// not delete immediately: a sub-task re-reads the row and only deletes
    /// when the worker is still in violation, so a single missed heartbeat
    /// racing with the sweep does not kill a healthy worker. Sub-tasks run
    /// concurrently; the sweep waits for all of them before returning.
    pub async fn evaluate_workers(&self, ctx: &OpCtx) -> ControlResult<()> {
        let status = self.retry.run(ctx, || self.store.controller_status()).await?;
        let scaling = status.scaling;

        let workers = self.retry.run(ctx, || self.store.list_workers()).await?;
        let now = Utc::now();
        let minimum_uptime_us = self.config.minimum_uptime.as_micros() as i64;

        let mut rechecks: Vec<JoinHandle<()>> = Vec::new();
        for worker in workers {
            debug!(worker_id = %worker.id, "evaluating serving worker");

            if !heartbeat_ok(worker.last_heartbeat, now, self.config.worker_timeout) {
                warn!(worker_id = %worker.id, "delayed serving-worker heartbeat; re-checking");
                rechecks.push(self.spawn_recheck(worker.id, Recheck::Heartbeat));
            }

            if !scaling && worker.uptime_us < minimum_uptime_us {
                warn!(worker_id = %worker.id, "unusually low serving-worker uptime; re-checking");
                rechecks.push(self.spawn_recheck(worker.id, Recheck::Uptime));
            }
        }

        for handle in rechecks {
            let _ = handle.await;
        }
        Ok(())
    }

    fn spawn_recheck(&self, worker_id: Uuid, what: Recheck) -> JoinHandle<()> {
        let store = self.store.clone();
        let retry = self.retry.clone();
        let config = self.config.clone();

        tokio::spawn(async move {
            let ctx = OpCtx::background();
            let delinquent = match retry.run(&ctx, || store.get_worker(worker_id)).await {
                Ok(worker) => match what {
                    Recheck::Heartbeat => {
                        !heartbeat_ok(worker.last_heartbeat, Utc::now(), config.worker_timeout)
                    }
                    Recheck::Uptime => {
                        worker.uptime_us < config.minimum_uptime.as_micros() as i64
                    }
                },
                Err(StoreError::NoRows) => {
                    debug!(worker_id = %worker_id, "worker disappeared before the re-check");
                    false
                }
                Err(err) => {
                    warn!(worker_id = %worker_id, error = %err, "re-reading worker failed; removing");
                    true
                }
            };

            if delinquent {
                warn!(worker_id = %worker_id, "serving worker did not recover; removing");
                if let Err(err) = retry.run(&ctx, || store.delete_worker(worker_id)).await {
                    error!(worker_id = %worker_id, error = %err, "could not remove delinquent worker");
                }
            }
        })
    }

    // ── Migration-worker liveness ──────────────────────────────────

    /// Evict migration workers whose heartbeat went stale, cascading over
    /// their migrations and join rows.
    pub async fn evaluate_migration_workers(&self, ctx: &OpCtx) -> ControlResult<()> {
        let workers = self
            .retry
            .run(ctx, || self.store.list_migration_workers())
            .await?;
        if workers.is_empty() {
            debug!("no migration workers running");
            return Ok(());
        }

        let now = Utc::now();
        for worker in workers {
            if heartbeat_ok(worker.last_heartbeat, now, self.config.worker_timeout) {
                continue;
            }
            warn!(worker_id = %worker.id, "stale migration-worker heartbeat; removing with jobs");
            if let Err(err) = self
                .retry
                .run(ctx, || self.store.delete_migration_worker_cascade(worker.id))
                .await
            {
                error!(worker_id = %worker.id, error = %err, "could not remove migration worker");
            }
        }
        Ok(())
    }

    // ── Failure rate ───────────────────────────────────────────────

    /// Evict stale connection errors and warn on hot (worker, database)
    /// pairs, workers and databases. Observability only — nothing is
    /// evicted on a warning.
    pub async fn check_failure_rate(&self, ctx: &OpCtx) -> ControlResult<Vec<String>> {
        debug!("checking for unusually high failure rates");

        let all = self.retry.run(ctx, || self.store.list_conn_errors()).await?;
        let cutoff = Utc::now() - chrono::Duration::minutes(FAILURE_RATE_WINDOW_MINUTES);

        let mut recent = Vec::new();
        for conn_err in all {
            if conn_err.fail_time <= cutoff {
                self.retry
                    .run(ctx, || {
                        self.store.delete_conn_err(
                            conn_err.worker_id,
                            &conn_err.db_url,
                            conn_err.fail_time,
                        )
                    })
                    .await?;
                continue;
            }
            recent.push(conn_err);
        }

        let warnings = FailureMatrix::build(&recent).warnings(FAILURE_RATE_THRESHOLD);
        if warnings.is_empty() {
            info!(
                window_minutes = FAILURE_RATE_WINDOW_MINUTES,
                "no high failure rates detected"
            );
        } else {
            warn!(
                window_minutes = FAILURE_RATE_WINDOW_MINUTES,
                ?warnings,
                "high failure rates detected"
            );
        }
        Ok(warnings)
    }
}

#[cfg(test)]
mod tests {
    use chatshard_store::{BackoffKind, DbConnErr, MemStore, WorkerMetric, MigrationWorker};

    use super::*;

    fn fast_retry() -> RetryPolicy {
        RetryPolicy::new(3, Duration::from_millis(1), BackoffKind::Linear)
    }

    fn test_reconciler(store: MemStore) -> Reconciler<MemStore> {
        Reconciler::new(store, fast_retry(), ReconcilerConfig::default())
    }

    fn worker(age_secs: i64, uptime: Duration) -> WorkerMetric {
        WorkerMetric {
            id: Uuid::new_v4(),
            last_heartbeat: Utc::now() - chrono::Duration::seconds(age_secs),
            uptime_us: uptime.as_micros() as i64,
            reads: 0,
            writes: 0,
            db_availability: 1.0,
        }
    }

    fn migration_worker(age_secs: i64) -> MigrationWorker {
        MigrationWorker {
            id: Uuid::new_v4(),
            last_heartbeat: Utc::now() - chrono::Duration::seconds(age_secs),
            uptime_us: 0,
            working_on_from: "a".into(),
            working_on_to: "m".into(),
        }
    }

    #[test]
    fn heartbeat_age_boundary() {
        let now = Utc::now();
        let timeout = Duration::from_secs(5);
        assert!(heartbeat_ok(now - chrono::Duration::seconds(4), now, timeout));
        assert!(!heartbeat_ok(now - chrono::Duration::seconds(6), now, timeout));
    }

    #[tokio::test]
    async fn controller_check_passes_on_fresh_heartbeat() {
        let store = MemStore::new();
        store.register_controller().await.unwrap();
        let reconciler = test_reconciler(store);

        reconciler
            .check_controller_up(&OpCtx::background())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn missing_controller_row_is_a_crash() {
        let reconciler = test_reconciler(MemStore::new());
        assert!(matches!(
            reconciler.check_controller_up(&OpCtx::background()).await,
            Err(ControlError::ControllerCrashed)
        ));
    }

    #[tokio::test]
    async fn stale_controller_heartbeat_is_a_crash() {
        let store = MemStore::new();
        store.register_controller().await.unwrap();
        let reconciler = Reconciler::new(
            store,
            fast_retry(),
            ReconcilerConfig {
                controller_timeout: Duration::from_secs(0),
                ..ReconcilerConfig::default()
            },
        );

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(matches!(
            reconciler.check_controller_up(&OpCtx::background()).await,
            Err(ControlError::ControllerCrashed)
        ));
    }

    #[tokio::test]
    async fn heartbeat_keeps_a_single_row() {
        let store = MemStore::new();
        store.register_controller().await.unwrap();
        let reconciler = test_reconciler(store.clone());

        for _ in 0..3 {
            reconciler.heartbeat(&OpCtx::background()).await.unwrap();
        }
        assert!(store.controller().is_some());
    }

    #[tokio::test]
    async fn stale_worker_is_evicted() {
        let store = MemStore::new();
        store.register_controller().await.unwrap();
        store.set_scaling(true); // isolate the heartbeat path
        store.seed_worker(worker(30, Duration::from_secs(60)));
        let reconciler = test_reconciler(store.clone());

        reconciler.evaluate_workers(&OpCtx::background()).await.unwrap();
        assert!(store.workers().is_empty());
    }

    #[tokio::test]
    async fn healthy_worker_survives_the_sweep() {
        let store = MemStore::new();
        store.register_controller().await.unwrap();
        store.seed_worker(worker(1, Duration::from_secs(60)));
        let reconciler = test_reconciler(store.clone());

        reconciler.evaluate_workers(&OpCtx::background()).await.unwrap();
        assert_eq!(store.workers().len(), 1);
    }

    #[tokio::test]
    async fn low_uptime_evicts_unless_scaling() {
        let store = MemStore::new();
        store.register_controller().await.unwrap();
        store.seed_worker(worker(1, Duration::from_secs(1)));
        let reconciler = test_reconciler(store.clone());

        reconciler.evaluate_workers(&OpCtx::background()).await.unwrap();
        assert!(store.workers().is_empty());
    }

    #[tokio::test]
    async fn low_uptime_is_tolerated_while_scaling() {
        let store = MemStore::new();
        store.register_controller().await.unwrap();
        store.set_scaling(true);
        store.seed_worker(worker(1, Duration::from_secs(1)));
        let reconciler = test_reconciler(store.clone());

        reconciler.evaluate_workers(&OpCtx::background()).await.unwrap();
        assert_eq!(store.workers().len(), 1);
    }

    #[tokio::test]
    async fn stale_migration_worker_cascades_away() {
        let store = MemStore::new();
        let stale = migration_worker(30);
        let stale_id = stale.id;
        store.seed_migration_worker(stale);
        store.seed_migration_worker(migration_worker(0));

        let migration = chatshard_store::DbMigration {
            id: Uuid::new_v4(),
            url: "postgres://u2".into(),
            m_worker_id: stale_id,
            range_from: "a".into(),
            range_to: "m".into(),
            status: chatshard_store::MigrationStatus::Waiting,
        };
        store.insert_migration(&migration).await.unwrap();
        store.insert_worker_job(stale_id, migration.id).await.unwrap();

        let reconciler = test_reconciler(store.clone());
        reconciler
            .evaluate_migration_workers(&OpCtx::background())
            .await
            .unwrap();

        assert_eq!(store.migration_workers().len(), 1);
        assert!(store.migrations().is_empty());
        assert!(store.worker_jobs().is_empty());
    }

    #[tokio::test]
    async fn failure_rate_evicts_old_entries_and_warns_on_hot_pairs() {
        let store = MemStore::new();
        let hot_worker = Uuid::new_v4();

        // Six fresh errors on one pair: above the threshold.
        for i in 0..6 {
            store.seed_conn_err(DbConnErr {
                worker_id: hot_worker,
                db_url: "postgres://u1".into(),
                fail_time: Utc::now() - chrono::Duration::seconds(i),
            });
        }
        // One entry far past the window: evicted, not counted.
        store.seed_conn_err(DbConnErr {
            worker_id: Uuid::new_v4(),
            db_url: "postgres://u2".into(),
            fail_time: Utc::now() - chrono::Duration::minutes(45),
        });

        let reconciler = test_reconciler(store.clone());
        let warnings = reconciler
            .check_failure_rate(&OpCtx::background())
            .await
            .unwrap();

        assert!(!warnings.is_empty());
        assert_eq!(store.conn_errors().len(), 6);
    }

    #[tokio::test]
    async fn failure_rate_is_quiet_at_the_threshold() {
        let store = MemStore::new();
        let worker_id = Uuid::new_v4();
        for i in 0..5 {
            store.seed_conn_err(DbConnErr {
                worker_id,
                db_url: "postgres://u1".into(),
                fail_time: Utc::now() - chrono::Duration::seconds(i),
            });
        }

        let reconciler = test_reconciler(store);
        let warnings = reconciler
            .check_failure_rate(&OpCtx::background())
            .await
            .unwrap();
        assert!(warnings.is_empty());
    }
}
