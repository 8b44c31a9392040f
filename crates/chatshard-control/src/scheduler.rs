//! Scheduler — startup partitioning, migration dispatch, state aggregation.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{error, info, warn};
use uuid::Uuid;

use chatshard_launcher::Launcher;
use chatshard_store::{
    ControlStore, DbMigration, MigrationStatus, MigrationWorker, OpCtx, RetryPolicy, StoreError,
};

use crate::error::{ControlError, ControlResult};

/// Number of range starts handed out at startup ('a'..='z').
const ALPHABET_LEN: usize = 26;

/// How long `run_migration` waits for the launcher's reply before treating
/// the spawn as failed and rolling back.
const DEFAULT_SPAWN_DEADLINE: Duration = Duration::from_secs(5);

/// Compute the startup range starts for `db_count` databases.
///
/// Each database gets exactly one start; database `i` takes
/// `alphabet[i * (26 / db_count)]`. Splits beyond the first letter happen
/// later through migrations, never here.
pub fn startup_assignments(db_count: usize) -> ControlResult<Vec<String>> {
    if db_count == 0 {
        return Err(ControlError::NoDatabases);
    }
    if db_count > ALPHABET_LEN {
        return Err(ControlError::TooManyDatabases(db_count));
    }

    let per_db = ALPHABET_LEN / db_count;
    Ok((0..db_count)
        .map(|i| {
            let letter = b'a' + (i * per_db) as u8;
            (letter as char).to_string()
        })
        .collect())
}

/// Outcome of a successful `run_migration`, mostly for logging and tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationReceipt {
    pub worker_id: Uuid,
    pub migration_id: Uuid,
    /// Whether an already-running free worker took the job (no container
    /// was spawned).
    pub reused_worker: bool,
}

/// Per-database view returned by [`Scheduler::system_state`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DbState {
    pub url: String,
    #[serde(rename = "space_quota")]
    pub space_quota_percent: f64,
    pub collection_count: Option<i64>,
    pub last_queried: Option<DateTime<Utc>>,
    /// Range starts hosted on this database, in sort order.
    pub ranges: Vec<String>,
}

/// Drives operator commands against the store and the launcher.
pub struct Scheduler<S> {
    store: S,
    retry: RetryPolicy,
    launcher: Launcher,
    spawn_deadline: Duration,
}

impl<S: ControlStore> Scheduler<S> {
    pub fn new(store: S, retry: RetryPolicy, launcher: Launcher) -> Self {
        Self {
            store,
            retry,
            launcher,
            spawn_deadline: DEFAULT_SPAWN_DEADLINE,
        }
    }

    /// Override the launcher reply deadline.
    pub fn with_spawn_deadline(mut self, deadline: Duration) -> Self {
        self.spawn_deadline = deadline;
        self
    }

    // ── Startup mapping ────────────────────────────────────────────

    /// Assign one range start per registered database.
    ///
    /// Requires an empty mapping table and between 1 and 26 databases.
    /// A failed write for one mapping is logged and does not abort the
    /// remaining writes; the number of written mappings is returned.
    pub async fn startup_mapping(&self, ctx: &OpCtx) -> ControlResult<usize> {
        let existing = self.retry.run(ctx, || self.store.list_mappings()).await?;
        if !existing.is_empty() {
            return Err(ControlError::MappingsExist);
        }

        let instances = self
            .retry
            .run(ctx, || self.store.list_db_instances())
            .await?;
        let starts = startup_assignments(instances.len())?;

        let mut written = 0;
        for (instance, start) in instances.iter().zip(&starts) {
            match self
                .retry
                .run(ctx, || self.store.create_mapping(&instance.url, start))
                .await
            {
                Ok(()) => written += 1,
                Err(err) => warn!(
                    url = %instance.url,
                    range_start = %start,
                    error = %err,
                    "could not write startup mapping"
                ),
            }
        }

        info!(databases = instances.len(), written, "startup mapping executed");
        Ok(written)
    }

    // ── Migration dispatch ─────────────────────────────────────────

    /// Move the range `[from, to]` onto `goal_url`.
    ///
    /// Finds or creates a migration worker, spawns a container for a fresh
    /// one, and records the migration plus its join row. A spawn failure
    /// rolls the fresh worker row back so nothing stranded remains.
    pub async fn run_migration(
        &self,
        ctx: &OpCtx,
        from: &str,
        to: &str,
        goal_url: &str,
    ) -> ControlResult<MigrationReceipt> {
        // The range has to exist somewhere before it can be moved.
        let source = match self
            .retry
            .run(ctx, || self.store.mapping_for_range(from))
            .await
        {
            Ok(mapping) => mapping,
            Err(StoreError::NoRows) => return Err(ControlError::UnmappedRange(from.to_string())),
            Err(err) => return Err(err.into()),
        };

        let (worker_id, reused_worker) = match self
            .retry
            .run(ctx, || self.store.free_migration_worker())
            .await
        {
            Ok(id) => (id, true),
            Err(StoreError::NoRows) => {
                let worker = MigrationWorker {
                    id: Uuid::new_v4(),
                    last_heartbeat: Utc::now(),
                    uptime_us: 0,
                    working_on_from: from.to_string(),
                    working_on_to: to.to_string(),
                };
                self.retry
                    .run(ctx, || self.store.insert_migration_worker(&worker))
                    .await?;
                (worker.id, false)
            }
            Err(err) => return Err(err.into()),
        };

        if !reused_worker {
            if let Err(spawn_err) = self
                .launcher
                .spawn_migration_worker(ctx, worker_id, self.spawn_deadline)
                .await
            {
                warn!(
                    trace_id = %ctx.trace_id,
                    worker_id = %worker_id,
                    error = %spawn_err,
                    "migration worker spawn failed; rolling back"
                );
                if let Err(rollback_err) = self
                    .retry
                    .run(ctx, || self.store.delete_migration_worker(worker_id))
                    .await
                {
                    error!(
                        worker_id = %worker_id,
                        error = %rollback_err,
                        "compensating delete of migration worker failed"
                    );
                }
                return Err(spawn_err.into());
            }
        }

        let migration = DbMigration {
            id: Uuid::new_v4(),
            url: goal_url.to_string(),
            m_worker_id: worker_id,
            range_from: from.to_string(),
            range_to: to.to_string(),
            status: MigrationStatus::Waiting,
        };
        self.retry
            .run(ctx, || self.store.insert_migration(&migration))
            .await?;
        self.retry
            .run(ctx, || self.store.insert_worker_job(worker_id, migration.id))
            .await?;

        info!(
            trace_id = %ctx.trace_id,
            from,
            to,
            goal_url,
            source_url = %source.url,
            worker_id = %worker_id,
            reused_worker,
            "migration dispatched"
        );
        Ok(MigrationReceipt {
            worker_id,
            migration_id: migration.id,
            reused_worker,
        })
    }

    // ── State aggregation ──────────────────────────────────────────

    /// Join databases with their hosted ranges. Pure read.
    pub async fn system_state(&self, ctx: &OpCtx) -> ControlResult<Vec<DbState>> {
        let instances = self
            .retry
            .run(ctx, || self.store.list_db_instances())
            .await?;
        let mappings = self.retry.run(ctx, || self.store.list_mappings()).await?;

        let mut ranges_by_url: BTreeMap<&str, Vec<String>> = BTreeMap::new();
        for mapping in &mappings {
            ranges_by_url
                .entry(mapping.url.as_str())
                .or_default()
                .push(mapping.range_start.clone());
        }

        let mut states: Vec<DbState> = instances
            .into_iter()
            .map(|instance| {
                let mut ranges = ranges_by_url.remove(instance.url.as_str()).unwrap_or_default();
                ranges.sort();
                let quota = if instance.max_space > 0 {
                    instance.occupied_space.unwrap_or(0) as f64 / instance.max_space as f64 * 100.0
                } else {
                    0.0
                };
                DbState {
                    url: instance.url,
                    space_quota_percent: quota,
                    collection_count: instance.collection_count,
                    last_queried: instance.last_queried,
                    ranges,
                }
            })
            .collect();
        states.sort_by(|a, b| a.url.cmp(&b.url));

        Ok(states)
    }
}
