//! Domain types for the chatshard control plane.
//!
//! These mirror the rows of the shared-state tables. Timestamps are
//! timezone-aware (`DateTime<Utc>`); uptimes are stored as microseconds so
//! they stay cheap to compare.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ── Controller ─────────────────────────────────────────────────────

/// The single controller heartbeat row.
///
/// At most one row exists at any transaction boundary; heartbeats and leader
/// takeover replace it wholesale (delete + insert in one transaction).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct ControllerStatus {
    /// Whether the system is currently scaling. Only observed by this plane;
    /// written by the scaling module.
    pub scaling: bool,
    pub last_heartbeat: DateTime<Utc>,
}

// ── Backend databases ──────────────────────────────────────────────

/// A registered backend database. Operators register these out of band;
/// the control plane only reads them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct DbInstance {
    pub url: String,
    pub max_space: i64,
    pub occupied_space: Option<i64>,
    pub collection_count: Option<i64>,
    pub last_queried: Option<DateTime<Utc>>,
}

/// Assignment of a lexicographic room-name range to a backend database.
///
/// `range_start` is the inclusive lower bound; the upper bound is the next
/// `range_start` in sort order across all mappings, or unbounded for the
/// last one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct DbMapping {
    pub id: Uuid,
    pub url: String,
    pub range_start: String,
    pub size: i64,
}

// ── Workers ────────────────────────────────────────────────────────

/// Metrics row a serving worker maintains about itself. Inserted and
/// refreshed by the workers; evicted here when heartbeat or uptime violates
/// the bounds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct WorkerMetric {
    pub id: Uuid,
    pub last_heartbeat: DateTime<Utc>,
    pub uptime_us: i64,
    pub reads: i64,
    pub writes: i64,
    pub db_availability: f64,
}

/// A short-lived migration worker provisioned by the launcher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct MigrationWorker {
    pub id: Uuid,
    pub last_heartbeat: DateTime<Utc>,
    pub uptime_us: i64,
    pub working_on_from: String,
    pub working_on_to: String,
}

// ── Migrations ─────────────────────────────────────────────────────

/// Lifecycle of a migration. The control plane only ever writes `Waiting`;
/// the migration worker drives the rest of the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MigrationStatus {
    Waiting,
    Running,
    Done,
    Failed,
}

impl MigrationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MigrationStatus::Waiting => "waiting",
            MigrationStatus::Running => "running",
            MigrationStatus::Done => "done",
            MigrationStatus::Failed => "failed",
        }
    }

    /// Whether the migration has finished, successfully or not.
    pub fn is_terminal(&self) -> bool {
        matches!(self, MigrationStatus::Done | MigrationStatus::Failed)
    }
}

impl std::fmt::Display for MigrationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<String> for MigrationStatus {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "waiting" => Ok(MigrationStatus::Waiting),
            "running" => Ok(MigrationStatus::Running),
            "done" => Ok(MigrationStatus::Done),
            "failed" => Ok(MigrationStatus::Failed),
            other => Err(format!("unknown migration status {other:?}")),
        }
    }
}

/// A pending or running range move. `url` is the destination database;
/// `(range_from, range_to)` is the span of range starts being moved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct DbMigration {
    pub id: Uuid,
    pub url: String,
    pub m_worker_id: Uuid,
    pub range_from: String,
    pub range_to: String,
    #[sqlx(try_from = "String")]
    pub status: MigrationStatus,
}

/// Join row tying a migration worker to one of its migrations. Removed
/// together with the worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct MigrationWorkerJob {
    pub worker_id: Uuid,
    pub migration_id: Uuid,
}

// ── Connection errors ──────────────────────────────────────────────

/// A transient connection failure reported by a serving worker against a
/// backend database. Raw material for the failure-rate check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct DbConnErr {
    pub worker_id: Uuid,
    pub db_url: String,
    pub fail_time: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migration_status_round_trip() {
        for status in [
            MigrationStatus::Waiting,
            MigrationStatus::Running,
            MigrationStatus::Done,
            MigrationStatus::Failed,
        ] {
            let parsed = MigrationStatus::try_from(status.as_str().to_string()).unwrap();
            assert_eq!(parsed, status);
        }
    }

    #[test]
    fn migration_status_rejects_unknown() {
        assert!(MigrationStatus::try_from("paused".to_string()).is_err());
    }

    #[test]
    fn terminal_statuses() {
        assert!(!MigrationStatus::Waiting.is_terminal());
        assert!(!MigrationStatus::Running.is_terminal());
        assert!(MigrationStatus::Done.is_terminal());
        assert!(MigrationStatus::Failed.is_terminal());
    }
}
