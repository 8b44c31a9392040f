//! chatshard-control — scheduler and reconciler of the control plane.
//!
//! The [`Scheduler`] handles operator commands: the startup partitioning of
//! room-name ranges over backend databases, the migration dispatch pipeline
//! and the system-state aggregation. The [`Reconciler`] keeps the system
//! healthy on a periodic schedule: controller heartbeats, serving-worker and
//! migration-worker liveness, and failure-rate aggregation.
//!
//! Both talk to the shared store exclusively through the retrying wrapper;
//! compensation (rollback of a half-provisioned migration worker, cascading
//! deletes) lives here, extra retries do not.

pub mod error;
pub mod failure;
pub mod reconciler;
pub mod scheduler;

pub use error::{ControlError, ControlResult};
pub use failure::{FailureMatrix, FAILURE_RATE_THRESHOLD, FAILURE_RATE_WINDOW_MINUTES};
pub use reconciler::{Reconciler, ReconcilerConfig};
pub use scheduler::{DbState, MigrationReceipt, Scheduler};
