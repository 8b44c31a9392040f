//! Control-plane error types.

use thiserror::Error;

use chatshard_launcher::LaunchError;
use chatshard_store::StoreError;

pub type ControlResult<T> = Result<T, ControlError>;

/// Errors surfaced by the scheduler and reconciler.
#[derive(Debug, Error)]
pub enum ControlError {
    #[error("no database instances are registered")]
    NoDatabases,

    #[error("too many database instances are registered: {0} (at most 26)")]
    TooManyDatabases(usize),

    #[error("database mappings already exist; startup mapping requires an empty table")]
    MappingsExist,

    #[error("no mapping hosts a range starting at {0:?}")]
    UnmappedRange(String),

    /// Distinguished signal from the controller-up check: the leader's
    /// heartbeat is stale or missing and the shadow must take over.
    #[error("controller crashed")]
    ControllerCrashed,

    #[error("spawning migration worker failed: {0}")]
    Spawn(#[from] LaunchError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ControlError {
    /// Whether the underlying failure is transient at the store layer.
    ///
    /// Periodic loops skip the current iteration on a reconcilable error
    /// and only step the controller down on a terminal one.
    pub fn is_reconcilable(&self) -> bool {
        matches!(
            self,
            ControlError::Store(StoreError::Reconcilable(_) | StoreError::Cancelled)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transient_store_errors_are_reconcilable() {
        assert!(ControlError::Store(StoreError::Reconcilable("conn reset".into()))
            .is_reconcilable());
        assert!(ControlError::Store(StoreError::Cancelled).is_reconcilable());

        assert!(!ControlError::Store(StoreError::Terminal("duplicate key".into()))
            .is_reconcilable());
        assert!(!ControlError::Store(StoreError::NoRows).is_reconcilable());
        assert!(!ControlError::ControllerCrashed.is_reconcilable());
        assert!(!ControlError::Spawn(LaunchError::ReplyTimeout).is_reconcilable());
    }
}
