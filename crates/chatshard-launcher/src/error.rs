//! Launcher error types.

use thiserror::Error;

pub type LaunchResult<T> = Result<T, LaunchError>;

/// Errors that can occur while provisioning a migration worker.
#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("container engine error: {0}")]
    Engine(String),

    #[error("spawn request was cancelled")]
    Cancelled,

    #[error("no reply from the launcher within the deadline")]
    ReplyTimeout,

    #[error("launcher queue is closed")]
    QueueClosed,
}

impl From<bollard::errors::Error> for LaunchError {
    fn from(err: bollard::errors::Error) -> Self {
        LaunchError::Engine(err.to_string())
    }
}
