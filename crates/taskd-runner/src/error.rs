use thiserror::Error;

/// Internal runner failures. These never escape [`crate::PayloadRunner::run`];
/// they are folded into a `Failed` outcome so a broken interpreter can not
/// take down a worker.
#[derive(Debug, Error)]
pub enum RunnerError {
    /// The interpreter process could not be started.
    #[error("failed to spawn interpreter: {0}")]
    Spawn(String),

    /// Temp-file or pipe I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The task driving `wait_with_output` died unexpectedly.
    #[error("internal runner error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, RunnerError>;
