use thiserror::Error;

use crate::status::SchedulerState;

/// Errors that can occur within the scheduling core.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// The schedule definition is malformed or out of range. Surfaced to the
    /// caller before any job is touched; never silently corrected.
    #[error("Invalid schedule: {0}")]
    InvalidSchedule(String),

    /// A mutating registry operation was attempted outside the `Running`
    /// lifecycle state.
    #[error("Scheduler is not running (state: {0})")]
    NotRunning(SchedulerState),

    /// Bad engine configuration, e.g. an unknown timezone name.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The task store failed underneath an operation.
    #[error(transparent)]
    Store(#[from] taskd_store::StoreError),
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
