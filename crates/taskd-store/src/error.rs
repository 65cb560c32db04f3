use thiserror::Error;

/// Errors raised by the task store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Underlying SQLite / rusqlite error.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// No task with the given ID exists.
    #[error("Task not found: {id}")]
    TaskNotFound { id: i64 },

    /// No execution record with the given run ID exists.
    #[error("Execution record not found: {run_id}")]
    RunNotFound { run_id: String },

    /// A stored schedule column could not be decoded.
    #[error("Corrupt schedule for task {id}: {reason}")]
    CorruptSchedule { id: i64, reason: String },
}

pub type Result<T> = std::result::Result<T, StoreError>;
