use thiserror::Error;

/// Errors raised by shared infrastructure (config loading, setup paths).
#[derive(Debug, Error)]
pub enum CoreError {
    /// Configuration file or environment override could not be read.
    #[error("Configuration error: {0}")]
    Config(String),

    /// JSON (de)serialization failure, e.g. a corrupt schedule column.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Underlying filesystem failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, CoreError>;
