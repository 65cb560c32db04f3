//! `taskd-core` — shared configuration, errors, and data types.
//!
//! Everything the other taskd crates agree on lives here: the [`Task`] and
//! [`Schedule`] model, run statuses, execution records, and the TOML + env
//! configuration loader.

pub mod config;
pub mod error;
pub mod types;

pub use config::TaskdConfig;
pub use error::{CoreError, Result};
pub use types::{ExecutionRecord, NewTask, RunStatus, Schedule, Task, TaskId};
