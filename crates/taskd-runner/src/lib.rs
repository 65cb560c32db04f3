//! `taskd-runner` — executes task payloads as interpreter subprocesses.
//!
//! The payload is opaque script text: it is written to a temporary file and
//! handed to the configured interpreter with stdout/stderr piped, so output
//! capture is local to each invocation. A wall-clock timeout is raced
//! against the child; on expiry the process is killed and the partial
//! output is still collected.
//!
//! Failure is data, not an exception: every run folds into a
//! [`types::RunOutcome`] that the scheduler records and reacts to.

pub mod error;
pub mod runner;
pub mod truncate;
pub mod types;

pub use error::{Result, RunnerError};
pub use runner::{PayloadRunner, ScriptRunner};
pub use types::RunOutcome;
