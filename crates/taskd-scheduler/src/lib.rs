//! `taskd-scheduler` — the scheduling and execution core.
//!
//! # Overview
//!
//! The [`registry::JobRegistry`] holds the live job table: one in-memory
//! entry per scheduled task, keyed `task_{id}`, rebuilt from the task store
//! at startup via [`registry::JobRegistry::reload_all`]. A background engine
//! loop ticks once a second, dispatches due jobs into a semaphore-bounded
//! worker pool, and a single consumer task digests run outcomes — resetting
//! or spending the retry budget and scheduling `task_{id}_retry_{n}`
//! one-shots for failures.
//!
//! # Policies
//!
//! - re-adding a job with the same id replaces the previous one
//! - a fire that lands while the same job is still running is dropped
//!   (one concurrent instance per job, missed fires are not coalesced)
//! - a fire later than the task's timeout past its due time is a misfire
//!   and is skipped
//! - one bad job never aborts the caller or the engine loop: registration
//!   problems come back as `false`, execution problems as records

mod engine;
pub mod error;
mod executor;
pub mod registry;
mod retry;
pub mod schedule;
pub mod status;

pub use error::{Result, SchedulerError};
pub use registry::{JobRegistry, ReloadSummary, SchedulerSettings};
pub use schedule::{resolve, validate_for_create, ResolveMode, Trigger};
pub use status::{JobInfo, SchedulerState, SchedulerStatus};
