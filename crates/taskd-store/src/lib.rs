//! `taskd-store` — SQLite persistence for tasks and execution records.
//!
//! # Overview
//!
//! Two tables: `tasks` holds the user-owned task definitions the engine
//! schedules from, `task_runs` is the append-only audit trail of every job
//! fire. The [`store::TaskStore`] handle wraps a single connection behind a
//! mutex so the engine loop, workers, and management callers can share it.
//!
//! The job table itself is *not* persisted: live jobs are rebuilt from the
//! `tasks` table at startup via the registry's full reload, so task records
//! remain the single source of truth across restarts.

pub mod db;
pub mod error;
pub mod store;

pub use error::{Result, StoreError};
pub use store::{RunStats, TaskStore};
