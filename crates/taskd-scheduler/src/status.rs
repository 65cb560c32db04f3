//! Read-only views over the scheduler and its jobs.
//!
//! These never mutate state, take the job-table lock only long enough for a
//! snapshot, and are safe to call from any lifecycle state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use taskd_core::types::TaskId;
use taskd_store::RunStats;

use crate::error::Result;
use crate::registry::{primary_job_id, JobEntry, JobKind, JobRegistry};

/// Lifecycle state of the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerState {
    /// Constructed, engine loop not yet started.
    Initialized,
    /// Engine loop and outcome consumer are live.
    Running,
    /// Shut down; mutating operations fail fast.
    Stopped,
    /// Startup failed (e.g. the store was unreachable).
    Error,
}

impl std::fmt::Display for SchedulerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SchedulerState::Initialized => "initialized",
            SchedulerState::Running => "running",
            SchedulerState::Stopped => "stopped",
            SchedulerState::Error => "error",
        };
        write!(f, "{s}")
    }
}

/// Snapshot of the scheduler as a whole.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerStatus {
    pub state: SchedulerState,
    /// Live jobs, retries included.
    pub job_count: usize,
    /// Earliest pending fire time across all unpaused jobs.
    pub next_run_time: Option<DateTime<Utc>>,
}

/// Snapshot of one live job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobInfo {
    pub job_id: String,
    pub task_id: TaskId,
    /// Human-readable trigger description.
    pub description: String,
    pub next_run_time: Option<DateTime<Utc>>,
    pub paused: bool,
    /// Set for retry one-shots, `None` for a task's regular job.
    pub retry_attempt: Option<u32>,
}

impl JobInfo {
    pub(crate) fn from_entry(entry: &JobEntry) -> Self {
        Self {
            job_id: entry.job_id.clone(),
            task_id: entry.task_id,
            description: entry.description.clone(),
            next_run_time: entry.next_fire,
            paused: entry.paused,
            retry_attempt: match entry.kind {
                JobKind::Primary => None,
                JobKind::Retry { attempt } => Some(attempt),
            },
        }
    }
}

impl JobRegistry {
    /// Scheduler health: lifecycle state, job count, earliest next run.
    pub fn scheduler_status(&self) -> SchedulerStatus {
        let state = self.state();
        let jobs = self.jobs().lock().unwrap();
        let next_run_time = jobs
            .values()
            .filter(|entry| !entry.paused)
            .filter_map(|entry| entry.next_fire)
            .min();
        SchedulerStatus {
            state,
            job_count: jobs.len(),
            next_run_time,
        }
    }

    /// The live primary job for `task_id`, or `None` if the task has no job.
    pub fn job_info(&self, task_id: TaskId) -> Option<JobInfo> {
        let jobs = self.jobs().lock().unwrap();
        jobs.get(&primary_job_id(task_id)).map(JobInfo::from_entry)
    }

    /// Every live job, soonest first.
    pub fn all_jobs(&self) -> Vec<JobInfo> {
        let jobs = self.jobs().lock().unwrap();
        let mut infos: Vec<JobInfo> = jobs.values().map(JobInfo::from_entry).collect();
        infos.sort_by(|a, b| {
            a.next_run_time
                .cmp(&b.next_run_time)
                .then_with(|| a.job_id.cmp(&b.job_id))
        });
        infos
    }

    /// Aggregate execution statistics from the store.
    pub fn run_stats(&self) -> Result<RunStats> {
        Ok(self.store().run_stats()?)
    }
}
