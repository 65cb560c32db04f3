//! `JobRegistry` — the live job table and its management surface.
//!
//! The registry is the only writer of the job table. Management calls
//! (add/remove/update/pause/resume) and the engine's tick loop serialize on
//! one mutex; status reads take the same lock for a snapshot. All mutating
//! operations require the `Running` lifecycle state and fail fast with
//! `NotRunning` otherwise, so a caller can never enqueue work into a
//! scheduler that will not execute it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use dashmap::DashMap;
use tokio::sync::{mpsc, watch, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use taskd_core::config::{SchedulerConfig, ShutdownPolicy};
use taskd_core::types::{RunStatus, Task, TaskId};
use taskd_runner::PayloadRunner;
use taskd_store::TaskStore;

use crate::engine;
use crate::error::{Result, SchedulerError};
use crate::retry;
use crate::schedule::{self, ResolveMode, Trigger};
use crate::status::SchedulerState;

/// Job id of a task's regular job. Retry one-shots append `_retry_{n}`.
pub(crate) fn primary_job_id(task_id: TaskId) -> String {
    format!("task_{task_id}")
}

/// Engine tuning knobs, derived from [`SchedulerConfig`].
#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    /// Reference timezone for schedule evaluation.
    pub timezone: Tz,
    /// Cadence of the due-job scan.
    pub tick_interval: Duration,
    /// Width of the worker pool.
    pub worker_pool_size: usize,
    /// Fixed delay before a failed task is retried.
    pub retry_delay: Duration,
    /// What happens to in-flight executions at shutdown.
    pub shutdown: ShutdownPolicy,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            timezone: chrono_tz::Asia::Shanghai,
            tick_interval: Duration::from_secs(1),
            worker_pool_size: taskd_core::config::DEFAULT_WORKER_POOL_SIZE,
            retry_delay: Duration::from_secs(taskd_core::config::DEFAULT_RETRY_DELAY_SECS),
            shutdown: ShutdownPolicy::Wait,
        }
    }
}

impl SchedulerSettings {
    /// Build settings from the loaded config, validating the timezone name.
    pub fn from_config(config: &SchedulerConfig) -> Result<Self> {
        let timezone: Tz = config
            .timezone
            .parse()
            .map_err(|_| SchedulerError::Config(format!("unknown timezone '{}'", config.timezone)))?;
        Ok(Self {
            timezone,
            tick_interval: Duration::from_secs(1),
            worker_pool_size: config.worker_pool_size.max(1),
            retry_delay: Duration::from_secs(config.retry_delay_secs),
            shutdown: config.shutdown,
        })
    }
}

/// Distinguishes a task's regular job from a retry one-shot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum JobKind {
    Primary,
    Retry { attempt: u32 },
}

/// One live job: a resolved trigger plus its firing state.
#[derive(Debug, Clone)]
pub(crate) struct JobEntry {
    pub(crate) job_id: String,
    pub(crate) task_id: TaskId,
    pub(crate) kind: JobKind,
    pub(crate) trigger: Trigger,
    pub(crate) next_fire: Option<DateTime<Utc>>,
    /// Lateness allowance before a fire counts as a misfire; equals the
    /// task's execution timeout.
    pub(crate) grace_secs: u32,
    pub(crate) paused: bool,
    pub(crate) description: String,
}

/// A due job handed from the tick loop to a worker.
#[derive(Debug, Clone)]
pub(crate) struct FiredJob {
    pub(crate) job_id: String,
    pub(crate) task_id: TaskId,
}

/// Worker → outcome-consumer report for one fire.
#[derive(Debug)]
pub(crate) struct RunReport {
    pub(crate) job_id: String,
    pub(crate) task_id: TaskId,
    /// `None` when no record was created (task vanished or store down).
    pub(crate) status: Option<RunStatus>,
}

/// Counts from a full reload.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReloadSummary {
    pub scheduled: usize,
    pub failed: usize,
}

pub(crate) struct Inner {
    pub(crate) jobs: Mutex<HashMap<String, JobEntry>>,
    pub(crate) state: Mutex<SchedulerState>,
    /// Job ids with an execution currently in flight (or queued on the
    /// worker pool). Shared lock-free between tick loop and consumer.
    pub(crate) running: DashMap<String, ()>,
    pub(crate) store: TaskStore,
    pub(crate) runner: Arc<dyn PayloadRunner>,
    pub(crate) settings: SchedulerSettings,
    pub(crate) workers: Arc<Semaphore>,
    pub(crate) shutdown_tx: Mutex<Option<watch::Sender<bool>>>,
    pub(crate) outcome_tx: Mutex<Option<mpsc::Sender<RunReport>>>,
    pub(crate) handles: Mutex<Vec<JoinHandle<()>>>,
}

/// Holds live jobs for all scheduled tasks and fires them at the right time.
///
/// Cheap to clone; all clones share the same job table and lifecycle.
#[derive(Clone)]
pub struct JobRegistry {
    inner: Arc<Inner>,
}

impl JobRegistry {
    pub fn new(store: TaskStore, runner: Arc<dyn PayloadRunner>, settings: SchedulerSettings) -> Self {
        let workers = Arc::new(Semaphore::new(settings.worker_pool_size));
        Self {
            inner: Arc::new(Inner {
                jobs: Mutex::new(HashMap::new()),
                state: Mutex::new(SchedulerState::Initialized),
                running: DashMap::new(),
                store,
                runner,
                settings,
                workers,
                shutdown_tx: Mutex::new(None),
                outcome_tx: Mutex::new(None),
                handles: Mutex::new(Vec::new()),
            }),
        }
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Start the engine loop and outcome consumer. Idempotent while running.
    pub fn start(&self) -> Result<()> {
        {
            let mut state = self.inner.state.lock().unwrap();
            if *state == SchedulerState::Running {
                debug!("scheduler already running");
                return Ok(());
            }
            if let Err(e) = self.inner.store.health_check() {
                *state = SchedulerState::Error;
                return Err(e.into());
            }
            *state = SchedulerState::Running;
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (outcome_tx, outcome_rx) = mpsc::channel::<RunReport>(256);
        *self.inner.shutdown_tx.lock().unwrap() = Some(shutdown_tx);
        *self.inner.outcome_tx.lock().unwrap() = Some(outcome_tx);

        // Both loops hold only weak references so a dropped registry does
        // not keep its own background tasks alive.
        let engine_handle = tokio::spawn(engine::run(Arc::downgrade(&self.inner), shutdown_rx));
        let consumer_handle =
            tokio::spawn(retry::consume_outcomes(Arc::downgrade(&self.inner), outcome_rx));

        let mut handles = self.inner.handles.lock().unwrap();
        handles.push(engine_handle);
        handles.push(consumer_handle);

        info!("scheduler started");
        Ok(())
    }

    /// Stop the engine. With the `Wait` policy, in-flight executions drain
    /// first; with `Abandon` they are logged and left behind.
    pub async fn shutdown(&self) {
        {
            let mut state = self.inner.state.lock().unwrap();
            if *state != SchedulerState::Running {
                debug!("shutdown requested but scheduler is not running");
                return;
            }
            *state = SchedulerState::Stopped;
        }

        if let Some(tx) = self.inner.shutdown_tx.lock().unwrap().take() {
            let _ = tx.send(true);
        }
        // Dropping the registry's sender lets the consumer exit once every
        // outstanding worker has delivered its report.
        self.inner.outcome_tx.lock().unwrap().take();

        let handles: Vec<JoinHandle<()>> = self.inner.handles.lock().unwrap().drain(..).collect();
        match self.inner.settings.shutdown {
            ShutdownPolicy::Wait => {
                for handle in handles {
                    let _ = handle.await;
                }
                info!("scheduler stopped, in-flight executions drained");
            }
            ShutdownPolicy::Abandon => {
                let in_flight = self.inner.running.len();
                if in_flight > 0 {
                    warn!(count = in_flight, "abandoning in-flight executions");
                }
                for handle in handles {
                    handle.abort();
                }
                info!("scheduler stopped");
            }
        }
    }

    // -----------------------------------------------------------------------
    // Job management
    // -----------------------------------------------------------------------

    /// Schedule (or replace) the job for `task`.
    ///
    /// Returns `Ok(false)` when the schedule cannot be resolved — the cause
    /// is logged and the caller's broader operation (task creation, edits)
    /// proceeds with the task saved but not scheduled.
    pub fn add_job(&self, task: &Task) -> Result<bool> {
        self.ensure_running()?;
        let now = Utc::now();
        let entry = match self.build_entry(task, now) {
            Ok(entry) => entry,
            Err(e) => {
                warn!(task_id = task.id, error = %e, "task saved but not scheduled");
                return Ok(false);
            }
        };

        let next_run = entry.next_fire;
        let mut jobs = self.inner.jobs.lock().unwrap();
        let replaced = jobs.insert(entry.job_id.clone(), entry).is_some();
        info!(
            task_id = task.id,
            next_run = ?next_run,
            replaced,
            "job scheduled"
        );
        Ok(true)
    }

    /// Remove the task's job and any pending retries for it.
    ///
    /// Absence is not an error: deleting a job that is already gone is a
    /// successful no-op.
    pub fn remove_job(&self, task_id: TaskId) -> Result<bool> {
        self.ensure_running()?;
        let primary = primary_job_id(task_id);
        let retry_prefix = format!("{primary}_retry_");

        let mut jobs = self.inner.jobs.lock().unwrap();
        let had_primary = jobs.remove(&primary).is_some();
        let before = jobs.len();
        jobs.retain(|id, _| !id.starts_with(&retry_prefix));
        let dropped_retries = before - jobs.len();

        if had_primary || dropped_retries > 0 {
            info!(task_id, dropped_retries, "job removed");
        } else {
            debug!(task_id, "remove requested for a task with no live job");
        }
        Ok(true)
    }

    /// Re-resolve the task's schedule, replacing the live job. When the new
    /// schedule fails to resolve, the previous trigger (and its pending
    /// fire time) is restored rather than leaving the task unscheduled.
    pub fn update_job(&self, task: &Task) -> Result<bool> {
        self.ensure_running()?;
        let now = Utc::now();
        let job_id = primary_job_id(task.id);
        let prior = self.inner.jobs.lock().unwrap().remove(&job_id);

        match self.build_entry(task, now) {
            Ok(entry) => {
                self.inner.jobs.lock().unwrap().insert(job_id, entry);
                info!(task_id = task.id, "job updated");
                Ok(true)
            }
            Err(e) => {
                warn!(task_id = task.id, error = %e, "job update failed");
                if let Some(previous) = prior {
                    self.inner.jobs.lock().unwrap().insert(job_id, previous);
                    warn!(task_id = task.id, "previous trigger restored");
                }
                Ok(false)
            }
        }
    }

    /// Suspend the job's timer without deleting its definition.
    pub fn pause_job(&self, task_id: TaskId) -> Result<bool> {
        self.ensure_running()?;
        let mut jobs = self.inner.jobs.lock().unwrap();
        match jobs.get_mut(&primary_job_id(task_id)) {
            Some(entry) => {
                entry.paused = true;
                info!(task_id, "job paused");
                Ok(true)
            }
            None => {
                debug!(task_id, "pause requested for a task with no live job");
                Ok(false)
            }
        }
    }

    /// Reactivate a paused job. The next fire is recomputed from now, so
    /// fires missed during the pause are not replayed.
    pub fn resume_job(&self, task_id: TaskId) -> Result<bool> {
        self.ensure_running()?;
        let now = Utc::now();
        let tz = self.inner.settings.timezone;
        let mut jobs = self.inner.jobs.lock().unwrap();
        match jobs.get_mut(&primary_job_id(task_id)) {
            Some(entry) => {
                entry.paused = false;
                entry.next_fire = entry.trigger.initial_fire(now, tz);
                info!(task_id, next_run = ?entry.next_fire, "job resumed");
                Ok(true)
            }
            None => {
                debug!(task_id, "resume requested for a task with no live job");
                Ok(false)
            }
        }
    }

    /// Full rebuild of the job table from every active task in the store.
    ///
    /// This is the sole reconciliation mechanism between persisted intent
    /// and live timers; there is no incremental diffing.
    pub fn reload_all(&self) -> Result<ReloadSummary> {
        self.ensure_running()?;
        let tasks = self.inner.store.list_active_tasks()?;
        let mut summary = ReloadSummary::default();
        for task in &tasks {
            if self.add_job(task)? {
                summary.scheduled += 1;
            } else {
                summary.failed += 1;
            }
        }
        info!(
            scheduled = summary.scheduled,
            failed = summary.failed,
            "job reload complete"
        );
        Ok(summary)
    }

    // -----------------------------------------------------------------------
    // Internal
    // -----------------------------------------------------------------------

    fn build_entry(&self, task: &Task, now: DateTime<Utc>) -> Result<JobEntry> {
        let tz = self.inner.settings.timezone;
        // Lenient mode: an overdue one-shot is legitimate here (reload after
        // restart); creation-time rejection happens in validate_for_create
        // before the task ever reaches the registry.
        let trigger = schedule::resolve(&task.schedule, now, tz, ResolveMode::Reload)?;
        let next_fire = trigger.initial_fire(now, tz).ok_or_else(|| {
            SchedulerError::InvalidSchedule("schedule has no upcoming fire time".to_string())
        })?;
        Ok(JobEntry {
            job_id: primary_job_id(task.id),
            task_id: task.id,
            kind: JobKind::Primary,
            trigger,
            next_fire: Some(next_fire),
            grace_secs: task.timeout_secs,
            paused: false,
            description: task.schedule.describe(),
        })
    }

    fn ensure_running(&self) -> Result<()> {
        let state = *self.inner.state.lock().unwrap();
        if state == SchedulerState::Running {
            Ok(())
        } else {
            Err(SchedulerError::NotRunning(state))
        }
    }

    pub(crate) fn state(&self) -> SchedulerState {
        *self.inner.state.lock().unwrap()
    }

    pub(crate) fn jobs(&self) -> &Mutex<HashMap<String, JobEntry>> {
        &self.inner.jobs
    }

    pub(crate) fn store(&self) -> &TaskStore {
        &self.inner.store
    }

    #[cfg(test)]
    pub(crate) fn inner(&self) -> &Arc<Inner> {
        &self.inner
    }
}

/// Weak handle used by the background loops.
pub(crate) type InnerRef = Weak<Inner>;
