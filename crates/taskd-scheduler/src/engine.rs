//! The timer-driving loop.
//!
//! One background task evaluates the job table every tick and dispatches
//! due jobs into the semaphore-bounded worker pool. A due job is skipped in
//! exactly two cases, both logged: its fire time is further past than the
//! misfire grace period, or the previous run of the same job has not
//! finished (one concurrent instance per job, no coalescing). In every case
//! the trigger advances, so a skip never stalls the cadence.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::executor;
use crate::registry::{FiredJob, Inner, InnerRef, RunReport};
use crate::schedule::Trigger;

/// Engine loop: ticks until `shutdown` broadcasts `true` or the registry is
/// dropped.
pub(crate) async fn run(inner: InnerRef, mut shutdown: watch::Receiver<bool>) {
    let tick_interval = match inner.upgrade() {
        Some(inner) => inner.settings.tick_interval,
        None => return,
    };
    info!("scheduler engine loop started");

    let mut interval = tokio::time::interval(tick_interval);
    loop {
        tokio::select! {
            _ = interval.tick() => {
                match inner.upgrade() {
                    Some(inner) => tick(&inner),
                    None => break,
                }
            }
            changed = shutdown.changed() => {
                // A dropped sender means the registry itself is gone.
                if changed.is_err() || *shutdown.borrow() {
                    info!("scheduler engine loop stopping");
                    break;
                }
            }
        }
    }
}

/// One pass over the job table: advance triggers, collect dispatchable
/// fires, spawn workers. Table mutation happens under the lock; dispatch
/// happens after it is released.
pub(crate) fn tick(inner: &Arc<Inner>) {
    let now = Utc::now();
    let outcome_tx = match inner.outcome_tx.lock().unwrap().clone() {
        Some(tx) => tx,
        None => return, // shutting down
    };
    let tz = inner.settings.timezone;

    let mut fired: Vec<FiredJob> = Vec::new();
    {
        let mut jobs = inner.jobs.lock().unwrap();
        let mut spent: Vec<String> = Vec::new();

        for (job_id, entry) in jobs.iter_mut() {
            if entry.paused {
                continue;
            }
            let due = match entry.next_fire {
                Some(at) if at <= now => at,
                Some(_) => continue,
                None => {
                    spent.push(job_id.clone());
                    continue;
                }
            };

            // Advance first: a skipped fire must not repeat next tick.
            entry.next_fire = match entry.trigger {
                Trigger::OneShot(_) => None,
                Trigger::Cron { .. } => entry.trigger.next_after(now, tz),
            };
            if entry.next_fire.is_none() {
                spent.push(job_id.clone());
            }

            let lateness = now - due;
            if lateness > chrono::Duration::seconds(i64::from(entry.grace_secs)) {
                warn!(
                    job_id = %job_id,
                    late_secs = lateness.num_seconds(),
                    "fire missed its grace period; skipping"
                );
                continue;
            }

            if inner.running.contains_key(job_id) {
                warn!(job_id = %job_id, "previous run still in progress; skipping fire");
                continue;
            }

            inner.running.insert(job_id.clone(), ());
            fired.push(FiredJob {
                job_id: job_id.clone(),
                task_id: entry.task_id,
            });
        }

        for job_id in spent {
            jobs.remove(&job_id);
        }
    }

    for job in fired {
        dispatch(inner, job, outcome_tx.clone());
    }
}

/// Hand one fire to the worker pool.
fn dispatch(inner: &Arc<Inner>, job: FiredJob, tx: mpsc::Sender<RunReport>) {
    let store = inner.store.clone();
    let runner = Arc::clone(&inner.runner);
    let workers = Arc::clone(&inner.workers);

    tokio::spawn(async move {
        let _permit = match workers.acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => return, // pool closed, engine is gone
        };
        let report = executor::execute(&store, runner.as_ref(), &job).await;
        if tx.send(report).await.is_err() {
            debug!(job_id = %job.job_id, "outcome channel closed before report delivery");
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use rusqlite::Connection;

    use taskd_core::config::ShutdownPolicy;
    use taskd_core::types::{NewTask, RunStatus, Schedule, Task};
    use taskd_runner::{PayloadRunner, RunOutcome};
    use taskd_store::TaskStore;

    use crate::registry::{primary_job_id, JobRegistry, SchedulerSettings};

    struct CountingRunner {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl PayloadRunner for CountingRunner {
        async fn run(&self, _payload: &str, _timeout: Duration) -> RunOutcome {
            self.calls.fetch_add(1, Ordering::SeqCst);
            RunOutcome::Completed {
                exit_code: 0,
                stdout: "ran\n".to_string(),
                stderr: String::new(),
            }
        }
    }

    fn quiet_settings() -> SchedulerSettings {
        SchedulerSettings {
            timezone: chrono_tz::UTC,
            tick_interval: Duration::from_secs(3600),
            worker_pool_size: 4,
            retry_delay: Duration::ZERO,
            shutdown: ShutdownPolicy::Wait,
        }
    }

    fn setup() -> (JobRegistry, TaskStore, Arc<CountingRunner>) {
        let store = TaskStore::new(Connection::open_in_memory().unwrap()).unwrap();
        let runner = Arc::new(CountingRunner {
            calls: AtomicUsize::new(0),
        });
        let registry = JobRegistry::new(store.clone(), runner.clone(), quiet_settings());
        registry.start().unwrap();
        (registry, store, runner)
    }

    fn overdue_once_task(store: &TaskStore) -> Task {
        let mut new = NewTask::new(
            "overdue",
            "echo hi",
            Schedule::Once {
                datetime: "2020-01-01T00:00:00".to_string(),
            },
        );
        new.timeout_secs = 60;
        store.create_task(&new).unwrap()
    }

    async fn settle() {
        // Let spawned workers and the outcome consumer run.
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    #[tokio::test]
    async fn tick_dispatches_due_jobs() {
        let (registry, store, runner) = setup();
        let task = overdue_once_task(&store);
        registry.add_job(&task).unwrap();

        tick(registry.inner());
        settle().await;

        assert_eq!(runner.calls.load(Ordering::SeqCst), 1);
        let runs = store.list_runs(task.id, 10).unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].status, RunStatus::Success);
        // One-shot: the job is spent and gone.
        assert!(registry.job_info(task.id).is_none());
        registry.shutdown().await;
    }

    #[tokio::test]
    async fn tick_skips_jobs_with_a_run_in_progress() {
        let (registry, store, runner) = setup();
        let task = overdue_once_task(&store);
        registry.add_job(&task).unwrap();

        // Simulate an in-flight execution for the same job.
        registry
            .inner()
            .running
            .insert(primary_job_id(task.id), ());

        tick(registry.inner());
        settle().await;

        assert_eq!(runner.calls.load(Ordering::SeqCst), 0);
        assert!(store.list_runs(task.id, 10).unwrap().is_empty());
        registry.shutdown().await;
    }

    #[tokio::test]
    async fn tick_skips_fires_beyond_the_grace_period() {
        let (registry, store, runner) = setup();
        let task = overdue_once_task(&store);
        registry.add_job(&task).unwrap();

        // Backdate the pending fire far beyond the 60 s grace.
        {
            let mut jobs = registry.inner().jobs.lock().unwrap();
            let entry = jobs.get_mut(&primary_job_id(task.id)).unwrap();
            entry.next_fire = Some(Utc::now() - chrono::Duration::seconds(600));
        }

        tick(registry.inner());
        settle().await;

        assert_eq!(runner.calls.load(Ordering::SeqCst), 0);
        // The spent one-shot is cleaned out of the table either way.
        assert!(registry.job_info(task.id).is_none());
        registry.shutdown().await;
    }

    #[tokio::test]
    async fn tick_leaves_future_and_paused_jobs_alone() {
        let (registry, store, runner) = setup();
        let future = store
            .create_task(&NewTask::new(
                "later",
                "echo later",
                Schedule::Minutes { value: 30 },
            ))
            .unwrap();
        registry.add_job(&future).unwrap();

        let paused = overdue_once_task(&store);
        registry.add_job(&paused).unwrap();
        registry.pause_job(paused.id).unwrap();

        tick(registry.inner());
        settle().await;

        assert_eq!(runner.calls.load(Ordering::SeqCst), 0);
        assert_eq!(registry.all_jobs().len(), 2);
        registry.shutdown().await;
    }
}
