//! Retry policy and the outcome consumer that applies it.
//!
//! Run reports flow from workers over a channel into one consumer task, so
//! retry decisions and job-table mutation never reenter the table from a
//! worker callback. A failure spends one unit of the task's retry budget
//! and plants a `task_{id}_retry_{n}` one-shot; a success at any point
//! resets the counter and discards the budget reasoning tied to prior
//! failures. Retry jobs live only in memory: after a restart the next
//! regular fire re-establishes the failure path.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use taskd_core::types::{RunStatus, TaskId};

use crate::registry::{primary_job_id, Inner, InnerRef, JobEntry, JobKind, RunReport};
use crate::schedule::Trigger;
use crate::status::SchedulerState;

/// Single consumer for all run reports. Exits when every worker-held sender
/// is gone and the registry has dropped its own.
pub(crate) async fn consume_outcomes(inner: InnerRef, mut rx: mpsc::Receiver<RunReport>) {
    while let Some(report) = rx.recv().await {
        let inner = match inner.upgrade() {
            Some(inner) => inner,
            None => break,
        };
        inner.running.remove(&report.job_id);

        match report.status {
            Some(status) if status.is_failure() => on_failure(&inner, report.task_id),
            Some(RunStatus::Success) => on_success(&inner, report.task_id),
            _ => {}
        }
    }
    debug!("outcome consumer stopped");
}

/// Spend one unit of retry budget, or go terminal when it is exhausted.
fn on_failure(inner: &Arc<Inner>, task_id: TaskId) {
    let task = match inner.store.get_task(task_id) {
        Ok(Some(task)) => task,
        Ok(None) => {
            debug!(task_id, "failed task no longer exists; no retry");
            return;
        }
        Err(e) => {
            error!(task_id, "could not load task for retry decision: {e}");
            return;
        }
    };

    if task.retry_count >= task.max_retries {
        if task.max_retries > 0 {
            info!(
                task_id,
                retries = task.retry_count,
                "retry budget exhausted; failure is terminal"
            );
        }
        return;
    }

    let attempt = task.retry_count + 1;
    if let Err(e) = inner.store.set_retry_count(task_id, attempt) {
        error!(task_id, "could not persist retry count: {e}");
        return;
    }

    if *inner.state.lock().unwrap() != SchedulerState::Running {
        debug!(task_id, "scheduler stopping; retry not scheduled");
        return;
    }

    let run_at = Utc::now() + chrono::Duration::milliseconds(inner.settings.retry_delay.as_millis() as i64);
    // Distinct id per attempt: the retry must not replace (or be replaced
    // by) the task's regular recurring job.
    let job_id = format!("{}_retry_{attempt}", primary_job_id(task_id));
    let entry = JobEntry {
        job_id: job_id.clone(),
        task_id,
        kind: JobKind::Retry { attempt },
        trigger: Trigger::OneShot(run_at),
        next_fire: Some(run_at),
        grace_secs: task.timeout_secs,
        paused: false,
        description: format!("retry {attempt} of {}", task.max_retries),
    };
    inner.jobs.lock().unwrap().insert(job_id.clone(), entry);
    info!(task_id, %job_id, run_at = %run_at, "retry scheduled");
}

/// A success discards the consecutive-failure count.
fn on_success(inner: &Arc<Inner>, task_id: TaskId) {
    let task = match inner.store.get_task(task_id) {
        Ok(Some(task)) => task,
        Ok(None) => return,
        Err(e) => {
            error!(task_id, "could not load task after success: {e}");
            return;
        }
    };
    if task.retry_count > 0 {
        if let Err(e) = inner.store.set_retry_count(task_id, 0) {
            error!(task_id, "could not reset retry count: {e}");
        } else {
            info!(task_id, "retry counter reset after success");
        }
    }
}
