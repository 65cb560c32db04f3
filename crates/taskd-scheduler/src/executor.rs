//! One job fire, end to end: load the task, open a `running` record, run
//! the payload, seal the record, write the task's last-run fields.
//!
//! Store failures inside this path are logged and swallowed — an audit
//! write must never take a worker (or the engine behind it) down. The
//! returned report tells the outcome consumer what, if anything, happened.

use std::time::Duration;

use chrono::Utc;
use tracing::{error, info, warn};
use uuid::Uuid;

use taskd_core::types::RunStatus;
use taskd_runner::{PayloadRunner, RunOutcome};
use taskd_store::TaskStore;

use crate::registry::{FiredJob, RunReport};

pub(crate) async fn execute(
    store: &TaskStore,
    runner: &dyn PayloadRunner,
    job: &FiredJob,
) -> RunReport {
    let mut report = RunReport {
        job_id: job.job_id.clone(),
        task_id: job.task_id,
        status: None,
    };

    // Guards the race between task deletion and a pending fire: the job
    // should already be gone, but the fire may have been in flight.
    let task = match store.get_task(job.task_id) {
        Ok(Some(task)) => task,
        Ok(None) => {
            warn!(task_id = job.task_id, "task vanished before execution; nothing to run");
            return report;
        }
        Err(e) => {
            error!(task_id = job.task_id, "could not load task: {e}");
            return report;
        }
    };

    let run_id = Uuid::new_v4();
    let started = Utc::now();

    // Persist the running record before the payload starts, so a crash
    // mid-run leaves a visible trace instead of silence.
    if let Err(e) = store.record_run_started(run_id, task.id, started) {
        error!(task_id = task.id, "could not open run record, skipping execution: {e}");
        return report;
    }

    info!(task_id = task.id, run_id = %run_id, "executing task");
    let outcome = runner
        .run(&task.payload, Duration::from_secs(u64::from(task.timeout_secs)))
        .await;
    let finished = Utc::now();
    let duration_secs = (finished - started).num_milliseconds() as f64 / 1000.0;

    let (status, output, error) = match outcome {
        RunOutcome::Completed {
            exit_code: 0,
            stdout,
            ..
        } => (RunStatus::Success, Some(stdout), None),
        RunOutcome::Completed {
            exit_code,
            stdout,
            stderr,
        } => (
            RunStatus::Failed,
            Some(stdout),
            Some(format!("exited with status {exit_code}: {stderr}")),
        ),
        RunOutcome::Failed { error } => (RunStatus::Failed, None, Some(error)),
        RunOutcome::TimedOut { stdout, .. } => (
            RunStatus::Timeout,
            Some(stdout),
            Some("execution timed out".to_string()),
        ),
    };

    if let Err(e) = store.finalize_run(
        run_id,
        finished,
        status,
        output.as_deref(),
        error.as_deref(),
        duration_secs,
    ) {
        error!(task_id = task.id, run_id = %run_id, "could not finalize run record: {e}");
    }

    // A one-shot task has spent its single occurrence.
    let deactivate = task.schedule.is_once();
    if let Err(e) = store.update_after_run(task.id, started, status, deactivate) {
        error!(task_id = task.id, "could not write last-run fields: {e}");
    }

    match status {
        RunStatus::Success => info!(task_id = task.id, duration_secs, "task succeeded"),
        RunStatus::Failed => warn!(task_id = task.id, duration_secs, "task failed"),
        RunStatus::Timeout => warn!(
            task_id = task.id,
            timeout_secs = task.timeout_secs,
            "task timed out"
        ),
        RunStatus::Running => unreachable!("payload outcomes are always final"),
    }

    report.status = Some(status);
    report
}
