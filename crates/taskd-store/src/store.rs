//! `TaskStore` — shared handle over the taskd SQLite database.
//!
//! All engine components go through this struct. It owns one connection
//! behind a mutex; callers that need an isolated connection (e.g. a second
//! process) open their own store against the same file.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use taskd_core::types::{ExecutionRecord, NewTask, RunStatus, Schedule, Task, TaskId};

use crate::db::init_db;
use crate::error::{Result, StoreError};

/// Aggregate execution statistics for the monitor view.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunStats {
    pub total_tasks: u64,
    pub active_tasks: u64,
    /// Finalized executions (running records are excluded).
    pub total_executions: u64,
    /// Executions that ended failed or timed out.
    pub failed_executions: u64,
    /// Percentage of finalized executions that succeeded (0–100).
    pub success_rate: f64,
}

/// Durable mapping of task id → definition + run history.
#[derive(Clone)]
pub struct TaskStore {
    conn: Arc<Mutex<Connection>>,
}

impl TaskStore {
    /// Wrap `conn`, applying pragmas and initialising the schema if needed.
    pub fn new(conn: Connection) -> Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        init_db(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Cheap connectivity probe, used before the engine starts.
    pub fn health_check(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.query_row("SELECT 1", [], |_| Ok(()))?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Tasks
    // -----------------------------------------------------------------------

    /// Insert a new task and return the stored record.
    pub fn create_task(&self, new: &NewTask) -> Result<Task> {
        let now = Utc::now().to_rfc3339();
        let schedule_json = serde_json::to_string(&new.schedule)
            .map_err(|e| StoreError::CorruptSchedule {
                id: 0,
                reason: e.to_string(),
            })?;

        let id = {
            let conn = self.conn.lock().unwrap();
            conn.execute(
                "INSERT INTO tasks
                 (name, description, payload, schedule, is_active,
                  timeout_secs, max_retries, retry_count, created_at, updated_at)
                 VALUES (?1,?2,?3,?4,?5,?6,?7,0,?8,?8)",
                rusqlite::params![
                    new.name,
                    new.description,
                    new.payload,
                    schedule_json,
                    new.is_active,
                    new.timeout_secs,
                    new.max_retries,
                    now,
                ],
            )?;
            conn.last_insert_rowid()
        };

        self.get_task(id)?.ok_or(StoreError::TaskNotFound { id })
    }

    /// Fetch a single task, or `None` if it does not exist.
    pub fn get_task(&self, id: TaskId) -> Result<Option<Task>> {
        let conn = self.conn.lock().unwrap();
        let row = conn
            .query_row(
                &format!("{TASK_SELECT} WHERE id = ?1"),
                [id],
                map_task_row,
            )
            .optional()?;

        match row {
            None => Ok(None),
            Some(raw) => Ok(Some(raw.into_task()?)),
        }
    }

    /// All tasks ordered by creation time.
    pub fn list_tasks(&self) -> Result<Vec<Task>> {
        self.query_tasks(&format!("{TASK_SELECT} ORDER BY created_at"), [])
    }

    /// Tasks that should have a live job after a reload.
    pub fn list_active_tasks(&self) -> Result<Vec<Task>> {
        self.query_tasks(
            &format!("{TASK_SELECT} WHERE is_active = 1 ORDER BY created_at"),
            [],
        )
    }

    /// Overwrite a task's user-editable fields and bump `updated_at`.
    pub fn update_task(&self, task: &Task) -> Result<()> {
        let schedule_json = serde_json::to_string(&task.schedule)
            .map_err(|e| StoreError::CorruptSchedule {
                id: task.id,
                reason: e.to_string(),
            })?;
        let conn = self.conn.lock().unwrap();
        let n = conn.execute(
            "UPDATE tasks SET name=?1, description=?2, payload=?3, schedule=?4,
                 is_active=?5, timeout_secs=?6, max_retries=?7, updated_at=?8
             WHERE id=?9",
            rusqlite::params![
                task.name,
                task.description,
                task.payload,
                schedule_json,
                task.is_active,
                task.timeout_secs,
                task.max_retries,
                Utc::now().to_rfc3339(),
                task.id,
            ],
        )?;
        if n == 0 {
            return Err(StoreError::TaskNotFound { id: task.id });
        }
        Ok(())
    }

    /// Flip the `is_active` flag.
    pub fn set_active(&self, id: TaskId, active: bool) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let n = conn.execute(
            "UPDATE tasks SET is_active=?1, updated_at=?2 WHERE id=?3",
            rusqlite::params![active, Utc::now().to_rfc3339(), id],
        )?;
        if n == 0 {
            return Err(StoreError::TaskNotFound { id });
        }
        Ok(())
    }

    /// Persist the consecutive-failure counter.
    pub fn set_retry_count(&self, id: TaskId, count: u32) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let n = conn.execute(
            "UPDATE tasks SET retry_count=?1, updated_at=?2 WHERE id=?3",
            rusqlite::params![count, Utc::now().to_rfc3339(), id],
        )?;
        if n == 0 {
            return Err(StoreError::TaskNotFound { id });
        }
        Ok(())
    }

    /// Engine write-back after one execution: `last_run`, `last_status`, and
    /// (for spent one-shot schedules) the `is_active` flag.
    pub fn update_after_run(
        &self,
        id: TaskId,
        last_run: DateTime<Utc>,
        status: RunStatus,
        deactivate: bool,
    ) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let n = conn.execute(
            "UPDATE tasks SET last_run=?1, last_status=?2, updated_at=?3,
                 is_active = CASE WHEN ?4 THEN 0 ELSE is_active END
             WHERE id=?5",
            rusqlite::params![
                last_run.to_rfc3339(),
                status.to_string(),
                Utc::now().to_rfc3339(),
                deactivate,
                id,
            ],
        )?;
        if n == 0 {
            return Err(StoreError::TaskNotFound { id });
        }
        Ok(())
    }

    /// Delete a task; its run history goes with it (FK cascade).
    pub fn delete_task(&self, id: TaskId) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let n = conn.execute("DELETE FROM tasks WHERE id = ?1", [id])?;
        if n == 0 {
            return Err(StoreError::TaskNotFound { id });
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Execution records
    // -----------------------------------------------------------------------

    /// Append a `running` record at fire time, before the payload starts, so
    /// a crash mid-run leaves a visible trace rather than silence.
    pub fn record_run_started(
        &self,
        run_id: Uuid,
        task_id: TaskId,
        start_time: DateTime<Utc>,
    ) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO task_runs (run_id, task_id, start_time, status)
             VALUES (?1, ?2, ?3, 'running')",
            rusqlite::params![run_id.to_string(), task_id, start_time.to_rfc3339()],
        )?;
        Ok(())
    }

    /// Finalize a record exactly once. A second finalize attempt (or a
    /// finalize for an unknown run) returns `RunNotFound`.
    pub fn finalize_run(
        &self,
        run_id: Uuid,
        end_time: DateTime<Utc>,
        status: RunStatus,
        output: Option<&str>,
        error: Option<&str>,
        duration_secs: f64,
    ) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let n = conn.execute(
            "UPDATE task_runs SET end_time=?1, status=?2, output=?3, error=?4,
                 duration_secs=?5
             WHERE run_id=?6 AND status='running'",
            rusqlite::params![
                end_time.to_rfc3339(),
                status.to_string(),
                output,
                error,
                duration_secs,
                run_id.to_string(),
            ],
        )?;
        if n == 0 {
            return Err(StoreError::RunNotFound {
                run_id: run_id.to_string(),
            });
        }
        Ok(())
    }

    /// Most recent runs for a task, newest first.
    pub fn list_runs(&self, task_id: TaskId, limit: usize) -> Result<Vec<ExecutionRecord>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT run_id, task_id, start_time, end_time, status, output,
                    error, duration_secs
             FROM task_runs WHERE task_id = ?1
             ORDER BY start_time DESC LIMIT ?2",
        )?;
        let records = stmt
            .query_map(rusqlite::params![task_id, limit as i64], |row| {
                Ok((
                    row.get::<_, String>(0)?,         // run_id
                    row.get::<_, i64>(1)?,            // task_id
                    row.get::<_, String>(2)?,         // start_time
                    row.get::<_, Option<String>>(3)?, // end_time
                    row.get::<_, String>(4)?,         // status
                    row.get::<_, Option<String>>(5)?, // output
                    row.get::<_, Option<String>>(6)?, // error
                    row.get::<_, Option<f64>>(7)?,    // duration_secs
                ))
            })?
            .filter_map(|r| {
                let (run_id, task_id, start, end, status, output, error, duration) = r.ok()?;
                let run_id = match Uuid::parse_str(&run_id) {
                    Ok(id) => id,
                    Err(e) => {
                        warn!(%run_id, "skipping run record with bad id: {e}");
                        return None;
                    }
                };
                Some(ExecutionRecord {
                    run_id,
                    task_id,
                    start_time: parse_ts(&start)?,
                    end_time: end.as_deref().and_then(parse_ts),
                    status: status.parse().ok()?,
                    output,
                    error,
                    duration_secs: duration,
                })
            })
            .collect();
        Ok(records)
    }

    /// Drop run records for `task_id` older than `cutoff`. Returns the
    /// number of deleted rows.
    pub fn prune_runs(&self, task_id: TaskId, cutoff: DateTime<Utc>) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let n = conn.execute(
            "DELETE FROM task_runs WHERE task_id = ?1 AND start_time < ?2",
            rusqlite::params![task_id, cutoff.to_rfc3339()],
        )?;
        Ok(n)
    }

    /// Aggregate counts for the monitor view.
    pub fn run_stats(&self) -> Result<RunStats> {
        let conn = self.conn.lock().unwrap();
        let (total_tasks, active_tasks, total_executions, failed_executions) = conn.query_row(
            "SELECT
                 (SELECT COUNT(*) FROM tasks),
                 (SELECT COUNT(*) FROM tasks WHERE is_active = 1),
                 (SELECT COUNT(*) FROM task_runs WHERE status != 'running'),
                 (SELECT COUNT(*) FROM task_runs WHERE status IN ('failed','timeout'))",
            [],
            |row| {
                Ok((
                    row.get::<_, u64>(0)?,
                    row.get::<_, u64>(1)?,
                    row.get::<_, u64>(2)?,
                    row.get::<_, u64>(3)?,
                ))
            },
        )?;

        let success_rate = if total_executions > 0 {
            (total_executions - failed_executions) as f64 / total_executions as f64 * 100.0
        } else {
            0.0
        };

        Ok(RunStats {
            total_tasks,
            active_tasks,
            total_executions,
            failed_executions,
            success_rate,
        })
    }

    // -----------------------------------------------------------------------
    // Internal helpers
    // -----------------------------------------------------------------------

    fn query_tasks<P: rusqlite::Params>(&self, sql: &str, params: P) -> Result<Vec<Task>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(sql)?;
        let tasks = stmt
            .query_map(params, map_task_row)?
            .filter_map(|r| match r {
                Ok(raw) => match raw.into_task() {
                    Ok(task) => Some(task),
                    Err(e) => {
                        warn!("skipping unreadable task row: {e}");
                        None
                    }
                },
                Err(e) => {
                    warn!("skipping unreadable task row: {e}");
                    None
                }
            })
            .collect();
        Ok(tasks)
    }
}

const TASK_SELECT: &str = "SELECT id, name, description, payload, schedule, is_active,
        timeout_secs, max_retries, retry_count, last_run, last_status,
        created_at, updated_at
 FROM tasks";

/// Raw column values for one task row, decoded into a [`Task`] in a second
/// step so schedule-JSON errors can carry the task id.
struct RawTask {
    id: i64,
    name: String,
    description: Option<String>,
    payload: String,
    schedule_json: String,
    is_active: bool,
    timeout_secs: u32,
    max_retries: u32,
    retry_count: u32,
    last_run: Option<String>,
    last_status: Option<String>,
    created_at: String,
    updated_at: String,
}

impl RawTask {
    fn into_task(self) -> Result<Task> {
        let schedule: Schedule = serde_json::from_str(&self.schedule_json).map_err(|e| {
            StoreError::CorruptSchedule {
                id: self.id,
                reason: e.to_string(),
            }
        })?;
        Ok(Task {
            id: self.id,
            name: self.name,
            description: self.description,
            payload: self.payload,
            schedule,
            is_active: self.is_active,
            timeout_secs: self.timeout_secs,
            max_retries: self.max_retries,
            retry_count: self.retry_count,
            last_run: self.last_run.as_deref().and_then(parse_ts),
            last_status: self.last_status.and_then(|s| s.parse().ok()),
            created_at: parse_ts(&self.created_at).unwrap_or_else(Utc::now),
            updated_at: parse_ts(&self.updated_at).unwrap_or_else(Utc::now),
        })
    }
}

fn map_task_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawTask> {
    Ok(RawTask {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        payload: row.get(3)?,
        schedule_json: row.get(4)?,
        is_active: row.get(5)?,
        timeout_secs: row.get(6)?,
        max_retries: row.get(7)?,
        retry_count: row.get(8)?,
        last_run: row.get(9)?,
        last_status: row.get(10)?,
        created_at: row.get(11)?,
        updated_at: row.get(12)?,
    })
}

fn parse_ts(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn mem_store() -> TaskStore {
        TaskStore::new(Connection::open_in_memory().unwrap()).unwrap()
    }

    fn sample_task(store: &TaskStore) -> Task {
        store
            .create_task(&NewTask::new(
                "nightly report",
                "print('hello')",
                Schedule::Daily {
                    time: "02:30".to_string(),
                },
            ))
            .unwrap()
    }

    #[test]
    fn create_and_get_round_trip() {
        let store = mem_store();
        let task = sample_task(&store);

        assert!(task.id > 0);
        assert_eq!(task.retry_count, 0);
        assert!(task.is_active);
        assert!(task.last_run.is_none());

        let loaded = store.get_task(task.id).unwrap().unwrap();
        assert_eq!(loaded.name, "nightly report");
        assert_eq!(
            loaded.schedule,
            Schedule::Daily {
                time: "02:30".to_string()
            }
        );
    }

    #[test]
    fn get_missing_task_is_none() {
        let store = mem_store();
        assert!(store.get_task(99).unwrap().is_none());
    }

    #[test]
    fn update_task_overwrites_editable_fields() {
        let store = mem_store();
        let mut task = sample_task(&store);
        task.name = "renamed".to_string();
        task.schedule = Schedule::Minutes { value: 10 };
        task.max_retries = 1;
        store.update_task(&task).unwrap();

        let loaded = store.get_task(task.id).unwrap().unwrap();
        assert_eq!(loaded.name, "renamed");
        assert_eq!(loaded.schedule, Schedule::Minutes { value: 10 });
        assert_eq!(loaded.max_retries, 1);
    }

    #[test]
    fn list_active_excludes_disabled() {
        let store = mem_store();
        let a = sample_task(&store);
        let b = sample_task(&store);
        store.set_active(b.id, false).unwrap();

        let active = store.list_active_tasks().unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, a.id);
        assert_eq!(store.list_tasks().unwrap().len(), 2);
    }

    #[test]
    fn delete_cascades_run_history() {
        let store = mem_store();
        let task = sample_task(&store);
        let run_id = Uuid::new_v4();
        store
            .record_run_started(run_id, task.id, Utc::now())
            .unwrap();

        store.delete_task(task.id).unwrap();
        assert!(store.list_runs(task.id, 10).unwrap().is_empty());
        assert!(matches!(
            store.delete_task(task.id),
            Err(StoreError::TaskNotFound { .. })
        ));
    }

    #[test]
    fn run_record_lifecycle() {
        let store = mem_store();
        let task = sample_task(&store);
        let run_id = Uuid::new_v4();
        let started = Utc::now();

        store.record_run_started(run_id, task.id, started).unwrap();
        let runs = store.list_runs(task.id, 10).unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].status, RunStatus::Running);
        assert!(runs[0].end_time.is_none());

        store
            .finalize_run(
                run_id,
                started + Duration::seconds(2),
                RunStatus::Success,
                Some("hello\n"),
                None,
                2.0,
            )
            .unwrap();

        let runs = store.list_runs(task.id, 10).unwrap();
        assert_eq!(runs[0].status, RunStatus::Success);
        assert_eq!(runs[0].output.as_deref(), Some("hello\n"));
        assert!(runs[0].end_time.is_some());

        // Finalizing twice must fail, the record is already sealed.
        assert!(matches!(
            store.finalize_run(run_id, Utc::now(), RunStatus::Failed, None, None, 0.0),
            Err(StoreError::RunNotFound { .. })
        ));
    }

    #[test]
    fn update_after_run_writes_status_and_deactivates() {
        let store = mem_store();
        let task = sample_task(&store);
        let ran_at = Utc::now();

        store
            .update_after_run(task.id, ran_at, RunStatus::Failed, false)
            .unwrap();
        let loaded = store.get_task(task.id).unwrap().unwrap();
        assert_eq!(loaded.last_status, Some(RunStatus::Failed));
        assert!(loaded.is_active);

        store
            .update_after_run(task.id, ran_at, RunStatus::Success, true)
            .unwrap();
        let loaded = store.get_task(task.id).unwrap().unwrap();
        assert_eq!(loaded.last_status, Some(RunStatus::Success));
        assert!(!loaded.is_active);
    }

    #[test]
    fn retry_count_persists() {
        let store = mem_store();
        let task = sample_task(&store);
        store.set_retry_count(task.id, 2).unwrap();
        assert_eq!(store.get_task(task.id).unwrap().unwrap().retry_count, 2);
        store.set_retry_count(task.id, 0).unwrap();
        assert_eq!(store.get_task(task.id).unwrap().unwrap().retry_count, 0);
    }

    #[test]
    fn stats_count_finalized_runs_only() {
        let store = mem_store();
        let task = sample_task(&store);
        let other = sample_task(&store);
        store.set_active(other.id, false).unwrap();

        let ok = Uuid::new_v4();
        let bad = Uuid::new_v4();
        let live = Uuid::new_v4();
        let now = Utc::now();
        store.record_run_started(ok, task.id, now).unwrap();
        store.record_run_started(bad, task.id, now).unwrap();
        store.record_run_started(live, task.id, now).unwrap();
        store
            .finalize_run(ok, now, RunStatus::Success, None, None, 0.1)
            .unwrap();
        store
            .finalize_run(bad, now, RunStatus::Timeout, None, None, 5.0)
            .unwrap();

        let stats = store.run_stats().unwrap();
        assert_eq!(stats.total_tasks, 2);
        assert_eq!(stats.active_tasks, 1);
        assert_eq!(stats.total_executions, 2);
        assert_eq!(stats.failed_executions, 1);
        assert!((stats.success_rate - 50.0).abs() < f64::EPSILON);
    }

    #[test]
    fn prune_drops_only_old_records() {
        let store = mem_store();
        let task = sample_task(&store);
        let old = Utc::now() - Duration::days(40);
        let recent = Utc::now() - Duration::days(1);
        store
            .record_run_started(Uuid::new_v4(), task.id, old)
            .unwrap();
        store
            .record_run_started(Uuid::new_v4(), task.id, recent)
            .unwrap();

        let cutoff = Utc::now() - Duration::days(30);
        assert_eq!(store.prune_runs(task.id, cutoff).unwrap(), 1);
        assert_eq!(store.list_runs(task.id, 10).unwrap().len(), 1);
    }
}
