use rusqlite::Connection;

use crate::error::Result;

/// Initialise the taskd schema in `conn`.
///
/// Creates the `tasks` and `task_runs` tables (idempotent) plus the indexes
/// the engine's hot queries rely on: active-task reload and per-task run
/// history ordered by start time.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS tasks (
            id            INTEGER NOT NULL PRIMARY KEY AUTOINCREMENT,
            name          TEXT    NOT NULL,
            description   TEXT,
            payload       TEXT    NOT NULL,   -- opaque script body
            schedule      TEXT    NOT NULL,   -- JSON-encoded Schedule enum
            is_active     INTEGER NOT NULL DEFAULT 1,
            timeout_secs  INTEGER NOT NULL,
            max_retries   INTEGER NOT NULL,
            retry_count   INTEGER NOT NULL DEFAULT 0,
            last_run      TEXT,               -- ISO-8601 or NULL
            last_status   TEXT,               -- running/success/failed/timeout
            created_at    TEXT    NOT NULL,
            updated_at    TEXT    NOT NULL
        ) STRICT;

        CREATE TABLE IF NOT EXISTS task_runs (
            run_id        TEXT    NOT NULL PRIMARY KEY,
            task_id       INTEGER NOT NULL REFERENCES tasks (id) ON DELETE CASCADE,
            start_time    TEXT    NOT NULL,
            end_time      TEXT,
            status        TEXT    NOT NULL DEFAULT 'running',
            output        TEXT,
            error         TEXT,
            duration_secs REAL
        ) STRICT;

        -- Startup reload: SELECT … WHERE is_active = 1
        CREATE INDEX IF NOT EXISTS idx_tasks_is_active ON tasks (is_active);

        -- Run history: SELECT … WHERE task_id = ? ORDER BY start_time DESC
        CREATE INDEX IF NOT EXISTS idx_task_runs_task_start
            ON task_runs (task_id, start_time);
        ",
    )?;
    Ok(())
}
