//! Shared data types for the taskd engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::{DEFAULT_MAX_RETRIES, DEFAULT_TASK_TIMEOUT_SECS};

/// Stable task identity — the SQLite rowid of the task record.
pub type TaskId = i64;

/// Weekday labels for human-readable schedule descriptions (0 = Monday).
const WEEKDAYS: [&str; 7] = [
    "Monday",
    "Tuesday",
    "Wednesday",
    "Thursday",
    "Friday",
    "Saturday",
    "Sunday",
];

/// Defines when a task should run.
///
/// Serialized as tagged JSON into a single column, so a task's trigger can
/// always be re-derived from the stored record alone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Schedule {
    /// Run exactly once at the given ISO-8601 instant.
    ///
    /// A value without a zone offset is interpreted in the configured
    /// reference timezone; a value with an offset is converted to it.
    Once { datetime: String },

    /// Run every N minutes.
    Minutes { value: u32 },

    /// Run every N hours.
    Hourly { value: u32 },

    /// Run every day at `HH:MM`.
    Daily { time: String },

    /// Run on a specific weekday (0 = Monday … 6 = Sunday) at `HH:MM`.
    Weekly { day: u8, time: String },

    /// Run on a specific day of month (1–31) at `HH:MM`.
    Monthly { day: u8, time: String },

    /// Run according to a 5-field (minute hour dom month dow) or 6-field
    /// (leading seconds) cron expression, Unix weekday numbering.
    Cron { expression: String },
}

impl Schedule {
    /// `true` for schedules that are spent after a single fire.
    pub fn is_once(&self) -> bool {
        matches!(self, Schedule::Once { .. })
    }

    /// Human-readable description, shown in job listings.
    pub fn describe(&self) -> String {
        match self {
            Schedule::Once { datetime } => format!("once at {datetime}"),
            Schedule::Minutes { value: 1 } => "every minute".to_string(),
            Schedule::Minutes { value } => format!("every {value} minutes"),
            Schedule::Hourly { value: 1 } => "every hour".to_string(),
            Schedule::Hourly { value } => format!("every {value} hours"),
            Schedule::Daily { time } => format!("daily at {time}"),
            Schedule::Weekly { day, time } => {
                let day = WEEKDAYS
                    .get(*day as usize)
                    .copied()
                    .unwrap_or("invalid weekday");
                format!("weekly on {day} at {time}")
            }
            Schedule::Monthly { day, time } => format!("monthly on day {day} at {time}"),
            Schedule::Cron { expression } => format!("cron [{expression}]"),
        }
    }
}

/// Outcome classification of a single execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Execution has started but not yet finished.
    Running,
    /// Payload exited with status 0.
    Success,
    /// Payload exited non-zero or could not be started.
    Failed,
    /// Payload was forcibly terminated at its timeout.
    Timeout,
}

impl RunStatus {
    /// `true` for the statuses that trigger the retry policy.
    pub fn is_failure(&self) -> bool {
        matches!(self, RunStatus::Failed | RunStatus::Timeout)
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RunStatus::Running => "running",
            RunStatus::Success => "success",
            RunStatus::Failed => "failed",
            RunStatus::Timeout => "timeout",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "running" => Ok(RunStatus::Running),
            "success" => Ok(RunStatus::Success),
            "failed" => Ok(RunStatus::Failed),
            "timeout" => Ok(RunStatus::Timeout),
            other => Err(format!("unknown run status: {other}")),
        }
    }
}

/// A persisted task record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Rowid — primary key.
    pub id: TaskId,
    /// Human-readable label.
    pub name: String,
    /// Optional free-form description.
    pub description: Option<String>,
    /// The script body handed to the interpreter. Opaque to the engine.
    pub payload: String,
    /// When the task should run.
    pub schedule: Schedule,
    /// Whether the task should have a live job.
    pub is_active: bool,
    /// Wall-clock budget for one execution before it is killed.
    pub timeout_secs: u32,
    /// Retry budget for consecutive failures.
    pub max_retries: u32,
    /// Consecutive failures since the last success.
    pub retry_count: u32,
    /// Start time of the most recent execution, if any.
    pub last_run: Option<DateTime<Utc>>,
    /// Final status of the most recent execution, if any.
    pub last_status: Option<RunStatus>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields supplied when creating a task; the store fills in the rest.
#[derive(Debug, Clone)]
pub struct NewTask {
    pub name: String,
    pub description: Option<String>,
    pub payload: String,
    pub schedule: Schedule,
    pub is_active: bool,
    pub timeout_secs: u32,
    pub max_retries: u32,
}

impl NewTask {
    /// New active task with the default timeout and retry budget.
    pub fn new(name: impl Into<String>, payload: impl Into<String>, schedule: Schedule) -> Self {
        Self {
            name: name.into(),
            description: None,
            payload: payload.into(),
            schedule,
            is_active: true,
            timeout_secs: DEFAULT_TASK_TIMEOUT_SECS,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

/// Durable outcome of one job fire. Append-only; finalized exactly once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRecord {
    /// UUIDv4 assigned at fire time — primary key.
    pub run_id: Uuid,
    pub task_id: TaskId,
    pub start_time: DateTime<Utc>,
    /// Set when the record is finalized; `None` only while status is
    /// `running`.
    pub end_time: Option<DateTime<Utc>>,
    pub status: RunStatus,
    /// Captured stdout (truncated middle-out above the configured cap).
    pub output: Option<String>,
    /// Rendered failure cause: stderr tail, spawn error, or timeout notice.
    pub error: Option<String>,
    pub duration_secs: Option<f64>,
}
