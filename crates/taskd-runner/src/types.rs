use serde::{Deserialize, Serialize};

/// Tagged result of one payload run.
///
/// The three arms map onto the recorded statuses: exit code 0 → success,
/// any other `Completed` or a `Failed` → failed, `TimedOut` → timeout.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum RunOutcome {
    /// The child ran to completion (with any exit code).
    Completed {
        exit_code: i32,
        stdout: String,
        stderr: String,
    },

    /// The child could not be started or the runner itself failed.
    Failed { error: String },

    /// The child was killed at the timeout. Output produced before the
    /// kill is preserved.
    TimedOut { stdout: String, stderr: String },
}

impl RunOutcome {
    /// `true` when the payload finished with exit code 0.
    pub fn is_success(&self) -> bool {
        matches!(self, RunOutcome::Completed { exit_code: 0, .. })
    }
}
