use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

// Engine-wide defaults. These mirror the product defaults the scheduler was
// tuned with and are only overridden through taskd.toml / TASKD_* env vars.
pub const DEFAULT_TIMEZONE: &str = "Asia/Shanghai";
pub const DEFAULT_TASK_TIMEOUT_SECS: u32 = 3600; // 1 hour per execution
pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_RETRY_DELAY_SECS: u64 = 300; // 5 minutes between retries
pub const DEFAULT_WORKER_POOL_SIZE: usize = 20;
pub const DEFAULT_MAX_OUTPUT_CHARS: usize = 30_000;

/// Top-level config (taskd.toml + TASKD_* env overrides).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskdConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub runner: RunnerConfig,
}

impl Default for TaskdConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            scheduler: SchedulerConfig::default(),
            runner: RunnerConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// Scheduler engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Reference timezone for naive `once` datetimes and recurrence fields.
    #[serde(default = "default_timezone")]
    pub timezone: String,

    /// Maximum concurrent executions across all jobs.
    #[serde(default = "default_worker_pool_size")]
    pub worker_pool_size: usize,

    /// Fixed delay before a failed task is retried.
    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: u64,

    /// What to do with in-flight executions at shutdown.
    #[serde(default)]
    pub shutdown: ShutdownPolicy,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            timezone: default_timezone(),
            worker_pool_size: DEFAULT_WORKER_POOL_SIZE,
            retry_delay_secs: DEFAULT_RETRY_DELAY_SECS,
            shutdown: ShutdownPolicy::default(),
        }
    }
}

/// Shutdown behavior for executions that are still running.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ShutdownPolicy {
    /// Wait for in-flight executions to finish before exiting.
    #[default]
    Wait,
    /// Log the in-flight count and exit without waiting.
    Abandon,
}

/// Payload runner configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Interpreter binary the script body is handed to.
    #[serde(default = "default_interpreter")]
    pub interpreter: String,

    /// Extra arguments passed before the script path.
    #[serde(default)]
    pub args: Vec<String>,

    /// Cap on captured output before middle-omission truncation.
    #[serde(default = "default_max_output_chars")]
    pub max_output_chars: usize,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            interpreter: default_interpreter(),
            args: Vec::new(),
            max_output_chars: DEFAULT_MAX_OUTPUT_CHARS,
        }
    }
}

fn default_timezone() -> String {
    DEFAULT_TIMEZONE.to_string()
}
fn default_worker_pool_size() -> usize {
    DEFAULT_WORKER_POOL_SIZE
}
fn default_retry_delay_secs() -> u64 {
    DEFAULT_RETRY_DELAY_SECS
}
fn default_interpreter() -> String {
    "python3".to_string()
}
fn default_max_output_chars() -> usize {
    DEFAULT_MAX_OUTPUT_CHARS
}
fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{home}/.taskd/taskd.db")
}

impl TaskdConfig {
    /// Load config from a TOML file with TASKD_* env var overrides.
    ///
    /// Checks the explicit path argument first, then `~/.taskd/taskd.toml`.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        let config: TaskdConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("TASKD_").split("_"))
            .extract()
            .map_err(|e| crate::error::CoreError::Config(e.to_string()))?;

        Ok(config)
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{home}/.taskd/taskd.toml")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_product_tuning() {
        let config = TaskdConfig::default();
        assert_eq!(config.scheduler.timezone, "Asia/Shanghai");
        assert_eq!(config.scheduler.worker_pool_size, 20);
        assert_eq!(config.scheduler.retry_delay_secs, 300);
        assert_eq!(config.scheduler.shutdown, ShutdownPolicy::Wait);
        assert_eq!(config.runner.interpreter, "python3");
        assert_eq!(config.runner.max_output_chars, 30_000);
    }

    #[test]
    fn shutdown_policy_is_kebab_case() {
        let policy: ShutdownPolicy = serde_json::from_str("\"abandon\"").unwrap();
        assert_eq!(policy, ShutdownPolicy::Abandon);
    }

    #[test]
    fn missing_file_yields_defaults() {
        // Figment treats a missing TOML file as an empty source, so a bogus
        // path still produces a fully defaulted config.
        let config = TaskdConfig::load(Some("/nonexistent/taskd.toml")).unwrap();
        assert_eq!(config.scheduler.worker_pool_size, 20);
    }
}
