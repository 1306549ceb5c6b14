use std::env;

/// Worker-tunable settings, independent from [`stagehand_db::config::DbConfig`].
///
/// Every field is read from a `STAGEHAND_`-prefixed environment variable with
/// a compile-time default, following the db crate's `DbConfig::from_env()` pattern.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub default_max_attempts: i32,
    pub retry_base_seconds: i32,
    pub retry_max_seconds: i32,
    pub task_lease_seconds: i64,
    pub stale_task_timeout_seconds: i64,
    pub event_wait_poll_interval_seconds: i64,
    pub schedule_batch_size: i64,
    pub worker_id: String,
    pub default_workflow_key: String,
    pub worker_poll_interval_seconds: u64,
}

impl WorkerConfig {
    pub const DEFAULT_MAX_ATTEMPTS: i32 = 3;
    pub const DEFAULT_RETRY_BASE_SECONDS: i32 = 5;
    pub const DEFAULT_RETRY_MAX_SECONDS: i32 = 300;
    pub const DEFAULT_TASK_LEASE_SECONDS: i64 = 60;
    pub const DEFAULT_STALE_TASK_TIMEOUT_SECONDS: i64 = 120;
    pub const DEFAULT_EVENT_WAIT_POLL_INTERVAL_SECONDS: i64 = 5;
    pub const DEFAULT_SCHEDULE_BATCH_SIZE: i64 = 10;
    pub const DEFAULT_WORKFLOW_KEY: &str = "default_ticket";
    pub const DEFAULT_WORKER_POLL_INTERVAL_SECONDS: u64 = 5;

    /// Minimum enforced task lease, per the worker-service spec.
    pub const MIN_TASK_LEASE_SECONDS: i64 = 10;
    /// Minimum enforced staleness fallback, per the worker-service spec.
    pub const MIN_STALE_TASK_TIMEOUT_SECONDS: i64 = 30;

    pub fn from_env() -> Self {
        Self {
            default_max_attempts: env_i32("STAGEHAND_DEFAULT_MAX_ATTEMPTS", Self::DEFAULT_MAX_ATTEMPTS),
            retry_base_seconds: env_i32("STAGEHAND_RETRY_BASE_SECONDS", Self::DEFAULT_RETRY_BASE_SECONDS),
            retry_max_seconds: env_i32("STAGEHAND_RETRY_MAX_SECONDS", Self::DEFAULT_RETRY_MAX_SECONDS),
            task_lease_seconds: env_i64("STAGEHAND_TASK_LEASE_SECONDS", Self::DEFAULT_TASK_LEASE_SECONDS)
                .max(Self::MIN_TASK_LEASE_SECONDS),
            stale_task_timeout_seconds: env_i64(
                "STAGEHAND_STALE_TASK_TIMEOUT_SECONDS",
                Self::DEFAULT_STALE_TASK_TIMEOUT_SECONDS,
            )
            .max(Self::MIN_STALE_TASK_TIMEOUT_SECONDS),
            event_wait_poll_interval_seconds: env_i64(
                "STAGEHAND_EVENT_WAIT_POLL_INTERVAL_SECONDS",
                Self::DEFAULT_EVENT_WAIT_POLL_INTERVAL_SECONDS,
            ),
            schedule_batch_size: env_i64("STAGEHAND_SCHEDULE_BATCH_SIZE", Self::DEFAULT_SCHEDULE_BATCH_SIZE),
            worker_id: env::var("STAGEHAND_WORKER_ID").unwrap_or_else(|_| default_worker_id()),
            default_workflow_key: env::var("STAGEHAND_DEFAULT_WORKFLOW_KEY")
                .unwrap_or_else(|_| Self::DEFAULT_WORKFLOW_KEY.to_owned()),
            worker_poll_interval_seconds: env_u64(
                "STAGEHAND_WORKER_POLL_INTERVAL_SECONDS",
                Self::DEFAULT_WORKER_POLL_INTERVAL_SECONDS,
            ),
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

fn default_worker_id() -> String {
    format!("worker-{}", std::process::id())
}

fn env_i32(key: &str, default: i32) -> i32 {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_i64(key: &str, default: i64) -> i64 {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_when_unset() {
        let cfg = WorkerConfig {
            default_max_attempts: WorkerConfig::DEFAULT_MAX_ATTEMPTS,
            retry_base_seconds: WorkerConfig::DEFAULT_RETRY_BASE_SECONDS,
            retry_max_seconds: WorkerConfig::DEFAULT_RETRY_MAX_SECONDS,
            task_lease_seconds: WorkerConfig::DEFAULT_TASK_LEASE_SECONDS,
            stale_task_timeout_seconds: WorkerConfig::DEFAULT_STALE_TASK_TIMEOUT_SECONDS,
            event_wait_poll_interval_seconds: WorkerConfig::DEFAULT_EVENT_WAIT_POLL_INTERVAL_SECONDS,
            schedule_batch_size: WorkerConfig::DEFAULT_SCHEDULE_BATCH_SIZE,
            worker_id: "w".into(),
            default_workflow_key: WorkerConfig::DEFAULT_WORKFLOW_KEY.into(),
            worker_poll_interval_seconds: WorkerConfig::DEFAULT_WORKER_POLL_INTERVAL_SECONDS,
        };
        assert_eq!(cfg.task_lease_seconds, 60);
    }

    #[test]
    fn env_i64_parses_valid_values() {
        assert_eq!(env_i64("STAGEHAND_TEST_DOES_NOT_EXIST_XYZ", 42), 42);
    }
}
