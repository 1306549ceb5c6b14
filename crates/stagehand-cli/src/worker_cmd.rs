//! `stagehand worker run` — drives the worker and scheduler loop.

use anyhow::{Context, Result};
use sqlx::PgPool;
use tracing::{error, info};

use stagehand_core::executor::{ExecutorRegistry, NoopExecutor, WaitForEventExecutor};
use stagehand_core::schedule::service as schedule_service;
use stagehand_core::worker::{WorkerConfig, WorkerService};
use stagehand_core::workflow::WorkflowLoader;

fn build_registry(pool: &PgPool, config: &WorkerConfig) -> ExecutorRegistry {
    let mut registry = ExecutorRegistry::new();
    registry.register(NoopExecutor);
    registry.register(WaitForEventExecutor::new(pool.clone(), config.event_wait_poll_interval_seconds));
    registry
}

/// Run `process_once` (and a due-schedule scan) either exactly once or in a
/// loop that sleeps `worker_poll_interval_seconds` between empty iterations.
pub async fn run_worker(pool: &PgPool, worker_id: Option<&str>, once: bool) -> Result<()> {
    let config = WorkerConfig::from_env();
    let loader =
        WorkflowLoader::load_dir(&crate::config::workflows_dir()).context("failed to load workflow definitions")?;
    let registry = build_registry(pool, &config);
    let service = WorkerService::new(pool.clone(), config.clone(), registry);

    loop {
        match schedule_service::process_due_schedules(
            pool,
            &loader,
            config.schedule_batch_size,
            &config.default_workflow_key,
            config.default_max_attempts,
        )
        .await
        {
            Ok(n) if n > 0 => info!(materialized = n, "schedules fired"),
            Ok(_) => {}
            Err(e) => error!(error = %e, "schedule scan failed"),
        }

        match service.process_once(worker_id).await {
            Ok(outcome) => info!(%outcome, "process_once"),
            Err(e) => error!(error = %e, "process_once failed"),
        }

        if once {
            return Ok(());
        }

        tokio::time::sleep(std::time::Duration::from_secs(config.worker_poll_interval_seconds)).await;
    }
}
