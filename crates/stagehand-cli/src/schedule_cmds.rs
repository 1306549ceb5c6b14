//! Operator-mode CLI handlers for `stagehand schedule` subcommands.

use anyhow::{Context, Result};
use sqlx::PgPool;

use stagehand_core::schedule::service as schedule_service;
use stagehand_core::worker::WorkerConfig;
use stagehand_core::workflow::WorkflowLoader;
use stagehand_db::queries::schedules;

use crate::ScheduleCommands;

pub async fn run_schedule_command(command: ScheduleCommands, pool: &PgPool) -> Result<()> {
    match command {
        ScheduleCommands::Create {
            key,
            workflow,
            interval_seconds,
            task_key,
        } => cmd_create(pool, &key, &workflow, interval_seconds, task_key.as_deref()).await,
        ScheduleCommands::List { limit } => cmd_list(pool, limit).await,
        ScheduleCommands::Pause { schedule_key } => cmd_pause(pool, &schedule_key).await,
        ScheduleCommands::Resume { schedule_key } => cmd_resume(pool, &schedule_key).await,
        ScheduleCommands::Trigger { schedule_key } => cmd_trigger(pool, &schedule_key).await,
    }
}

async fn find_by_key(pool: &PgPool, schedule_key: &str) -> Result<stagehand_db::models::TicketSchedule> {
    schedules::get_schedule_by_key(pool, schedule_key)
        .await?
        .with_context(|| format!("schedule {schedule_key:?} not found"))
}

async fn cmd_create(
    pool: &PgPool,
    key: &str,
    workflow: &str,
    interval_seconds: Option<i32>,
    task_key: Option<&str>,
) -> Result<()> {
    let empty = serde_json::Value::Object(Default::default());
    let schedule = schedule_service::create_schedule(
        pool,
        key,
        None,
        interval_seconds,
        None,
        Some(workflow),
        None,
        &empty,
        &empty,
        Some("cli"),
        task_key,
        &empty,
        None,
    )
    .await?;

    println!("Schedule created.");
    println!("  ID:        {}", schedule.id);
    println!("  Key:       {}", schedule.schedule_key);
    println!("  Workflow:  {}", workflow);
    println!("  Recurring: {}", schedule.is_recurring());
    Ok(())
}

async fn cmd_list(pool: &PgPool, limit: i64) -> Result<()> {
    let list = schedule_service::list_schedules(pool, limit).await?;
    if list.is_empty() {
        println!("No schedules found.");
        return Ok(());
    }

    for s in &list {
        let active = if s.active { "active" } else { "paused" };
        let next = s
            .next_run_at
            .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
            .unwrap_or_else(|| "-".to_owned());
        println!("[{}] {} ({active}) next_run_at={next}", s.id, s.schedule_key);
    }
    Ok(())
}

async fn cmd_pause(pool: &PgPool, schedule_key: &str) -> Result<()> {
    let schedule = find_by_key(pool, schedule_key).await?;
    schedule_service::pause(pool, schedule.id).await?;
    println!("Schedule {schedule_key} paused.");
    Ok(())
}

async fn cmd_resume(pool: &PgPool, schedule_key: &str) -> Result<()> {
    let schedule = find_by_key(pool, schedule_key).await?;
    schedule_service::resume(pool, schedule.id).await?;
    println!("Schedule {schedule_key} resumed.");
    Ok(())
}

async fn cmd_trigger(pool: &PgPool, schedule_key: &str) -> Result<()> {
    let schedule = find_by_key(pool, schedule_key).await?;
    let loader =
        WorkflowLoader::load_dir(&crate::config::workflows_dir()).context("failed to load workflow definitions")?;
    let worker_config = WorkerConfig::from_env();
    schedule_service::trigger_schedule_once(
        pool,
        &loader,
        schedule.id,
        &worker_config.default_workflow_key,
        worker_config.default_max_attempts,
    )
    .await?;
    println!("Schedule {schedule_key} triggered.");
    Ok(())
}
