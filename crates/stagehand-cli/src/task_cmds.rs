//! Operator-mode CLI handlers for `stagehand task` subcommands.

use anyhow::{Context, Result};
use sqlx::PgPool;

use stagehand_core::ticket::service as ticket_service;
use stagehand_db::queries::tasks;

use crate::TaskCommands;

pub async fn run_task_command(command: TaskCommands, pool: &PgPool) -> Result<()> {
    match command {
        TaskCommands::Create {
            ticket_id,
            key,
            payload,
            depends_on,
            max_attempts,
        } => cmd_create(pool, &ticket_id, &key, payload.as_deref(), &depends_on, max_attempts).await,
        TaskCommands::Show { task_id } => cmd_show(pool, task_id).await,
    }
}

async fn cmd_create(
    pool: &PgPool,
    ticket_id: &str,
    task_key: &str,
    payload: Option<&str>,
    depends_on: &[i64],
    max_attempts: i32,
) -> Result<()> {
    let payload = match payload {
        Some(s) => serde_json::from_str(s).with_context(|| format!("failed to parse JSON: {s:?}"))?,
        None => serde_json::Value::Object(Default::default()),
    };

    let task = ticket_service::create_task(pool, ticket_id, task_key, &payload, depends_on, max_attempts, None, None, None)
        .await?;

    println!("Task created.");
    println!("  ID:      {}", task.id);
    println!("  Ticket:  {}", task.ticket_id);
    println!("  Key:     {}", task.task_key);
    println!("  State:   {}", task.state);
    Ok(())
}

async fn cmd_show(pool: &PgPool, task_id: i64) -> Result<()> {
    let task = tasks::get_task(pool, task_id)
        .await?
        .with_context(|| format!("task {task_id} not found"))?;

    println!("Task: {}", task.id);
    println!("  Ticket:        {}", task.ticket_id);
    println!("  Key:           {}", task.task_key);
    println!("  State:         {}", task.state);
    println!("  Attempts:      {}/{}", task.attempt_count, task.max_attempts);
    if let Some(claimed_by) = &task.claimed_by {
        println!("  Claimed by:    {claimed_by}");
    }
    if let Some(err) = &task.error_message {
        println!("  Error:         {err}");
    }
    if task.cancel_requested {
        println!("  Cancellation requested");
    }
    println!("  Created:       {}", task.created_at.format("%Y-%m-%d %H:%M:%S UTC"));
    if let Some(completed) = task.completed_at {
        println!("  Completed:     {}", completed.format("%Y-%m-%d %H:%M:%S UTC"));
    }
    Ok(())
}
