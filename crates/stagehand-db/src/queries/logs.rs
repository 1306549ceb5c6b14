//! Database query functions for the `task_logs` table.

use anyhow::{Context, Result};
use serde_json::Value as Json;
use sqlx::PgPool;

use crate::models::{LogType, TaskLog};

pub async fn insert_log(
    pool: &PgPool,
    task_id: i64,
    log_type: LogType,
    message: &str,
    details: &Json,
    success: Option<bool>,
) -> Result<TaskLog> {
    sqlx::query_as::<_, TaskLog>(
        "INSERT INTO task_logs (task_id, log_type, message, details, success) \
         VALUES ($1, $2, $3, $4, $5) \
         RETURNING *",
    )
    .bind(task_id)
    .bind(log_type)
    .bind(message)
    .bind(details)
    .bind(success)
    .fetch_one(pool)
    .await
    .context("failed to insert task log")
}

pub async fn list_logs_for_task(pool: &PgPool, task_id: i64) -> Result<Vec<TaskLog>> {
    sqlx::query_as::<_, TaskLog>(
        "SELECT * FROM task_logs WHERE task_id = $1 ORDER BY created_at ASC",
    )
    .bind(task_id)
    .fetch_all(pool)
    .await
    .context("failed to list task logs")
}

/// Count every log row across all of a ticket's tasks, for the ticket summary projection.
pub async fn count_logs_for_ticket(pool: &PgPool, ticket_id: &str) -> Result<i64> {
    let row: (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM task_logs tl \
         JOIN tasks t ON t.id = tl.task_id \
         WHERE t.ticket_id = $1",
    )
    .bind(ticket_id)
    .fetch_one(pool)
    .await
    .context("failed to count logs for ticket")?;
    Ok(row.0)
}
