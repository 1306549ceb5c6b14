//! Database query functions for the `ticket_schedules` table.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde_json::Value as Json;
use sqlx::{PgPool, Postgres, Transaction};

use crate::models::TicketSchedule;

#[allow(clippy::too_many_arguments)]
pub async fn create_schedule(
    pool: &PgPool,
    schedule_key: &str,
    next_run_at: Option<DateTime<Utc>>,
    interval_seconds: Option<i32>,
    ticket_title: Option<&str>,
    workflow_key: Option<&str>,
    workflow_version: Option<&str>,
    workflow_input: &Json,
    context_data: &Json,
    source_type: Option<&str>,
    task_key: Option<&str>,
    task_payload: &Json,
    task_max_attempts: Option<i32>,
) -> Result<TicketSchedule> {
    sqlx::query_as::<_, TicketSchedule>(
        "INSERT INTO ticket_schedules \
           (schedule_key, active, next_run_at, interval_seconds, ticket_title, workflow_key, \
            workflow_version, workflow_input, context_data, source_type, task_key, \
            task_payload, task_max_attempts) \
         VALUES ($1, true, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12) \
         RETURNING *",
    )
    .bind(schedule_key)
    .bind(next_run_at)
    .bind(interval_seconds)
    .bind(ticket_title)
    .bind(workflow_key)
    .bind(workflow_version)
    .bind(workflow_input)
    .bind(context_data)
    .bind(source_type)
    .bind(task_key)
    .bind(task_payload)
    .bind(task_max_attempts)
    .fetch_one(pool)
    .await
    .context("failed to create ticket schedule")
}

pub async fn list_schedules(pool: &PgPool, limit: i64) -> Result<Vec<TicketSchedule>> {
    sqlx::query_as::<_, TicketSchedule>("SELECT * FROM ticket_schedules ORDER BY created_at ASC LIMIT $1")
        .bind(limit)
        .fetch_all(pool)
        .await
        .context("failed to list ticket schedules")
}

pub async fn get_schedule_by_key(pool: &PgPool, schedule_key: &str) -> Result<Option<TicketSchedule>> {
    sqlx::query_as::<_, TicketSchedule>("SELECT * FROM ticket_schedules WHERE schedule_key = $1")
        .bind(schedule_key)
        .fetch_optional(pool)
        .await
        .context("failed to fetch ticket schedule by key")
}

pub async fn get_schedule(pool: &PgPool, id: i64) -> Result<Option<TicketSchedule>> {
    sqlx::query_as::<_, TicketSchedule>("SELECT * FROM ticket_schedules WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("failed to fetch ticket schedule")
}

pub async fn set_active(pool: &PgPool, id: i64, active: bool) -> Result<u64> {
    let result = sqlx::query("UPDATE ticket_schedules SET active = $2 WHERE id = $1")
        .bind(id)
        .bind(active)
        .execute(pool)
        .await
        .context("failed to set ticket schedule active flag")?;
    Ok(result.rows_affected())
}

/// Select due schedules (`active` and `next_run_at <= now()`), locking each
/// row so concurrent schedulers never double-materialize a ticket.
pub async fn select_due_schedules(
    tx: &mut Transaction<'_, Postgres>,
    limit: i64,
) -> Result<Vec<TicketSchedule>> {
    sqlx::query_as::<_, TicketSchedule>(
        "SELECT * FROM ticket_schedules \
         WHERE active AND next_run_at IS NOT NULL AND next_run_at <= now() \
         ORDER BY next_run_at ASC \
         FOR UPDATE SKIP LOCKED \
         LIMIT $1",
    )
    .bind(limit)
    .fetch_all(&mut **tx)
    .await
    .context("failed to select due schedules")
}

/// Advance a schedule past its current firing. Recurring schedules move
/// `next_run_at` forward by `interval_seconds` from the materialization
/// time; one-shot schedules are deactivated.
pub async fn advance_schedule(
    tx: &mut Transaction<'_, Postgres>,
    id: i64,
    next_run_at: Option<DateTime<Utc>>,
    active: bool,
) -> Result<()> {
    sqlx::query(
        "UPDATE ticket_schedules SET next_run_at = $2, active = $3, last_run_at = now() \
         WHERE id = $1",
    )
    .bind(id)
    .bind(next_run_at)
    .bind(active)
    .execute(&mut **tx)
    .await
    .context("failed to advance ticket schedule")?;
    Ok(())
}

pub async fn trigger_schedule_now(pool: &PgPool, id: i64) -> Result<u64> {
    let result = sqlx::query("UPDATE ticket_schedules SET next_run_at = now() WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await
        .context("failed to trigger ticket schedule")?;
    Ok(result.rows_affected())
}
