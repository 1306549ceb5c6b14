//! Materializing tickets from [`stagehand_db::models::TicketSchedule`] rows.

use chrono::{DateTime, Duration, Utc};
use serde_json::Value as Json;
use sqlx::PgPool;

use stagehand_db::models::TicketSchedule;
use stagehand_db::queries::schedules;

use crate::error::ServiceError;
use crate::ticket::service as ticket_service;
use crate::workflow::WorkflowLoader;

fn into_sqlx(err: anyhow::Error) -> sqlx::Error {
    match err.downcast::<sqlx::Error>() {
        Ok(e) => e,
        Err(e) => sqlx::Error::Protocol(e.to_string()),
    }
}

/// Create a schedule. `schedule_key` must be unique; a duplicate surfaces as
/// [`ServiceError::Conflict`]. `next_run_at` defaults to immediately due.
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
) -> Result<TicketSchedule, ServiceError> {
    if schedules::get_schedule_by_key(pool, schedule_key)
        .await
        .map_err(|e| ServiceError::Database(into_sqlx(e)))?
        .is_some()
    {
        return Err(ServiceError::Conflict(format!("schedule key {schedule_key:?} already exists")));
    }

    schedules::create_schedule(
        pool,
        schedule_key,
        Some(next_run_at.unwrap_or_else(Utc::now)),
        interval_seconds,
        ticket_title,
        workflow_key,
        workflow_version,
        workflow_input,
        context_data,
        source_type,
        task_key,
        task_payload,
        task_max_attempts,
    )
    .await
    .map_err(|e| ServiceError::Database(into_sqlx(e)))
}

/// List schedules, oldest first.
pub async fn list_schedules(pool: &PgPool, limit: i64) -> Result<Vec<TicketSchedule>, ServiceError> {
    schedules::list_schedules(pool, limit)
        .await
        .map_err(|e| ServiceError::Database(into_sqlx(e)))
}

/// Flip a schedule inactive. Does not touch `next_run_at`.
pub async fn pause(pool: &PgPool, id: i64) -> Result<(), ServiceError> {
    let affected = schedules::set_active(pool, id, false)
        .await
        .map_err(|e| ServiceError::Database(into_sqlx(e)))?;
    if affected == 0 {
        return Err(ServiceError::NotFound(format!("schedule {id}")));
    }
    Ok(())
}

/// Reactivate a schedule. If `next_run_at` is null, sets it to now so the
/// schedule fires on the next scan.
pub async fn resume(pool: &PgPool, id: i64) -> Result<(), ServiceError> {
    let schedule = schedules::get_schedule(pool, id)
        .await
        .map_err(|e| ServiceError::Database(into_sqlx(e)))?
        .ok_or_else(|| ServiceError::NotFound(format!("schedule {id}")))?;

    schedules::set_active(pool, id, true)
        .await
        .map_err(|e| ServiceError::Database(into_sqlx(e)))?;

    if schedule.next_run_at.is_none() {
        schedules::trigger_schedule_now(pool, id)
            .await
            .map_err(|e| ServiceError::Database(into_sqlx(e)))?;
    }
    Ok(())
}

/// Materialize a ticket from schedule `id` right now, ignoring its current
/// `next_run_at`/`active` state, then advance it exactly as a normal scan
/// would (recurring schedules reschedule, one-shot schedules deactivate).
pub async fn trigger_schedule_once(
    pool: &PgPool,
    loader: &WorkflowLoader,
    id: i64,
    default_workflow_key: &str,
    default_max_attempts: i32,
) -> Result<(), ServiceError> {
    let schedule = schedules::get_schedule(pool, id)
        .await
        .map_err(|e| ServiceError::Database(into_sqlx(e)))?
        .ok_or_else(|| ServiceError::NotFound(format!("schedule {id}")))?;

    let (next_run_at, active) = if schedule.is_recurring() {
        let interval = schedule.interval_seconds.unwrap_or_default();
        (Some(Utc::now() + Duration::seconds(interval as i64)), true)
    } else {
        (None, false)
    };
    let mut tx = pool.begin().await.map_err(ServiceError::Database)?;
    schedules::advance_schedule(&mut tx, schedule.id, next_run_at, active)
        .await
        .map_err(|e| ServiceError::Database(into_sqlx(e)))?;
    tx.commit().await.map_err(ServiceError::Database)?;

    materialize(pool, loader, &schedule, default_workflow_key, default_max_attempts).await
}

/// Build a ticket (and optionally one seed task) from a schedule template.
/// Runs outside any open transaction — the schedule row was already
/// advanced/deactivated under its own short lock before this is called.
async fn materialize(
    pool: &PgPool,
    loader: &WorkflowLoader,
    schedule: &TicketSchedule,
    default_workflow_key: &str,
    default_max_attempts: i32,
) -> Result<(), ServiceError> {
    let workflow_key = schedule.workflow_key.as_deref().unwrap_or(default_workflow_key);

    let ticket = ticket_service::create_ticket(
        pool,
        loader,
        workflow_key,
        schedule.ticket_title.as_deref(),
        schedule.workflow_version.as_deref(),
        &schedule.workflow_input,
        &schedule.context_data,
        schedule.source_type.as_deref(),
    )
    .await?;

    if let Some(task_key) = schedule.task_key.as_deref() {
        ticket_service::create_task(
            pool,
            &ticket.ticket_id,
            task_key,
            &schedule.task_payload,
            &[],
            schedule.task_max_attempts.unwrap_or(default_max_attempts),
            None,
            None,
            None,
        )
        .await?;
    }

    Ok(())
}

/// Scan for schedules due to fire (`active` and `next_run_at <= now`),
/// locking each row and advancing/deactivating it in that same short
/// transaction, then materialize each into a ticket outside the lock.
/// Returns how many schedules were materialized this pass.
pub async fn process_due_schedules(
    pool: &PgPool,
    loader: &WorkflowLoader,
    limit: i64,
    default_workflow_key: &str,
    default_max_attempts: i32,
) -> Result<usize, ServiceError> {
    let mut tx = pool.begin().await.map_err(ServiceError::Database)?;
    let due = schedules::select_due_schedules(&mut tx, limit)
        .await
        .map_err(|e| ServiceError::Database(into_sqlx(e)))?;

    for schedule in &due {
        let (next_run_at, active) = if schedule.is_recurring() {
            let interval = schedule.interval_seconds.unwrap_or_default();
            (Some(Utc::now() + Duration::seconds(interval as i64)), true)
        } else {
            (None, false)
        };
        schedules::advance_schedule(&mut tx, schedule.id, next_run_at, active)
            .await
            .map_err(|e| ServiceError::Database(into_sqlx(e)))?;
    }
    tx.commit().await.map_err(ServiceError::Database)?;

    for schedule in &due {
        materialize(pool, loader, schedule, default_workflow_key, default_max_attempts).await?;
    }
    Ok(due.len())
}
