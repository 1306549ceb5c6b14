//! Database query functions for the `tasks` and `task_dependencies` tables.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde_json::Value as Json;
use sqlx::{PgPool, Postgres, Transaction};

use crate::models::TaskState;

/// Insert a task in `initial_state`. `next_run_at` is `now()` for `queued`,
/// null for `paused`/`blocked` — the caller (ticket service) decides which
/// applies based on the owning ticket's current pause/approval state.
#[allow(clippy::too_many_arguments)]
pub async fn insert_task(
    pool: &PgPool,
    ticket_id: &str,
    task_key: &str,
    initial_state: TaskState,
    payload: &Json,
    max_attempts: i32,
    retry_base_seconds: Option<i32>,
    retry_max_seconds: Option<i32>,
    timeout_seconds: Option<i32>,
) -> Result<crate::models::Task> {
    let next_run_at = if initial_state == TaskState::Queued {
        Some(Utc::now())
    } else {
        None
    };
    sqlx::query_as::<_, crate::models::Task>(
        "INSERT INTO tasks \
           (ticket_id, task_key, state, payload, max_attempts, \
            retry_base_seconds, retry_max_seconds, timeout_seconds, next_run_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) \
         RETURNING *",
    )
    .bind(ticket_id)
    .bind(task_key)
    .bind(initial_state)
    .bind(payload)
    .bind(max_attempts)
    .bind(retry_base_seconds)
    .bind(retry_max_seconds)
    .bind(timeout_seconds)
    .bind(next_run_at)
    .fetch_one(pool)
    .await
    .context("failed to insert task")
}

pub async fn get_task(pool: &PgPool, id: i64) -> Result<Option<crate::models::Task>> {
    sqlx::query_as::<_, crate::models::Task>("SELECT * FROM tasks WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("failed to fetch task")
}

pub async fn list_tasks_for_ticket(
    pool: &PgPool,
    ticket_id: &str,
) -> Result<Vec<crate::models::Task>> {
    sqlx::query_as::<_, crate::models::Task>(
        "SELECT * FROM tasks WHERE ticket_id = $1 ORDER BY created_at ASC",
    )
    .bind(ticket_id)
    .fetch_all(pool)
    .await
    .context("failed to list tasks for ticket")
}

pub async fn insert_task_dependency(
    pool: &PgPool,
    task_id: i64,
    depends_on_task_id: i64,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO task_dependencies (task_id, depends_on_task_id) VALUES ($1, $2) \
         ON CONFLICT DO NOTHING",
    )
    .bind(task_id)
    .bind(depends_on_task_id)
    .execute(pool)
    .await
    .context("failed to insert task dependency")?;
    Ok(())
}

pub async fn get_task_dependency_ids(pool: &PgPool, task_id: i64) -> Result<Vec<i64>> {
    let rows: Vec<(i64,)> =
        sqlx::query_as("SELECT depends_on_task_id FROM task_dependencies WHERE task_id = $1")
            .bind(task_id)
            .fetch_all(pool)
            .await
            .context("failed to get task dependencies")?;
    Ok(rows.into_iter().map(|(id,)| id).collect())
}

/// True if every dependency of `task_id` is in the `completed` state.
/// A task with no dependencies is trivially satisfied.
pub async fn dependencies_satisfied(pool: &PgPool, task_id: i64) -> Result<bool> {
    let row: (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM task_dependencies td \
         JOIN tasks dep ON dep.id = td.depends_on_task_id \
         WHERE td.task_id = $1 AND dep.state != 'completed'",
    )
    .bind(task_id)
    .fetch_one(pool)
    .await
    .context("failed to check task dependency satisfaction")?;
    Ok(row.0 == 0)
}

/// Claim the next claimable task whose dependencies are satisfied, locking the
/// row with `FOR UPDATE SKIP LOCKED` so concurrent workers never double-claim.
///
/// Mirrors the worker step described in the single-step run loop: scan
/// `queued`/`retrying` tasks whose `next_run_at` has passed, ordered oldest
/// first, skipping any row a concurrent worker already holds.
pub async fn claim_next_task(
    tx: &mut Transaction<'_, Postgres>,
    worker_id: &str,
    lease_seconds: i64,
) -> Result<Option<crate::models::Task>> {
    let candidate = sqlx::query_as::<_, crate::models::Task>(
        "SELECT t.* FROM tasks t \
         WHERE t.state = ANY($1) \
           AND NOT t.cancel_requested \
           AND (t.next_run_at IS NULL OR t.next_run_at <= now()) \
           AND NOT EXISTS ( \
               SELECT 1 FROM task_dependencies td \
               JOIN tasks dep ON dep.id = td.depends_on_task_id \
               WHERE td.task_id = t.id AND dep.state != 'completed' \
           ) \
         ORDER BY t.created_at ASC \
         FOR UPDATE OF t SKIP LOCKED \
         LIMIT 1",
    )
    .bind(&TaskState::CLAIMABLE[..])
    .fetch_optional(&mut **tx)
    .await
    .context("failed to scan for claimable task")?;

    let Some(task) = candidate else {
        return Ok(None);
    };

    let claimed = sqlx::query_as::<_, crate::models::Task>(
        "UPDATE tasks \
         SET state = 'running', \
             claimed_by = $2, \
             claimed_at = now(), \
             lease_expires_at = now() + make_interval(secs => $3), \
             started_at = now(), \
             attempt_count = attempt_count + 1 \
         WHERE id = $1 \
         RETURNING *",
    )
    .bind(task.id)
    .bind(worker_id)
    .bind(lease_seconds as f64)
    .fetch_one(&mut **tx)
    .await
    .context("failed to claim task")?;

    Ok(Some(claimed))
}

/// Select every `running` task, locking each row. The caller decides
/// staleness (timeout-elapsed or lease-expired) per row; a task whose lease
/// the in-process renewer keeps pushing forward must still be selected here
/// so its `timeout_seconds` can be enforced independently of lease freshness.
pub async fn select_stale_running_tasks(
    tx: &mut Transaction<'_, Postgres>,
    limit: i64,
) -> Result<Vec<crate::models::Task>> {
    sqlx::query_as::<_, crate::models::Task>(
        "SELECT * FROM tasks \
         WHERE state = 'running' \
         ORDER BY started_at ASC NULLS LAST \
         FOR UPDATE SKIP LOCKED \
         LIMIT $1",
    )
    .bind(limit)
    .fetch_all(&mut **tx)
    .await
    .context("failed to select stale running tasks")
}

/// Select tasks with `cancel_requested` that are still in a cancellable
/// state, locking each row so cancellation can be finalized exactly once.
pub async fn select_pending_cancellations(
    tx: &mut Transaction<'_, Postgres>,
    limit: i64,
) -> Result<Vec<crate::models::Task>> {
    sqlx::query_as::<_, crate::models::Task>(
        "SELECT * FROM tasks \
         WHERE cancel_requested AND state = ANY($1) \
         ORDER BY cancel_requested_at ASC \
         FOR UPDATE SKIP LOCKED \
         LIMIT $2",
    )
    .bind(&TaskState::CANCELLABLE_AT_CLAIM[..])
    .bind(limit)
    .fetch_all(&mut **tx)
    .await
    .context("failed to select pending cancellations")
}

pub async fn request_cancel(pool: &PgPool, task_id: i64) -> Result<()> {
    sqlx::query(
        "UPDATE tasks SET cancel_requested = true, cancel_requested_at = now() WHERE id = $1",
    )
    .bind(task_id)
    .execute(pool)
    .await
    .context("failed to request task cancellation")?;
    Ok(())
}

pub async fn finalize_cancelled(tx: &mut Transaction<'_, Postgres>, task_id: i64) -> Result<()> {
    sqlx::query(
        "UPDATE tasks SET state = 'cancelled', completed_at = now(), claimed_by = NULL, \
         lease_expires_at = NULL WHERE id = $1",
    )
    .bind(task_id)
    .execute(&mut **tx)
    .await
    .context("failed to finalize cancelled task")?;
    Ok(())
}

pub async fn finalize_completed(
    pool: &PgPool,
    task_id: i64,
    result_data: &Json,
) -> Result<()> {
    sqlx::query(
        "UPDATE tasks SET state = 'completed', result_data = $2, completed_at = now(), \
         claimed_by = NULL, lease_expires_at = NULL WHERE id = $1",
    )
    .bind(task_id)
    .bind(result_data)
    .execute(pool)
    .await
    .context("failed to finalize completed task")?;
    Ok(())
}

/// Finalize a failed attempt. `next_state` is either `retrying` (with a
/// computed `next_run_at`) or `dead_letter` (terminal, no further retries).
pub async fn finalize_failed(
    pool: &PgPool,
    task_id: i64,
    next_state: TaskState,
    error_message: &str,
    next_run_at: Option<DateTime<Utc>>,
) -> Result<()> {
    let completed_at = if next_state == TaskState::DeadLetter {
        Some(Utc::now())
    } else {
        None
    };
    sqlx::query(
        "UPDATE tasks SET state = $2, error_message = $3, next_run_at = $4, \
         completed_at = COALESCE(completed_at, $5), claimed_by = NULL, lease_expires_at = NULL \
         WHERE id = $1",
    )
    .bind(task_id)
    .bind(next_state)
    .bind(error_message)
    .bind(next_run_at)
    .bind(completed_at)
    .execute(pool)
    .await
    .context("failed to finalize failed task")?;
    Ok(())
}

/// Reset a stale/orphaned running task to `retrying` or `dead_letter` (bumping
/// `attempt_count`, as this represents a failed attempt) so it can be
/// reclaimed, per the lease-reaping step of the run loop.
pub async fn reap_stale_task(
    tx: &mut Transaction<'_, Postgres>,
    task_id: i64,
    next_state: TaskState,
    error_message: &str,
    next_run_at: Option<DateTime<Utc>>,
) -> Result<()> {
    let completed_at = if next_state == TaskState::DeadLetter {
        Some(Utc::now())
    } else {
        None
    };
    sqlx::query(
        "UPDATE tasks SET state = $2, attempt_count = attempt_count + 1, error_message = $3, \
         next_run_at = $4, completed_at = $5, claimed_by = NULL, lease_expires_at = NULL \
         WHERE id = $1",
    )
    .bind(task_id)
    .bind(next_state)
    .bind(error_message)
    .bind(next_run_at)
    .bind(completed_at)
    .execute(&mut **tx)
    .await
    .context("failed to reap stale task")?;
    Ok(())
}

/// Push every `queued`/`retrying`/`blocked` task of `ticket_id` to `paused`,
/// per the ticket pause operation.
pub async fn push_ticket_tasks_to_paused(pool: &PgPool, ticket_id: &str) -> Result<()> {
    sqlx::query(
        "UPDATE tasks SET state = 'paused', next_run_at = NULL \
         WHERE ticket_id = $1 AND state IN ('queued', 'retrying', 'blocked')",
    )
    .bind(ticket_id)
    .execute(pool)
    .await
    .context("failed to push ticket tasks to paused")?;
    Ok(())
}

/// Request cancellation on every `running` task of `ticket_id`, per the
/// ticket pause operation's cooperative-cancel side effect.
pub async fn request_cancel_for_running_ticket_tasks(pool: &PgPool, ticket_id: &str) -> Result<()> {
    sqlx::query(
        "UPDATE tasks SET cancel_requested = true, cancel_requested_at = now() \
         WHERE ticket_id = $1 AND state = 'running'",
    )
    .bind(ticket_id)
    .execute(pool)
    .await
    .context("failed to request cancel for running ticket tasks")?;
    Ok(())
}

/// Push every `paused` task of `ticket_id` back to `queued`, per ticket resume.
pub async fn unpause_ticket_tasks(pool: &PgPool, ticket_id: &str) -> Result<()> {
    sqlx::query(
        "UPDATE tasks SET state = 'queued', next_run_at = now() \
         WHERE ticket_id = $1 AND state = 'paused'",
    )
    .bind(ticket_id)
    .execute(pool)
    .await
    .context("failed to unpause ticket tasks")?;
    Ok(())
}

/// Push every `queued`/`retrying` task of `ticket_id` to `blocked`, per
/// approval request.
pub async fn block_ticket_tasks(pool: &PgPool, ticket_id: &str) -> Result<()> {
    sqlx::query(
        "UPDATE tasks SET state = 'blocked' \
         WHERE ticket_id = $1 AND state IN ('queued', 'retrying')",
    )
    .bind(ticket_id)
    .execute(pool)
    .await
    .context("failed to block ticket tasks")?;
    Ok(())
}

/// Push every `blocked` task of `ticket_id` back to `queued`, per approval.
pub async fn unblock_ticket_tasks(pool: &PgPool, ticket_id: &str) -> Result<()> {
    sqlx::query(
        "UPDATE tasks SET state = 'queued', next_run_at = now() \
         WHERE ticket_id = $1 AND state = 'blocked'",
    )
    .bind(ticket_id)
    .execute(pool)
    .await
    .context("failed to unblock ticket tasks")?;
    Ok(())
}

/// Like [`finalize_cancelled`] but for use outside an open transaction
/// (the worker's pre-execution gate and finalize step run standalone).
pub async fn finalize_cancelled_standalone(pool: &PgPool, task_id: i64) -> Result<()> {
    sqlx::query(
        "UPDATE tasks SET state = 'cancelled', completed_at = now(), claimed_by = NULL, \
         lease_expires_at = NULL WHERE id = $1",
    )
    .bind(task_id)
    .execute(pool)
    .await
    .context("failed to finalize cancelled task")?;
    Ok(())
}

/// Park a just-claimed task back to `paused` or `blocked` without counting
/// it as a failed attempt, per the worker's pre-execution gate.
pub async fn park_claimed_task(
    pool: &PgPool,
    task_id: i64,
    next_state: TaskState,
    next_run_at: Option<DateTime<Utc>>,
) -> Result<()> {
    sqlx::query(
        "UPDATE tasks SET state = $2, next_run_at = $3, claimed_by = NULL, \
         lease_expires_at = NULL WHERE id = $1",
    )
    .bind(task_id)
    .bind(next_state)
    .bind(next_run_at)
    .execute(pool)
    .await
    .context("failed to park claimed task")?;
    Ok(())
}

/// Extend a running task's lease, called periodically by the in-process
/// lease renewer while execution is in flight.
pub async fn renew_lease(pool: &PgPool, task_id: i64, lease_seconds: i64) -> Result<()> {
    sqlx::query(
        "UPDATE tasks SET lease_expires_at = now() + make_interval(secs => $2) \
         WHERE id = $1 AND state = 'running'",
    )
    .bind(task_id)
    .bind(lease_seconds as f64)
    .execute(pool)
    .await
    .context("failed to renew task lease")?;
    Ok(())
}

/// Apply a `defer` outcome: park as `retrying` without burning an attempt
/// (deferrals decrement `attempt_count` by one, clamped at zero, since the
/// claim step always increments it first).
pub async fn defer_task(pool: &PgPool, task_id: i64, next_run_at: DateTime<Utc>) -> Result<()> {
    sqlx::query(
        "UPDATE tasks SET state = 'retrying', attempt_count = GREATEST(attempt_count - 1, 0), \
         next_run_at = $2, claimed_by = NULL, lease_expires_at = NULL, completed_at = NULL \
         WHERE id = $1",
    )
    .bind(task_id)
    .bind(next_run_at)
    .execute(pool)
    .await
    .context("failed to defer task")?;
    Ok(())
}

pub async fn pause_task(pool: &PgPool, task_id: i64) -> Result<u64> {
    let result = sqlx::query("UPDATE tasks SET state = 'paused' WHERE id = $1 AND state = 'queued'")
        .bind(task_id)
        .execute(pool)
        .await
        .context("failed to pause task")?;
    Ok(result.rows_affected())
}

pub async fn unpause_task(pool: &PgPool, task_id: i64) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE tasks SET state = 'queued', next_run_at = now() WHERE id = $1 AND state = 'paused'",
    )
    .bind(task_id)
    .execute(pool)
    .await
    .context("failed to unpause task")?;
    Ok(result.rows_affected())
}

/// Status counts for a ticket's tasks.
#[derive(Debug, Clone, Default)]
pub struct TicketTaskProgress {
    pub queued: i64,
    pub running: i64,
    pub retrying: i64,
    pub paused: i64,
    pub blocked: i64,
    pub completed: i64,
    pub failed: i64,
    pub dead_letter: i64,
    pub cancelled: i64,
    pub total: i64,
}

pub async fn get_ticket_task_progress(pool: &PgPool, ticket_id: &str) -> Result<TicketTaskProgress> {
    let rows: Vec<(String, i64)> = sqlx::query_as(
        "SELECT state::text, COUNT(*) as cnt FROM tasks WHERE ticket_id = $1 GROUP BY state",
    )
    .bind(ticket_id)
    .fetch_all(pool)
    .await
    .context("failed to get ticket task progress")?;

    let mut progress = TicketTaskProgress::default();
    for (state, count) in &rows {
        match state.as_str() {
            "queued" => progress.queued = *count,
            "running" => progress.running = *count,
            "retrying" => progress.retrying = *count,
            "paused" => progress.paused = *count,
            "blocked" => progress.blocked = *count,
            "completed" => progress.completed = *count,
            "failed" => progress.failed = *count,
            "dead_letter" => progress.dead_letter = *count,
            "cancelled" => progress.cancelled = *count,
            _ => {}
        }
        progress.total += count;
    }
    Ok(progress)
}
