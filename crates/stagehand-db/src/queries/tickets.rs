//! Database query functions for the `tickets` table.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde_json::Value as Json;
use sqlx::{Executor, PgPool, Postgres};

use crate::models::{ApprovalStatus, Ticket, TicketStatus};

/// Insert a new ticket row. `stage`/`status`/`approval_status` are supplied
/// by the caller (the ticket service derives them); this is a thin insert.
#[allow(clippy::too_many_arguments)]
pub async fn insert_ticket(
    pool: &PgPool,
    ticket_id: &str,
    title: Option<&str>,
    workflow_key: &str,
    workflow_version: Option<&str>,
    workflow_input: &Json,
    context_data: &Json,
    stage: &str,
    source_type: Option<&str>,
) -> Result<Ticket> {
    sqlx::query_as::<_, Ticket>(
        "INSERT INTO tickets \
           (ticket_id, title, workflow_key, workflow_version, workflow_input, \
            context_data, stage, status, approval_required, approval_status, source_type) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, 'active', false, 'none', $8) \
         RETURNING *",
    )
    .bind(ticket_id)
    .bind(title)
    .bind(workflow_key)
    .bind(workflow_version)
    .bind(workflow_input)
    .bind(context_data)
    .bind(stage)
    .bind(source_type)
    .fetch_one(pool)
    .await
    .context("failed to insert ticket")
}

pub async fn get_ticket<'e, E>(executor: E, ticket_id: &str) -> Result<Option<Ticket>>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query_as::<_, Ticket>("SELECT * FROM tickets WHERE ticket_id = $1")
        .bind(ticket_id)
        .fetch_optional(executor)
        .await
        .context("failed to fetch ticket")
}

/// Fetch a ticket row locked `FOR UPDATE`. Must be called within a transaction.
pub async fn get_ticket_for_update(
    tx: &mut sqlx::Transaction<'_, Postgres>,
    ticket_id: &str,
) -> Result<Option<Ticket>> {
    sqlx::query_as::<_, Ticket>("SELECT * FROM tickets WHERE ticket_id = $1 FOR UPDATE")
        .bind(ticket_id)
        .fetch_optional(&mut **tx)
        .await
        .context("failed to fetch ticket for update")
}

pub async fn list_tickets(pool: &PgPool, limit: i64) -> Result<Vec<Ticket>> {
    sqlx::query_as::<_, Ticket>("SELECT * FROM tickets ORDER BY created_at DESC LIMIT $1")
        .bind(limit)
        .fetch_all(pool)
        .await
        .context("failed to list tickets")
}

/// Apply the ticket state policy's resolved `(stage, status, completed_at)`.
/// Used by every worker step that may have changed a ticket's derived state.
pub async fn sync_ticket_state<'e, E>(
    executor: E,
    ticket_id: &str,
    stage: &str,
    status: TicketStatus,
    completed_at: Option<DateTime<Utc>>,
) -> Result<()>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query(
        "UPDATE tickets SET stage = $2, status = $3, completed_at = $4, updated_at = now() \
         WHERE ticket_id = $1",
    )
    .bind(ticket_id)
    .bind(stage)
    .bind(status)
    .bind(completed_at)
    .execute(executor)
    .await
    .context("failed to sync ticket state")?;
    Ok(())
}

/// `create_task`'s side effect on the owning ticket (§4.4): set stage/status
/// according to the newly-created task's initial state, without touching
/// approval/pause fields.
pub async fn set_stage_and_status(
    pool: &PgPool,
    ticket_id: &str,
    stage: &str,
    status: TicketStatus,
) -> Result<()> {
    sqlx::query(
        "UPDATE tickets SET stage = $2, status = $3, updated_at = now() WHERE ticket_id = $1",
    )
    .bind(ticket_id)
    .bind(stage)
    .bind(status)
    .execute(pool)
    .await
    .context("failed to update ticket stage/status")?;
    Ok(())
}

pub async fn pause_ticket_row(pool: &PgPool, ticket_id: &str) -> Result<()> {
    sqlx::query(
        "UPDATE tickets SET paused = true, paused_at = now(), status = 'paused', updated_at = now() \
         WHERE ticket_id = $1",
    )
    .bind(ticket_id)
    .execute(pool)
    .await
    .context("failed to pause ticket")?;
    Ok(())
}

pub async fn resume_ticket_row(pool: &PgPool, ticket_id: &str, stage: &str, status: TicketStatus) -> Result<()> {
    sqlx::query(
        "UPDATE tickets SET paused = false, resumed_at = now(), stage = $2, status = $3, updated_at = now() \
         WHERE ticket_id = $1",
    )
    .bind(ticket_id)
    .bind(stage)
    .bind(status)
    .execute(pool)
    .await
    .context("failed to resume ticket")?;
    Ok(())
}

pub async fn request_approval_row(pool: &PgPool, ticket_id: &str, notes: Option<&str>) -> Result<()> {
    sqlx::query(
        "UPDATE tickets SET approval_required = true, approval_status = 'pending', \
         approval_requested_at = COALESCE(approval_requested_at, now()), approval_decided_at = NULL, \
         approval_notes = $2, stage = 'pending_approval', status = 'waiting_approval', updated_at = now() \
         WHERE ticket_id = $1",
    )
    .bind(ticket_id)
    .bind(notes)
    .execute(pool)
    .await
    .context("failed to request approval")?;
    Ok(())
}

pub async fn approve_ticket_row(
    pool: &PgPool,
    ticket_id: &str,
    stage: &str,
    status: TicketStatus,
    notes: Option<&str>,
) -> Result<()> {
    sqlx::query(
        "UPDATE tickets SET approval_required = true, approval_status = 'approved', \
         approval_decided_at = now(), approval_notes = $4, stage = $2, status = $3, updated_at = now() \
         WHERE ticket_id = $1",
    )
    .bind(ticket_id)
    .bind(stage)
    .bind(status)
    .bind(notes)
    .execute(pool)
    .await
    .context("failed to approve ticket")?;
    Ok(())
}

pub async fn reject_ticket_row(pool: &PgPool, ticket_id: &str, notes: Option<&str>) -> Result<()> {
    sqlx::query(
        "UPDATE tickets SET approval_required = true, approval_status = 'rejected', \
         approval_decided_at = now(), approval_notes = $2, stage = 'review', status = 'attention', \
         updated_at = now() WHERE ticket_id = $1",
    )
    .bind(ticket_id)
    .bind(notes)
    .execute(pool)
    .await
    .context("failed to reject ticket")?;
    Ok(())
}

pub async fn transition_ticket_row(
    pool: &PgPool,
    ticket_id: &str,
    stage: &str,
    status: TicketStatus,
    approval_required: bool,
    approval_status: ApprovalStatus,
    completed_at: Option<DateTime<Utc>>,
) -> Result<()> {
    sqlx::query(
        "UPDATE tickets SET stage = $2, status = $3, approval_required = $4, approval_status = $5, \
         completed_at = COALESCE(completed_at, $6), updated_at = now() WHERE ticket_id = $1",
    )
    .bind(ticket_id)
    .bind(stage)
    .bind(status)
    .bind(approval_required)
    .bind(approval_status)
    .bind(completed_at)
    .execute(pool)
    .await
    .context("failed to apply ticket transition")?;
    Ok(())
}
