//! Database query functions for the `ticket_events` inbox table.

use anyhow::{Context, Result};
use serde_json::Value as Json;
use sqlx::{PgPool, Postgres, Transaction};

use crate::models::TicketEvent;

pub async fn publish_event(
    pool: &PgPool,
    ticket_id: &str,
    event_type: &str,
    payload: &Json,
) -> Result<TicketEvent> {
    sqlx::query_as::<_, TicketEvent>(
        "INSERT INTO ticket_events (ticket_id, event_type, payload) VALUES ($1, $2, $3) \
         RETURNING *",
    )
    .bind(ticket_id)
    .bind(event_type)
    .bind(payload)
    .fetch_one(pool)
    .await
    .context("failed to publish ticket event")
}

pub async fn list_events(pool: &PgPool, ticket_id: &str, limit: i64) -> Result<Vec<TicketEvent>> {
    sqlx::query_as::<_, TicketEvent>(
        "SELECT * FROM ticket_events WHERE ticket_id = $1 ORDER BY created_at DESC LIMIT $2",
    )
    .bind(ticket_id)
    .bind(limit)
    .fetch_all(pool)
    .await
    .context("failed to list ticket events")
}

/// Claim the oldest unconsumed event of `event_type` for `ticket_id`,
/// locking the row so at-most-once consumption holds under concurrency.
pub async fn claim_next_unconsumed_event(
    tx: &mut Transaction<'_, Postgres>,
    ticket_id: &str,
    event_type: &str,
) -> Result<Option<TicketEvent>> {
    sqlx::query_as::<_, TicketEvent>(
        "SELECT * FROM ticket_events \
         WHERE ticket_id = $1 AND event_type = $2 AND consumed_at IS NULL \
         ORDER BY created_at ASC \
         FOR UPDATE SKIP LOCKED \
         LIMIT 1",
    )
    .bind(ticket_id)
    .bind(event_type)
    .fetch_optional(&mut **tx)
    .await
    .context("failed to claim unconsumed event")
}

pub async fn mark_event_consumed(
    tx: &mut Transaction<'_, Postgres>,
    event_id: i64,
    consumed_by_task_id: i64,
) -> Result<()> {
    sqlx::query(
        "UPDATE ticket_events SET consumed_at = now(), consumed_by_task_id = $2 WHERE id = $1",
    )
    .bind(event_id)
    .bind(consumed_by_task_id)
    .execute(&mut **tx)
    .await
    .context("failed to mark event consumed")?;
    Ok(())
}
