//! The `wait_for_event` executor: the gate tasks use to block on an
//! externally published [`stagehand_db::models::TicketEvent`].

use async_trait::async_trait;
use chrono::{Duration, Utc};
use sqlx::PgPool;
use stagehand_db::models::{Task, Ticket};
use stagehand_db::queries::events;

use super::types::{ExecutionResult, TaskExecutor};

pub struct WaitForEventExecutor {
    pool: PgPool,
    default_poll_interval_seconds: i64,
}

impl WaitForEventExecutor {
    pub fn new(pool: PgPool, default_poll_interval_seconds: i64) -> Self {
        Self {
            pool,
            default_poll_interval_seconds,
        }
    }
}

#[async_trait]
impl TaskExecutor for WaitForEventExecutor {
    fn name(&self) -> &str {
        "wait_for_event"
    }

    async fn execute(&self, ticket: &Ticket, task: &Task) -> ExecutionResult {
        let Some(event_type) = task.payload.get("event_type").and_then(|v| v.as_str()) else {
            return ExecutionResult::terminal_failure("wait_for_event requires payload.event_type");
        };

        let consume = task
            .payload
            .get("consume")
            .and_then(|v| v.as_bool())
            .unwrap_or(true);

        let mut tx = match self.pool.begin().await {
            Ok(tx) => tx,
            Err(e) => return ExecutionResult::failure(format!("failed to open transaction: {e}")),
        };

        let found = match events::claim_next_unconsumed_event(&mut tx, &ticket.ticket_id, event_type).await {
            Ok(found) => found,
            Err(e) => return ExecutionResult::failure(format!("failed to scan for event: {e}")),
        };

        if let Some(event) = found {
            if consume {
                if let Err(e) = events::mark_event_consumed(&mut tx, event.id, task.id).await {
                    return ExecutionResult::failure(format!("failed to mark event consumed: {e}"));
                }
                if let Err(e) = tx.commit().await {
                    return ExecutionResult::failure(format!("failed to commit event consumption: {e}"));
                }
            } else if let Err(e) = tx.rollback().await {
                return ExecutionResult::failure(format!("failed to roll back transaction: {e}"));
            }
            return ExecutionResult::success(format!("observed event {event_type:?}"), event.payload);
        }

        drop(tx);

        if let Some(timeout_seconds) = task.timeout_seconds {
            let deadline = task.created_at + Duration::seconds(timeout_seconds as i64);
            if Utc::now() >= deadline {
                return ExecutionResult::terminal_failure(format!(
                    "no event {event_type:?} observed within {timeout_seconds}s"
                ));
            }
        }

        let poll_interval = task
            .payload
            .get("poll_interval_seconds")
            .and_then(|v| v.as_i64())
            .unwrap_or(self.default_poll_interval_seconds);

        ExecutionResult::defer(format!("waiting for event {event_type:?}"), poll_interval)
    }
}
