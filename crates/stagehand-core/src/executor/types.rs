//! The [`TaskExecutor`] contract and the outcome it returns.

use async_trait::async_trait;
use serde_json::Value as Json;
use sqlx::PgPool;
use stagehand_db::models::{Task, Ticket};

/// Outcome of one execution attempt.
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub success: bool,
    pub message: String,
    pub output: Json,
    pub defer: bool,
    pub defer_seconds: Option<i64>,
    pub terminal_failure: bool,
}

impl ExecutionResult {
    pub fn success(message: impl Into<String>, output: Json) -> Self {
        Self {
            success: true,
            message: message.into(),
            output,
            defer: false,
            defer_seconds: None,
            terminal_failure: false,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            output: Json::Object(Default::default()),
            defer: false,
            defer_seconds: None,
            terminal_failure: false,
        }
    }

    pub fn terminal_failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            output: Json::Object(Default::default()),
            defer: false,
            defer_seconds: None,
            terminal_failure: true,
        }
    }

    pub fn defer(message: impl Into<String>, defer_seconds: i64) -> Self {
        Self {
            success: false,
            message: message.into(),
            output: Json::Object(Default::default()),
            defer: true,
            defer_seconds: Some(defer_seconds),
            terminal_failure: false,
        }
    }
}

/// A cheap, side-effect-free handle an executor can poll to notice that it
/// should stop cooperatively: the owning task was cancelled, its ticket was
/// paused, or either row disappeared out from under it.
pub struct TaskControl {
    pool: PgPool,
    ticket_id: String,
    task_id: i64,
}

impl TaskControl {
    pub fn new(pool: PgPool, ticket_id: String, task_id: i64) -> Self {
        Self { pool, ticket_id, task_id }
    }

    /// Re-reads the task and ticket rows from a short-lived session and
    /// reports whether execution should stop. Safe to call repeatedly.
    pub async fn should_stop(&self) -> bool {
        let task = match stagehand_db::queries::tasks::get_task(&self.pool, self.task_id).await {
            Ok(Some(t)) => t,
            _ => return true,
        };
        if task.cancel_requested {
            return true;
        }
        let ticket = match stagehand_db::queries::tickets::get_ticket(&self.pool, &self.ticket_id).await {
            Ok(Some(t)) => t,
            _ => return true,
        };
        if ticket.paused {
            return true;
        }
        ticket.approval_required && ticket.approval_status == stagehand_db::models::ApprovalStatus::Pending
    }
}

/// Dispatch target for a task's `task_key`. Implementors run one execution
/// attempt and report its outcome; they never retry or finalize themselves.
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    /// Human-readable name this executor is registered under.
    fn name(&self) -> &str;

    /// Run one attempt.
    async fn execute(&self, ticket: &Ticket, task: &Task) -> ExecutionResult;

    /// Like [`Self::execute`] but given a [`TaskControl`] for cooperative
    /// cancellation checks. Defaults to ignoring `control` entirely.
    async fn execute_with_control(
        &self,
        ticket: &Ticket,
        task: &Task,
        _control: &TaskControl,
    ) -> ExecutionResult {
        self.execute(ticket, task).await
    }
}
