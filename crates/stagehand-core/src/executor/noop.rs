//! The `noop` executor: always succeeds with an empty output bag.
//!
//! Used throughout the ticket-lifecycle scenarios where the point of the
//! task is just to exist, not to do anything.

use async_trait::async_trait;
use serde_json::Value as Json;
use stagehand_db::models::{Task, Ticket};

use super::types::{ExecutionResult, TaskExecutor};

pub struct NoopExecutor;

#[async_trait]
impl TaskExecutor for NoopExecutor {
    fn name(&self) -> &str {
        "noop"
    }

    async fn execute(&self, _ticket: &Ticket, _task: &Task) -> ExecutionResult {
        ExecutionResult::success("noop", Json::Object(Default::default()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use stagehand_db::models::{ApprovalStatus, TaskState, TicketStatus};

    fn ticket() -> Ticket {
        Ticket {
            ticket_id: "tkt-0000000000".into(),
            title: None,
            workflow_key: "default_ticket".into(),
            workflow_version: None,
            workflow_input: Json::Object(Default::default()),
            context_data: Json::Object(Default::default()),
            stage: "running".into(),
            status: TicketStatus::Active,
            paused: false,
            paused_at: None,
            resumed_at: None,
            approval_required: false,
            approval_status: ApprovalStatus::None,
            approval_requested_at: None,
            approval_decided_at: None,
            approval_notes: None,
            source_type: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            completed_at: None,
        }
    }

    fn task() -> Task {
        Task {
            id: 1,
            ticket_id: "tkt-0000000000".into(),
            task_key: "noop".into(),
            state: TaskState::Running,
            payload: Json::Object(Default::default()),
            result_data: Json::Object(Default::default()),
            error_message: None,
            cancel_requested: false,
            cancel_requested_at: None,
            attempt_count: 1,
            max_attempts: 3,
            retry_base_seconds: None,
            retry_max_seconds: None,
            timeout_seconds: None,
            next_run_at: None,
            claimed_by: Some("worker-1".into()),
            claimed_at: Some(Utc::now()),
            lease_expires_at: Some(Utc::now()),
            created_at: Utc::now(),
            started_at: Some(Utc::now()),
            completed_at: None,
        }
    }

    #[tokio::test]
    async fn always_succeeds_with_empty_output() {
        let result = NoopExecutor.execute(&ticket(), &task()).await;
        assert!(result.success);
        assert_eq!(result.output, Json::Object(Default::default()));
        assert!(!result.defer);
        assert!(!result.terminal_failure);
    }
}
