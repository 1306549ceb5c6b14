//! The ticket state policy: a pure function from a ticket and its tasks to
//! the ticket's derived `(stage, status, completed_at)`.

use chrono::{DateTime, Utc};
use stagehand_db::models::{ApprovalStatus, Task, TaskState, Ticket, TicketStatus};

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedTicketState {
    pub stage: String,
    pub status: TicketStatus,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Resolve a ticket's outward state from its current row and its tasks, per
/// the precedence order: paused, then approval-pending, then
/// approval-rejected, then empty-tasks, then any-failed, then all-completed,
/// else running.
pub fn resolve(ticket: &Ticket, tasks: &[Task]) -> ResolvedTicketState {
    if ticket.paused {
        return ResolvedTicketState {
            stage: ticket.stage.clone(),
            status: TicketStatus::Paused,
            completed_at: ticket.completed_at,
        };
    }

    if ticket.approval_required && ticket.approval_status == ApprovalStatus::Pending {
        return ResolvedTicketState {
            stage: "pending_approval".to_owned(),
            status: TicketStatus::WaitingApproval,
            completed_at: None,
        };
    }

    if ticket.approval_required && ticket.approval_status == ApprovalStatus::Rejected {
        return ResolvedTicketState {
            stage: "review".to_owned(),
            status: TicketStatus::Attention,
            completed_at: None,
        };
    }

    if tasks.is_empty() {
        return ResolvedTicketState {
            stage: "queued".to_owned(),
            status: TicketStatus::Active,
            completed_at: None,
        };
    }

    if tasks
        .iter()
        .any(|t| matches!(t.state, TaskState::Failed | TaskState::DeadLetter))
    {
        return ResolvedTicketState {
            stage: "review".to_owned(),
            status: TicketStatus::Attention,
            completed_at: None,
        };
    }

    if tasks.iter().all(|t| t.state == TaskState::Completed) {
        return ResolvedTicketState {
            stage: "finished".to_owned(),
            status: TicketStatus::Completed,
            completed_at: Some(Utc::now()),
        };
    }

    ResolvedTicketState {
        stage: "running".to_owned(),
        status: TicketStatus::Active,
        completed_at: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value as Json;

    fn base_ticket() -> Ticket {
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

    fn base_task(state: TaskState) -> Task {
        Task {
            id: 1,
            ticket_id: "tkt-0000000000".into(),
            task_key: "noop".into(),
            state,
            payload: Json::Object(Default::default()),
            result_data: Json::Object(Default::default()),
            error_message: None,
            cancel_requested: false,
            cancel_requested_at: None,
            attempt_count: 0,
            max_attempts: 3,
            retry_base_seconds: None,
            retry_max_seconds: None,
            timeout_seconds: None,
            next_run_at: None,
            claimed_by: None,
            claimed_at: None,
            lease_expires_at: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    #[test]
    fn paused_wins_over_everything() {
        let mut ticket = base_ticket();
        ticket.paused = true;
        ticket.approval_status = ApprovalStatus::Pending;
        ticket.approval_required = true;
        let resolved = resolve(&ticket, &[base_task(TaskState::Failed)]);
        assert_eq!(resolved.status, TicketStatus::Paused);
        assert_eq!(resolved.stage, "running");
    }

    #[test]
    fn approval_pending_precedes_rejected_and_failures() {
        let mut ticket = base_ticket();
        ticket.approval_required = true;
        ticket.approval_status = ApprovalStatus::Pending;
        let resolved = resolve(&ticket, &[base_task(TaskState::Failed)]);
        assert_eq!(resolved.status, TicketStatus::WaitingApproval);
        assert_eq!(resolved.stage, "pending_approval");
    }

    #[test]
    fn approval_rejected() {
        let mut ticket = base_ticket();
        ticket.approval_required = true;
        ticket.approval_status = ApprovalStatus::Rejected;
        let resolved = resolve(&ticket, &[]);
        assert_eq!(resolved.status, TicketStatus::Attention);
        assert_eq!(resolved.stage, "review");
    }

    #[test]
    fn empty_tasks_is_queued_active() {
        let ticket = base_ticket();
        let resolved = resolve(&ticket, &[]);
        assert_eq!(resolved.status, TicketStatus::Active);
        assert_eq!(resolved.stage, "queued");
    }

    #[test]
    fn any_failed_or_dead_letter_is_attention() {
        let ticket = base_ticket();
        let resolved = resolve(
            &ticket,
            &[base_task(TaskState::Completed), base_task(TaskState::DeadLetter)],
        );
        assert_eq!(resolved.status, TicketStatus::Attention);
        assert_eq!(resolved.stage, "review");
    }

    #[test]
    fn all_completed_is_finished() {
        let ticket = base_ticket();
        let resolved = resolve(
            &ticket,
            &[base_task(TaskState::Completed), base_task(TaskState::Completed)],
        );
        assert_eq!(resolved.status, TicketStatus::Completed);
        assert_eq!(resolved.stage, "finished");
        assert!(resolved.completed_at.is_some());
    }

    #[test]
    fn mixed_in_flight_is_running() {
        let ticket = base_ticket();
        let resolved = resolve(
            &ticket,
            &[base_task(TaskState::Completed), base_task(TaskState::Queued)],
        );
        assert_eq!(resolved.status, TicketStatus::Active);
        assert_eq!(resolved.stage, "running");
    }
}
