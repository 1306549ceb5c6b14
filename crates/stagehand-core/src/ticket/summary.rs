//! Read-only ticket projection used by the CLI and tests.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use stagehand_db::models::{ApprovalStatus, Ticket, TicketStatus};

/// A read-only ticket projection, computed on read rather than persisted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TicketSummary {
    pub ticket_id: String,
    pub title: Option<String>,
    pub workflow_key: String,
    pub stage: String,
    pub status: TicketStatus,
    pub approval_status: ApprovalStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub task_count: i64,
    pub completed_task_count: i64,
    pub log_count: i64,
}

pub fn summarize(ticket: &Ticket, task_count: i64, completed_task_count: i64, log_count: i64) -> TicketSummary {
    TicketSummary {
        ticket_id: ticket.ticket_id.clone(),
        title: ticket.title.clone(),
        workflow_key: ticket.workflow_key.clone(),
        stage: ticket.stage.clone(),
        status: ticket.status,
        approval_status: ticket.approval_status,
        created_at: ticket.created_at,
        updated_at: ticket.updated_at,
        completed_at: ticket.completed_at,
        task_count,
        completed_task_count,
        log_count,
    }
}
