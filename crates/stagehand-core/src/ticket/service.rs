//! Ticket creation, lifecycle transitions, and stage-graph walking.

use serde_json::Value as Json;
use sqlx::PgPool;
use uuid::Uuid;

use stagehand_db::models::{ApprovalStatus, Task, TaskState, Ticket, TicketStatus};
use stagehand_db::queries::{events, tasks, tickets};

use crate::error::ServiceError;
use crate::state_policy;
use crate::workflow::{evaluate_guard, GuardContext, WorkflowLoader};

fn new_ticket_id() -> String {
    let raw = Uuid::new_v4().simple().to_string();
    format!("tkt-{}", &raw[..10])
}

async fn fetch_ticket(pool: &PgPool, ticket_id: &str) -> Result<Ticket, ServiceError> {
    tickets::get_ticket(pool, ticket_id)
        .await
        .map_err(|e| ServiceError::Database(into_sqlx(e)))?
        .ok_or_else(|| ServiceError::NotFound(format!("ticket {ticket_id:?}")))
}

/// `anyhow::Error` wrapping a `sqlx::Error` down-casts cleanly since the
/// query layer always builds its errors with `.context()` over one.
fn into_sqlx(err: anyhow::Error) -> sqlx::Error {
    match err.downcast::<sqlx::Error>() {
        Ok(e) => e,
        Err(e) => sqlx::Error::Protocol(e.to_string()),
    }
}

/// Create a new ticket bound to `workflow_key`. Fails with [`ServiceError::NotFound`]
/// if the workflow is not registered in `loader`.
pub async fn create_ticket(
    pool: &PgPool,
    loader: &WorkflowLoader,
    workflow_key: &str,
    title: Option<&str>,
    workflow_version: Option<&str>,
    workflow_input: &Json,
    context_data: &Json,
    source_type: Option<&str>,
) -> Result<Ticket, ServiceError> {
    let workflow = loader
        .get(workflow_key)
        .map_err(|e| ServiceError::NotFound(e.to_string()))?;

    let ticket_id = new_ticket_id();
    let ticket = tickets::insert_ticket(
        pool,
        &ticket_id,
        title,
        workflow_key,
        workflow_version,
        workflow_input,
        context_data,
        &workflow.initial_stage,
        source_type,
    )
    .await
    .map_err(|e| ServiceError::Database(into_sqlx(e)))?;

    Ok(ticket)
}

/// Create a task under `ticket_id`. The task's initial state is derived from
/// the ticket's current pause/approval state, and the ticket's stage/status
/// are updated to reflect that the ticket now has work.
#[allow(clippy::too_many_arguments)]
pub async fn create_task(
    pool: &PgPool,
    ticket_id: &str,
    task_key: &str,
    payload: &Json,
    depends_on_task_ids: &[i64],
    max_attempts: i32,
    retry_base_seconds: Option<i32>,
    retry_max_seconds: Option<i32>,
    timeout_seconds: Option<i32>,
) -> Result<Task, ServiceError> {
    let ticket = fetch_ticket(pool, ticket_id).await?;

    let initial_state = if ticket.paused {
        TaskState::Paused
    } else if ticket.approval_required && ticket.approval_status == ApprovalStatus::Pending {
        TaskState::Blocked
    } else {
        TaskState::Queued
    };

    let task = tasks::insert_task(
        pool,
        ticket_id,
        task_key,
        initial_state,
        payload,
        max_attempts,
        retry_base_seconds,
        retry_max_seconds,
        timeout_seconds,
    )
    .await
    .map_err(|e| ServiceError::Database(into_sqlx(e)))?;

    for dep_id in depends_on_task_ids {
        if *dep_id > 0 {
            tasks::insert_task_dependency(pool, task.id, *dep_id)
                .await
                .map_err(|e| ServiceError::Database(into_sqlx(e)))?;
        }
    }

    match initial_state {
        TaskState::Blocked => {
            tickets::set_stage_and_status(pool, ticket_id, "pending_approval", TicketStatus::WaitingApproval)
                .await
                .map_err(|e| ServiceError::Database(into_sqlx(e)))?;
        }
        TaskState::Paused => {
            tickets::set_stage_and_status(pool, ticket_id, &ticket.stage, TicketStatus::Paused)
                .await
                .map_err(|e| ServiceError::Database(into_sqlx(e)))?;
        }
        _ => {
            tickets::set_stage_and_status(pool, ticket_id, "running", TicketStatus::Active)
                .await
                .map_err(|e| ServiceError::Database(into_sqlx(e)))?;
        }
    }

    Ok(task)
}

/// Pause a ticket: parks queued/retrying/blocked tasks, cooperatively
/// cancels any running task.
pub async fn pause_ticket(pool: &PgPool, ticket_id: &str) -> Result<(), ServiceError> {
    fetch_ticket(pool, ticket_id).await?;

    tickets::pause_ticket_row(pool, ticket_id)
        .await
        .map_err(|e| ServiceError::Database(into_sqlx(e)))?;
    tasks::push_ticket_tasks_to_paused(pool, ticket_id)
        .await
        .map_err(|e| ServiceError::Database(into_sqlx(e)))?;
    tasks::request_cancel_for_running_ticket_tasks(pool, ticket_id)
        .await
        .map_err(|e| ServiceError::Database(into_sqlx(e)))?;
    Ok(())
}

/// Resume a paused ticket. If approval is still pending, tasks stay `blocked`
/// and the ticket returns to `pending_approval`/`waiting_approval`; otherwise
/// every `paused` task is requeued and the ticket becomes `active`.
pub async fn resume_ticket(pool: &PgPool, ticket_id: &str) -> Result<(), ServiceError> {
    let ticket = fetch_ticket(pool, ticket_id).await?;

    let approval_pending = ticket.approval_required && ticket.approval_status == ApprovalStatus::Pending;
    let (stage, status): (&str, TicketStatus) = if approval_pending {
        ("pending_approval", TicketStatus::WaitingApproval)
    } else {
        (ticket.stage.as_str(), TicketStatus::Active)
    };

    tickets::resume_ticket_row(pool, ticket_id, stage, status)
        .await
        .map_err(|e| ServiceError::Database(into_sqlx(e)))?;

    if !approval_pending {
        tasks::unpause_ticket_tasks(pool, ticket_id)
            .await
            .map_err(|e| ServiceError::Database(into_sqlx(e)))?;
    }
    Ok(())
}

/// Request human approval: blocks queued/retrying tasks and parks the
/// ticket at the `pending_approval` stage.
pub async fn request_approval(pool: &PgPool, ticket_id: &str, notes: Option<&str>) -> Result<(), ServiceError> {
    fetch_ticket(pool, ticket_id).await?;

    tickets::request_approval_row(pool, ticket_id, notes)
        .await
        .map_err(|e| ServiceError::Database(into_sqlx(e)))?;
    tasks::block_ticket_tasks(pool, ticket_id)
        .await
        .map_err(|e| ServiceError::Database(into_sqlx(e)))?;
    Ok(())
}

/// Approve a pending ticket: unblocks tasks and resumes the stage the
/// approval request interrupted (unless the ticket is also paused).
pub async fn approve_ticket(pool: &PgPool, ticket_id: &str, notes: Option<&str>) -> Result<(), ServiceError> {
    let ticket = fetch_ticket(pool, ticket_id).await?;

    let stage = if ticket.stage == "pending_approval" {
        "running"
    } else {
        ticket.stage.as_str()
    };
    let status = if ticket.paused {
        TicketStatus::Paused
    } else {
        TicketStatus::Active
    };

    tickets::approve_ticket_row(pool, ticket_id, stage, status, notes)
        .await
        .map_err(|e| ServiceError::Database(into_sqlx(e)))?;

    if !ticket.paused {
        tasks::unblock_ticket_tasks(pool, ticket_id)
            .await
            .map_err(|e| ServiceError::Database(into_sqlx(e)))?;
    }
    Ok(())
}

/// Reject a pending ticket. Tasks are left `blocked`; operators decide
/// whether to cancel them or re-request approval.
pub async fn reject_ticket(pool: &PgPool, ticket_id: &str, notes: Option<&str>) -> Result<(), ServiceError> {
    fetch_ticket(pool, ticket_id).await?;

    tickets::reject_ticket_row(pool, ticket_id, notes)
        .await
        .map_err(|e| ServiceError::Database(into_sqlx(e)))?;
    Ok(())
}

/// Walk the ticket's current stage transitions in order, applying the first
/// whose target matches `target_stage` (if given) and whose guard evaluates
/// true. Fails with [`ServiceError::InvalidTransition`] if none match.
pub async fn transition_ticket(
    pool: &PgPool,
    loader: &WorkflowLoader,
    ticket_id: &str,
    target_stage: Option<&str>,
    transition_context: &Json,
) -> Result<Ticket, ServiceError> {
    let ticket = fetch_ticket(pool, ticket_id).await?;
    let workflow = loader
        .get(&ticket.workflow_key)
        .map_err(|e| ServiceError::NotFound(e.to_string()))?;
    let stage = workflow.stage(&ticket.stage).ok_or_else(|| {
        ServiceError::InvalidTransition(format!(
            "ticket {ticket_id:?} is at unknown stage {:?}",
            ticket.stage
        ))
    })?;

    let ticket_json = serde_json::to_value(&ticket).unwrap_or(Json::Null);
    let ctx = GuardContext {
        ticket: &ticket_json,
        workflow_input: &ticket.workflow_input,
        transition_context,
    };

    let chosen = stage.transitions.iter().find(|t| {
        let target_matches = target_stage.is_none_or(|target| target == t.target);
        if !target_matches {
            return false;
        }
        match &t.when {
            Some(expr) => evaluate_guard(expr, &ctx),
            None => true,
        }
    });

    let Some(chosen) = chosen else {
        return Err(ServiceError::InvalidTransition(format!(
            "no transition from stage {:?} matches target {:?}",
            ticket.stage, target_stage
        )));
    };

    let (new_stage, new_status, approval_required, approval_status, completed_at) =
        if chosen.target == crate::workflow::types::FINISHED {
            ("finished".to_owned(), TicketStatus::Completed, ticket.approval_required, ticket.approval_status, Some(chrono::Utc::now()))
        } else if chosen.target == "pending_approval" {
            (
                "pending_approval".to_owned(),
                TicketStatus::WaitingApproval,
                true,
                ApprovalStatus::Pending,
                None,
            )
        } else {
            let status = if ticket.paused { TicketStatus::Paused } else { TicketStatus::Active };
            (chosen.target.clone(), status, ticket.approval_required, ticket.approval_status, None)
        };

    tickets::transition_ticket_row(
        pool,
        ticket_id,
        &new_stage,
        new_status,
        approval_required,
        approval_status,
        completed_at,
    )
    .await
    .map_err(|e| ServiceError::Database(into_sqlx(e)))?;

    fetch_ticket(pool, ticket_id).await
}

/// Publish an event to a ticket's inbox.
pub async fn publish_event(
    pool: &PgPool,
    ticket_id: &str,
    event_type: &str,
    payload: &Json,
) -> Result<stagehand_db::models::TicketEvent, ServiceError> {
    fetch_ticket(pool, ticket_id).await?;
    events::publish_event(pool, ticket_id, event_type, payload)
        .await
        .map_err(|e| ServiceError::Database(into_sqlx(e)))
}

/// List a ticket's events, most recent first.
pub async fn get_ticket_events(
    pool: &PgPool,
    ticket_id: &str,
    limit: i64,
) -> Result<Vec<stagehand_db::models::TicketEvent>, ServiceError> {
    events::list_events(pool, ticket_id, limit)
        .await
        .map_err(|e| ServiceError::Database(into_sqlx(e)))
}

/// Recompute and persist a ticket's derived `(stage, status, completed_at)`
/// from its current tasks. Called by the worker after any task terminates.
pub async fn sync_ticket_state(pool: &PgPool, ticket_id: &str) -> Result<(), ServiceError> {
    let ticket = fetch_ticket(pool, ticket_id).await?;
    let ticket_tasks = tasks::list_tasks_for_ticket(pool, ticket_id)
        .await
        .map_err(|e| ServiceError::Database(into_sqlx(e)))?;
    let resolved = state_policy::resolve(&ticket, &ticket_tasks);
    tickets::sync_ticket_state(pool, ticket_id, &resolved.stage, resolved.status, resolved.completed_at)
        .await
        .map_err(|e| ServiceError::Database(into_sqlx(e)))?;
    Ok(())
}

/// Build a read-only [`crate::ticket::summary::TicketSummary`] for a ticket.
pub async fn get_ticket_summary(
    pool: &PgPool,
    ticket_id: &str,
) -> Result<crate::ticket::summary::TicketSummary, ServiceError> {
    let ticket = fetch_ticket(pool, ticket_id).await?;
    let progress = tasks::get_ticket_task_progress(pool, ticket_id)
        .await
        .map_err(|e| ServiceError::Database(into_sqlx(e)))?;
    let logs = stagehand_db::queries::logs::count_logs_for_ticket(pool, ticket_id)
        .await
        .map_err(|e| ServiceError::Database(into_sqlx(e)))?;
    Ok(crate::ticket::summary::summarize(
        &ticket,
        progress.total,
        progress.completed,
        logs,
    ))
}

/// List summaries for the most recently created tickets.
pub async fn list_ticket_summaries(
    pool: &PgPool,
    limit: i64,
) -> Result<Vec<crate::ticket::summary::TicketSummary>, ServiceError> {
    let listed = tickets::list_tickets(pool, limit)
        .await
        .map_err(|e| ServiceError::Database(into_sqlx(e)))?;
    let mut summaries = Vec::with_capacity(listed.len());
    for ticket in &listed {
        let progress = tasks::get_ticket_task_progress(pool, &ticket.ticket_id)
            .await
            .map_err(|e| ServiceError::Database(into_sqlx(e)))?;
        let logs = stagehand_db::queries::logs::count_logs_for_ticket(pool, &ticket.ticket_id)
            .await
            .map_err(|e| ServiceError::Database(into_sqlx(e)))?;
        summaries.push(crate::ticket::summary::summarize(ticket, progress.total, progress.completed, logs));
    }
    Ok(summaries)
}
