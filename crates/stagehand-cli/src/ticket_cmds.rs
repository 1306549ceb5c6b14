//! Operator-mode CLI handlers for `stagehand ticket` subcommands.

use anyhow::{Context, Result};
use sqlx::PgPool;

use stagehand_core::ticket::service as ticket_service;
use stagehand_core::workflow::WorkflowLoader;

use crate::TicketCommands;

pub async fn run_ticket_command(command: TicketCommands, pool: &PgPool) -> Result<()> {
    match command {
        TicketCommands::Create {
            workflow,
            title,
            input,
        } => cmd_create(pool, &workflow, title.as_deref(), input.as_deref()).await,
        TicketCommands::Show { ticket_id } => cmd_show(pool, &ticket_id).await,
        TicketCommands::List { limit } => cmd_list(pool, limit).await,
        TicketCommands::Pause { ticket_id } => cmd_pause(pool, &ticket_id).await,
        TicketCommands::Resume { ticket_id } => cmd_resume(pool, &ticket_id).await,
        TicketCommands::RequestApproval { ticket_id, notes } => {
            cmd_request_approval(pool, &ticket_id, notes.as_deref()).await
        }
        TicketCommands::Approve { ticket_id, notes } => cmd_approve(pool, &ticket_id, notes.as_deref()).await,
        TicketCommands::Reject { ticket_id, notes } => cmd_reject(pool, &ticket_id, notes.as_deref()).await,
        TicketCommands::Transition { ticket_id, target } => cmd_transition(pool, &ticket_id, target.as_deref()).await,
    }
}

fn parse_json(raw: Option<&str>) -> Result<serde_json::Value> {
    match raw {
        Some(s) => serde_json::from_str(s).with_context(|| format!("failed to parse JSON: {s:?}")),
        None => Ok(serde_json::Value::Object(Default::default())),
    }
}

async fn cmd_create(pool: &PgPool, workflow: &str, title: Option<&str>, input: Option<&str>) -> Result<()> {
    let loader = WorkflowLoader::load_dir(&crate::config::workflows_dir())
        .context("failed to load workflow definitions")?;
    let workflow_input = parse_json(input)?;

    let ticket = ticket_service::create_ticket(
        pool,
        &loader,
        workflow,
        title,
        None,
        &workflow_input,
        &serde_json::Value::Object(Default::default()),
        Some("cli"),
    )
    .await?;

    println!("Ticket created.");
    println!("  ID:       {}", ticket.ticket_id);
    println!("  Workflow: {}", ticket.workflow_key);
    println!("  Stage:    {}", ticket.stage);
    println!("  Status:   {}", ticket.status);
    Ok(())
}

async fn cmd_show(pool: &PgPool, ticket_id: &str) -> Result<()> {
    let summary = ticket_service::get_ticket_summary(pool, ticket_id).await?;
    println!("Ticket: {}", summary.ticket_id);
    if let Some(title) = &summary.title {
        println!("  Title:         {title}");
    }
    println!("  Workflow:      {}", summary.workflow_key);
    println!("  Stage:         {}", summary.stage);
    println!("  Status:        {}", summary.status);
    println!("  Approval:      {}", summary.approval_status);
    println!("  Tasks:         {}/{} completed", summary.completed_task_count, summary.task_count);
    println!("  Logs:          {}", summary.log_count);
    println!("  Created:       {}", summary.created_at.format("%Y-%m-%d %H:%M:%S UTC"));
    if let Some(completed) = summary.completed_at {
        println!("  Completed:     {}", completed.format("%Y-%m-%d %H:%M:%S UTC"));
    }
    Ok(())
}

async fn cmd_list(pool: &PgPool, limit: i64) -> Result<()> {
    let summaries = ticket_service::list_ticket_summaries(pool, limit).await?;
    if summaries.is_empty() {
        println!("No tickets found. Use `stagehand ticket create` to create one.");
        return Ok(());
    }

    let id_w = summaries.iter().map(|t| t.ticket_id.len()).max().unwrap_or(2).max(2);
    let stage_w = summaries.iter().map(|t| t.stage.len()).max().unwrap_or(5).max(5);

    println!("{:<id_w$}  {:<stage_w$}  STATUS            TASKS", "ID", "STAGE");
    for t in &summaries {
        println!(
            "{:<id_w$}  {:<stage_w$}  {:<16}  {}/{}",
            t.ticket_id, t.stage, t.status, t.completed_task_count, t.task_count,
        );
    }
    Ok(())
}

async fn cmd_pause(pool: &PgPool, ticket_id: &str) -> Result<()> {
    ticket_service::pause_ticket(pool, ticket_id).await?;
    println!("Ticket {ticket_id} paused.");
    Ok(())
}

async fn cmd_resume(pool: &PgPool, ticket_id: &str) -> Result<()> {
    ticket_service::resume_ticket(pool, ticket_id).await?;
    println!("Ticket {ticket_id} resumed.");
    Ok(())
}

async fn cmd_request_approval(pool: &PgPool, ticket_id: &str, notes: Option<&str>) -> Result<()> {
    ticket_service::request_approval(pool, ticket_id, notes).await?;
    println!("Ticket {ticket_id} awaiting approval.");
    Ok(())
}

async fn cmd_approve(pool: &PgPool, ticket_id: &str, notes: Option<&str>) -> Result<()> {
    ticket_service::approve_ticket(pool, ticket_id, notes).await?;
    println!("Ticket {ticket_id} approved.");
    Ok(())
}

async fn cmd_reject(pool: &PgPool, ticket_id: &str, notes: Option<&str>) -> Result<()> {
    ticket_service::reject_ticket(pool, ticket_id, notes).await?;
    println!("Ticket {ticket_id} rejected.");
    Ok(())
}

async fn cmd_transition(pool: &PgPool, ticket_id: &str, target: Option<&str>) -> Result<()> {
    let loader = WorkflowLoader::load_dir(&crate::config::workflows_dir())
        .context("failed to load workflow definitions")?;
    let ticket = ticket_service::transition_ticket(
        pool,
        &loader,
        ticket_id,
        target,
        &serde_json::Value::Object(Default::default()),
    )
    .await?;
    println!("Ticket {ticket_id} transitioned to stage {:?} ({}).", ticket.stage, ticket.status);
    Ok(())
}
