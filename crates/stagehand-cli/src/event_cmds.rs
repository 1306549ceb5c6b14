//! Operator-mode CLI handlers for `stagehand event` subcommands.

use anyhow::{Context, Result};
use sqlx::PgPool;

use stagehand_core::ticket::service as ticket_service;

use crate::EventCommands;

pub async fn run_event_command(command: EventCommands, pool: &PgPool) -> Result<()> {
    match command {
        EventCommands::Publish {
            ticket_id,
            event_type,
            payload,
        } => cmd_publish(pool, &ticket_id, &event_type, payload.as_deref()).await,
        EventCommands::List { ticket_id, limit } => cmd_list(pool, &ticket_id, limit).await,
    }
}

async fn cmd_publish(pool: &PgPool, ticket_id: &str, event_type: &str, payload: Option<&str>) -> Result<()> {
    let payload = match payload {
        Some(s) => serde_json::from_str(s).with_context(|| format!("failed to parse JSON: {s:?}"))?,
        None => serde_json::Value::Object(Default::default()),
    };

    let event = ticket_service::publish_event(pool, ticket_id, event_type, &payload).await?;
    println!("Event {} published to ticket {ticket_id}.", event.id);
    Ok(())
}

async fn cmd_list(pool: &PgPool, ticket_id: &str, limit: i64) -> Result<()> {
    let events = ticket_service::get_ticket_events(pool, ticket_id, limit).await?;
    if events.is_empty() {
        println!("No events for ticket {ticket_id}.");
        return Ok(());
    }

    for event in &events {
        let consumed = match event.consumed_at {
            Some(at) => format!("consumed at {} by task {}", at.format("%Y-%m-%d %H:%M:%S UTC"), event.consumed_by_task_id.unwrap_or_default()),
            None => "unconsumed".to_owned(),
        };
        println!(
            "[{}] {} ({}) — {consumed}",
            event.created_at.format("%Y-%m-%d %H:%M:%S UTC"),
            event.event_type,
            event.id,
        );
    }
    Ok(())
}
