//! Integration tests for guard-gated ticket transitions.

use std::path::Path;

use serde_json::json;

use stagehand_core::ticket::service as ticket_service;
use stagehand_core::workflow::loader::parse_workflow;
use stagehand_core::workflow::WorkflowLoader;
use stagehand_db::models::{ApprovalStatus, TicketStatus};

use stagehand_test_utils::{create_test_db, drop_test_db};

fn regional_review_loader() -> WorkflowLoader {
    let toml_str = r#"
[workflow]
key = "regional_review"
description = "Single review stage, routed to approval outside the EU."
initial_stage = "running"

[[stages]]
id = "running"
executor = "noop"

[[stages.transitions]]
target = "finished"
when = "workflow_input.region == 'eu'"

[[stages.transitions]]
target = "pending_approval"

[[stages]]
id = "pending_approval"
executor = "noop"
requires_approval = true

[[stages.transitions]]
target = "finished"
"#;
    let mut loader = WorkflowLoader::default();
    loader.insert(parse_workflow(toml_str, Path::new("regional_review.toml")).unwrap());
    loader
}

#[tokio::test]
async fn eu_region_takes_the_guarded_transition_straight_to_finished() {
    let (pool, db_name) = create_test_db().await;
    let loader = regional_review_loader();

    let ticket = ticket_service::create_ticket(
        &pool,
        &loader,
        "regional_review",
        None,
        None,
        &json!({"region": "eu"}),
        &json!({}),
        None,
    )
    .await
    .unwrap();

    let transitioned = ticket_service::transition_ticket(&pool, &loader, &ticket.ticket_id, None, &json!({}))
        .await
        .unwrap();

    assert_eq!(transitioned.stage, "finished");
    assert_eq!(transitioned.status, TicketStatus::Completed);

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn non_eu_region_falls_through_to_pending_approval() {
    let (pool, db_name) = create_test_db().await;
    let loader = regional_review_loader();

    let ticket = ticket_service::create_ticket(
        &pool,
        &loader,
        "regional_review",
        None,
        None,
        &json!({"region": "us"}),
        &json!({}),
        None,
    )
    .await
    .unwrap();

    let transitioned = ticket_service::transition_ticket(&pool, &loader, &ticket.ticket_id, None, &json!({}))
        .await
        .unwrap();

    assert_eq!(transitioned.stage, "pending_approval");
    assert_eq!(transitioned.status, TicketStatus::WaitingApproval);
    assert_eq!(transitioned.approval_status, ApprovalStatus::Pending);

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn explicit_target_stage_is_honored_over_guard_order() {
    let (pool, db_name) = create_test_db().await;
    let loader = regional_review_loader();

    let ticket = ticket_service::create_ticket(
        &pool,
        &loader,
        "regional_review",
        None,
        None,
        &json!({"region": "eu"}),
        &json!({}),
        None,
    )
    .await
    .unwrap();

    // Even though the "finished" transition's guard would match, explicitly
    // request "pending_approval" (whose transition has no guard at all).
    let transitioned =
        ticket_service::transition_ticket(&pool, &loader, &ticket.ticket_id, Some("pending_approval"), &json!({}))
            .await
            .unwrap();

    assert_eq!(transitioned.stage, "pending_approval");

    pool.close().await;
    drop_test_db(&db_name).await;
}
