//! Integration tests for the worker's `process_once` step, covering the
//! happy path, dependency gating, retry/dead-letter, cancellation, deferral,
//! event delivery, and cooperative pause.

use std::path::Path;

use async_trait::async_trait;
use serde_json::json;
use sqlx::PgPool;

use stagehand_core::executor::{ExecutionResult, ExecutorRegistry, NoopExecutor, TaskControl, TaskExecutor, WaitForEventExecutor};
use stagehand_core::ticket::service as ticket_service;
use stagehand_core::worker::{WorkerConfig, WorkerService};
use stagehand_core::workflow::loader::parse_workflow;
use stagehand_core::workflow::WorkflowLoader;
use stagehand_db::models::{Task, TaskState, Ticket, TicketStatus};
use stagehand_db::queries::{events, tasks, tickets};

use stagehand_test_utils::{create_test_db, drop_test_db};

fn default_ticket_loader() -> WorkflowLoader {
    let toml_str = r#"
[workflow]
key = "default_ticket"
initial_stage = "running"

[[stages]]
id = "running"
executor = "noop"

[[stages.transitions]]
target = "finished"
"#;
    let mut loader = WorkflowLoader::default();
    loader.insert(parse_workflow(toml_str, Path::new("default_ticket.toml")).unwrap());
    loader
}

fn worker_config() -> WorkerConfig {
    WorkerConfig {
        default_max_attempts: WorkerConfig::DEFAULT_MAX_ATTEMPTS,
        retry_base_seconds: 1,
        retry_max_seconds: 5,
        task_lease_seconds: WorkerConfig::MIN_TASK_LEASE_SECONDS,
        stale_task_timeout_seconds: WorkerConfig::MIN_STALE_TASK_TIMEOUT_SECONDS,
        event_wait_poll_interval_seconds: 1,
        schedule_batch_size: WorkerConfig::DEFAULT_SCHEDULE_BATCH_SIZE,
        worker_id: "test-worker".into(),
        default_workflow_key: WorkerConfig::DEFAULT_WORKFLOW_KEY.into(),
        worker_poll_interval_seconds: WorkerConfig::DEFAULT_WORKER_POLL_INTERVAL_SECONDS,
    }
}

async fn backdate_next_run_at(pool: &PgPool, task_id: i64) {
    sqlx::query("UPDATE tasks SET next_run_at = now() - interval '1 hour' WHERE id = $1")
        .bind(task_id)
        .execute(pool)
        .await
        .expect("failed to backdate next_run_at");
}

struct AlwaysFailExecutor;

#[async_trait]
impl TaskExecutor for AlwaysFailExecutor {
    fn name(&self) -> &str {
        "always_fail"
    }

    async fn execute(&self, _ticket: &Ticket, _task: &Task) -> ExecutionResult {
        ExecutionResult::failure("simulated failure")
    }
}

/// An executor that polls `control.should_stop()` every 50ms, up to 2s,
/// used to exercise cooperative cancellation from a pause mid-execution.
struct CooperativePollExecutor;

#[async_trait]
impl TaskExecutor for CooperativePollExecutor {
    fn name(&self) -> &str {
        "cooperative_poll"
    }

    async fn execute(&self, _ticket: &Ticket, _task: &Task) -> ExecutionResult {
        ExecutionResult::success("should not reach plain execute", json!({}))
    }

    async fn execute_with_control(&self, _ticket: &Ticket, _task: &Task, control: &TaskControl) -> ExecutionResult {
        for _ in 0..40 {
            if control.should_stop().await {
                return ExecutionResult::failure("stopped cooperatively");
            }
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        }
        ExecutionResult::success("finished without being stopped", json!({}))
    }
}

#[tokio::test]
async fn happy_path_completes_ticket_in_one_step() {
    let (pool, db_name) = create_test_db().await;
    let loader = default_ticket_loader();

    let ticket = ticket_service::create_ticket(&pool, &loader, "default_ticket", None, None, &json!({}), &json!({}), None)
        .await
        .unwrap();
    ticket_service::create_task(&pool, &ticket.ticket_id, "noop", &json!({}), &[], 3, None, None, None)
        .await
        .unwrap();

    let mut registry = ExecutorRegistry::new();
    registry.register(NoopExecutor);
    let service = WorkerService::new(pool.clone(), worker_config(), registry);

    let outcome = service.process_once(Some("test-worker")).await.unwrap();
    assert!(outcome.starts_with("processed task"));

    let refreshed = tickets::get_ticket(&pool, &ticket.ticket_id).await.unwrap().unwrap();
    assert_eq!(refreshed.stage, "finished");
    assert_eq!(refreshed.status, TicketStatus::Completed);
    assert!(refreshed.completed_at.is_some());

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn dependent_task_waits_for_its_predecessor() {
    let (pool, db_name) = create_test_db().await;
    let loader = default_ticket_loader();

    let ticket = ticket_service::create_ticket(&pool, &loader, "default_ticket", None, None, &json!({}), &json!({}), None)
        .await
        .unwrap();
    let task_a = ticket_service::create_task(&pool, &ticket.ticket_id, "first", &json!({}), &[], 3, None, None, None)
        .await
        .unwrap();
    let task_b = ticket_service::create_task(&pool, &ticket.ticket_id, "second", &json!({}), &[task_a.id], 3, None, None, None)
        .await
        .unwrap();

    let mut registry = ExecutorRegistry::new();
    registry.register(NoopExecutor);
    let service = WorkerService::new(pool.clone(), worker_config(), registry);

    // First step should claim and complete task A; task B is still blocked by
    // its unsatisfied dependency, so the ticket is not finished yet.
    service.process_once(Some("test-worker")).await.unwrap();
    let a = tasks::get_task(&pool, task_a.id).await.unwrap().unwrap();
    assert_eq!(a.state, TaskState::Completed);
    let mid_ticket = tickets::get_ticket(&pool, &ticket.ticket_id).await.unwrap().unwrap();
    assert_ne!(mid_ticket.stage, "finished");

    // Second step claims task B now that its dependency is satisfied.
    service.process_once(Some("test-worker")).await.unwrap();
    let b = tasks::get_task(&pool, task_b.id).await.unwrap().unwrap();
    assert_eq!(b.state, TaskState::Completed);
    let done_ticket = tickets::get_ticket(&pool, &ticket.ticket_id).await.unwrap().unwrap();
    assert_eq!(done_ticket.stage, "finished");
    assert_eq!(done_ticket.status, TicketStatus::Completed);

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn retry_then_dead_letter() {
    let (pool, db_name) = create_test_db().await;
    let loader = default_ticket_loader();

    let ticket = ticket_service::create_ticket(&pool, &loader, "default_ticket", None, None, &json!({}), &json!({}), None)
        .await
        .unwrap();
    let task = ticket_service::create_task(&pool, &ticket.ticket_id, "always_fail", &json!({}), &[], 2, Some(1), Some(1), None)
        .await
        .unwrap();

    let mut registry = ExecutorRegistry::new();
    registry.register(AlwaysFailExecutor);
    let service = WorkerService::new(pool.clone(), worker_config(), registry);

    service.process_once(Some("test-worker")).await.unwrap();
    let after_first = tasks::get_task(&pool, task.id).await.unwrap().unwrap();
    assert_eq!(after_first.state, TaskState::Retrying);
    assert_eq!(after_first.attempt_count, 1);
    assert!(after_first.next_run_at.is_some());

    backdate_next_run_at(&pool, task.id).await;

    service.process_once(Some("test-worker")).await.unwrap();
    let after_second = tasks::get_task(&pool, task.id).await.unwrap().unwrap();
    assert_eq!(after_second.state, TaskState::DeadLetter);

    let ticket_after = tickets::get_ticket(&pool, &ticket.ticket_id).await.unwrap().unwrap();
    assert_eq!(ticket_after.status, TicketStatus::Attention);
    assert_eq!(ticket_after.stage, "review");

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn pre_claim_cancel_skips_execution() {
    let (pool, db_name) = create_test_db().await;
    let loader = default_ticket_loader();

    let ticket = ticket_service::create_ticket(&pool, &loader, "default_ticket", None, None, &json!({}), &json!({}), None)
        .await
        .unwrap();
    let task = ticket_service::create_task(&pool, &ticket.ticket_id, "noop", &json!({}), &[], 3, None, None, None)
        .await
        .unwrap();
    tasks::request_cancel(&pool, task.id).await.unwrap();

    let mut registry = ExecutorRegistry::new();
    registry.register(NoopExecutor);
    let service = WorkerService::new(pool.clone(), worker_config(), registry);

    let outcome = service.process_once(Some("test-worker")).await.unwrap();
    assert!(outcome.contains("cancelled 1 task(s)"), "unexpected outcome: {outcome}");

    let refreshed = tasks::get_task(&pool, task.id).await.unwrap().unwrap();
    assert_eq!(refreshed.state, TaskState::Cancelled);

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn wait_for_event_defers_without_consuming_an_attempt() {
    let (pool, db_name) = create_test_db().await;
    let loader = default_ticket_loader();

    let ticket = ticket_service::create_ticket(&pool, &loader, "default_ticket", None, None, &json!({}), &json!({}), None)
        .await
        .unwrap();
    let task = ticket_service::create_task(
        &pool,
        &ticket.ticket_id,
        "wait_for_event",
        &json!({"event_type": "go", "poll_interval_seconds": 1}),
        &[],
        2,
        None,
        None,
        None,
    )
    .await
    .unwrap();

    let mut registry = ExecutorRegistry::new();
    registry.register(WaitForEventExecutor::new(pool.clone(), 5));
    let service = WorkerService::new(pool.clone(), worker_config(), registry);

    service.process_once(Some("test-worker")).await.unwrap();

    let refreshed = tasks::get_task(&pool, task.id).await.unwrap().unwrap();
    assert_eq!(refreshed.state, TaskState::Retrying);
    assert_eq!(refreshed.attempt_count, 0, "a deferral must not consume an attempt");
    assert!(refreshed.next_run_at.is_some());

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn published_event_is_consumed_exactly_once() {
    let (pool, db_name) = create_test_db().await;
    let loader = default_ticket_loader();

    let ticket = ticket_service::create_ticket(&pool, &loader, "default_ticket", None, None, &json!({}), &json!({}), None)
        .await
        .unwrap();
    let task = ticket_service::create_task(
        &pool,
        &ticket.ticket_id,
        "wait_for_event",
        &json!({"event_type": "go"}),
        &[],
        3,
        None,
        None,
        None,
    )
    .await
    .unwrap();

    let mut registry = ExecutorRegistry::new();
    registry.register(WaitForEventExecutor::new(pool.clone(), 1));
    let service = WorkerService::new(pool.clone(), worker_config(), registry);

    // No event published yet: the task defers.
    service.process_once(Some("test-worker")).await.unwrap();
    let waiting = tasks::get_task(&pool, task.id).await.unwrap().unwrap();
    assert_eq!(waiting.state, TaskState::Retrying);

    let published = ticket_service::publish_event(&pool, &ticket.ticket_id, "go", &json!({"ok": true}))
        .await
        .unwrap();
    backdate_next_run_at(&pool, task.id).await;

    service.process_once(Some("test-worker")).await.unwrap();
    let completed = tasks::get_task(&pool, task.id).await.unwrap().unwrap();
    assert_eq!(completed.state, TaskState::Completed);

    let ticket_events = events::list_events(&pool, &ticket.ticket_id, 10).await.unwrap();
    assert_eq!(ticket_events.len(), 1);
    assert_eq!(ticket_events[0].id, published.id);
    assert!(ticket_events[0].consumed_at.is_some());
    assert_eq!(ticket_events[0].consumed_by_task_id, Some(task.id));

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn pausing_a_ticket_stops_a_running_task_cooperatively() {
    let (pool, db_name) = create_test_db().await;
    let loader = default_ticket_loader();

    let ticket = ticket_service::create_ticket(&pool, &loader, "default_ticket", None, None, &json!({}), &json!({}), None)
        .await
        .unwrap();
    ticket_service::create_task(&pool, &ticket.ticket_id, "cooperative_poll", &json!({}), &[], 3, None, None, None)
        .await
        .unwrap();

    let mut registry = ExecutorRegistry::new();
    registry.register(CooperativePollExecutor);
    let service = WorkerService::new(pool.clone(), worker_config(), registry);

    let ticket_id = ticket.ticket_id.clone();
    let worker = tokio::spawn(async move { service.process_once(Some("test-worker")).await });

    tokio::time::sleep(std::time::Duration::from_millis(150)).await;
    ticket_service::pause_ticket(&pool, &ticket_id).await.unwrap();

    let outcome = worker.await.unwrap().unwrap();
    assert!(outcome.starts_with("processed task"));

    let paused_ticket = tickets::get_ticket(&pool, &ticket_id).await.unwrap().unwrap();
    assert_eq!(paused_ticket.status, TicketStatus::Paused);

    pool.close().await;
    drop_test_db(&db_name).await;
}
