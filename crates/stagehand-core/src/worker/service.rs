//! The worker's single-step operation: `process_once`.

use chrono::{Duration, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Notify;
use tokio::time::interval;

use stagehand_db::models::{LogType, Task, TaskState, Ticket, WorkerState};
use stagehand_db::queries::{heartbeats, logs, tasks, tickets};

use crate::executor::{ExecutionResult, ExecutorRegistry, TaskControl};
use crate::ticket::service as ticket_service;
use crate::time_policy;

use super::config::WorkerConfig;

const REAP_BATCH_SIZE: i64 = 100;
const CANCEL_BATCH_SIZE: i64 = 100;
const LEASE_RENEWER_JOIN_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(2);

pub struct WorkerService {
    pool: sqlx::PgPool,
    config: WorkerConfig,
    executors: ExecutorRegistry,
}

impl WorkerService {
    pub fn new(pool: sqlx::PgPool, config: WorkerConfig, executors: ExecutorRegistry) -> Self {
        Self { pool, config, executors }
    }

    /// Run one worker step: reap stale leases, finalize pending cancellations,
    /// claim and execute at most one task, then sync the affected ticket.
    pub async fn process_once(&self, worker_id: Option<&str>) -> anyhow::Result<String> {
        let worker_id = worker_id.unwrap_or(&self.config.worker_id).to_owned();

        self.reap_stale_tasks().await?;
        let cancelled = self.finalize_cancellations_and_claim(&worker_id).await?;

        let Some(task) = cancelled.claimed else {
            heartbeats::upsert_heartbeat(&self.pool, &worker_id, WorkerState::Idle, None).await?;
            if cancelled.cancelled_count > 0 {
                return Ok(format!("cancelled {} task(s)", cancelled.cancelled_count));
            }
            return Ok("no queued task".to_owned());
        };

        if let Some(outcome) = self.pre_execution_gate(&task, &worker_id).await? {
            return Ok(outcome);
        }

        let Some(ticket) = tickets::get_ticket(&self.pool, &task.ticket_id).await? else {
            tasks::finalize_failed(&self.pool, task.id, TaskState::Failed, "owning ticket disappeared", None).await?;
            heartbeats::upsert_heartbeat(&self.pool, &worker_id, WorkerState::Idle, None).await?;
            return Ok(format!("terminal-failed task {} (missing ticket)", task.id));
        };

        let result = self.execute_with_lease_renewal(&ticket, &task, &worker_id).await;
        self.finalize(&task, result).await?;

        heartbeats::upsert_heartbeat(&self.pool, &worker_id, WorkerState::Idle, None).await?;
        Ok(format!("processed task {}", task.id))
    }

    async fn reap_stale_tasks(&self) -> anyhow::Result<()> {
        let mut tx = self.pool.begin().await?;
        let stale = tasks::select_stale_running_tasks(&mut tx, REAP_BATCH_SIZE).await?;
        let mut affected_tickets = HashSet::new();

        for task in &stale {
            affected_tickets.insert(task.ticket_id.clone());
            let timed_out = task
                .timeout_seconds
                .zip(task.started_at)
                .is_some_and(|(timeout, started)| Utc::now() >= started + Duration::seconds(timeout as i64));

            if timed_out {
                // `reap_stale_task` itself bumps `attempt_count`; route against
                // the post-increment value so dead-letter/backoff agree with it.
                let (next_state, next_run_at) = self.route_retry_at_attempt(task, task.attempt_count + 1);
                tasks::reap_stale_task(
                    &mut tx,
                    task.id,
                    next_state,
                    &format!("task timed out after {}s", task.timeout_seconds.unwrap_or_default()),
                    next_run_at,
                )
                .await?;
                continue;
            }

            if time_policy::is_stale_running_task(
                Utc::now(),
                task.lease_expires_at,
                task.started_at,
                self.config.stale_task_timeout_seconds,
            ) {
                if task.cancel_requested {
                    tasks::finalize_cancelled(&mut tx, task.id).await?;
                } else {
                    let (next_state, next_run_at) = self.route_retry_at_attempt(task, task.attempt_count + 1);
                    tasks::reap_stale_task(
                        &mut tx,
                        task.id,
                        next_state,
                        "task lease expired while running",
                        next_run_at,
                    )
                    .await?;
                }
            }
        }
        tx.commit().await?;

        for ticket_id in affected_tickets {
            ticket_service::sync_ticket_state(&self.pool, &ticket_id).await.ok();
        }
        Ok(())
    }

    async fn finalize_cancellations_and_claim(&self, worker_id: &str) -> anyhow::Result<ClaimOutcome> {
        let mut tx = self.pool.begin().await?;
        let pending = tasks::select_pending_cancellations(&mut tx, CANCEL_BATCH_SIZE).await?;
        let mut affected_tickets: HashSet<String> = HashSet::new();
        for task in &pending {
            tasks::finalize_cancelled(&mut tx, task.id).await?;
            affected_tickets.insert(task.ticket_id.clone());
        }

        let claimed = tasks::claim_next_task(&mut tx, worker_id, self.config.task_lease_seconds).await?;
        tx.commit().await?;

        for ticket_id in &affected_tickets {
            ticket_service::sync_ticket_state(&self.pool, ticket_id).await.ok();
        }

        Ok(ClaimOutcome {
            cancelled_count: pending.len(),
            claimed,
        })
    }

    /// Re-check the freshly-claimed task/ticket for park/cancel conditions
    /// that may have appeared since claim. Returns `Some(outcome)` if
    /// execution should not proceed.
    async fn pre_execution_gate(&self, task: &Task, worker_id: &str) -> anyhow::Result<Option<String>> {
        let Some(task) = tasks::get_task(&self.pool, task.id).await? else {
            heartbeats::upsert_heartbeat(&self.pool, worker_id, WorkerState::Idle, None).await?;
            return Ok(Some(format!("task {} vanished before execution", task.id)));
        };

        let Some(ticket) = tickets::get_ticket(&self.pool, &task.ticket_id).await? else {
            tasks::finalize_failed(&self.pool, task.id, TaskState::Failed, "owning ticket disappeared", None).await?;
            heartbeats::upsert_heartbeat(&self.pool, worker_id, WorkerState::Idle, None).await?;
            return Ok(Some(format!("terminal-failed task {} (missing ticket)", task.id)));
        };

        if task.cancel_requested {
            tasks::finalize_cancelled_standalone(&self.pool, task.id).await?;
            ticket_service::sync_ticket_state(&self.pool, &ticket.ticket_id).await.ok();
            heartbeats::upsert_heartbeat(&self.pool, worker_id, WorkerState::Idle, None).await?;
            return Ok(Some(format!("cancelled task {}", task.id)));
        }

        let approval_pending = ticket.approval_required
            && ticket.approval_status == stagehand_db::models::ApprovalStatus::Pending;

        if ticket.paused {
            tasks::park_claimed_task(&self.pool, task.id, TaskState::Paused, None).await?;
            ticket_service::sync_ticket_state(&self.pool, &ticket.ticket_id).await.ok();
            heartbeats::upsert_heartbeat(&self.pool, worker_id, WorkerState::Idle, None).await?;
            return Ok(Some(format!("parked task {} (ticket paused)", task.id)));
        }

        if approval_pending {
            tasks::park_claimed_task(&self.pool, task.id, TaskState::Blocked, None).await?;
            ticket_service::sync_ticket_state(&self.pool, &ticket.ticket_id).await.ok();
            heartbeats::upsert_heartbeat(&self.pool, worker_id, WorkerState::Idle, None).await?;
            return Ok(Some(format!("parked task {} (approval pending)", task.id)));
        }

        if self.executors.get(&task.task_key).is_none() {
            tasks::finalize_failed(
                &self.pool,
                task.id,
                TaskState::Failed,
                &format!("no executor registered for task_key {:?}", task.task_key),
                None,
            )
            .await?;
            ticket_service::sync_ticket_state(&self.pool, &ticket.ticket_id).await.ok();
            heartbeats::upsert_heartbeat(&self.pool, worker_id, WorkerState::Idle, None).await?;
            return Ok(Some(format!("terminal-failed task {} (unknown executor)", task.id)));
        }

        Ok(None)
    }

    async fn execute_with_lease_renewal(&self, ticket: &Ticket, task: &Task, worker_id: &str) -> ExecutionResult {
        let stop = Arc::new(Notify::new());
        let renewer = {
            let pool = self.pool.clone();
            let ticket_id = ticket.ticket_id.clone();
            let task_id = task.id;
            let worker_id = worker_id.to_owned();
            let lease_seconds = self.config.task_lease_seconds;
            let stop = stop.clone();
            tokio::spawn(async move {
                let mut ticker = interval(std::time::Duration::from_secs(
                    (lease_seconds / 3).max(2) as u64,
                ));
                loop {
                    tokio::select! {
                        _ = stop.notified() => break,
                        _ = ticker.tick() => {
                            let Ok(Some(current)) = tasks::get_task(&pool, task_id).await else { break };
                            if current.state != TaskState::Running || current.claimed_by.as_deref() != Some(worker_id.as_str()) {
                                break;
                            }
                            let _ = tasks::renew_lease(&pool, task_id, lease_seconds).await;
                            let _ = heartbeats::upsert_heartbeat(&pool, &worker_id, WorkerState::Working, Some(task_id)).await;
                            if let Ok(Some(t)) = tickets::get_ticket(&pool, &ticket_id).await {
                                if t.paused {
                                    let _ = tasks::request_cancel(&pool, task_id).await;
                                }
                            }
                        }
                    }
                }
            })
        };

        // `pre_execution_gate` already confirmed the executor is registered.
        let executor = self
            .executors
            .get(&task.task_key)
            .expect("executor presence checked by pre_execution_gate");
        let control = TaskControl::new(self.pool.clone(), ticket.ticket_id.clone(), task.id);
        let result = executor.execute_with_control(ticket, task, &control).await;

        stop.notify_one();
        let _ = tokio::time::timeout(LEASE_RENEWER_JOIN_TIMEOUT, renewer).await;

        result
    }

    async fn finalize(&self, task: &Task, outcome: ExecutionResult) -> anyhow::Result<()> {
        let Some(task) = tasks::get_task(&self.pool, task.id).await? else {
            return Ok(());
        };

        if task.cancel_requested {
            tasks::finalize_cancelled_standalone(&self.pool, task.id).await?;
            self.log(task.id, LogType::Warning, "task cancelled").await?;
            ticket_service::sync_ticket_state(&self.pool, &task.ticket_id).await.ok();
            return Ok(());
        }

        if outcome.defer {
            let defer_seconds = outcome
                .defer_seconds
                .unwrap_or(self.config.event_wait_poll_interval_seconds)
                .max(1);
            tasks::defer_task(&self.pool, task.id, Utc::now() + Duration::seconds(defer_seconds)).await?;
            self.log(task.id, LogType::Info, &outcome.message).await?;
        } else if outcome.success {
            tasks::finalize_completed(&self.pool, task.id, &outcome.output).await?;
            self.log(task.id, LogType::Info, &outcome.message).await?;
        } else if outcome.terminal_failure {
            tasks::finalize_failed(&self.pool, task.id, TaskState::Failed, &outcome.message, None).await?;
            self.log(task.id, LogType::Error, &outcome.message).await?;
        } else {
            self.finalize_retry_or_dead_letter(&task, &outcome.message).await?;
        }

        ticket_service::sync_ticket_state(&self.pool, &task.ticket_id).await.ok();
        Ok(())
    }

    async fn finalize_retry_or_dead_letter(&self, task: &Task, message: &str) -> anyhow::Result<()> {
        let (next_state, next_run_at) = self.route_retry(task);
        let (log_type, log_message) = if next_state == TaskState::DeadLetter {
            (LogType::Error, format!("dead-lettered after {} attempts", task.attempt_count))
        } else {
            (LogType::Warning, format!("task failed, retrying in {}s: {message}", next_run_at
                .map(|t| (t - Utc::now()).num_seconds())
                .unwrap_or_default()))
        };
        tasks::finalize_failed(&self.pool, task.id, next_state, message, next_run_at).await?;
        self.log(task.id, log_type, &log_message).await?;
        Ok(())
    }

    fn route_retry(&self, task: &Task) -> (TaskState, Option<chrono::DateTime<Utc>>) {
        self.route_retry_at_attempt(task, task.attempt_count)
    }

    /// Like [`Self::route_retry`], but against an explicit attempt count.
    /// Callers that increment `attempt_count` as part of the same write that
    /// consumes this decision (e.g. `reap_stale_task`) pass the post-increment
    /// value so dead-letter/backoff math agrees with what lands in the row.
    fn route_retry_at_attempt(&self, task: &Task, attempt_count: i32) -> (TaskState, Option<chrono::DateTime<Utc>>) {
        let max_attempts = time_policy::normalize_max_attempts(Some(task.max_attempts), self.config.default_max_attempts);
        if time_policy::should_dead_letter(attempt_count, max_attempts) {
            return (TaskState::DeadLetter, None);
        }
        let base = task.retry_base_seconds.map(|v| v as i64).unwrap_or(self.config.retry_base_seconds as i64).max(1);
        let max = task.retry_max_seconds.map(|v| v as i64).unwrap_or(self.config.retry_max_seconds as i64).max(base);
        let next_run_at = time_policy::compute_next_retry_at(Utc::now(), attempt_count, base, max);
        (TaskState::Retrying, Some(next_run_at))
    }

    async fn log(&self, task_id: i64, log_type: LogType, message: &str) -> anyhow::Result<()> {
        logs::insert_log(&self.pool, task_id, log_type, message, &serde_json::Value::Object(Default::default()), None)
            .await?;
        Ok(())
    }
}

struct ClaimOutcome {
    cancelled_count: usize,
    claimed: Option<Task>,
}
