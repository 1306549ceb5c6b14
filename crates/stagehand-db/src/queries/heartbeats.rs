//! Database query functions for the `worker_heartbeats` table.

use anyhow::{Context, Result};
use sqlx::PgPool;

use crate::models::{WorkerHeartbeat, WorkerState};

pub async fn upsert_heartbeat(
    pool: &PgPool,
    worker_id: &str,
    state: WorkerState,
    current_task_id: Option<i64>,
) -> Result<WorkerHeartbeat> {
    sqlx::query_as::<_, WorkerHeartbeat>(
        "INSERT INTO worker_heartbeats (worker_id, state, current_task_id, last_seen_at) \
         VALUES ($1, $2, $3, now()) \
         ON CONFLICT (worker_id) DO UPDATE \
           SET state = EXCLUDED.state, \
               current_task_id = EXCLUDED.current_task_id, \
               last_seen_at = now() \
         RETURNING *",
    )
    .bind(worker_id)
    .bind(state)
    .bind(current_task_id)
    .fetch_one(pool)
    .await
    .context("failed to upsert worker heartbeat")
}

pub async fn list_heartbeats(pool: &PgPool) -> Result<Vec<WorkerHeartbeat>> {
    sqlx::query_as::<_, WorkerHeartbeat>(
        "SELECT * FROM worker_heartbeats ORDER BY worker_id ASC",
    )
    .fetch_all(pool)
    .await
    .context("failed to list worker heartbeats")
}

pub async fn get_heartbeat(pool: &PgPool, worker_id: &str) -> Result<Option<WorkerHeartbeat>> {
    sqlx::query_as::<_, WorkerHeartbeat>("SELECT * FROM worker_heartbeats WHERE worker_id = $1")
        .bind(worker_id)
        .fetch_optional(pool)
        .await
        .context("failed to fetch worker heartbeat")
}
