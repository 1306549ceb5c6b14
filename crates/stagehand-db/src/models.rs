use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use sqlx::FromRow;

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Lifecycle state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Queued,
    Running,
    Retrying,
    Paused,
    Blocked,
    Completed,
    Failed,
    DeadLetter,
    Cancelled,
}

impl TaskState {
    /// States from which a task is eligible to be claimed by a worker.
    pub const CLAIMABLE: [TaskState; 2] = [TaskState::Queued, TaskState::Retrying];

    /// States a `cancel_requested` task must be in for the cancel to finalize
    /// immediately (a `running` task is cancelled at finalize instead).
    pub const CANCELLABLE_AT_CLAIM: [TaskState; 4] = [
        TaskState::Queued,
        TaskState::Retrying,
        TaskState::Paused,
        TaskState::Blocked,
    ];

    /// Terminal states: a task here will never transition again.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskState::Completed | TaskState::Failed | TaskState::DeadLetter | TaskState::Cancelled
        )
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Retrying => "retrying",
            Self::Paused => "paused",
            Self::Blocked => "blocked",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::DeadLetter => "dead_letter",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

impl FromStr for TaskState {
    type Err = TaskStateParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(Self::Queued),
            "running" => Ok(Self::Running),
            "retrying" => Ok(Self::Retrying),
            "paused" => Ok(Self::Paused),
            "blocked" => Ok(Self::Blocked),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "dead_letter" => Ok(Self::DeadLetter),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(TaskStateParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`TaskState`] string.
#[derive(Debug, Clone)]
pub struct TaskStateParseError(pub String);

impl fmt::Display for TaskStateParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid task state: {:?}", self.0)
    }
}

impl std::error::Error for TaskStateParseError {}

// ---------------------------------------------------------------------------

/// Outward status of a ticket, derived by the ticket state policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TicketStatus {
    Active,
    Paused,
    WaitingApproval,
    Attention,
    Completed,
}

impl fmt::Display for TicketStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Active => "active",
            Self::Paused => "paused",
            Self::WaitingApproval => "waiting_approval",
            Self::Attention => "attention",
            Self::Completed => "completed",
        };
        f.write_str(s)
    }
}

impl FromStr for TicketStatus {
    type Err = TicketStatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "paused" => Ok(Self::Paused),
            "waiting_approval" => Ok(Self::WaitingApproval),
            "attention" => Ok(Self::Attention),
            "completed" => Ok(Self::Completed),
            other => Err(TicketStatusParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`TicketStatus`] string.
#[derive(Debug, Clone)]
pub struct TicketStatusParseError(pub String);

impl fmt::Display for TicketStatusParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid ticket status: {:?}", self.0)
    }
}

impl std::error::Error for TicketStatusParseError {}

// ---------------------------------------------------------------------------

/// Approval workflow status for a ticket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    None,
    Pending,
    Approved,
    Rejected,
}

impl fmt::Display for ApprovalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::None => "none",
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        };
        f.write_str(s)
    }
}

impl FromStr for ApprovalStatus {
    type Err = ApprovalStatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(Self::None),
            "pending" => Ok(Self::Pending),
            "approved" => Ok(Self::Approved),
            "rejected" => Ok(Self::Rejected),
            other => Err(ApprovalStatusParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`ApprovalStatus`] string.
#[derive(Debug, Clone)]
pub struct ApprovalStatusParseError(pub String);

impl fmt::Display for ApprovalStatusParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid approval status: {:?}", self.0)
    }
}

impl std::error::Error for ApprovalStatusParseError {}

// ---------------------------------------------------------------------------

/// Severity of a [`TaskLog`] entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum LogType {
    Info,
    Warning,
    Error,
}

impl fmt::Display for LogType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
        };
        f.write_str(s)
    }
}

impl FromStr for LogType {
    type Err = LogTypeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "info" => Ok(Self::Info),
            "warning" => Ok(Self::Warning),
            "error" => Ok(Self::Error),
            other => Err(LogTypeParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`LogType`] string.
#[derive(Debug, Clone)]
pub struct LogTypeParseError(pub String);

impl fmt::Display for LogTypeParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid log type: {:?}", self.0)
    }
}

impl std::error::Error for LogTypeParseError {}

// ---------------------------------------------------------------------------

/// Observational idle/working state reported by a worker heartbeat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    Idle,
    Working,
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Working => "working",
        };
        f.write_str(s)
    }
}

impl FromStr for WorkerState {
    type Err = WorkerStateParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "idle" => Ok(Self::Idle),
            "working" => Ok(Self::Working),
            other => Err(WorkerStateParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`WorkerState`] string.
#[derive(Debug, Clone)]
pub struct WorkerStateParseError(pub String);

impl fmt::Display for WorkerStateParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid worker state: {:?}", self.0)
    }
}

impl std::error::Error for WorkerStateParseError {}

// ---------------------------------------------------------------------------
// Row types
// ---------------------------------------------------------------------------

/// A persistent work item bound to a workflow stage graph.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Ticket {
    pub ticket_id: String,
    pub title: Option<String>,
    pub workflow_key: String,
    pub workflow_version: Option<String>,
    pub workflow_input: Json,
    pub context_data: Json,
    pub stage: String,
    pub status: TicketStatus,
    pub paused: bool,
    pub paused_at: Option<DateTime<Utc>>,
    pub resumed_at: Option<DateTime<Utc>>,
    pub approval_required: bool,
    pub approval_status: ApprovalStatus,
    pub approval_requested_at: Option<DateTime<Utc>>,
    pub approval_decided_at: Option<DateTime<Utc>>,
    pub approval_notes: Option<String>,
    pub source_type: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// An atomic, retryable unit of work belonging to a ticket.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Task {
    pub id: i64,
    pub ticket_id: String,
    pub task_key: String,
    pub state: TaskState,
    pub payload: Json,
    pub result_data: Json,
    pub error_message: Option<String>,
    pub cancel_requested: bool,
    pub cancel_requested_at: Option<DateTime<Utc>>,
    pub attempt_count: i32,
    pub max_attempts: i32,
    pub retry_base_seconds: Option<i32>,
    pub retry_max_seconds: Option<i32>,
    pub timeout_seconds: Option<i32>,
    pub next_run_at: Option<DateTime<Utc>>,
    pub claimed_by: Option<String>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub lease_expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Directed edge `task_id -> depends_on_task_id`.
#[derive(Debug, Clone, Copy, FromRow, Serialize, Deserialize)]
pub struct TaskDependency {
    pub task_id: i64,
    pub depends_on_task_id: i64,
}

/// Append-only audit row written at every material task state change.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct TaskLog {
    pub id: i64,
    pub task_id: i64,
    pub log_type: LogType,
    pub message: String,
    pub details: Json,
    pub success: Option<bool>,
    pub created_at: DateTime<Utc>,
}

/// Single observational row per worker process.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct WorkerHeartbeat {
    pub worker_id: String,
    pub state: WorkerState,
    pub current_task_id: Option<i64>,
    pub last_seen_at: DateTime<Utc>,
}

/// Append-only mailbox entry on a ticket, consumed by `wait_for_event` tasks.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct TicketEvent {
    pub id: i64,
    pub ticket_id: String,
    pub event_type: String,
    pub payload: Json,
    pub consumed_at: Option<DateTime<Utc>>,
    pub consumed_by_task_id: Option<i64>,
    pub created_at: DateTime<Utc>,
}

/// A recurring or one-shot template that materializes tickets at `next_run_at`.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct TicketSchedule {
    pub id: i64,
    pub schedule_key: String,
    pub active: bool,
    pub next_run_at: Option<DateTime<Utc>>,
    pub interval_seconds: Option<i32>,
    pub ticket_title: Option<String>,
    pub workflow_key: Option<String>,
    pub workflow_version: Option<String>,
    pub workflow_input: Json,
    pub context_data: Json,
    pub source_type: Option<String>,
    pub task_key: Option<String>,
    pub task_payload: Json,
    pub task_max_attempts: Option<i32>,
    pub last_run_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl TicketSchedule {
    /// A schedule with a positive interval fires repeatedly; otherwise it is one-shot.
    pub fn is_recurring(&self) -> bool {
        self.interval_seconds.is_some_and(|secs| secs > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_state_display_and_parse_roundtrip() {
        let states = [
            TaskState::Queued,
            TaskState::Running,
            TaskState::Retrying,
            TaskState::Paused,
            TaskState::Blocked,
            TaskState::Completed,
            TaskState::Failed,
            TaskState::DeadLetter,
            TaskState::Cancelled,
        ];
        for state in states {
            let s = state.to_string();
            assert_eq!(s.parse::<TaskState>().unwrap(), state);
        }
    }

    #[test]
    fn task_state_rejects_invalid_string() {
        assert!("bogus".parse::<TaskState>().is_err());
    }

    #[test]
    fn task_state_is_terminal() {
        assert!(TaskState::Completed.is_terminal());
        assert!(TaskState::Failed.is_terminal());
        assert!(TaskState::DeadLetter.is_terminal());
        assert!(TaskState::Cancelled.is_terminal());
        assert!(!TaskState::Running.is_terminal());
        assert!(!TaskState::Queued.is_terminal());
    }

    #[test]
    fn ticket_status_display_and_parse_roundtrip() {
        let statuses = [
            TicketStatus::Active,
            TicketStatus::Paused,
            TicketStatus::WaitingApproval,
            TicketStatus::Attention,
            TicketStatus::Completed,
        ];
        for status in statuses {
            assert_eq!(status.to_string().parse::<TicketStatus>().unwrap(), status);
        }
    }

    #[test]
    fn ticket_status_rejects_invalid_string() {
        assert!("bogus".parse::<TicketStatus>().is_err());
    }

    #[test]
    fn approval_status_display_and_parse_roundtrip() {
        let statuses = [
            ApprovalStatus::None,
            ApprovalStatus::Pending,
            ApprovalStatus::Approved,
            ApprovalStatus::Rejected,
        ];
        for status in statuses {
            assert_eq!(
                status.to_string().parse::<ApprovalStatus>().unwrap(),
                status
            );
        }
    }

    #[test]
    fn approval_status_none_displays_as_none() {
        assert_eq!(ApprovalStatus::None.to_string(), "none");
    }

    #[test]
    fn approval_status_rejects_invalid_string() {
        assert!("bogus".parse::<ApprovalStatus>().is_err());
    }

    #[test]
    fn log_type_display_and_parse_roundtrip() {
        for log_type in [LogType::Info, LogType::Warning, LogType::Error] {
            assert_eq!(log_type.to_string().parse::<LogType>().unwrap(), log_type);
        }
    }

    #[test]
    fn log_type_rejects_invalid_string() {
        assert!("bogus".parse::<LogType>().is_err());
    }

    #[test]
    fn worker_state_display_and_parse_roundtrip() {
        for state in [WorkerState::Idle, WorkerState::Working] {
            assert_eq!(state.to_string().parse::<WorkerState>().unwrap(), state);
        }
    }

    #[test]
    fn worker_state_rejects_invalid_string() {
        assert!("bogus".parse::<WorkerState>().is_err());
    }

    #[test]
    fn schedule_recurring_detection() {
        let base = TicketSchedule {
            id: 1,
            schedule_key: "k".into(),
            active: true,
            next_run_at: None,
            interval_seconds: None,
            ticket_title: None,
            workflow_key: None,
            workflow_version: None,
            workflow_input: Json::Object(Default::default()),
            context_data: Json::Object(Default::default()),
            source_type: None,
            task_key: None,
            task_payload: Json::Object(Default::default()),
            task_max_attempts: None,
            last_run_at: None,
            created_at: Utc::now(),
        };
        assert!(!base.is_recurring());

        let mut recurring = base.clone();
        recurring.interval_seconds = Some(60);
        assert!(recurring.is_recurring());

        let mut one_shot = base;
        one_shot.interval_seconds = Some(0);
        assert!(!one_shot.is_recurring());
    }
}
