mod config;
mod event_cmds;
mod schedule_cmds;
mod task_cmds;
mod ticket_cmds;
mod worker_cmd;

use clap::{Parser, Subcommand};

use stagehand_db::pool;

use config::StagehandConfig;

#[derive(Parser)]
#[command(name = "stagehand", about = "Durable ticket/task workflow orchestrator")]
struct Cli {
    /// Database URL (overrides STAGEHAND_DATABASE_URL env var)
    #[arg(long, global = true)]
    database_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ticket (workflow instance) management
    Ticket {
        #[command(subcommand)]
        command: TicketCommands,
    },
    /// Task (atomic work unit) management
    Task {
        #[command(subcommand)]
        command: TaskCommands,
    },
    /// Event publication and inspection
    Event {
        #[command(subcommand)]
        command: EventCommands,
    },
    /// Recurring/one-shot schedule management
    Schedule {
        #[command(subcommand)]
        command: ScheduleCommands,
    },
    /// Run the worker loop
    Worker {
        #[command(subcommand)]
        command: WorkerCommands,
    },
    /// Database administration
    Db {
        #[command(subcommand)]
        command: DbCommands,
    },
}

#[derive(Subcommand)]
pub enum TicketCommands {
    /// Create a ticket from a workflow definition
    Create {
        /// Workflow key to instantiate (must be loadable from the workflows directory)
        #[arg(long)]
        workflow: String,
        /// Human-readable title
        #[arg(long)]
        title: Option<String>,
        /// JSON object passed as the ticket's workflow input
        #[arg(long)]
        input: Option<String>,
    },
    /// Show a ticket's summary
    Show {
        /// Ticket ID
        ticket_id: String,
    },
    /// List tickets
    List {
        #[arg(long, default_value_t = 50)]
        limit: i64,
    },
    /// Pause a ticket, halting new task claims
    Pause {
        /// Ticket ID
        ticket_id: String,
    },
    /// Resume a paused ticket
    Resume {
        /// Ticket ID
        ticket_id: String,
    },
    /// Mark a ticket as awaiting human approval
    RequestApproval {
        /// Ticket ID
        ticket_id: String,
        /// Optional note
        #[arg(long)]
        notes: Option<String>,
    },
    /// Approve a ticket awaiting approval
    Approve {
        /// Ticket ID
        ticket_id: String,
        /// Optional note
        #[arg(long)]
        notes: Option<String>,
    },
    /// Reject a ticket awaiting approval
    Reject {
        /// Ticket ID
        ticket_id: String,
        /// Optional note
        #[arg(long)]
        notes: Option<String>,
    },
    /// Manually advance a ticket's stage
    Transition {
        /// Ticket ID
        ticket_id: String,
        /// Target stage (omit to let the workflow's transition rules decide)
        #[arg(long)]
        target: Option<String>,
    },
}

#[derive(Subcommand)]
pub enum TaskCommands {
    /// Create a task under an existing ticket
    Create {
        /// Ticket ID the task belongs to
        ticket_id: String,
        /// Task key, unique within the ticket
        #[arg(long)]
        key: String,
        /// JSON object passed as the task payload
        #[arg(long)]
        payload: Option<String>,
        /// Task IDs this task depends on (must complete first)
        #[arg(long)]
        depends_on: Vec<i64>,
        /// Maximum retry attempts before dead-lettering
        #[arg(long, default_value_t = 5)]
        max_attempts: i32,
    },
    /// Show a task's current state
    Show {
        /// Task ID
        task_id: i64,
    },
}

#[derive(Subcommand)]
pub enum EventCommands {
    /// Publish an event to a ticket
    Publish {
        /// Ticket ID
        ticket_id: String,
        /// Event type
        #[arg(long = "type")]
        event_type: String,
        /// JSON object passed as the event payload
        #[arg(long)]
        payload: Option<String>,
    },
    /// List events recorded against a ticket
    List {
        /// Ticket ID
        ticket_id: String,
        #[arg(long, default_value_t = 50)]
        limit: i64,
    },
}

#[derive(Subcommand)]
pub enum ScheduleCommands {
    /// Create a recurring or one-shot schedule
    Create {
        /// Unique schedule key
        #[arg(long)]
        key: String,
        /// Workflow key to materialize on each fire
        #[arg(long)]
        workflow: String,
        /// Recurrence interval in seconds (omit for a one-shot schedule)
        #[arg(long)]
        interval_seconds: Option<i32>,
        /// Task key to create alongside the ticket on each fire
        #[arg(long)]
        task_key: Option<String>,
    },
    /// List schedules
    List {
        #[arg(long, default_value_t = 50)]
        limit: i64,
    },
    /// Pause a schedule
    Pause {
        /// Schedule key
        schedule_key: String,
    },
    /// Resume a paused schedule
    Resume {
        /// Schedule key
        schedule_key: String,
    },
    /// Fire a schedule immediately, ignoring its next_run_at
    Trigger {
        /// Schedule key
        schedule_key: String,
    },
}

#[derive(Subcommand)]
pub enum WorkerCommands {
    /// Run the worker loop
    Run {
        /// Worker identity recorded on claimed tasks (defaults to hostname-pid)
        #[arg(long)]
        worker_id: Option<String>,
        /// Process a single batch and exit instead of looping
        #[arg(long)]
        once: bool,
    },
}

#[derive(Subcommand)]
enum DbCommands {
    /// Create the database if needed and run pending migrations
    Migrate,
}

async fn cmd_db_migrate(cli_db_url: Option<&str>) -> anyhow::Result<()> {
    let resolved = StagehandConfig::resolve(cli_db_url);

    println!("Preparing stagehand database...");
    pool::ensure_database_exists(&resolved.db_config).await?;

    let db_pool = pool::create_pool(&resolved.db_config).await?;
    pool::run_migrations(&db_pool).await?;

    let counts = pool::table_counts(&db_pool).await?;
    println!("Database ready. Tables:");
    for (table, count) in &counts {
        println!("  {table}: {count} rows");
    }

    db_pool.close().await;
    println!("stagehand db migrate complete.");
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Db {
            command: DbCommands::Migrate,
        } => {
            cmd_db_migrate(cli.database_url.as_deref()).await?;
        }
        Commands::Ticket { command } => {
            let resolved = StagehandConfig::resolve(cli.database_url.as_deref());
            let db_pool = pool::create_pool(&resolved.db_config).await?;
            let result = ticket_cmds::run_ticket_command(command, &db_pool).await;
            db_pool.close().await;
            result?;
        }
        Commands::Task { command } => {
            let resolved = StagehandConfig::resolve(cli.database_url.as_deref());
            let db_pool = pool::create_pool(&resolved.db_config).await?;
            let result = task_cmds::run_task_command(command, &db_pool).await;
            db_pool.close().await;
            result?;
        }
        Commands::Event { command } => {
            let resolved = StagehandConfig::resolve(cli.database_url.as_deref());
            let db_pool = pool::create_pool(&resolved.db_config).await?;
            let result = event_cmds::run_event_command(command, &db_pool).await;
            db_pool.close().await;
            result?;
        }
        Commands::Schedule { command } => {
            let resolved = StagehandConfig::resolve(cli.database_url.as_deref());
            let db_pool = pool::create_pool(&resolved.db_config).await?;
            let result = schedule_cmds::run_schedule_command(command, &db_pool).await;
            db_pool.close().await;
            result?;
        }
        Commands::Worker {
            command: WorkerCommands::Run { worker_id, once },
        } => {
            let resolved = StagehandConfig::resolve(cli.database_url.as_deref());
            let db_pool = pool::create_pool(&resolved.db_config).await?;
            let result = worker_cmd::run_worker(&db_pool, worker_id.as_deref(), once).await;
            db_pool.close().await;
            result?;
        }
    }

    Ok(())
}
