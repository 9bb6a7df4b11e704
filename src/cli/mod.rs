use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::agents::AgentStatus;
use crate::messaging::MessageType;
use crate::priority::Priority;
use crate::tasks::TaskStatus;

pub mod commands;

#[derive(Parser, Debug)]
#[command(name = "colony")]
#[command(about = "Serverless coordination for cooperating agent processes")]
#[command(long_about = "Colony lets independent agent processes coordinate through a shared directory: \
                       a registry of live agents, a message bus, advisory locks and a task queue. \
                       Start an agent with 'colony run' and feed it work with 'colony task add'.")]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Args, Debug, Clone)]
pub struct GlobalArgs {
    /// Shared store directory
    #[arg(long, global = true, env = "COLONY_ROOT", help = "Shared store directory (defaults to the configured root)")]
    pub root: Option<PathBuf>,

    /// Agent acting for per-agent commands
    #[arg(long, global = true, env = "COLONY_AGENT_ID", help = "Id of the registered agent to act as")]
    pub agent: Option<String>,

    /// Print a JSON result object instead of human output
    #[arg(long, global = true, help = "Print {success, reason, data} JSON instead of human output")]
    pub json: bool,

    /// Show info-level logs on stderr
    #[arg(long, short = 'v', global = true, help = "Show info-level logs on stderr")]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Register a new agent and print its id
    Register {
        /// Role advertised to the router
        #[arg(long, env = "COLONY_ROLE", help = "Role matched against task tags during routing")]
        role: Option<String>,
    },
    /// Remove the acting agent from the registry
    Unregister,
    /// Refresh the acting agent's heartbeat
    Heartbeat,
    /// Set the acting agent's status
    Status {
        /// New status: active, idle, working or blocked
        status: AgentStatus,
        /// Task the agent is working on
        #[arg(long, help = "Task the agent is working on")]
        task: Option<String>,
    },
    /// List live agents
    Agents {
        /// Only agents that heartbeated within this many seconds
        #[arg(long, value_parser = commands::parse_window, help = "Window in seconds (defaults to the liveness window)")]
        within: Option<chrono::Duration>,
    },
    /// Health tiers and cleanup of dead agents
    Health {
        #[command(subcommand)]
        action: Option<HealthAction>,
    },
    /// Send a message from the acting agent
    Send {
        /// JSON payload; anything that is not JSON is sent as a string
        payload: String,
        /// Recipient agent id; omit to broadcast
        #[arg(long, help = "Recipient agent id (broadcast when omitted)")]
        to: Option<String>,
        /// Message type
        #[arg(long = "type", default_value = "broadcast", help = "Message type, e.g. broadcast, direct, request_help")]
        kind: MessageType,
    },
    /// Show unread messages for the acting agent
    Read {
        /// Only messages newer than this RFC 3339 timestamp
        #[arg(long, value_parser = commands::parse_timestamp, help = "Only messages newer than this RFC 3339 timestamp")]
        since: Option<chrono::DateTime<chrono::Utc>>,
        /// Mark everything shown as read
        #[arg(long, help = "Mark the shown messages as read")]
        mark: bool,
    },
    /// Mark messages as read by the acting agent
    MarkRead {
        /// Message ids
        #[arg(required = true)]
        ids: Vec<String>,
    },
    /// Message log maintenance
    Bus {
        #[command(subcommand)]
        action: BusAction,
    },
    /// Advisory locks on named resources
    Lock {
        #[command(subcommand)]
        action: LockAction,
    },
    /// Shared task queue
    Task {
        #[command(subcommand)]
        action: TaskAction,
    },
    /// Assign pending tasks to available agents
    Route,
    /// Launch worker processes when pending work outnumbers available agents
    SpawnWorkers,
    /// Task and agent counts for the colony
    Stats,
    /// Run as a long-lived agent until Ctrl-C
    Run {
        /// Role advertised to the router
        #[arg(long, env = "COLONY_ROLE", help = "Role matched against task tags during routing")]
        role: Option<String>,
        /// Also route pending tasks every N seconds
        #[arg(long, help = "Route pending tasks every N seconds while running")]
        route_every: Option<u64>,
    },
}

#[derive(Subcommand, Debug, Clone)]
pub enum HealthAction {
    /// Tier of every registered agent
    Status,
    /// Tier of one agent
    Check {
        agent_id: String,
    },
    /// Remove dead agents from the registry
    Cleanup,
}

#[derive(Subcommand, Debug, Clone)]
pub enum BusAction {
    /// Archive the live log now if it is over its thresholds
    Rotate {
        /// Archive even when below the thresholds
        #[arg(long, help = "Archive even when the log is below its thresholds")]
        force: bool,
    },
    /// Prune heartbeat messages per sender
    Compact,
    /// Drop messages past their retention age
    Cleanup,
    /// List archived logs
    Archives,
    /// Show the last messages of the live log
    Tail {
        #[arg(long, short = 'n', default_value = "20", help = "Number of messages to show")]
        limit: usize,
    },
}

#[derive(Subcommand, Debug, Clone)]
pub enum LockAction {
    /// Acquire a resource for the acting agent
    Acquire {
        resource: String,
        /// Give up after this many milliseconds
        #[arg(long, help = "Give up after this many milliseconds (defaults to the configured timeout)")]
        timeout_ms: Option<u64>,
    },
    /// Release a resource held by the acting agent
    Release {
        resource: String,
    },
    /// List held locks
    List,
}

#[derive(Subcommand, Debug, Clone)]
pub enum TaskAction {
    /// Add a task to the queue
    Add {
        title: String,
        #[arg(long, short = 'd', default_value = "", help = "Longer description of the work")]
        description: String,
        #[arg(long, short = 'p', default_value = "medium", help = "Priority: critical, high, medium or low")]
        priority: Priority,
        /// Tags, matched against agent roles
        #[arg(long = "tag", short = 't', help = "Tag matched against agent roles (repeatable)")]
        tags: Vec<String>,
    },
    /// List tasks
    List {
        #[arg(long, help = "Only tasks with this status")]
        status: Option<TaskStatus>,
    },
    /// Claim a task for the acting agent; the most urgent one when no id is given
    Claim {
        task_id: Option<String>,
    },
    /// Mark a task completed
    Complete {
        task_id: String,
        #[arg(long, help = "Resolution note")]
        note: Option<String>,
    },
    /// Mark a task blocked
    Block {
        task_id: String,
        #[arg(long, help = "Why the task is blocked")]
        note: Option<String>,
    },
    /// Cancel a task
    Cancel {
        task_id: String,
        #[arg(long, help = "Why the task was cancelled")]
        note: Option<String>,
    },
}
