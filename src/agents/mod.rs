// Agent membership, liveness and work assignment over the shared store
// The registry record is the single source of truth for who is alive

pub mod coordinator;
pub mod health;
pub mod process_manager;
pub mod registry;
pub mod router;
pub mod routing;
pub mod types;

pub use coordinator::AgentCoordinator;
pub use health::{classify, AgentHealth, HealthIssue, HealthMonitor, HealthReport, HealthTier};
pub use process_manager::{CommandLauncher, WorkerLauncher, WorkerSpec};
pub use registry::Registry;
pub use router::{AgentRouter, RouterStats};
pub use routing::RoutingDecision;
pub use types::{generate_agent_id, Agent, AgentRegistry, AgentStatus};
