// Colony Library - serverless coordination for cooperating agent processes
// This exposes the core components for testing and integration

pub mod agents;
pub mod cli;
pub mod config;
pub mod error;
pub mod locks;
pub mod messaging;
pub mod observability;
pub mod priority;
pub mod shutdown;
pub mod store;
pub mod tasks;
pub mod telemetry;

// Re-export key types for easy access
pub use agents::{
    AgentCoordinator, AgentHealth, AgentRouter, HealthMonitor, HealthReport, HealthTier, Registry,
    RouterStats, RoutingDecision,
};
pub use agents::{Agent, AgentRegistry, AgentStatus};
pub use config::ColonyConfig;
pub use error::{CoordinationError, CoordinationResult, OperationOutcome};
pub use locks::{DistributedMutex, LockRecord};
pub use messaging::{ArchiveIndexEntry, Message, MessageBus, MessageType};
pub use observability::{coordination_metrics, CoordinationMetrics, OperationTimer};
pub use priority::Priority;
pub use shutdown::ShutdownCoordinator;
pub use store::{FileStore, MemoryStore, RecordStore, StoreError};
pub use tasks::{Task, TaskBoard, TaskStatus};
pub use telemetry::{create_coordination_span, generate_correlation_id, init_telemetry, shutdown_telemetry};
