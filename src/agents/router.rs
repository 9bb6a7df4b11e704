// Pending tasks → agent assignment, worker spawning and queue statistics

use chrono::Utc;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::agents::process_manager::{CommandLauncher, WorkerLauncher, WorkerSpec};
use crate::agents::registry::Registry;
use crate::agents::routing::{
    AssignmentOperations, CandidateFilter, RoutingCoordinator, RoutingDecision, RoutingDecisions,
};
use crate::agents::types::AgentStatus;
use crate::config::ColonyConfig;
use crate::error::CoordinationResult;
use crate::messaging::MessageBus;
use crate::store::RecordStore;
use crate::tasks::{TaskBoard, TaskStatus};

/// Sender id used for router notifications when no agent identity is given
pub const ROUTER_SENDER: &str = "colony-router";

#[derive(Debug, Clone, Serialize)]
pub struct RouterStats {
    pub tasks_by_status: BTreeMap<TaskStatus, usize>,
    pub registered_agents: usize,
    pub live_agents: usize,
    pub available_agents: usize,
    pub agents_by_status: BTreeMap<AgentStatus, usize>,
}

impl RouterStats {
    pub fn pending_tasks(&self) -> usize {
        self.tasks_by_status
            .get(&TaskStatus::Pending)
            .copied()
            .unwrap_or_default()
    }
}

pub struct AgentRouter {
    routing_coordinator: RoutingCoordinator,
    registry: Registry,
    board: TaskBoard,
    launcher: Arc<dyn WorkerLauncher>,
    config: ColonyConfig,
}

impl AgentRouter {
    /// Router sending notifications as `sender_id`
    pub fn new(store: Arc<dyn RecordStore>, config: ColonyConfig, sender_id: Option<&str>) -> Self {
        let registry = Registry::new(store.clone(), config.registry.clone());
        let board = TaskBoard::new(store.clone(), config.registry.retry_policy());
        let bus = MessageBus::new(store, config.bus.clone(), sender_id.unwrap_or(ROUTER_SENDER));

        let routing_coordinator = RoutingCoordinator::new(
            AssignmentOperations::new(board.clone(), bus),
            CandidateFilter::new(config.routing.availability_window()),
            RoutingDecisions::new(config.routing.clone()),
        );

        Self {
            routing_coordinator,
            registry,
            board,
            launcher: Arc::new(CommandLauncher),
            config,
        }
    }

    pub fn with_launcher(mut self, launcher: Arc<dyn WorkerLauncher>) -> Self {
        self.launcher = launcher;
        self
    }

    /// Assign pending tasks to available agents
    pub async fn route(&self) -> CoordinationResult<Vec<RoutingDecision>> {
        self.routing_coordinator
            .route(&self.registry, &self.board)
            .await
    }

    /// Launch workers while pending tasks outnumber available agents, up to
    /// the configured ceiling on live agents. Returns the spawned pids.
    pub async fn spawn_workers(&self) -> CoordinationResult<Vec<u32>> {
        let Some(command) = self.config.routing.worker_command.clone() else {
            debug!("No worker command configured, not spawning");
            return Ok(Vec::new());
        };

        let stats = self.get_stats().await?;
        let shortfall = stats.pending_tasks().saturating_sub(stats.available_agents);
        let headroom = self.config.routing.max_workers.saturating_sub(stats.live_agents);
        let wanted = shortfall.min(headroom);

        if wanted == 0 {
            debug!(
                pending = stats.pending_tasks(),
                available = stats.available_agents,
                live = stats.live_agents,
                "No workers needed"
            );
            return Ok(Vec::new());
        }

        let spec = WorkerSpec {
            command,
            args: self.config.routing.worker_args.clone(),
            store_root: absolute(&self.config.store.root),
            role: self.config.routing.worker_role.clone(),
        };

        let mut pids = Vec::with_capacity(wanted);
        for _ in 0..wanted {
            match self.launcher.launch(&spec).await {
                Ok(pid) => pids.push(pid),
                Err(e) => {
                    warn!(error = %e, "Stopping worker spawning after launch failure");
                    if pids.is_empty() {
                        return Err(e);
                    }
                    break;
                }
            }
        }

        info!(spawned = pids.len(), wanted, "Spawned worker processes");
        Ok(pids)
    }

    pub async fn get_stats(&self) -> CoordinationResult<RouterStats> {
        let now = Utc::now();
        let tasks = self.board.list(None).await?;
        let snapshot = self.registry.snapshot().await?;

        let mut tasks_by_status = BTreeMap::new();
        for status in TaskStatus::ALL {
            tasks_by_status.insert(status, 0);
        }
        for task in &tasks {
            *tasks_by_status.entry(task.status).or_default() += 1;
        }

        let live = snapshot.active_within(self.config.registry.liveness_window(), now);
        let mut agents_by_status = BTreeMap::new();
        for agent in &live {
            *agents_by_status.entry(agent.status).or_default() += 1;
        }

        Ok(RouterStats {
            tasks_by_status,
            registered_agents: snapshot.agents.len(),
            live_agents: live.len(),
            available_agents: self
                .routing_coordinator
                .candidate_filter
                .available_agents(&snapshot, now)
                .len(),
            agents_by_status,
        })
    }
}

fn absolute(path: &std::path::Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::process_manager::MockWorkerLauncher;
    use crate::messaging::MessageType;
    use crate::priority::Priority;
    use crate::store::MemoryStore;
    use crate::tasks::Task;

    struct Fixture {
        store: MemoryStore,
        registry: Registry,
        board: TaskBoard,
        config: ColonyConfig,
    }

    fn fixture() -> Fixture {
        let store = MemoryStore::new();
        let config = ColonyConfig::default();
        Fixture {
            registry: Registry::new(Arc::new(store.clone()), config.registry.clone()),
            board: TaskBoard::new(Arc::new(store.clone()), config.registry.retry_policy()),
            store,
            config,
        }
    }

    impl Fixture {
        fn router(&self) -> AgentRouter {
            AgentRouter::new(Arc::new(self.store.clone()), self.config.clone(), None)
        }
    }

    #[tokio::test]
    async fn test_route_assigns_and_notifies() {
        let f = fixture();
        let worker = f.registry.register(Some("worker")).await.unwrap();
        f.registry
            .update_status(&worker.id, AgentStatus::Idle, None)
            .await
            .unwrap();
        let general = f.registry.register(Some("general")).await.unwrap();

        let critical = f
            .board
            .create(
                Task::new("fix outage")
                    .with_priority(Priority::Critical)
                    .with_tags(["worker"]),
            )
            .await
            .unwrap();
        let low = f
            .board
            .create(Task::new("tidy docs").with_priority(Priority::Low))
            .await
            .unwrap();

        let decisions = f.router().route().await.unwrap();
        assert_eq!(decisions.len(), 2);
        assert_eq!(decisions[0].task_id, critical.id);
        assert_eq!(decisions[0].agent_id, worker.id);
        assert_eq!(decisions[1].task_id, low.id);
        assert_eq!(decisions[1].agent_id, general.id);

        let stored = f.board.get(&critical.id).await.unwrap();
        assert_eq!(stored.status, TaskStatus::InProgress);
        assert_eq!(stored.assigned_to.as_deref(), Some(worker.id.as_str()));

        let inbox = MessageBus::new(Arc::new(f.store.clone()), f.config.bus.clone(), &worker.id)
            .read_messages(None)
            .await
            .unwrap();
        assert_eq!(inbox.len(), 1);
        assert_eq!(inbox[0].kind, MessageType::TaskAvailable);
        assert_eq!(inbox[0].payload["task_id"], critical.id);

        // Nothing is left to route
        assert!(f.router().route().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_route_skips_busy_agents() {
        let f = fixture();
        let agent = f.registry.register(None).await.unwrap();
        f.registry
            .update_status(&agent.id, AgentStatus::Working, Some("other".to_string()))
            .await
            .unwrap();
        f.board.create(Task::new("t")).await.unwrap();

        assert!(f.router().route().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_stats() {
        let f = fixture();
        f.registry.register(None).await.unwrap();
        let busy = f.registry.register(None).await.unwrap();
        f.registry
            .update_status(&busy.id, AgentStatus::Working, None)
            .await
            .unwrap();
        let task = f.board.create(Task::new("a")).await.unwrap();
        f.board.create(Task::new("b")).await.unwrap();
        f.board.claim(&task.id, &busy.id).await.unwrap();

        let stats = f.router().get_stats().await.unwrap();
        assert_eq!(stats.pending_tasks(), 1);
        assert_eq!(stats.tasks_by_status[&TaskStatus::InProgress], 1);
        assert_eq!(stats.tasks_by_status[&TaskStatus::Completed], 0);
        assert_eq!(stats.live_agents, 2);
        assert_eq!(stats.available_agents, 1);
        assert_eq!(stats.agents_by_status[&AgentStatus::Working], 1);
    }

    #[tokio::test]
    async fn test_spawn_workers_fills_shortfall_up_to_ceiling() {
        let mut f = fixture();
        f.config.routing.worker_command = Some("colony-worker".to_string());
        f.config.routing.max_workers = 3;
        f.registry.register(None).await.unwrap();
        for i in 0..6 {
            f.board.create(Task::new(&format!("task {i}"))).await.unwrap();
        }

        let mut launcher = MockWorkerLauncher::new();
        launcher
            .expect_launch()
            .withf(|spec| spec.command == "colony-worker" && spec.role == "worker")
            .times(2)
            .returning(|_| Ok(4242));

        let pids = f
            .router()
            .with_launcher(Arc::new(launcher))
            .spawn_workers()
            .await
            .unwrap();
        assert_eq!(pids, vec![4242, 4242]);
    }

    #[tokio::test]
    async fn test_spawn_workers_without_command_is_noop() {
        let f = fixture();
        f.board.create(Task::new("t")).await.unwrap();

        let mut launcher = MockWorkerLauncher::new();
        launcher.expect_launch().never();

        let pids = f
            .router()
            .with_launcher(Arc::new(launcher))
            .spawn_workers()
            .await
            .unwrap();
        assert!(pids.is_empty());
    }
}
