// Process-local agent session
//
// Ties one agent process to the colony: registration, the periodic
// heartbeat loop, messaging, locking and direct task claims. Every
// operation other than `register` needs a live registration.

use serde_json::json;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn, Instrument};

use super::registry::Registry;
use super::types::{Agent, AgentStatus};
use crate::config::ColonyConfig;
use crate::error::{CoordinationError, CoordinationResult};
use crate::locks::{DistributedMutex, LockRecord};
use crate::messaging::{Message, MessageBus, MessageType};
use crate::store::RecordStore;
use crate::tasks::{Task, TaskBoard, TaskStatus};
use crate::telemetry::create_coordination_span;

struct Session {
    agent: Agent,
    bus: MessageBus,
    mutex: DistributedMutex,
    heartbeat: Option<HeartbeatLoop>,
}

/// Background heartbeat task; dropping the sender stops it
struct HeartbeatLoop {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl HeartbeatLoop {
    fn start(registry: Registry, bus: MessageBus, agent_id: String, every: Duration) -> Self {
        let (shutdown, mut stopped) = watch::channel(false);
        let span = create_coordination_span("heartbeat_loop", Some(&agent_id), None);

        let task = tokio::spawn(
            async move {
                let mut ticker = interval_at(Instant::now() + every, every);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

                loop {
                    tokio::select! {
                        _ = ticker.tick() => {
                            match beat(&registry, &bus, &agent_id).await {
                                Ok(_) => {}
                                Err(CoordinationError::NotRegistered(_)) => {
                                    warn!(agent_id = %agent_id, "Agent dropped from registry, stopping heartbeat");
                                    break;
                                }
                                Err(e) => warn!(agent_id = %agent_id, error = %e, "Heartbeat failed"),
                            }
                        }
                        changed = stopped.changed() => {
                            if changed.is_err() || *stopped.borrow() {
                                break;
                            }
                        }
                    }
                }
                debug!(agent_id = %agent_id, "Heartbeat loop stopped");
            }
            .instrument(span),
        );

        Self { shutdown, task }
    }

    async fn stop(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            warn!(error = %e, "Heartbeat task ended abnormally");
        }
    }
}

/// Registry heartbeat plus the secondary `heartbeat` message
async fn beat(registry: &Registry, bus: &MessageBus, agent_id: &str) -> CoordinationResult<Agent> {
    let agent = registry.heartbeat(agent_id).await?;
    let payload = json!({ "status": agent.status, "current_task": agent.current_task });
    if let Err(e) = bus.send(MessageType::Heartbeat, payload, None).await {
        debug!(agent_id = %agent_id, error = %e, "Heartbeat message not sent");
    }
    Ok(agent)
}

pub struct AgentCoordinator {
    store: Arc<dyn RecordStore>,
    config: ColonyConfig,
    registry: Registry,
    board: TaskBoard,
    session: Option<Session>,
}

impl AgentCoordinator {
    pub fn new(store: Arc<dyn RecordStore>, config: ColonyConfig) -> Self {
        let registry = Registry::new(store.clone(), config.registry.clone());
        let board = TaskBoard::new(store.clone(), config.registry.retry_policy());
        Self {
            store,
            config,
            registry,
            board,
            session: None,
        }
    }

    /// Register this process and start heartbeating.
    ///
    /// Registering an already registered session returns the current agent.
    pub async fn register(&mut self, role: Option<&str>) -> CoordinationResult<Agent> {
        if let Some(session) = &self.session {
            warn!(agent_id = %session.agent.id, "Session already registered");
            return Ok(session.agent.clone());
        }

        let agent = self.registry.register(role).await?;
        let bus = MessageBus::new(self.store.clone(), self.config.bus.clone(), &agent.id);
        let mutex = DistributedMutex::new(self.store.clone(), self.config.locks.clone(), &agent.id);
        let heartbeat = Some(HeartbeatLoop::start(
            self.registry.clone(),
            bus.clone(),
            agent.id.clone(),
            self.config.registry.heartbeat_interval(),
        ));

        info!(
            agent_id = %agent.id,
            heartbeat_secs = self.config.registry.heartbeat_interval_secs,
            "Agent session started"
        );
        self.session = Some(Session {
            agent: agent.clone(),
            bus,
            mutex,
            heartbeat,
        });
        Ok(agent)
    }

    /// Act as an agent registered by another process, without a heartbeat
    /// loop. Used by one-shot commands that pass the agent id along.
    pub async fn attach(&mut self, agent_id: &str) -> CoordinationResult<Agent> {
        let agent = self
            .registry
            .get(agent_id)
            .await?
            .ok_or_else(|| CoordinationError::NotRegistered(agent_id.to_string()))?;
        if let Some(previous) = self.session.take() {
            if let Some(heartbeat) = previous.heartbeat {
                heartbeat.stop().await;
            }
        }

        debug!(agent_id = %agent.id, "Attached to registered agent");
        self.session = Some(Session {
            bus: MessageBus::new(self.store.clone(), self.config.bus.clone(), &agent.id),
            mutex: DistributedMutex::new(self.store.clone(), self.config.locks.clone(), &agent.id),
            agent: agent.clone(),
            heartbeat: None,
        });
        Ok(agent)
    }

    /// Stop heartbeating and leave the registry
    pub async fn unregister(&mut self) -> CoordinationResult<bool> {
        let session = self.session.take().ok_or_else(not_registered)?;
        if let Some(heartbeat) = session.heartbeat {
            heartbeat.stop().await;
        }
        self.registry.unregister(&session.agent.id).await
    }

    pub fn is_registered(&self) -> bool {
        self.session.is_some()
    }

    pub fn agent_id(&self) -> CoordinationResult<&str> {
        Ok(&self.session()?.agent.id)
    }

    fn session(&self) -> CoordinationResult<&Session> {
        self.session.as_ref().ok_or_else(not_registered)
    }

    pub async fn heartbeat(&self) -> CoordinationResult<Agent> {
        let session = self.session()?;
        beat(&self.registry, &session.bus, &session.agent.id).await
    }

    pub async fn update_status(
        &self,
        status: AgentStatus,
        current_task: Option<String>,
    ) -> CoordinationResult<Agent> {
        let session = self.session()?;
        self.registry
            .update_status(&session.agent.id, status, current_task)
            .await
    }

    pub async fn send(
        &self,
        kind: MessageType,
        payload: serde_json::Value,
        to: Option<&str>,
    ) -> CoordinationResult<Message> {
        self.session()?.bus.send(kind, payload, to).await
    }

    pub async fn read_messages(
        &self,
        since: Option<chrono::DateTime<chrono::Utc>>,
    ) -> CoordinationResult<Vec<Message>> {
        self.session()?.bus.read_messages(since).await
    }

    pub async fn mark_read(&self, ids: &[String]) -> CoordinationResult<usize> {
        self.session()?.bus.mark_read(ids).await
    }

    pub async fn acquire(&self, resource: &str, timeout: Option<Duration>) -> CoordinationResult<LockRecord> {
        self.session()?.mutex.acquire(resource, timeout).await
    }

    pub async fn release(&self, resource: &str) -> CoordinationResult<bool> {
        self.session()?.mutex.release(resource).await
    }

    pub async fn with_lock<F, Fut, T>(
        &self,
        resource: &str,
        timeout: Option<Duration>,
        work: F,
    ) -> CoordinationResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        self.session()?.mutex.with_lock(resource, timeout, work).await
    }

    /// Claim a specific pending task and start working on it
    pub async fn claim_task(&self, task_id: &str) -> CoordinationResult<Task> {
        let session = self.session()?;
        let task = self.board.claim(task_id, &session.agent.id).await?;
        self.start_work(session, &task).await?;
        Ok(task)
    }

    /// Claim the most urgent pending task, preferring this agent's role
    pub async fn claim_next(&self) -> CoordinationResult<Option<Task>> {
        let session = self.session()?;
        let claimed = self
            .board
            .claim_next(&session.agent.id, session.agent.role.as_deref())
            .await?;
        if let Some(task) = &claimed {
            self.start_work(session, task).await?;
        }
        Ok(claimed)
    }

    /// Resolve a task and go back to idle
    pub async fn finish_task(
        &self,
        task_id: &str,
        status: TaskStatus,
        note: Option<String>,
    ) -> CoordinationResult<Task> {
        let session = self.session()?;
        let task = self.board.resolve(task_id, status, note).await?;
        self.registry
            .update_status(&session.agent.id, AgentStatus::Idle, None)
            .await?;
        let payload = json!({ "task_id": task.id, "status": task.status });
        session
            .bus
            .send(MessageType::TaskComplete, payload, None)
            .await?;
        Ok(task)
    }

    async fn start_work(&self, session: &Session, task: &Task) -> CoordinationResult<()> {
        self.registry
            .update_status(&session.agent.id, AgentStatus::Working, Some(task.id.clone()))
            .await?;
        let payload = json!({ "task_id": task.id, "title": task.title });
        session
            .bus
            .send(MessageType::TaskClaim, payload, None)
            .await?;
        Ok(())
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn board(&self) -> &TaskBoard {
        &self.board
    }
}

fn not_registered() -> CoordinationError {
    CoordinationError::NotRegistered("<this session>".to_string())
}
