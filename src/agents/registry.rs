// Agent membership over the shared registry record
//
// Every write is a read / compare-and-swap cycle that bumps `lock_version`.
// Nobody blocks: a writer that loses the race re-reads and tries again.

use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info, warn, Instrument};

use super::types::{Agent, AgentRegistry, AgentStatus};
use crate::config::RegistryConfig;
use crate::error::{CoordinationError, CoordinationResult};
use crate::observability::coordination_metrics;
use crate::store::{decode_record, keys, update_record, update_record_when, RecordStore, RetryPolicy};
use crate::telemetry::create_coordination_span;

#[derive(Clone)]
pub struct Registry {
    store: Arc<dyn RecordStore>,
    config: RegistryConfig,
}

impl Registry {
    pub fn new(store: Arc<dyn RecordStore>, config: RegistryConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Register a new agent for the current process
    pub async fn register(&self, role: Option<&str>) -> CoordinationResult<Agent> {
        self.register_agent(Agent::new(role)).await
    }

    /// Insert `agent`, evicting members silent for longer than the
    /// liveness window in the same write.
    pub async fn register_agent(&self, agent: Agent) -> CoordinationResult<Agent> {
        let span = create_coordination_span("register", Some(&agent.id), None);
        let window = self.config.liveness_window();
        let policy = self.config.retry_policy();

        async {
            let result = update_record(
                self.store.as_ref(),
                keys::REGISTRY,
                &policy,
                |registry: &mut AgentRegistry| {
                    let evicted = registry.evict_older_than(window, Utc::now());
                    registry.agents.insert(agent.id.clone(), agent.clone());
                    registry.bump();
                    Ok(evicted)
                },
            )
            .await;

            match result {
                Ok((registry, evicted)) => {
                    coordination_metrics().record_registration();
                    if !evicted.is_empty() {
                        info!(evicted = ?evicted, "Evicted agents past the liveness window");
                    }
                    info!(
                        agent_id = %agent.id,
                        role = agent.role.as_deref().unwrap_or("-"),
                        lock_version = registry.lock_version,
                        members = registry.agents.len(),
                        "Agent registered"
                    );
                    Ok(agent.clone())
                }
                Err(CoordinationError::VersionConflict { attempts, .. }) => {
                    coordination_metrics().record_registry_write_failure();
                    warn!(agent_id = %agent.id, attempts, "Registration lost every registry race");
                    Err(CoordinationError::RegistrationFailed { attempts })
                }
                Err(e) => Err(e),
            }
        }
        .instrument(span)
        .await
    }

    /// Remove an agent. Returns whether it was still registered.
    pub async fn unregister(&self, agent_id: &str) -> CoordinationResult<bool> {
        let result = self
            .modify(agent_id, |registry| {
                registry
                    .agents
                    .remove(agent_id)
                    .ok_or_else(|| CoordinationError::NotRegistered(agent_id.to_string()))
            })
            .await;

        match result {
            Ok(_) => {
                info!(agent_id = %agent_id, "Agent unregistered");
                Ok(true)
            }
            Err(CoordinationError::NotRegistered(_)) => {
                debug!(agent_id = %agent_id, "Agent already gone from registry");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Refresh the agent's heartbeat timestamp
    pub async fn heartbeat(&self, agent_id: &str) -> CoordinationResult<Agent> {
        let agent = self
            .update_agent(agent_id, |agent| {
                agent.last_heartbeat = Utc::now();
            })
            .await?;
        debug!(agent_id = %agent_id, "Heartbeat recorded");
        Ok(agent)
    }

    /// Set status and current task together, refreshing the heartbeat
    pub async fn update_status(
        &self,
        agent_id: &str,
        status: AgentStatus,
        current_task: Option<String>,
    ) -> CoordinationResult<Agent> {
        let agent = self
            .update_agent(agent_id, |agent| {
                agent.status = status;
                agent.current_task = current_task.clone();
                agent.last_heartbeat = Utc::now();
            })
            .await?;
        info!(agent_id = %agent_id, status = %status, "Agent status updated");
        Ok(agent)
    }

    /// Agents that heartbeated within `window`, defaulting to the liveness window
    pub async fn list_active(&self, window: Option<chrono::Duration>) -> CoordinationResult<Vec<Agent>> {
        let window = window.unwrap_or_else(|| self.config.liveness_window());
        Ok(self.snapshot().await?.active_within(window, Utc::now()))
    }

    pub async fn get(&self, agent_id: &str) -> CoordinationResult<Option<Agent>> {
        Ok(self.snapshot().await?.agents.remove(agent_id))
    }

    pub async fn snapshot(&self) -> CoordinationResult<AgentRegistry> {
        let raw = self.store.read(keys::REGISTRY).await?;
        Ok(decode_record(keys::REGISTRY, raw.as_deref()))
    }

    /// Remove every agent matching `predicate` in one write.
    ///
    /// Nothing is written when no agent matches, including when a
    /// concurrent writer removed them first.
    pub(crate) async fn remove_matching<P>(
        &self,
        policy: &RetryPolicy,
        predicate: P,
    ) -> CoordinationResult<Vec<String>>
    where
        P: Fn(&Agent) -> bool + Send + Sync,
    {
        let snapshot = self.snapshot().await?;
        if !snapshot.agents.values().any(&predicate) {
            return Ok(Vec::new());
        }

        let (_, removed) = update_record_when(
            self.store.as_ref(),
            keys::REGISTRY,
            policy,
            |doomed: &Vec<String>| !doomed.is_empty(),
            |registry: &mut AgentRegistry| {
                let doomed: Vec<String> = registry
                    .agents
                    .values()
                    .filter(|agent| predicate(agent))
                    .map(|agent| agent.id.clone())
                    .collect();
                if !doomed.is_empty() {
                    for id in &doomed {
                        registry.agents.remove(id);
                    }
                    registry.bump();
                }
                Ok(doomed)
            },
        )
        .await?;
        Ok(removed)
    }

    async fn update_agent<F>(&self, agent_id: &str, mut apply: F) -> CoordinationResult<Agent>
    where
        F: FnMut(&mut Agent) + Send,
    {
        self.modify(agent_id, |registry| {
            let agent = registry
                .agents
                .get_mut(agent_id)
                .ok_or_else(|| CoordinationError::NotRegistered(agent_id.to_string()))?;
            apply(agent);
            Ok(agent.clone())
        })
        .await
    }

    /// Self-update of one agent's entry with bounded retry
    async fn modify<R, F>(&self, agent_id: &str, mut apply: F) -> CoordinationResult<R>
    where
        R: Send,
        F: FnMut(&mut AgentRegistry) -> CoordinationResult<R> + Send,
    {
        let result = update_record(
            self.store.as_ref(),
            keys::REGISTRY,
            &self.config.retry_policy(),
            |registry: &mut AgentRegistry| {
                let outcome = apply(registry)?;
                registry.bump();
                Ok(outcome)
            },
        )
        .await;

        match result {
            Ok((_, outcome)) => Ok(outcome),
            Err(CoordinationError::VersionConflict { attempts, .. }) => {
                coordination_metrics().record_registry_write_failure();
                Err(CoordinationError::UpdateFailed {
                    agent_id: agent_id.to_string(),
                    attempts,
                })
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ColonyConfig;
    use crate::store::{encode_record, MemoryStore, MockRecordStore};
    use std::collections::HashSet;

    fn registry_with(store: Arc<dyn RecordStore>) -> Registry {
        let mut config = ColonyConfig::default().registry;
        config.base_delay_ms = 1;
        Registry::new(store, config)
    }

    async fn seed(store: &MemoryStore, agents: Vec<Agent>, lock_version: u64) {
        let mut registry = AgentRegistry {
            lock_version,
            ..AgentRegistry::default()
        };
        for agent in agents {
            registry.agents.insert(agent.id.clone(), agent);
        }
        store
            .write(keys::REGISTRY, &encode_record(&registry).unwrap())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_register_bumps_version() {
        let store = MemoryStore::new();
        let registry = registry_with(Arc::new(store.clone()));

        let agent = registry.register(Some("worker")).await.unwrap();
        let snapshot = registry.snapshot().await.unwrap();

        assert_eq!(snapshot.lock_version, 1);
        assert_eq!(snapshot.agents.get(&agent.id).unwrap().role.as_deref(), Some("worker"));
        assert!(snapshot.last_updated.is_some());
    }

    #[tokio::test]
    async fn test_register_evicts_silent_agents() {
        let store = MemoryStore::new();
        let mut ghost = Agent::new(None);
        ghost.last_heartbeat = Utc::now() - chrono::Duration::seconds(3600);
        seed(&store, vec![ghost.clone()], 7).await;

        let registry = registry_with(Arc::new(store.clone()));
        let agent = registry.register(None).await.unwrap();
        let snapshot = registry.snapshot().await.unwrap();

        assert!(!snapshot.agents.contains_key(&ghost.id));
        assert!(snapshot.agents.contains_key(&agent.id));
        assert_eq!(snapshot.lock_version, 8);
    }

    #[tokio::test]
    async fn test_concurrent_registrations_are_all_kept() {
        let store = Arc::new(MemoryStore::new());
        let mut config = ColonyConfig::default().registry;
        config.max_attempts = 64;
        config.base_delay_ms = 1;
        let registry = Registry::new(store.clone(), config);

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let registry = registry.clone();
                tokio::spawn(async move { registry.register(None).await })
            })
            .collect();

        let mut ids = HashSet::new();
        for result in futures::future::join_all(handles).await {
            ids.insert(result.unwrap().unwrap().id);
        }

        let snapshot = registry.snapshot().await.unwrap();
        assert_eq!(ids.len(), 16);
        assert_eq!(snapshot.agents.len(), 16);
        assert_eq!(snapshot.lock_version, 16);
    }

    #[tokio::test]
    async fn test_register_reports_failure_after_conflicts() {
        let mut mock = MockRecordStore::new();
        mock.expect_read().returning(|_| Ok(None));
        mock.expect_compare_and_swap().returning(|_, _, _| Ok(false));

        let registry = registry_with(Arc::new(mock));
        let err = registry.register(None).await.unwrap_err();
        assert!(matches!(err, CoordinationError::RegistrationFailed { attempts: 5 }));
    }

    #[tokio::test]
    async fn test_self_updates() {
        let registry = registry_with(Arc::new(MemoryStore::new()));
        let agent = registry.register(None).await.unwrap();

        let updated = registry
            .update_status(&agent.id, AgentStatus::Working, Some("task-1".to_string()))
            .await
            .unwrap();
        assert_eq!(updated.status, AgentStatus::Working);
        assert_eq!(updated.current_task.as_deref(), Some("task-1"));

        let beat = registry.heartbeat(&agent.id).await.unwrap();
        assert!(beat.last_heartbeat >= updated.last_heartbeat);
        assert_eq!(beat.status, AgentStatus::Working);
        assert_eq!(registry.snapshot().await.unwrap().lock_version, 3);
    }

    #[tokio::test]
    async fn test_updates_on_unknown_agent() {
        let registry = registry_with(Arc::new(MemoryStore::new()));
        let err = registry.heartbeat("agent-ghost").await.unwrap_err();
        assert!(matches!(err, CoordinationError::NotRegistered(_)));
        assert_eq!(registry.snapshot().await.unwrap().lock_version, 0);
    }

    #[tokio::test]
    async fn test_self_update_conflicts_become_update_failed() {
        let existing = {
            let mut registry = AgentRegistry::default();
            let agent = Agent {
                id: "agent-1".to_string(),
                ..Agent::new(None)
            };
            registry.agents.insert(agent.id.clone(), agent);
            encode_record(&registry).unwrap()
        };

        let mut mock = MockRecordStore::new();
        mock.expect_read()
            .returning(move |_| Ok(Some(existing.clone())));
        mock.expect_compare_and_swap().returning(|_, _, _| Ok(false));

        let registry = registry_with(Arc::new(mock));
        let err = registry.heartbeat("agent-1").await.unwrap_err();
        assert!(matches!(err, CoordinationError::UpdateFailed { .. }));
    }

    #[tokio::test]
    async fn test_remove_matching_skips_write_when_already_removed() {
        let mut dead = Agent::new(None);
        dead.last_heartbeat = Utc::now() - chrono::Duration::hours(2);
        let dead_id = dead.id.clone();
        let before = {
            let mut registry = AgentRegistry::default();
            registry.agents.insert(dead.id.clone(), dead);
            encode_record(&registry).unwrap()
        };
        // Another cleanup won the race between our snapshot and our update
        let after = encode_record(&AgentRegistry {
            lock_version: 1,
            ..AgentRegistry::default()
        })
        .unwrap();

        let mut reads = 0;
        let mut mock = MockRecordStore::new();
        mock.expect_read().times(2).returning(move |_| {
            reads += 1;
            Ok(Some(if reads == 1 { before.clone() } else { after.clone() }))
        });
        mock.expect_compare_and_swap().never();

        let registry = registry_with(Arc::new(mock));
        let removed = registry
            .remove_matching(&RetryPolicy::once(), |agent| agent.id == dead_id)
            .await
            .unwrap();
        assert!(removed.is_empty());
    }

    #[tokio::test]
    async fn test_unregister() {
        let registry = registry_with(Arc::new(MemoryStore::new()));
        let agent = registry.register(None).await.unwrap();

        assert!(registry.unregister(&agent.id).await.unwrap());
        assert!(!registry.unregister(&agent.id).await.unwrap());
        assert!(registry.get(&agent.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_active_uses_window() {
        let store = MemoryStore::new();
        let fresh = Agent::new(None);
        let mut quiet = Agent::new(None);
        quiet.last_heartbeat = Utc::now() - chrono::Duration::seconds(90);
        seed(&store, vec![fresh.clone(), quiet.clone()], 2).await;

        let registry = registry_with(Arc::new(store));
        assert_eq!(registry.list_active(None).await.unwrap().len(), 2);

        let recent = registry
            .list_active(Some(chrono::Duration::seconds(60)))
            .await
            .unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].id, fresh.id);
    }

    #[tokio::test]
    async fn test_corrupt_registry_reads_as_empty() {
        let store = MemoryStore::new();
        store.write(keys::REGISTRY, b"{\"agents\": [").await.unwrap();

        let registry = registry_with(Arc::new(store));
        assert!(registry.list_active(None).await.unwrap().is_empty());

        // The next write replaces the corrupt record
        registry.register(None).await.unwrap();
        assert_eq!(registry.snapshot().await.unwrap().agents.len(), 1);
    }
}
