use anyhow::Result;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{info, warn};

use crate::agents::AgentCoordinator;
use crate::observability::coordination_metrics;
use crate::telemetry::shutdown_telemetry;

/// Graceful shutdown for a long-running agent process
pub struct ShutdownCoordinator {
    grace: Duration,
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}

impl ShutdownCoordinator {
    pub fn new(grace: Duration) -> Self {
        Self { grace }
    }

    /// Wait for SIGINT (Ctrl-C)
    pub async fn wait_for_signal() -> Result<()> {
        info!("Shutdown coordinator ready - will shutdown gracefully on Ctrl-C");
        tokio::signal::ctrl_c().await?;
        info!("Shutdown signal received");
        Ok(())
    }

    /// Leave the colony: stop heartbeating, unregister, flush stats.
    ///
    /// Unregistering is bounded by the grace period; an agent that cannot
    /// leave in time is left for the health cleanup to reap.
    pub async fn shutdown(&self, session: &mut AgentCoordinator) -> Result<()> {
        info!("Initiating graceful shutdown...");

        if session.is_registered() {
            let agent_id = session.agent_id()?.to_string();
            match timeout(self.grace, session.unregister()).await {
                Ok(Ok(true)) => info!(agent_id = %agent_id, "Agent unregistered"),
                Ok(Ok(false)) => warn!(agent_id = %agent_id, "Agent was already gone from the registry"),
                Ok(Err(e)) => warn!(agent_id = %agent_id, error = %e, "Failed to unregister agent"),
                Err(_) => warn!(
                    agent_id = %agent_id,
                    grace_secs = self.grace.as_secs(),
                    "Timeout waiting to unregister agent"
                ),
            }
        }

        coordination_metrics().log_stats();
        shutdown_telemetry();

        info!("Graceful shutdown completed");
        Ok(())
    }

    /// Block until Ctrl-C, then shut the session down
    pub async fn run_until_signal(&self, session: &mut AgentCoordinator) -> Result<()> {
        Self::wait_for_signal().await?;
        self.shutdown(session).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ColonyConfig;
    use crate::store::MemoryStore;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_shutdown_unregisters_agent() {
        let store = MemoryStore::new();
        let mut session = AgentCoordinator::new(Arc::new(store), ColonyConfig::default());
        let agent = session.register(Some("worker")).await.unwrap();

        ShutdownCoordinator::default().shutdown(&mut session).await.unwrap();

        assert!(!session.is_registered());
        assert!(session.registry().get(&agent.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_shutdown_without_registration_is_fine() {
        let mut session = AgentCoordinator::new(Arc::new(MemoryStore::new()), ColonyConfig::default());
        assert!(ShutdownCoordinator::default().shutdown(&mut session).await.is_ok());
    }
}
