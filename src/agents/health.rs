use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use tracing::{debug, info, warn};

use super::registry::Registry;
use super::types::{Agent, AgentStatus};
use crate::config::HealthConfig;
use crate::error::{CoordinationError, CoordinationResult};
use crate::observability::coordination_metrics;
use crate::store::RetryPolicy;

/// Liveness tier derived from heartbeat age, in increasing age order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthTier {
    Healthy,
    Warning,
    Stale,
    Dead,
}

impl fmt::Display for HealthTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            HealthTier::Healthy => "healthy",
            HealthTier::Warning => "warning",
            HealthTier::Stale => "stale",
            HealthTier::Dead => "dead",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthIssue {
    UnresponsiveWhileWorking,
}

/// Tier for a heartbeat age. A negative age (clock skew) counts as fresh.
pub fn classify(age: chrono::Duration, thresholds: &HealthConfig) -> HealthTier {
    if age < thresholds.warning() {
        HealthTier::Healthy
    } else if age < thresholds.stale() {
        HealthTier::Warning
    } else if age <= thresholds.dead() {
        HealthTier::Stale
    } else {
        HealthTier::Dead
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AgentHealth {
    pub agent_id: String,
    pub role: Option<String>,
    pub status: AgentStatus,
    pub tier: HealthTier,
    pub heartbeat_age_secs: i64,
    pub issues: Vec<HealthIssue>,
}

impl AgentHealth {
    pub fn assess(agent: &Agent, thresholds: &HealthConfig, now: DateTime<Utc>) -> Self {
        let age = agent.heartbeat_age(now);
        let tier = classify(age, thresholds);

        let mut issues = Vec::new();
        if agent.status == AgentStatus::Working && tier >= HealthTier::Stale {
            issues.push(HealthIssue::UnresponsiveWhileWorking);
        }

        Self {
            agent_id: agent.id.clone(),
            role: agent.role.clone(),
            status: agent.status,
            tier,
            heartbeat_age_secs: age.num_seconds(),
            issues,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub checked_at: DateTime<Utc>,
    pub agents: Vec<AgentHealth>,
    pub healthy: usize,
    pub warning: usize,
    pub stale: usize,
    pub dead: usize,
}

impl HealthReport {
    fn from_agents(agents: Vec<AgentHealth>, checked_at: DateTime<Utc>) -> Self {
        let count = |tier| agents.iter().filter(|a| a.tier == tier).count();
        Self {
            checked_at,
            healthy: count(HealthTier::Healthy),
            warning: count(HealthTier::Warning),
            stale: count(HealthTier::Stale),
            dead: count(HealthTier::Dead),
            agents,
        }
    }

    pub fn has_issues(&self) -> bool {
        self.agents.iter().any(|a| !a.issues.is_empty())
    }
}

/// Health tiers over the registry and cleanup of dead members
#[derive(Clone)]
pub struct HealthMonitor {
    registry: Registry,
    thresholds: HealthConfig,
}

impl HealthMonitor {
    pub fn new(registry: Registry, thresholds: HealthConfig) -> Self {
        Self {
            registry,
            thresholds,
        }
    }

    pub async fn status(&self) -> CoordinationResult<HealthReport> {
        let now = Utc::now();
        let snapshot = self.registry.snapshot().await?;
        let agents = snapshot
            .agents
            .values()
            .map(|agent| AgentHealth::assess(agent, &self.thresholds, now))
            .collect();
        Ok(HealthReport::from_agents(agents, now))
    }

    pub async fn check(&self, agent_id: &str) -> CoordinationResult<AgentHealth> {
        let agent = self
            .registry
            .get(agent_id)
            .await?
            .ok_or_else(|| CoordinationError::NotRegistered(agent_id.to_string()))?;
        Ok(AgentHealth::assess(&agent, &self.thresholds, Utc::now()))
    }

    /// Remove every `dead` agent. Best effort: a lost race or store failure
    /// removes nothing and is not retried.
    pub async fn cleanup_stale_agents(&self) -> usize {
        let now = Utc::now();
        let thresholds = self.thresholds.clone();
        let result = self
            .registry
            .remove_matching(&RetryPolicy::once(), move |agent| {
                classify(agent.heartbeat_age(now), &thresholds) == HealthTier::Dead
            })
            .await;

        match result {
            Ok(removed) if removed.is_empty() => {
                debug!("No dead agents to clean up");
                0
            }
            Ok(removed) => {
                coordination_metrics().record_agents_cleaned(removed.len());
                info!(removed = ?removed, count = removed.len(), "Removed dead agents");
                removed.len()
            }
            Err(e) if e.is_conflict() => {
                debug!("Registry changed during cleanup, leaving it to the other writer");
                0
            }
            Err(e) => {
                warn!(error = %e, "Agent cleanup skipped");
                0
            }
        }
    }
}
