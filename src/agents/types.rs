use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    #[default]
    Active,
    Idle,
    Working,
    Blocked,
}

impl AgentStatus {
    pub const ALL: [AgentStatus; 4] = [
        AgentStatus::Active,
        AgentStatus::Idle,
        AgentStatus::Working,
        AgentStatus::Blocked,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            AgentStatus::Active => "active",
            AgentStatus::Idle => "idle",
            AgentStatus::Working => "working",
            AgentStatus::Blocked => "blocked",
        }
    }

    /// Whether the router may hand this agent new work
    pub fn accepts_work(self) -> bool {
        matches!(self, AgentStatus::Active | AgentStatus::Idle)
    }
}

impl fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AgentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AgentStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("unknown agent status '{s}'"))
    }
}

/// One registered agent process
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Agent {
    pub id: String,
    pub session_id: String,
    pub started_at: DateTime<Utc>,
    pub last_heartbeat: DateTime<Utc>,
    #[serde(default)]
    pub status: AgentStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_task: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
}

impl Agent {
    /// A fresh agent for the current process
    pub fn new(role: Option<&str>) -> Self {
        let now = Utc::now();
        Self {
            id: generate_agent_id(),
            session_id: Uuid::new_v4().to_string(),
            started_at: now,
            last_heartbeat: now,
            status: AgentStatus::Active,
            current_task: None,
            role: role.map(str::to_string),
            pid: Some(std::process::id()),
            hostname: local_hostname(),
        }
    }

    pub fn heartbeat_age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now.signed_duration_since(self.last_heartbeat)
    }
}

/// Time-ordered agent id: `agent-<unix millis>-<8 hex digits>`
pub fn generate_agent_id() -> String {
    let suffix: u32 = rand::rng().random();
    format!("agent-{}-{:08x}", Utc::now().timestamp_millis(), suffix)
}

pub(crate) fn local_hostname() -> Option<String> {
    hostname::get()
        .ok()
        .map(|name| name.to_string_lossy().into_owned())
}

/// The shared membership record
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentRegistry {
    #[serde(default)]
    pub agents: BTreeMap<String, Agent>,
    /// Incremented by every successful write
    #[serde(default)]
    pub lock_version: u64,
    #[serde(default)]
    pub last_updated: Option<DateTime<Utc>>,
}

impl AgentRegistry {
    /// Record a successful write
    pub fn bump(&mut self) {
        self.lock_version += 1;
        self.last_updated = Some(Utc::now());
    }

    /// Drop agents whose heartbeat is older than `window`, returning their ids
    pub fn evict_older_than(&mut self, window: chrono::Duration, now: DateTime<Utc>) -> Vec<String> {
        let expired: Vec<String> = self
            .agents
            .values()
            .filter(|agent| agent.heartbeat_age(now) > window)
            .map(|agent| agent.id.clone())
            .collect();
        for id in &expired {
            self.agents.remove(id);
        }
        expired
    }

    pub fn active_within(&self, window: chrono::Duration, now: DateTime<Utc>) -> Vec<Agent> {
        self.agents
            .values()
            .filter(|agent| agent.heartbeat_age(now) < window)
            .cloned()
            .collect()
    }
}
