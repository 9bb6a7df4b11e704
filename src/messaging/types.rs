use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Broadcast,
    Direct,
    TaskClaim,
    TaskComplete,
    TaskAvailable,
    RequestHelp,
    Heartbeat,
}

impl MessageType {
    pub const ALL: [MessageType; 7] = [
        MessageType::Broadcast,
        MessageType::Direct,
        MessageType::TaskClaim,
        MessageType::TaskComplete,
        MessageType::TaskAvailable,
        MessageType::RequestHelp,
        MessageType::Heartbeat,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            MessageType::Broadcast => "broadcast",
            MessageType::Direct => "direct",
            MessageType::TaskClaim => "task_claim",
            MessageType::TaskComplete => "task_complete",
            MessageType::TaskAvailable => "task_available",
            MessageType::RequestHelp => "request_help",
            MessageType::Heartbeat => "heartbeat",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MessageType::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| format!("unknown message type '{s}'"))
    }
}

/// One entry of the message log. Only `read_by` ever changes after append.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub from: String,
    /// Target agent, `None` for a broadcast
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    #[serde(rename = "type")]
    pub kind: MessageType,
    #[serde(default)]
    pub payload: serde_json::Value,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub read_by: BTreeSet<String>,
}

impl Message {
    pub fn new(from: &str, kind: MessageType, payload: serde_json::Value, to: Option<&str>) -> Self {
        Self {
            id: format!("msg-{}", Uuid::new_v4().simple()),
            from: from.to_string(),
            to: to.map(str::to_string),
            kind,
            payload,
            timestamp: Utc::now(),
            read_by: BTreeSet::new(),
        }
    }

    /// Addressed to `agent_id` (directly or by broadcast) and not sent by it
    pub fn is_addressed_to(&self, agent_id: &str) -> bool {
        self.from != agent_id && self.to.as_deref().is_none_or(|to| to == agent_id)
    }

    /// Addressed to `agent_id` and not yet acknowledged by it
    pub fn is_unread_by(&self, agent_id: &str) -> bool {
        self.is_addressed_to(agent_id) && !self.read_by.contains(agent_id)
    }

    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now.signed_duration_since(self.timestamp)
    }
}
