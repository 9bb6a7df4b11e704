use chrono::{DateTime, Utc};

use crate::agents::types::{Agent, AgentRegistry};
use crate::tasks::{Task, TaskStatus};

/// Picks the candidates of a routing pass: fresh agents that accept work
/// and tasks still waiting for one.
#[derive(Debug, Clone)]
pub struct CandidateFilter {
    availability_window: chrono::Duration,
}

impl CandidateFilter {
    pub fn new(availability_window: chrono::Duration) -> Self {
        Self { availability_window }
    }

    pub fn available_agents(&self, registry: &AgentRegistry, now: DateTime<Utc>) -> Vec<Agent> {
        registry
            .active_within(self.availability_window, now)
            .into_iter()
            .filter(|agent| agent.status.accepts_work())
            .collect()
    }

    pub fn pending_tasks(&self, tasks: &[Task]) -> Vec<Task> {
        tasks
            .iter()
            .filter(|task| task.status == TaskStatus::Pending)
            .cloned()
            .collect()
    }
}
