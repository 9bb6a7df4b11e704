use serde_json::json;
use tracing::{info, warn};

use super::decisions::RoutingDecision;
use crate::error::CoordinationResult;
use crate::messaging::{MessageBus, MessageType};
use crate::tasks::TaskBoard;

/// Persists routing decisions on the task board and tells the chosen agents
#[derive(Clone)]
pub struct AssignmentOperations {
    board: TaskBoard,
    bus: MessageBus,
}

impl AssignmentOperations {
    pub fn new(board: TaskBoard, bus: MessageBus) -> Self {
        Self { board, bus }
    }

    /// Write every decision in one task-board update.
    ///
    /// Decisions whose task was claimed elsewhere in the meantime are
    /// dropped from the returned list.
    pub async fn apply(&self, decisions: Vec<RoutingDecision>) -> CoordinationResult<Vec<RoutingDecision>> {
        let pairs: Vec<(String, String)> = decisions
            .iter()
            .map(|d| (d.task_id.clone(), d.agent_id.clone()))
            .collect();
        let applied = self.board.assign(&pairs).await?;

        let (kept, lost): (Vec<_>, Vec<_>) = decisions
            .into_iter()
            .partition(|d| applied.contains(&d.task_id));
        for decision in &lost {
            info!(task_id = %decision.task_id, "Task no longer pending, assignment dropped");
        }
        Ok(kept)
    }

    /// Send a direct `task_available` message to each assigned agent
    pub async fn notify_assignees(&self, decisions: &[RoutingDecision]) {
        for decision in decisions {
            let payload = json!({
                "task_id": decision.task_id,
                "title": decision.task_title,
                "reason": decision.reason,
            });
            if let Err(e) = self
                .bus
                .send(MessageType::TaskAvailable, payload, Some(&decision.agent_id))
                .await
            {
                warn!(agent_id = %decision.agent_id, task_id = %decision.task_id, error = %e, "Failed to notify assignee");
            }
        }
    }
}
