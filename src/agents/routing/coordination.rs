use chrono::Utc;
use tracing::Instrument;

use super::{AssignmentOperations, CandidateFilter, RoutingDecision, RoutingDecisions};
use crate::agents::registry::Registry;
use crate::error::CoordinationResult;
use crate::observability::{coordination_metrics, OperationTimer};
use crate::tasks::TaskBoard;
use crate::telemetry::{create_coordination_span, generate_correlation_id};

/// One routing pass: gather candidates, score, persist, notify
#[derive(Clone)]
pub struct RoutingCoordinator {
    pub assignment_ops: AssignmentOperations,
    pub candidate_filter: CandidateFilter,
    pub decisions: RoutingDecisions,
}

impl RoutingCoordinator {
    pub fn new(
        assignment_ops: AssignmentOperations,
        candidate_filter: CandidateFilter,
        decisions: RoutingDecisions,
    ) -> Self {
        Self {
            assignment_ops,
            candidate_filter,
            decisions,
        }
    }

    pub async fn route(
        &self,
        registry: &Registry,
        board: &TaskBoard,
    ) -> CoordinationResult<Vec<RoutingDecision>> {
        let correlation_id = generate_correlation_id();
        let span = create_coordination_span("route", None, Some(&correlation_id));

        async move {
            let timer = OperationTimer::new("route");
            tracing::info!(correlation_id = %correlation_id, "Starting task routing");

            let tasks = board.list(None).await?;
            let pending = self.candidate_filter.pending_tasks(&tasks);
            if pending.is_empty() {
                tracing::debug!("No pending tasks to route");
                return Ok(Vec::new());
            }

            let snapshot = registry.snapshot().await?;
            let agents = self.candidate_filter.available_agents(&snapshot, Utc::now());
            if agents.is_empty() {
                tracing::info!(pending = pending.len(), "No available agents for pending tasks");
                return Ok(Vec::new());
            }

            tracing::info!(
                pending = pending.len(),
                available_agents = agents.len(),
                "Fetched tasks and agents for routing"
            );

            let planned = self.decisions.plan(pending, agents);
            let applied = self.assignment_ops.apply(planned).await?;

            for decision in &applied {
                tracing::info!(
                    task_id = %decision.task_id,
                    agent_id = %decision.agent_id,
                    score = decision.score,
                    reason = %decision.reason,
                    "Assigned task to agent"
                );
            }
            self.assignment_ops.notify_assignees(&applied).await;
            coordination_metrics().record_tasks_routed(applied.len());
            timer.finish();

            tracing::info!(assignment_count = applied.len(), "Completed task routing");
            Ok(applied)
        }
        .instrument(span)
        .await
    }
}
