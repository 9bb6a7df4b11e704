use serde::Serialize;

use crate::agents::types::{Agent, AgentStatus};
use crate::config::RoutingConfig;
use crate::tasks::{sort_by_priority, Task};

/// One task-to-agent pairing produced by a routing pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoutingDecision {
    pub task_id: String,
    pub task_title: String,
    pub agent_id: String,
    pub score: i64,
    /// 0 for critical tasks, 3 for low
    pub priority_rank: u32,
    pub reason: String,
}

/// Suitability scoring of agents for tasks
#[derive(Debug, Clone)]
pub struct RoutingDecisions {
    config: RoutingConfig,
}

impl RoutingDecisions {
    pub fn new(config: RoutingConfig) -> Self {
        Self { config }
    }

    fn role_matches(task: &Task, agent: &Agent) -> bool {
        agent.role.as_deref().is_some_and(|role| task.has_tag(role))
    }

    pub fn score(&self, task: &Task, agent: &Agent) -> i64 {
        let mut score = self.config.base_score;
        if Self::role_matches(task, agent) {
            score += self.config.role_match_bonus;
        }
        if agent.status == AgentStatus::Idle {
            score += self.config.idle_bonus;
        }
        if agent.current_task.is_none() {
            score += self.config.no_task_bonus;
        }
        score
    }

    fn reason(&self, task: &Task, agent: &Agent, score: i64) -> String {
        let mut factors = Vec::new();
        if Self::role_matches(task, agent) {
            factors.push(format!("role '{}' matches task tags", agent.role.as_deref().unwrap_or_default()));
        }
        if agent.status == AgentStatus::Idle {
            factors.push("agent is idle".to_string());
        }
        if agent.current_task.is_none() {
            factors.push("no current task".to_string());
        }

        let factors = if factors.is_empty() {
            "base score only".to_string()
        } else {
            factors.join(", ")
        };
        format!("{} priority, score {score}: {factors}", task.priority)
    }

    /// Pair pending tasks with agents, most urgent task first.
    ///
    /// Each agent receives at most one task; the best-scoring agent wins and
    /// the earliest one breaks ties.
    pub fn plan(&self, mut tasks: Vec<Task>, mut agents: Vec<Agent>) -> Vec<RoutingDecision> {
        sort_by_priority(&mut tasks);

        let mut decisions = Vec::new();
        for task in &tasks {
            if agents.is_empty() {
                break;
            }

            let mut best = 0;
            let mut best_score = self.score(task, &agents[0]);
            for (index, agent) in agents.iter().enumerate().skip(1) {
                let score = self.score(task, agent);
                if score > best_score {
                    best = index;
                    best_score = score;
                }
            }

            let agent = agents.remove(best);
            decisions.push(RoutingDecision {
                task_id: task.id.clone(),
                task_title: task.title.clone(),
                agent_id: agent.id.clone(),
                score: best_score,
                priority_rank: task.priority.rank(),
                reason: self.reason(task, &agent, best_score),
            });
        }
        decisions
    }
}
