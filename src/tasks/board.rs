use std::sync::Arc;
use tracing::{debug, info};

use super::types::{sort_by_priority, Task, TaskCollection, TaskStatus};
use crate::error::{CoordinationError, CoordinationResult};
use crate::store::{decode_record, keys, update_record, RecordStore, RetryPolicy};

/// The pending/active task collection shared by producers, agents and the
/// router. Every write is a compare-and-swap over the whole collection.
#[derive(Clone)]
pub struct TaskBoard {
    store: Arc<dyn RecordStore>,
    policy: RetryPolicy,
}

impl TaskBoard {
    pub fn new(store: Arc<dyn RecordStore>, policy: RetryPolicy) -> Self {
        Self { store, policy }
    }

    async fn load(&self) -> CoordinationResult<TaskCollection> {
        let raw = self.store.read(keys::TASKS).await?;
        Ok(decode_record(keys::TASKS, raw.as_deref()))
    }

    async fn update<R, F>(&self, apply: F) -> CoordinationResult<R>
    where
        R: Send,
        F: FnMut(&mut TaskCollection) -> CoordinationResult<R> + Send,
    {
        let (_, outcome) =
            update_record(self.store.as_ref(), keys::TASKS, &self.policy, apply).await?;
        Ok(outcome)
    }

    /// Add a task to the queue as pending
    pub async fn create(&self, task: Task) -> CoordinationResult<Task> {
        let mut task = task;
        task.status = TaskStatus::Pending;
        task.assigned_to = None;

        let created = task.clone();
        self.update(move |collection| {
            collection.tasks.push(task.clone());
            collection.touch();
            Ok(())
        })
        .await?;

        info!(task_id = %created.id, priority = %created.priority, "Task created");
        Ok(created)
    }

    /// Tasks in queue order, optionally restricted to one status
    pub async fn list(&self, status: Option<TaskStatus>) -> CoordinationResult<Vec<Task>> {
        let collection = self.load().await?;
        Ok(collection
            .tasks
            .into_iter()
            .filter(|t| status.is_none_or(|s| t.status == s))
            .collect())
    }

    pub async fn get(&self, task_id: &str) -> CoordinationResult<Task> {
        self.load()
            .await?
            .tasks
            .into_iter()
            .find(|t| t.id == task_id)
            .ok_or_else(|| CoordinationError::TaskNotFound(task_id.to_string()))
    }

    /// Move a pending task to `in_progress` for `agent_id`
    pub async fn claim(&self, task_id: &str, agent_id: &str) -> CoordinationResult<Task> {
        let task = self
            .update(|collection| {
                let task = collection
                    .find_mut(task_id)
                    .ok_or_else(|| CoordinationError::TaskNotFound(task_id.to_string()))?;
                start_task(task, agent_id)?;
                let claimed = task.clone();
                collection.touch();
                Ok(claimed)
            })
            .await?;

        info!(task_id = %task.id, agent_id = %agent_id, "Task claimed");
        Ok(task)
    }

    /// Claim the most urgent pending task, preferring tasks tagged with `role`
    pub async fn claim_next(
        &self,
        agent_id: &str,
        role: Option<&str>,
    ) -> CoordinationResult<Option<Task>> {
        let task = self
            .update(|collection| {
                let mut pending: Vec<Task> = collection
                    .tasks
                    .iter()
                    .filter(|t| t.status == TaskStatus::Pending)
                    .cloned()
                    .collect();
                sort_by_priority(&mut pending);

                let chosen = role
                    .and_then(|role| pending.iter().find(|t| t.has_tag(role)))
                    .or_else(|| pending.first())
                    .map(|t| t.id.clone());

                let Some(task_id) = chosen else {
                    return Ok(None);
                };
                let Some(task) = collection.find_mut(&task_id) else {
                    return Ok(None);
                };
                start_task(task, agent_id)?;
                let claimed = task.clone();
                collection.touch();
                Ok(Some(claimed))
            })
            .await?;

        match &task {
            Some(task) => info!(task_id = %task.id, agent_id = %agent_id, "Claimed next task"),
            None => debug!(agent_id = %agent_id, "No pending task to claim"),
        }
        Ok(task)
    }

    /// Resolve an open task as completed, blocked or cancelled
    pub async fn resolve(
        &self,
        task_id: &str,
        status: TaskStatus,
        note: Option<String>,
    ) -> CoordinationResult<Task> {
        let task = self
            .update(|collection| {
                let task = collection
                    .find_mut(task_id)
                    .ok_or_else(|| CoordinationError::TaskNotFound(task_id.to_string()))?;
                if !status.is_resolution() || !task.status.is_open() {
                    return Err(CoordinationError::InvalidTransition {
                        task_id: task_id.to_string(),
                        from: task.status,
                        to: status,
                    });
                }
                task.status = status;
                task.resolution = note.clone();
                task.updated_at = chrono::Utc::now();
                let resolved = task.clone();
                collection.touch();
                Ok(resolved)
            })
            .await?;

        info!(task_id = %task.id, status = %task.status, "Task resolved");
        Ok(task)
    }

    /// Apply `(task_id, agent_id)` assignments in one write.
    ///
    /// Tasks that are no longer pending are skipped; the ids of the tasks
    /// actually assigned are returned.
    pub async fn assign(&self, assignments: &[(String, String)]) -> CoordinationResult<Vec<String>> {
        if assignments.is_empty() {
            return Ok(Vec::new());
        }

        self.update(|collection| {
            let mut applied = Vec::new();
            for (task_id, agent_id) in assignments {
                if let Some(task) = collection.find_mut(task_id) {
                    if start_task(task, agent_id).is_ok() {
                        applied.push(task_id.clone());
                    }
                }
            }
            if !applied.is_empty() {
                collection.touch();
            }
            Ok(applied)
        })
        .await
    }
}

fn start_task(task: &mut Task, agent_id: &str) -> CoordinationResult<()> {
    if task.status != TaskStatus::Pending {
        return Err(CoordinationError::InvalidTransition {
            task_id: task.id.clone(),
            from: task.status,
            to: TaskStatus::InProgress,
        });
    }
    task.status = TaskStatus::InProgress;
    task.assigned_to = Some(agent_id.to_string());
    task.updated_at = chrono::Utc::now();
    Ok(())
}
