use anyhow::Result;

use super::{short_time, Command, Context};
use crate::cli::TaskAction;
use crate::tasks::{Task, TaskStatus};

fn print_task(task: &Task) {
    println!("  📋 {} [{}] {} - {}", task.id, task.priority, task.status, task.title);
    if !task.tags.is_empty() {
        println!("     🏷️  {}", task.tags.join(", "));
    }
    if let Some(agent) = &task.assigned_to {
        println!("     👤 {agent}");
    }
    if let Some(note) = &task.resolution {
        println!("     📝 {note}");
    }
}

pub struct TaskCommand {
    pub action: TaskAction,
}

impl TaskCommand {
    async fn resolve(&self, ctx: &Context, task_id: &str, status: TaskStatus, note: Option<String>) -> Result<()> {
        // With an acting agent the agent also goes back to idle and announces it
        let result = if ctx.agent.is_some() {
            let session = ctx.session().await?;
            session.finish_task(task_id, status, note).await
        } else {
            ctx.coordinator().board().resolve(task_id, status, note).await
        };

        ctx.emit(result, |task| {
            let icon = match task.status {
                TaskStatus::Completed => "✅",
                TaskStatus::Blocked => "🚧",
                _ => "🗑️ ",
            };
            println!("{icon} {} is now {}", task.id, task.status);
        })
    }
}

impl Command for TaskCommand {
    async fn execute(&self, ctx: &Context) -> Result<()> {
        match &self.action {
            TaskAction::Add {
                title,
                description,
                priority,
                tags,
            } => {
                let task = Task::new(title)
                    .with_description(description)
                    .with_priority(*priority)
                    .with_tags(tags.iter().cloned());
                let result = ctx.coordinator().board().create(task).await;
                ctx.emit(result, |task| {
                    println!("📝 Added task {} ({})", task.id, task.priority);
                    println!("💡 Assign it with: colony route");
                })
            }
            TaskAction::List { status } => {
                let result = ctx.coordinator().board().list(*status).await;
                ctx.emit(result, |tasks| {
                    if tasks.is_empty() {
                        println!("📭 No tasks");
                        return;
                    }
                    println!("📋 TASKS ({})", tasks.len());
                    for task in tasks {
                        print_task(task);
                    }
                })
            }
            TaskAction::Claim { task_id } => {
                let session = ctx.session().await?;
                let result = match task_id {
                    Some(id) => session.claim_task(id).await.map(Some),
                    None => session.claim_next().await,
                };
                ctx.emit(result, |claimed| match claimed {
                    Some(task) => {
                        println!("🎯 Claimed {}: {}", task.id, task.title);
                        println!("   created {}", short_time(&task.created_at));
                        println!("💡 Finish with: colony task complete {}", task.id);
                    }
                    None => println!("📭 No pending tasks to claim"),
                })
            }
            TaskAction::Complete { task_id, note } => {
                self.resolve(ctx, task_id, TaskStatus::Completed, note.clone()).await
            }
            TaskAction::Block { task_id, note } => {
                self.resolve(ctx, task_id, TaskStatus::Blocked, note.clone()).await
            }
            TaskAction::Cancel { task_id, note } => {
                self.resolve(ctx, task_id, TaskStatus::Cancelled, note.clone()).await
            }
        }
    }
}
