use anyhow::Result;
use chrono::Utc;
use std::time::Duration;

use super::{short_time, Command, Context};
use crate::cli::LockAction;
use crate::locks::DistributedMutex;

pub struct LockCommand {
    pub action: LockAction,
}

impl Command for LockCommand {
    async fn execute(&self, ctx: &Context) -> Result<()> {
        match &self.action {
            LockAction::Acquire { resource, timeout_ms } => {
                let session = ctx.session().await?;
                let timeout = timeout_ms.map(Duration::from_millis);
                let result = session.acquire(resource, timeout).await;
                ctx.emit(result, |lock| {
                    println!("🔒 {} now holds {}", lock.holder, lock.resource);
                    println!("💡 Release with: colony lock release {}", lock.resource);
                })
            }
            LockAction::Release { resource } => {
                let session = ctx.session().await?;
                let result = session.release(resource).await;
                ctx.emit(result, |released| {
                    if *released {
                        println!("🔓 Released {resource}");
                    } else {
                        println!("ℹ️  {resource} is not held by this agent");
                    }
                })
            }
            LockAction::List => {
                let mutex = DistributedMutex::new(
                    ctx.store.clone(),
                    ctx.config.locks.clone(),
                    ctx.agent.as_deref().unwrap_or_default(),
                );
                let result = mutex.list_locks().await;
                ctx.emit(result, |locks| {
                    if locks.is_empty() {
                        println!("🔓 No locks held");
                        return;
                    }
                    let now = Utc::now();
                    let stale_after = ctx.config.locks.stale_after();
                    println!("🔒 HELD LOCKS ({})", locks.len());
                    for lock in locks {
                        let note = if lock.is_stale(stale_after, now) { " (stale)" } else { "" };
                        println!(
                            "  {} held by {} (pid {}) since {}{}",
                            lock.resource,
                            lock.holder,
                            lock.pid,
                            short_time(&lock.acquired_at),
                            note
                        );
                    }
                })
            }
        }
    }
}
