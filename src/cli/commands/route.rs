use anyhow::Result;

use super::{Command, Context};
use crate::agents::AgentRouter;

fn router(ctx: &Context) -> AgentRouter {
    AgentRouter::new(ctx.store.clone(), ctx.config.clone(), ctx.agent.as_deref())
}

pub struct RouteCommand;

impl Command for RouteCommand {
    async fn execute(&self, ctx: &Context) -> Result<()> {
        if !ctx.json {
            println!("🔀 [ADMIN] Routing pending tasks to available agents");
            println!();
        }

        let result = router(ctx).route().await;
        ctx.emit(result, |decisions| {
            if decisions.is_empty() {
                println!("📋 Nothing routed");
                println!();
                println!("🎯 QUICK START:");
                println!("   → Queue work: colony task add 'Your task' --tag <role>");
                println!("   → Check agents: colony agents");
                return;
            }

            println!("✅ Routed {} task(s):", decisions.len());
            println!();
            for (i, decision) in decisions.iter().enumerate() {
                println!("Routed task #{}:", i + 1);
                println!("  🎯 {}: {}", decision.task_id, decision.task_title);
                println!("  👤 Assigned to: {}", decision.agent_id);
                println!("  📈 Score {} ({})", decision.score, decision.reason);
                println!();
            }
        })
    }
}

pub struct SpawnWorkersCommand;

impl Command for SpawnWorkersCommand {
    async fn execute(&self, ctx: &Context) -> Result<()> {
        let result = router(ctx).spawn_workers().await;
        ctx.emit(result, |pids| {
            if pids.is_empty() {
                println!("✨ No workers needed");
                if ctx.config.routing.worker_command.is_none() {
                    println!("💡 Set routing.worker_command in colony.toml to enable spawning");
                }
            } else {
                println!("🚀 Spawned {} worker(s): {:?}", pids.len(), pids);
            }
        })
    }
}

pub struct StatsCommand;

impl Command for StatsCommand {
    async fn execute(&self, ctx: &Context) -> Result<()> {
        let result = router(ctx).get_stats().await;
        ctx.emit(result, |stats| {
            println!("📊 COLONY STATUS");
            println!("================");
            println!();
            println!("🤖 AGENTS:");
            println!("   Registered: {}", stats.registered_agents);
            println!("   Live: {}", stats.live_agents);
            println!("   Available for work: {}", stats.available_agents);
            for (status, count) in &stats.agents_by_status {
                println!("   • {status}: {count}");
            }
            println!();
            println!("📋 TASKS:");
            for (status, count) in &stats.tasks_by_status {
                println!("   • {status}: {count}");
            }
            if stats.pending_tasks() > stats.available_agents {
                println!();
                println!("💡 More pending tasks than available agents: colony spawn-workers");
            }
        })
    }
}
