use anyhow::Result;

use super::{Command, Context};
use crate::agents::{AgentHealth, HealthMonitor, HealthTier};
use crate::cli::HealthAction;

pub struct HealthCommand {
    pub action: HealthAction,
}

fn tier_icon(tier: HealthTier) -> &'static str {
    match tier {
        HealthTier::Healthy => "🟢",
        HealthTier::Warning => "🟡",
        HealthTier::Stale => "🟠",
        HealthTier::Dead => "🔴",
    }
}

fn print_agent(health: &AgentHealth) {
    println!(
        "  {} {} [{}] {} (heartbeat {}s ago)",
        tier_icon(health.tier),
        health.agent_id,
        health.status,
        health.tier,
        health.heartbeat_age_secs
    );
    for issue in &health.issues {
        println!("     ⚠️  {issue:?}");
    }
}

impl Command for HealthCommand {
    async fn execute(&self, ctx: &Context) -> Result<()> {
        let monitor = HealthMonitor::new(ctx.coordinator().registry().clone(), ctx.config.health.clone());

        match &self.action {
            HealthAction::Status => {
                let result = monitor.status().await;
                ctx.emit(result, |report| {
                    println!("🩺 AGENT HEALTH");
                    println!("==============");
                    println!(
                        "🟢 {} healthy  🟡 {} warning  🟠 {} stale  🔴 {} dead",
                        report.healthy, report.warning, report.stale, report.dead
                    );
                    if report.agents.is_empty() {
                        println!();
                        println!("📭 No registered agents");
                        return;
                    }
                    println!();
                    for health in &report.agents {
                        print_agent(health);
                    }
                    if report.dead > 0 {
                        println!();
                        println!("💡 Remove dead agents with: colony health cleanup");
                    }
                })
            }
            HealthAction::Check { agent_id } => {
                let result = monitor.check(agent_id).await;
                ctx.emit(result, print_agent)
            }
            HealthAction::Cleanup => {
                let removed = monitor.cleanup_stale_agents().await;
                ctx.emit(Ok(removed), |removed| {
                    if *removed == 0 {
                        println!("✨ No dead agents to remove");
                    } else {
                        println!("🧹 Removed {removed} dead agent(s)");
                    }
                })
            }
        }
    }
}
