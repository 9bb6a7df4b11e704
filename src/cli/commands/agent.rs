use anyhow::Result;
use chrono::Utc;
use std::time::Duration;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{info, warn};

use super::{short_time, Command, Context};
use crate::agents::{AgentRouter, AgentStatus};
use crate::shutdown::ShutdownCoordinator;

pub struct RegisterCommand {
    pub role: Option<String>,
}

impl Command for RegisterCommand {
    async fn execute(&self, ctx: &Context) -> Result<()> {
        let coordinator = ctx.coordinator();
        let result = coordinator.registry().register(self.role.as_deref()).await;
        ctx.emit(result, |agent| {
            println!("✅ Registered agent {}", agent.id);
            if let Some(role) = &agent.role {
                println!("   🎭 Role: {role}");
            }
            println!();
            println!("💡 Keep it alive with: colony heartbeat --agent {}", agent.id);
            println!("   or run a long-lived agent with: colony run");
        })
    }
}

pub struct UnregisterCommand;

impl Command for UnregisterCommand {
    async fn execute(&self, ctx: &Context) -> Result<()> {
        let agent_id = ctx.agent_id()?;
        let result = ctx.coordinator().registry().unregister(agent_id).await;
        ctx.emit(result, |removed| {
            if *removed {
                println!("👋 Agent {agent_id} unregistered");
            } else {
                println!("ℹ️  Agent {agent_id} was not registered");
            }
        })
    }
}

pub struct HeartbeatCommand;

impl Command for HeartbeatCommand {
    async fn execute(&self, ctx: &Context) -> Result<()> {
        let session = ctx.session().await?;
        let result = session.heartbeat().await;
        ctx.emit(result, |agent| {
            println!("💓 Heartbeat recorded for {} at {}", agent.id, short_time(&agent.last_heartbeat));
        })
    }
}

pub struct StatusCommand {
    pub status: AgentStatus,
    pub task: Option<String>,
}

impl Command for StatusCommand {
    async fn execute(&self, ctx: &Context) -> Result<()> {
        let session = ctx.session().await?;
        let result = session.update_status(self.status, self.task.clone()).await;
        ctx.emit(result, |agent| {
            print!("✅ {} is now {}", agent.id, agent.status);
            match &agent.current_task {
                Some(task) => println!(" on {task}"),
                None => println!(),
            }
        })
    }
}

pub struct AgentsCommand {
    pub within: Option<chrono::Duration>,
}

impl Command for AgentsCommand {
    async fn execute(&self, ctx: &Context) -> Result<()> {
        let result = ctx.coordinator().registry().list_active(self.within).await;
        ctx.emit(result, |agents| {
            if agents.is_empty() {
                println!("📭 No live agents");
                println!();
                println!("💡 Start one with: colony run --role worker");
                return;
            }

            let now = Utc::now();
            println!("🤖 LIVE AGENTS ({})", agents.len());
            println!("==================");
            for agent in agents {
                println!(
                    "  {} [{}] role={} task={} heartbeat {}s ago",
                    agent.id,
                    agent.status,
                    agent.role.as_deref().unwrap_or("-"),
                    agent.current_task.as_deref().unwrap_or("-"),
                    agent.heartbeat_age(now).num_seconds()
                );
            }
        })
    }
}

pub struct RunCommand {
    pub role: Option<String>,
    pub route_every: Option<u64>,
}

impl Command for RunCommand {
    async fn execute(&self, ctx: &Context) -> Result<()> {
        let mut session = ctx.coordinator();
        let agent = match session.register(self.role.as_deref()).await {
            Ok(agent) => agent,
            Err(e) => return ctx.emit(Err::<(), _>(e), |_| {}),
        };

        if ctx.json {
            println!("{}", crate::error::OperationOutcome::ok(&agent).to_json());
        } else {
            println!("🚀 Agent {} running (Ctrl-C to stop)", agent.id);
            println!(
                "   💓 Heartbeat every {}s",
                ctx.config.registry.heartbeat_interval().as_secs()
            );
            println!("   🔗 Other commands can act as it with: --agent {}", agent.id);
        }

        let router_task = self.route_every.map(|secs| {
            let router = AgentRouter::new(ctx.store.clone(), ctx.config.clone(), Some(&agent.id));
            let every = Duration::from_secs(secs.max(1));
            tokio::spawn(async move {
                let mut ticker = interval_at(Instant::now() + every, every);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    ticker.tick().await;
                    match router.route().await {
                        Ok(decisions) if !decisions.is_empty() => {
                            info!(assigned = decisions.len(), "Periodic routing assigned tasks")
                        }
                        Ok(_) => {}
                        Err(e) => warn!(error = %e, "Periodic routing failed"),
                    }
                }
            })
        });

        let outcome = ShutdownCoordinator::default()
            .run_until_signal(&mut session)
            .await;
        if let Some(task) = router_task {
            task.abort();
        }

        if !ctx.json {
            println!("👋 Agent {} stopped", agent.id);
        }
        outcome
    }
}
