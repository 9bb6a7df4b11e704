use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;

use crate::agents::AgentCoordinator;
use crate::cli::GlobalArgs;
use crate::config::ColonyConfig;
use crate::error::{CoordinationResult, OperationOutcome};
use crate::store::{FileStore, RecordStore};

pub mod agent;
pub mod health;
pub mod lock;
pub mod messages;
pub mod route;
pub mod task;

#[allow(async_fn_in_trait)]
pub trait Command {
    async fn execute(&self, ctx: &Context) -> Result<()>;
}

/// Everything a command needs: the shared store, configuration and the
/// global flags
pub struct Context {
    pub store: Arc<dyn RecordStore>,
    pub config: ColonyConfig,
    pub agent: Option<String>,
    pub json: bool,
}

impl Context {
    pub fn new(config: ColonyConfig, global: &GlobalArgs) -> Result<Self> {
        let config = match &global.root {
            Some(root) => config.with_root(root),
            None => config,
        };
        let store = FileStore::new(config.store.root.clone());
        store.ensure_root()?;

        Ok(Self {
            store: Arc::new(store),
            config,
            agent: global.agent.clone(),
            json: global.json,
        })
    }

    /// Id from `--agent` / `COLONY_AGENT_ID`
    pub fn agent_id(&self) -> Result<&str> {
        self.agent
            .as_deref()
            .ok_or_else(|| anyhow!("this command acts as an agent: pass --agent <id> or set COLONY_AGENT_ID"))
    }

    pub fn coordinator(&self) -> AgentCoordinator {
        AgentCoordinator::new(self.store.clone(), self.config.clone())
    }

    /// Coordinator attached to the acting agent
    pub async fn session(&self) -> Result<AgentCoordinator> {
        let agent_id = self.agent_id()?;
        let mut session = self.coordinator();
        if let Err(e) = session.attach(agent_id).await {
            self.fail(&e);
            return Err(e.into());
        }
        Ok(session)
    }

    /// Print a result: JSON outcome under `--json`, otherwise `human` on
    /// success. Failures still surface as an error for the exit code.
    pub fn emit<T, F>(&self, result: CoordinationResult<T>, human: F) -> Result<()>
    where
        T: Serialize,
        F: FnOnce(&T),
    {
        match result {
            Ok(data) => {
                if self.json {
                    println!("{}", OperationOutcome::ok(&data).to_json());
                } else {
                    human(&data);
                }
                Ok(())
            }
            Err(e) => {
                self.fail(&e);
                Err(e.into())
            }
        }
    }

    fn fail(&self, error: &crate::error::CoordinationError) {
        if self.json {
            println!("{}", OperationOutcome::<()>::failed(error).to_json());
        }
    }
}

pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| format!("expected an RFC 3339 timestamp: {e}"))
}

/// Parse a window given in whole seconds
pub fn parse_window(raw: &str) -> Result<chrono::Duration, String> {
    let secs: i64 = raw
        .parse()
        .map_err(|e| format!("expected a number of seconds: {e}"))?;
    if secs < 0 {
        return Err("window must not be negative".to_string());
    }
    chrono::Duration::try_seconds(secs).ok_or_else(|| format!("window of {secs}s is out of range"))
}

/// Parse a JSON payload, falling back to a plain string
pub fn parse_payload(raw: &str) -> serde_json::Value {
    serde_json::from_str(raw).unwrap_or_else(|_| serde_json::Value::String(raw.to_string()))
}

pub fn short_time(ts: &DateTime<Utc>) -> String {
    ts.format("%Y-%m-%d %H:%M:%S").to_string()
}

pub async fn show_how_to_get_started() -> Result<()> {
    println!("🐜 Colony - Serverless Agent Coordination");
    println!();
    println!("To get started:");
    println!("  🚀 colony run --role worker        # Join as a long-running agent");
    println!("  📝 colony task add 'Fix the build'  # Queue some work");
    println!("  📊 colony stats                     # See tasks and agents");
    println!();
    println!("Admin commands:");
    println!("  🔀 colony route                     # Assign pending tasks to agents");
    println!("  🩺 colony health cleanup            # Remove dead agents");
    println!();
    println!("💡 Per-agent commands take --agent <id> or COLONY_AGENT_ID");
    Ok(())
}
