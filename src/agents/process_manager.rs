//! Worker process launching
//!
//! The router starts extra agent processes when pending work outnumbers the
//! available agents. Launching sits behind [`WorkerLauncher`] so tests can
//! count spawns without starting real processes.

use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{error, info};

use crate::error::CoordinationResult;

#[cfg(test)]
use mockall::automock;

/// What a spawned worker needs to join the colony
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerSpec {
    pub command: String,
    pub args: Vec<String>,
    pub store_root: PathBuf,
    pub role: String,
}

#[cfg_attr(test, automock)]
#[async_trait::async_trait]
pub trait WorkerLauncher: Send + Sync {
    /// Start one worker process and return its pid
    async fn launch(&self, spec: &WorkerSpec) -> CoordinationResult<u32>;
}

/// Launches workers as detached child processes
#[derive(Debug, Clone, Default)]
pub struct CommandLauncher;

#[async_trait::async_trait]
impl WorkerLauncher for CommandLauncher {
    async fn launch(&self, spec: &WorkerSpec) -> CoordinationResult<u32> {
        let mut command = Command::new(&spec.command);
        command
            .args(&spec.args)
            .env("COLONY_ROOT", &spec.store_root)
            .env("COLONY_ROLE", &spec.role)
            .env("COLONY_STORE__ROOT", &spec.store_root)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::inherit());

        match command.spawn() {
            Ok(child) => {
                // Workers outlive the router; the handle is dropped without killing them
                let pid = child.id().unwrap_or_default();
                info!(
                    command = %spec.command,
                    role = %spec.role,
                    system_pid = pid,
                    "Worker process spawned"
                );
                Ok(pid)
            }
            Err(e) => {
                error!(command = %spec.command, error = %e, "Failed to spawn worker process");
                Err(e.into())
            }
        }
    }
}
