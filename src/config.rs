use anyhow::Result;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::store::RetryPolicy;

/// Main configuration structure for Colony
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ColonyConfig {
    /// Shared store settings
    pub store: StoreConfig,
    /// Registry membership and heartbeat settings
    pub registry: RegistryConfig,
    /// Health tier thresholds
    pub health: HealthConfig,
    /// Message bus retention settings
    pub bus: BusConfig,
    /// Distributed mutex settings
    pub locks: LockConfig,
    /// Task routing settings
    pub routing: RoutingConfig,
    /// Observability settings
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StoreConfig {
    /// Root directory shared by every agent process
    pub root: PathBuf,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RegistryConfig {
    /// Agents silent for longer than this are evicted on registration
    pub liveness_window_secs: u64,
    /// Interval of the background heartbeat loop
    pub heartbeat_interval_secs: u64,
    /// Attempts before a registry write gives up
    pub max_attempts: u32,
    /// Backoff base between attempts
    pub base_delay_ms: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HealthConfig {
    /// Heartbeat age at which an agent becomes `warning`
    pub warning_secs: u64,
    /// Heartbeat age at which an agent becomes `stale`
    pub stale_secs: u64,
    /// Heartbeat age beyond which an agent is `dead`
    pub dead_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BusConfig {
    /// Rotate the live log once it grows beyond this many bytes
    pub rotate_max_bytes: u64,
    /// Rotate the live log once it holds more than this many messages
    pub rotate_max_messages: usize,
    /// Heartbeat messages older than this are dropped
    pub heartbeat_ttl_secs: u64,
    /// Heartbeat messages kept per sender during compaction
    pub heartbeats_per_sender: usize,
    /// Heartbeat count in the live log that triggers compaction
    pub compaction_trigger: usize,
    /// Any message older than this is dropped by cleanup
    pub message_max_age_secs: u64,
    /// Attempts for whole-log rewrites (mark read, compaction, cleanup)
    pub rewrite_attempts: u32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LockConfig {
    /// Locks older than this are considered abandoned
    pub stale_after_secs: u64,
    /// How often a waiting acquirer re-checks the marker
    pub poll_interval_ms: u64,
    /// Timeout used when the caller does not pass one
    pub default_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RoutingConfig {
    /// Only agents that heartbeated within this window receive work
    pub availability_window_secs: u64,
    pub base_score: i64,
    pub role_match_bonus: i64,
    pub idle_bonus: i64,
    pub no_task_bonus: i64,
    /// Upper bound on live agents when spawning workers
    pub max_workers: usize,
    /// Command launched for each spawned worker, none disables spawning
    pub worker_command: Option<String>,
    pub worker_args: Vec<String>,
    /// Role handed to spawned workers
    pub worker_role: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    /// Log level used when RUST_LOG is not set
    pub log_level: String,
    /// Emit JSON structured logs instead of human-readable lines
    pub json_logs: bool,
}

impl Default for ColonyConfig {
    fn default() -> Self {
        Self {
            store: StoreConfig {
                root: PathBuf::from(".colony"),
            },
            registry: RegistryConfig {
                liveness_window_secs: 300, // 5 minutes
                heartbeat_interval_secs: 15,
                max_attempts: 5,
                base_delay_ms: 25,
            },
            health: HealthConfig {
                warning_secs: 30,
                stale_secs: 120,
                dead_secs: 600, // 10 minutes
            },
            bus: BusConfig {
                rotate_max_bytes: 5 * 1024 * 1024,
                rotate_max_messages: 500,
                heartbeat_ttl_secs: 300,
                heartbeats_per_sender: 3,
                compaction_trigger: 100,
                message_max_age_secs: 24 * 60 * 60,
                rewrite_attempts: 8,
            },
            locks: LockConfig {
                stale_after_secs: 120,
                poll_interval_ms: 100,
                default_timeout_secs: 30,
            },
            routing: RoutingConfig {
                availability_window_secs: 60,
                base_score: 10,
                role_match_bonus: 50,
                idle_bonus: 20,
                no_task_bonus: 10,
                max_workers: 4,
                worker_command: None,
                worker_args: Vec::new(),
                worker_role: "worker".to_string(),
            },
            observability: ObservabilityConfig {
                log_level: "info".to_string(),
                json_logs: true,
            },
        }
    }
}

impl ColonyConfig {
    /// Load configuration from multiple sources with precedence:
    /// 1. Default values
    /// 2. Configuration files (colony.toml, .colony-rc)
    /// 3. Environment variables (prefixed with COLONY_, nested keys split by `__`)
    pub fn load() -> Result<Self> {
        let mut builder = Config::builder().add_source(Config::try_from(&Self::default())?);

        if Path::new("colony.toml").exists() {
            builder = builder.add_source(File::with_name("colony"));
        }

        if Path::new(".colony-rc").exists() {
            builder = builder.add_source(
                File::with_name(".colony-rc").format(config::FileFormat::Toml),
            );
        }

        builder = builder.add_source(
            Environment::with_prefix("COLONY")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        let colony_config: ColonyConfig = config.try_deserialize()?;

        Ok(colony_config)
    }

    /// Save configuration to file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let toml_content = toml::to_string_pretty(self)?;
        std::fs::write(path, toml_content)?;
        Ok(())
    }

    /// Load .env file if it exists
    pub fn load_env_file() -> Result<()> {
        if Path::new(".env").exists() {
            dotenvy::dotenv()?;
            tracing::info!("Loaded environment variables from .env file");
        }
        Ok(())
    }

    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.store.root = root.into();
        self
    }
}

fn secs(value: u64) -> chrono::Duration {
    chrono::Duration::seconds(value.min(i64::MAX as u64) as i64)
}

impl RegistryConfig {
    pub fn liveness_window(&self) -> chrono::Duration {
        secs(self.liveness_window_secs)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs.max(1))
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_attempts, Duration::from_millis(self.base_delay_ms))
    }
}

impl HealthConfig {
    pub fn warning(&self) -> chrono::Duration {
        secs(self.warning_secs)
    }

    pub fn stale(&self) -> chrono::Duration {
        secs(self.stale_secs)
    }

    pub fn dead(&self) -> chrono::Duration {
        secs(self.dead_secs)
    }
}

impl BusConfig {
    pub fn heartbeat_ttl(&self) -> chrono::Duration {
        secs(self.heartbeat_ttl_secs)
    }

    pub fn message_max_age(&self) -> chrono::Duration {
        secs(self.message_max_age_secs)
    }

    pub fn rewrite_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.rewrite_attempts, Duration::from_millis(10))
    }
}

impl LockConfig {
    pub fn stale_after(&self) -> chrono::Duration {
        secs(self.stale_after_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn default_timeout(&self) -> Duration {
        Duration::from_secs(self.default_timeout_secs)
    }
}

impl RoutingConfig {
    pub fn availability_window(&self) -> chrono::Duration {
        secs(self.availability_window_secs)
    }
}
