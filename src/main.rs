use anyhow::Result;
use clap::Parser;

use colony::cli::commands::agent::{
    AgentsCommand, HeartbeatCommand, RegisterCommand, RunCommand, StatusCommand, UnregisterCommand,
};
use colony::cli::commands::health::HealthCommand;
use colony::cli::commands::lock::LockCommand;
use colony::cli::commands::messages::{BusCommand, MarkReadCommand, ReadCommand, SendCommand};
use colony::cli::commands::route::{RouteCommand, SpawnWorkersCommand, StatsCommand};
use colony::cli::commands::task::TaskCommand;
use colony::cli::commands::{show_how_to_get_started, Command, Context};
use colony::cli::{Cli, Commands};
use colony::{init_telemetry, ColonyConfig};

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Default behavior: no subcommand - explain how to get going
    let Some(command) = cli.command else {
        return tokio::runtime::Runtime::new()?.block_on(show_how_to_get_started());
    };

    ColonyConfig::load_env_file()?;
    let mut config = ColonyConfig::load()?;

    // One-shot commands keep stderr quiet unless asked; agents log at the configured level
    let long_running = matches!(command, Commands::Run { .. });
    if !cli.global.verbose && !long_running {
        config.observability.log_level = "warn".to_string();
    }
    if let Err(e) = init_telemetry(&config.observability) {
        eprintln!("Warning: Failed to initialize telemetry: {e}");
    }

    let ctx = Context::new(config, &cli.global)?;

    tokio::runtime::Runtime::new()?.block_on(async {
        match command {
            Commands::Register { role } => RegisterCommand { role }.execute(&ctx).await,
            Commands::Unregister => UnregisterCommand.execute(&ctx).await,
            Commands::Heartbeat => HeartbeatCommand.execute(&ctx).await,
            Commands::Status { status, task } => StatusCommand { status, task }.execute(&ctx).await,
            Commands::Agents { within } => AgentsCommand { within }.execute(&ctx).await,
            Commands::Health { action } => {
                HealthCommand {
                    action: action.unwrap_or(colony::cli::HealthAction::Status),
                }
                .execute(&ctx)
                .await
            }
            Commands::Send { payload, to, kind } => SendCommand { payload, to, kind }.execute(&ctx).await,
            Commands::Read { since, mark } => ReadCommand { since, mark }.execute(&ctx).await,
            Commands::MarkRead { ids } => MarkReadCommand { ids }.execute(&ctx).await,
            Commands::Bus { action } => BusCommand { action }.execute(&ctx).await,
            Commands::Lock { action } => LockCommand { action }.execute(&ctx).await,
            Commands::Task { action } => TaskCommand { action }.execute(&ctx).await,
            Commands::Route => RouteCommand.execute(&ctx).await,
            Commands::SpawnWorkers => SpawnWorkersCommand.execute(&ctx).await,
            Commands::Stats => StatsCommand.execute(&ctx).await,
            Commands::Run { role, route_every } => RunCommand { role, route_every }.execute(&ctx).await,
        }
    })
}
