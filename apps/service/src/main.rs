use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::info;

use pingtower_service::config::Config;
use pingtower_service::orchestrator::{Orchestrator, Role};

#[derive(Debug, Parser)]
#[command(name = "pingtower-service", version, about = "Endpoint uptime monitoring and alerting")]
struct Cli {
    /// Config file (defaults to $XDG_CONFIG_HOME/pingtower/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the pipeline until Ctrl-C or SIGTERM
    Run {
        #[arg(long, value_enum, default_value_t = Role::All)]
        role: Role,
    },
    /// Probe every registered endpoint once and print the report
    SweepOnce,
    /// Print the effective configuration
    ShowConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    logger::init_tracing();

    let cli = Cli::parse();
    let config = Config::from_config(cli.config.as_ref())?;

    match cli.command {
        Command::Run { role } => Orchestrator::start(config, role).await,
        Command::SweepOnce => {
            let orchestrator = Orchestrator::new(config).await?;
            let report = orchestrator.sweep_once().await;
            info!(?report, "Sweep complete");
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        Command::ShowConfig => {
            println!("{config}");
            Ok(())
        }
    }
}
