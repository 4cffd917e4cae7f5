use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand};
use std::path::PathBuf;
use tracing::{error, info};
use unit_server::{BackendRegistry, Config, build, logging, resolve_config_path, start};

#[derive(Parser)]
#[command(name = "unit-server")]
#[command(about = "Build source-code units and serve them as HTTP handlers and cron tasks")]
struct Cli {
    /// Path to the YAML configuration file
    #[arg(long, global = true, env = "UNIT_SERVER_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Build every handler and task into the artifact tree
    Build,
    /// Serve handlers over HTTP and run tasks on their schedules
    Start,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let Some(command) = cli.command else {
        Cli::command().print_help()?;
        return Ok(());
    };

    let config_path = resolve_config_path(cli.config.as_deref());
    let config = Config::load(&config_path)?;
    logging::configure(&config.logging)?;
    info!("Using configuration {}", config_path.display());

    let registry = BackendRegistry::with_defaults();

    match command {
        Commands::Build => {
            let report = build(&config, &registry).await?;
            let failed = report.handlers.failed() + report.tasks.failed();
            if failed > 0 {
                error!("{} unit(s) failed to build", failed);
            }
            info!(
                handlers = report.handlers.units.len(),
                tasks = report.tasks.units.len(),
                failed,
                "Build finished"
            );
        }
        Commands::Start => {
            start(&config, &registry).await?;
        }
    }

    Ok(())
}
