mod cli;
mod config;
mod daemon;
mod ipc;
mod mediaremote;
mod models;
mod monitor;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use cli::{App, Cli, Commands, ConfigCommands, DaemonCommands};

fn main() -> Result<()> {
    let cli = Cli::parse();
    let app = App::new(cli.config, cli.socket)?;

    // Initialize logging: RUST_LOG wins over the configured level
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&app.config.logging.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        None | Some(Commands::Run) => {
            app.daemon_run()?;
        }
        Some(Commands::Daemon { command }) => match command {
            DaemonCommands::Start => {
                app.daemon_start()?;
            }
            DaemonCommands::Stop => {
                app.daemon_stop()?;
            }
            DaemonCommands::Status => {
                app.daemon_status()?;
            }
            DaemonCommands::Run => {
                app.daemon_run()?;
            }
        },
        Some(Commands::Watch { json }) => {
            app.watch(json)?;
        }
        Some(Commands::Status { json }) => {
            app.status(json)?;
        }
        Some(Commands::Now { json, timeout }) => {
            app.now(json, timeout)?;
        }
        Some(Commands::Config { command }) => match command {
            ConfigCommands::Show => {
                app.config_show()?;
            }
            ConfigCommands::Path => {
                app.config_path()?;
            }
        },
    }

    Ok(())
}
