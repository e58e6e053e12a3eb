use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;
pub use commands::*;

#[derive(Parser)]
#[command(name = "media_listener")]
#[command(about = "Monitor macOS system-wide media playback and publish events over a UNIX socket")]
#[command(version)]
pub struct Cli {
    /// Path to the config file
    #[arg(long, global = true, env = "MEDIA_LISTENER_CONFIG")]
    pub config: Option<PathBuf>,

    /// Override the event socket path
    #[arg(long, global = true, env = "MEDIA_LISTENER_SOCKET")]
    pub socket: Option<PathBuf>,

    /// Runs the daemon in the foreground when omitted
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the daemon in the foreground
    Run,

    /// Daemon management
    Daemon {
        #[command(subcommand)]
        command: DaemonCommands,
    },

    /// Stream events from the daemon
    Watch {
        /// Print raw JSON lines
        #[arg(long)]
        json: bool,
    },

    /// Show the daemon's current now-playing status
    Status {
        /// Print raw JSON
        #[arg(long)]
        json: bool,
    },

    /// Query MediaRemote directly, without the daemon
    Now {
        /// Print raw JSON
        #[arg(long)]
        json: bool,

        /// Seconds to wait for MediaRemote to answer
        #[arg(long, default_value_t = 2)]
        timeout: u64,
    },

    /// Configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand)]
pub enum DaemonCommands {
    /// Start the daemon in the background
    Start,
    /// Stop the daemon
    Stop,
    /// Show daemon status
    Status,
    /// Run daemon in foreground (internal use)
    Run,
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Print the effective configuration
    Show,
    /// Print the config file location
    Path,
}
