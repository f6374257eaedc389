use clap::{Parser, Subcommand};
use std::path::PathBuf;

pub mod commands;

#[derive(Parser)]
#[command(name = "cluster-coordinator")]
#[command(about = "Central coordinator for a cluster of task-executing agent nodes")]
#[command(long_about = "The cluster coordinator keeps the authoritative registry of agent nodes and \
                       tasks, places pending work on the best available node, watches node liveness \
                       and moves work off nodes that stop responding. Start it with 'cluster-coordinator serve'.")]
pub struct Cli {
    /// Configuration file layered over the defaults
    #[arg(long, global = true, help = "Read configuration from this TOML file instead of coordinator.toml")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the HTTP API and heartbeat monitor until interrupted
    Serve {
        /// Interface to bind
        #[arg(long, help = "Override server.host")]
        host: Option<String>,
        /// Port to bind
        #[arg(long, help = "Override server.port")]
        port: Option<u16>,
        /// Snapshot file
        #[arg(long, help = "Override persistence.state_file; the lock file sits next to it")]
        state_file: Option<PathBuf>,
    },
    /// Show node and task overview from a running coordinator
    Status {
        /// Base url of the coordinator
        #[arg(long, help = "Coordinator base url, defaults to the configured local port")]
        url: Option<String>,
    },
    /// Print the contents of a snapshot file without starting a coordinator
    Inspect {
        /// Snapshot file to read
        #[arg(long, help = "Snapshot file, defaults to persistence.state_file")]
        state_file: Option<PathBuf>,
    },
    /// Print the effective configuration as TOML
    Config {
        /// Write to a file instead of stdout
        #[arg(long, help = "Write the configuration to PATH")]
        write: Option<PathBuf>,
    },
}
