use anyhow::Result;
use clap::Parser;

use cluster_coordinator::cli::commands::{
    config::ConfigCommand, inspect::InspectCommand, serve::ServeCommand, show_how_to_use,
    status::StatusCommand, Command,
};
use cluster_coordinator::cli::{Cli, Commands};
use cluster_coordinator::config::CoordinatorConfig;
use cluster_coordinator::telemetry::{init_telemetry, shutdown_telemetry};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    CoordinatorConfig::load_env_file()?;
    let config = match &cli.config {
        Some(path) => CoordinatorConfig::load_from(std::slice::from_ref(path), None)?,
        None => CoordinatorConfig::load()?,
    };

    match cli.command {
        Some(Commands::Serve {
            host,
            port,
            state_file,
        }) => {
            init_telemetry(&config.observability)?;
            let result = ServeCommand::new(config)
                .with_overrides(host, port, state_file)
                .execute()
                .await;
            shutdown_telemetry();
            result
        }
        Some(Commands::Status { url }) => {
            let url = url.unwrap_or_else(|| format!("http://127.0.0.1:{}", config.server.port));
            StatusCommand::new(url).execute().await
        }
        Some(Commands::Inspect { state_file }) => {
            let state_file = state_file.unwrap_or_else(|| config.persistence.state_file.clone());
            InspectCommand::new(state_file).execute().await
        }
        Some(Commands::Config { write }) => ConfigCommand::new(config).with_output(write).execute().await,
        None => show_how_to_use().await,
    }
}
