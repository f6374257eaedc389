use anyhow::Result;
use std::path::PathBuf;

use super::Command;
use crate::config::CoordinatorConfig;

pub struct ConfigCommand {
    pub config: CoordinatorConfig,
    pub write: Option<PathBuf>,
}

impl ConfigCommand {
    pub fn new(config: CoordinatorConfig) -> Self {
        Self { config, write: None }
    }

    pub fn with_output(mut self, write: Option<PathBuf>) -> Self {
        self.write = write;
        self
    }
}

impl Command for ConfigCommand {
    async fn execute(&self) -> Result<()> {
        match &self.write {
            Some(path) => {
                self.config.save_to_file(path)?;
                println!("✅ Configuration written to {}", path.display());
            }
            None => print!("{}", self.config.to_toml()?),
        }
        Ok(())
    }
}
