use anyhow::{bail, Result};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const ENV_PREFIX: &str = "CLUSTER_COORDINATOR";

/// Main configuration structure for the cluster coordinator
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// HTTP listener
    pub server: ServerConfig,
    /// Node liveness monitoring
    pub heartbeat: HeartbeatConfig,
    /// Outbound calls to nodes
    pub node_client: NodeClientConfig,
    /// Task defaults
    pub tasks: TaskConfig,
    /// Snapshot storage
    pub persistence: PersistenceConfig,
    /// Logging
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8001,
        }
    }
}

impl ServerConfig {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct HeartbeatConfig {
    /// Seconds between monitor cycles
    pub interval_seconds: u64,
    /// A node silent for longer than this is marked offline
    pub timeout_seconds: u64,
    /// Actively probe every online node on each cycle
    pub probe_on_sweep: bool,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval_seconds: 30,
            timeout_seconds: 120,
            probe_on_sweep: true,
        }
    }
}

impl HeartbeatConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds)
    }

    pub fn timeout(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.timeout_seconds as i64)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct NodeClientConfig {
    pub probe_timeout_seconds: u64,
    pub assign_timeout_seconds: u64,
    pub health_path: String,
}

impl Default for NodeClientConfig {
    fn default() -> Self {
        Self {
            probe_timeout_seconds: 5,
            assign_timeout_seconds: 10,
            health_path: "/health".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct TaskConfig {
    /// Retry budget given to tasks submitted without one
    pub default_max_retries: u32,
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            default_max_retries: 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct PersistenceConfig {
    /// When false snapshots are kept in memory only
    pub enabled: bool,
    pub state_file: PathBuf,
    pub lock_file: PathBuf,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            state_file: PathBuf::from("cluster_state.json"),
            lock_file: PathBuf::from("cluster_state.lock"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Default log level, overridden by RUST_LOG
    pub log_level: String,
    /// Structured JSON output instead of human readable lines
    pub json_logs: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: true,
        }
    }
}

impl CoordinatorConfig {
    /// Load configuration from multiple sources with precedence:
    /// 1. Default values
    /// 2. Configuration files (coordinator.toml, .coordinator-rc)
    /// 3. Environment variables (prefixed with CLUSTER_COORDINATOR_, `__` between sections)
    pub fn load() -> Result<Self> {
        let mut files = Vec::new();
        if Path::new("coordinator.toml").exists() {
            files.push(PathBuf::from("coordinator.toml"));
        }
        if Path::new(".coordinator-rc").exists() {
            files.push(PathBuf::from(".coordinator-rc"));
        }
        Self::load_from(&files, None)
    }

    /// Layer the given files over the defaults, then the environment.
    /// `env` replaces the process environment when provided.
    pub fn load_from(files: &[PathBuf], env: Option<HashMap<String, String>>) -> Result<Self> {
        let mut builder = Config::builder().add_source(Config::try_from(&Self::default())?);

        for file in files {
            builder = builder.add_source(File::from(file.as_path()).format(config::FileFormat::Toml));
        }

        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true)
                .source(env),
        );

        let config: CoordinatorConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.heartbeat.interval_seconds == 0 {
            bail!("heartbeat.interval_seconds must be greater than zero");
        }
        if self.heartbeat.timeout_seconds == 0 {
            bail!("heartbeat.timeout_seconds must be greater than zero");
        }
        if self.node_client.probe_timeout_seconds == 0 || self.node_client.assign_timeout_seconds == 0 {
            bail!("node_client timeouts must be greater than zero");
        }
        Ok(())
    }

    /// Save configuration to file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        std::fs::write(path, self.to_toml()?)?;
        Ok(())
    }

    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Load .env file if it exists
    pub fn load_env_file() -> Result<()> {
        if Path::new(".env").exists() {
            dotenvy::dotenv()?;
            tracing::info!("Loaded environment variables from .env file");
        }
        Ok(())
    }
}
