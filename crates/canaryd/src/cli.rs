//! Command line interface.

use std::path::PathBuf;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};

use canary_core::DaemonConfig;

/// Default config location; a missing file there is not an error.
pub const DEFAULT_CONFIG: &str = "/etc/canaryd/canaryd.toml";

#[derive(Debug, Parser)]
#[command(name = "canaryd", about = "Canary placement daemon", version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the daemon.
    Serve(ServeArgs),

    /// Ask a running daemon to place one request.
    Query {
        /// Assignment in [0, 1); omit to let the daemon pick one.
        assignment: Option<String>,

        /// Socket of the running daemon.
        #[arg(long, default_value = "/tmp/canaryd.sock")]
        socket: PathBuf,

        /// Give up after this long.
        #[arg(long, default_value = "1s")]
        timeout: String,
    },

    /// Print the effective configuration as TOML.
    Config(ServeArgs),
}

/// Config file plus flag overrides. Flags win over the file.
#[derive(Debug, Default, Args)]
pub struct ServeArgs {
    /// Path to canaryd.toml.
    #[arg(long, short)]
    pub config: Option<PathBuf>,

    /// Unix socket to listen on.
    #[arg(long)]
    pub socket: Option<PathBuf>,

    /// Application whose rollouts are read.
    #[arg(long)]
    pub application: Option<String>,

    /// Rollout table name.
    #[arg(long)]
    pub table: Option<String>,

    /// JSON file holding the rollout table.
    #[arg(long)]
    pub source: Option<PathBuf>,

    /// Time between rollout fetches (e.g. "4s").
    #[arg(long)]
    pub delay: Option<String>,

    /// A slot not refreshed for this long is treated as absent.
    #[arg(long)]
    pub unhealthy: Option<String>,

    /// Directory holding the maintenance marker.
    #[arg(long)]
    pub state_dir: Option<PathBuf>,

    /// Append logs to this file.
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    /// Emit JSON log lines.
    #[arg(long)]
    pub json_logs: bool,

    /// DogStatsD agent address (host:port).
    #[arg(long)]
    pub statsd: Option<String>,

    /// Seed for generated assignments.
    #[arg(long)]
    pub seed: Option<u64>,
}

impl ServeArgs {
    /// Load the config file (if any) and apply the overrides.
    pub fn load(&self) -> anyhow::Result<DaemonConfig> {
        let mut config = match &self.config {
            Some(path) => DaemonConfig::from_file(path)
                .with_context(|| format!("failed to load {}", path.display()))?,
            None => {
                let default = PathBuf::from(DEFAULT_CONFIG);
                if default.exists() {
                    DaemonConfig::from_file(&default)?
                } else {
                    DaemonConfig::default()
                }
            }
        };
        self.apply(&mut config);
        config.validate()?;
        Ok(config)
    }

    fn apply(&self, config: &mut DaemonConfig) {
        if let Some(socket) = &self.socket {
            config.server.socket = socket.clone();
        }
        if let Some(application) = &self.application {
            config.rollout.application = application.clone();
        }
        if let Some(table) = &self.table {
            config.rollout.table = table.clone();
        }
        if let Some(source) = &self.source {
            config.rollout.source = source.clone();
        }
        if let Some(delay) = &self.delay {
            config.rollout.delay = delay.clone();
        }
        if let Some(unhealthy) = &self.unhealthy {
            config.rollout.unhealthy = unhealthy.clone();
        }
        if let Some(state_dir) = &self.state_dir {
            config.maintenance.state_dir = state_dir.clone();
        }
        if let Some(log_file) = &self.log_file {
            config.logging.file = Some(log_file.clone());
        }
        if self.json_logs {
            config.logging.json = true;
        }
        if let Some(statsd) = &self.statsd {
            config.metrics.statsd = Some(statsd.clone());
        }
    }
}
