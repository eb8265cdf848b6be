//! canaryd.toml configuration parser.
//!
//! Every field has a default, so an empty file (or no file at all) yields a
//! runnable configuration. Durations are stored as human strings and parsed
//! on access.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::duration::parse_duration;
use crate::types::{DEFAULT_SLOTS, MAINTENANCE_SLOT};

/// Errors produced while loading or validating a configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid duration for {field}: {value:?}")]
    InvalidDuration { field: &'static str, value: String },

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub server: ServerConfig,
    pub rollout: RolloutConfig,
    pub maintenance: MaintenanceConfig,
    pub metrics: MetricsConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Path of the Unix socket clients connect to.
    pub socket: PathBuf,
    /// Read/write deadline for a single connection.
    pub connection_timeout: String,
    /// Longest request line accepted before the connection is dropped.
    pub max_request_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            socket: PathBuf::from("/tmp/canaryd.sock"),
            connection_timeout: "1s".to_string(),
            max_request_bytes: 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RolloutConfig {
    /// Application whose rollout rows are read.
    pub application: String,
    /// Table holding the rollout rows.
    pub table: String,
    /// JSON document standing in for the remote store.
    pub source: PathBuf,
    /// Minimum delay between two fetches.
    pub delay: String,
    /// How long a slot may go unrefreshed before it is forced to 0.
    pub unhealthy: String,
    /// Slots fetched in every batch.
    pub slots: Vec<String>,
}

impl Default for RolloutConfig {
    fn default() -> Self {
        Self {
            application: "app".to_string(),
            table: "Rollouts".to_string(),
            source: PathBuf::from("/etc/canaryd/rollouts.json"),
            delay: "4s".to_string(),
            unhealthy: "8s".to_string(),
            slots: DEFAULT_SLOTS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MaintenanceConfig {
    /// Directory holding the marker file (named after the application).
    pub state_dir: PathBuf,
    /// Poll interval of the toggler.
    pub interval: String,
    /// Slot driving the marker.
    pub slot: String,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            state_dir: PathBuf::from("/var/lib/canaryd"),
            interval: "1s".to_string(),
            slot: MAINTENANCE_SLOT.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// DogStatsD agent address. Metrics are discarded when unset.
    pub statsd: Option<String>,
    pub prefix: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            statsd: None,
            prefix: "canaryd".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Append logs to this file instead of stderr.
    pub file: Option<PathBuf>,
    /// Emit JSON lines.
    pub json: bool,
    /// `EnvFilter` directive; `RUST_LOG` wins when set.
    pub filter: Option<String>,
}

impl DaemonConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: DaemonConfig = toml::from_str(content)?;
        Ok(config)
    }

    /// Check every field that would otherwise fail later at startup.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.connection_timeout()?;
        self.fetch_delay()?;
        self.unhealthy_after()?;
        self.maintenance_interval()?;

        if self.rollout.application.is_empty() {
            return Err(ConfigError::Invalid("rollout.application is empty".into()));
        }
        if self.rollout.table.is_empty() {
            return Err(ConfigError::Invalid("rollout.table is empty".into()));
        }
        if self.rollout.slots.iter().all(|s| s.is_empty()) {
            return Err(ConfigError::Invalid("rollout.slots is empty".into()));
        }
        if self.maintenance.slot.is_empty() {
            return Err(ConfigError::Invalid("maintenance.slot is empty".into()));
        }
        if !self.rollout.slots.contains(&self.maintenance.slot) {
            return Err(ConfigError::Invalid(format!(
                "maintenance.slot {:?} is not one of rollout.slots",
                self.maintenance.slot
            )));
        }
        if self.server.max_request_bytes == 0 {
            return Err(ConfigError::Invalid("server.max_request_bytes is 0".into()));
        }
        Ok(())
    }

    pub fn connection_timeout(&self) -> Result<Duration, ConfigError> {
        duration_field("server.connection_timeout", &self.server.connection_timeout)
    }

    pub fn fetch_delay(&self) -> Result<Duration, ConfigError> {
        duration_field("rollout.delay", &self.rollout.delay)
    }

    pub fn unhealthy_after(&self) -> Result<Duration, ConfigError> {
        duration_field("rollout.unhealthy", &self.rollout.unhealthy)
    }

    pub fn maintenance_interval(&self) -> Result<Duration, ConfigError> {
        duration_field("maintenance.interval", &self.maintenance.interval)
    }

    /// Full path of the maintenance marker file.
    pub fn maintenance_marker(&self) -> PathBuf {
        self.maintenance.state_dir.join(&self.rollout.application)
    }

    pub fn to_toml_string(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}

fn duration_field(field: &'static str, value: &str) -> Result<Duration, ConfigError> {
    match parse_duration(value) {
        Some(d) if !d.is_zero() => Ok(d),
        _ => Err(ConfigError::InvalidDuration {
            field,
            value: value.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_uses_defaults() {
        let config = DaemonConfig::from_toml_str("").unwrap();
        assert_eq!(config.server.socket, PathBuf::from("/tmp/canaryd.sock"));
        assert_eq!(config.rollout.application, "app");
        assert_eq!(config.fetch_delay().unwrap(), Duration::from_secs(4));
        assert_eq!(config.unhealthy_after().unwrap(), Duration::from_secs(8));
        assert_eq!(config.rollout.slots, vec!["maintenance", "canary"]);
        config.validate().unwrap();
    }

    #[test]
    fn parse_partial_document() {
        let toml_str = r#"
[server]
socket = "/run/canaryd.sock"
connection_timeout = "250ms"

[rollout]
application = "checkout"
delay = "2s"

[metrics]
statsd = "127.0.0.1:8125"
"#;
        let config = DaemonConfig::from_toml_str(toml_str).unwrap();
        assert_eq!(config.server.socket, PathBuf::from("/run/canaryd.sock"));
        assert_eq!(config.connection_timeout().unwrap(), Duration::from_millis(250));
        assert_eq!(config.rollout.application, "checkout");
        assert_eq!(config.rollout.table, "Rollouts");
        assert_eq!(config.metrics.statsd.as_deref(), Some("127.0.0.1:8125"));
        assert_eq!(
            config.maintenance_marker(),
            PathBuf::from("/var/lib/canaryd/checkout")
        );
    }

    #[test]
    fn zero_duration_is_rejected() {
        let mut config = DaemonConfig::default();
        config.rollout.delay = "0s".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidDuration { field: "rollout.delay", .. })
        ));
    }

    #[test]
    fn empty_application_is_rejected() {
        let mut config = DaemonConfig::default();
        config.rollout.application.clear();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn maintenance_slot_must_be_fetched() {
        let config = DaemonConfig::from_toml_str(
            "[rollout]\nslots = [\"canary\"]\n",
        )
        .unwrap();
        let err = config.validate().unwrap_err();
        assert!(matches!(&err, ConfigError::Invalid(msg) if msg.contains("maintenance.slot")));

        let config = DaemonConfig::from_toml_str(
            "[rollout]\nslots = [\"canary\", \"freeze\"]\n[maintenance]\nslot = \"freeze\"\n",
        )
        .unwrap();
        config.validate().unwrap();
    }

    #[test]
    fn unknown_field_type_fails_to_parse() {
        let err = DaemonConfig::from_toml_str("[server]\nmax_request_bytes = \"big\"\n");
        assert!(matches!(err, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn serializes_back_to_toml() {
        let toml_str = DaemonConfig::default().to_toml_string().unwrap();
        let back = DaemonConfig::from_toml_str(&toml_str).unwrap();
        assert_eq!(back.rollout.table, "Rollouts");
    }
}
