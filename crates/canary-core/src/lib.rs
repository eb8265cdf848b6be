pub mod config;
pub mod duration;
pub mod types;

pub use config::{ConfigError, DaemonConfig};
pub use duration::parse_duration;
pub use types::*;
