//! Shared types used across canaryd crates.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Slot read by the request handler.
pub const CANARY_SLOT: &str = "canary";

/// Slot read by the maintenance toggler.
pub const MAINTENANCE_SLOT: &str = "maintenance";

/// Slots tracked by default.
pub const DEFAULT_SLOTS: [&str; 2] = [MAINTENANCE_SLOT, CANARY_SLOT];

/// Where a request is placed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Location {
    /// The stable version. Every fail-safe path lands here.
    Master,
    /// The version under rollout.
    Canary,
}

impl Location {
    pub fn as_str(&self) -> &'static str {
        match self {
            Location::Master => "master",
            Location::Canary => "canary",
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a string is neither `master` nor `canary`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown location: {0:?}")]
pub struct UnknownLocation(pub String);

impl FromStr for Location {
    type Err = UnknownLocation;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "master" => Ok(Location::Master),
            "canary" => Ok(Location::Canary),
            other => Err(UnknownLocation(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn location_display_matches_wire_names() {
        assert_eq!(Location::Master.to_string(), "master");
        assert_eq!(Location::Canary.to_string(), "canary");
    }

    #[test]
    fn location_parses_wire_names() {
        assert_eq!("canary".parse::<Location>(), Ok(Location::Canary));
        assert_eq!("master".parse::<Location>(), Ok(Location::Master));
        assert!("Canary".parse::<Location>().is_err());
    }
}
