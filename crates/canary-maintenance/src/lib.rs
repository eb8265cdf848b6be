//! canary-maintenance: maintenance mode driven by a rollout slot.
//!
//! The toggler polls one slot (normally `maintenance`) and mirrors it onto
//! the filesystem: a positive percentage means the marker file exists, zero
//! or less means it does not. Anything that wants to know whether the
//! application is in maintenance only has to `stat` the marker.

pub mod error;
pub mod toggler;

pub use error::{MaintenanceError, MaintenanceResult};
pub use toggler::MaintenanceToggler;
