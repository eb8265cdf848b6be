//! canary-metrics: observability for canaryd.
//!
//! Every component reports through the [`Monitor`] capability. Calls are
//! fire-and-forget: they never block the caller and never fail.
//!
//! # Implementations
//!
//! ```text
//! Monitor
//!   ├── NilMonitor       records nothing
//!   ├── StatsdMonitor    DogStatsD lines over non-blocking UDP
//!   └── CountingMonitor  in-process atomics, snapshot() for tests and diagnostics
//! ```

pub mod counting;
pub mod monitor;
pub mod statsd;

pub use counting::{CountingMonitor, MonitorSnapshot};
pub use monitor::{Monitor, NilMonitor};
pub use statsd::StatsdMonitor;
