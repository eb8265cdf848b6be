//! canaryd: the canary placement daemon.
//!
//! Assembles the subsystems into one process:
//! - rollout fetcher (remote table → in-memory store)
//! - canary handler behind the Unix socket server
//! - maintenance toggler (store → marker file)
//! - monitor (DogStatsD or nothing)
//!
//! # Usage
//!
//! ```text
//! canaryd serve --config /etc/canaryd/canaryd.toml
//! canaryd query 0.42
//! ```

pub mod cli;
pub mod daemon;
pub mod logging;

pub use daemon::{Daemon, Wiring};
