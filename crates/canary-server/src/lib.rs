//! canary-server: answers "master or canary?" over a local socket.
//!
//! Each connection carries one `\n`-terminated request line and receives one
//! response (`<assignment>\n<location>\n`) before it is closed. The placement
//! policy is total: bad input, a missing rollout or a stale rollout all fall
//! back to `master`.
//!
//! # Architecture
//!
//! ```text
//! UnixServer
//!   ├── accept loop (one task, watch-channel shutdown)
//!   │   └── per-connection task (JoinSet, bounded deadline)
//!   │       ├── read until '\n'
//!   │       ├── Handler::handle(line)  ← CanaryHandler / EchoHandler
//!   │       └── write response + '\n'
//!   └── close() → stop accepting, drain JoinSet, remove socket file
//! ```
//!
//! `client::query` speaks the same protocol from the other end.

pub mod canary;
pub mod client;
pub mod error;
pub mod handler;
pub mod random;
pub mod server;

pub use canary::{CanaryHandler, Decision, decide};
pub use client::{Placement, query};
pub use error::{ClientError, ConnectionError, DecisionError, ServerError};
pub use handler::{EchoHandler, Handler};
pub use random::{RandomSource, SeededRandom, ThreadRandom};
pub use server::{ServerOptions, UnixServer};
