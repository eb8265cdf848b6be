//! Server, connection, decision and client error types.

use std::path::PathBuf;

use thiserror::Error;

/// Errors surfaced by [`crate::UnixServer`] itself.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("error creating unix listener {path}: {source}")]
    Bind {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("error setting permissions on {path}: {source}")]
    Permissions {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("server already closed")]
    AlreadyClosed,
}

/// One connection was abandoned.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("error reading from connection: {0}")]
    Read(#[source] std::io::Error),

    #[error("error writing to connection: {0}")]
    Write(#[source] std::io::Error),

    #[error("connection deadline exceeded")]
    Timeout,

    #[error("connection closed before end of line")]
    ClosedEarly,

    #[error("request line longer than {0} bytes")]
    TooLarge(usize),
}

/// Why a placement fell back to `master`.
///
/// Never returned to a client; only reported to the monitor.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DecisionError {
    #[error("could not parse assignment {0:?} as a number")]
    Unparseable(String),

    #[error("assignment {0} is out of [0.0,1.0) range")]
    AssignmentOutOfRange(f64),

    #[error("rollout value is unavailable")]
    RolloutUnavailable,

    #[error("rollout value {0} is out of [0.0,1.0] range")]
    RolloutOutOfRange(f64),
}

/// Errors from [`crate::client::query`].
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("request must not contain a line feed")]
    InvalidInput,

    #[error("could not connect to {path}: {source}")]
    Connect {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("timed out waiting for response")]
    Timeout,

    #[error("connection closed without a response")]
    NoResponse,

    #[error("malformed response: {0:?}")]
    Malformed(String),
}
