//! Rollout error types.

use thiserror::Error;

/// Construction errors for the fetch loop.
#[derive(Debug, Error)]
pub enum RolloutError {
    #[error("rollout source is missing")]
    MissingSource,

    #[error("rollout table is empty")]
    EmptyTable,

    #[error("application identifier is empty")]
    EmptyApplication,

    #[error("no rollout slots to track")]
    NoSlots,

    #[error("fetch delay must be greater than zero")]
    ZeroDelay,

    #[error("fetch timeout must be greater than zero")]
    ZeroFetchTimeout,
}

/// A whole batch read failed.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("could not fetch rollout values: {0}")]
    Transport(String),

    #[error("table {0:?} missing from response")]
    MissingTable(String),

    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("no response within {0:?}")]
    Timeout(std::time::Duration),
}

/// One item of a batch could not be applied.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ItemError {
    #[error("item is not an object")]
    NotAnObject,

    #[error("could not find {0:?} key in item")]
    MissingKey(&'static str),

    #[error("slot name is not stored as a string")]
    NameNotString,

    #[error("slot name is empty")]
    EmptyName,

    #[error("slot {0:?} is not tracked")]
    Untracked(String),

    #[error("rollout value is not stored as a number")]
    NotANumber,

    #[error("could not parse rollout value {0:?} as a number")]
    Unparseable(String),

    #[error("rollout value {0} is out of [0.0,1.0] range")]
    OutOfRange(f64),
}

pub type SourceResult<T> = Result<T, SourceError>;
