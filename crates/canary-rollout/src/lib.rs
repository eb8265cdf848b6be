//! canary-rollout: propagation of rollout percentages.
//!
//! A background fetch loop reads one percentage per named slot from a remote
//! source of truth and reconciles the batch into a shared store. Slots that
//! stop refreshing for longer than the unhealthy window are forced to 0 and
//! reported as absent, so a partition can never leave a risky rollout active.
//!
//! # Components
//!
//! - **`store`**: `RolloutStore`, slot → `RolloutEntry` under one RwLock
//! - **`source`**: `RolloutSource` capability plus file and in-memory sources
//! - **`fetcher`**: `RolloutFetcher`, the sole writer of the store
//! - **`constant`**: `ConstantRollout`, a fixed value for tests and overrides
//!
//! ```text
//! RolloutSource ──batch_get──▶ RolloutFetcher ──reconcile──▶ RolloutStore
//!                                                              │
//!                                      Rollout::get(slot) ◀────┘
//! ```

pub mod constant;
pub mod error;
pub mod fetcher;
pub mod source;
pub mod store;

pub use constant::ConstantRollout;
pub use error::{ItemError, RolloutError, SourceError};
pub use fetcher::{FetcherBuilder, RolloutFetcher};
pub use source::{BatchRequest, FileSource, MemorySource, RolloutSource};
pub use store::{ReconcileReport, Rollout, RolloutEntry, RolloutStore};
