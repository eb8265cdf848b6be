//! Remote rollout sources.
//!
//! A source answers one batched lookup per fetch cycle. Items come back as
//! loosely-typed JSON objects, the way a key-value store returns attribute
//! maps; validation is left to the fetcher so a malformed item only costs
//! that item.
//!
//! Item shape:
//!
//! ```json
//! { "application": "app", "version": "canary", "rollout": 0.25 }
//! ```

use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::debug;

use crate::error::{SourceError, SourceResult};

/// Key holding the application identifier.
pub const APPLICATION_FIELD: &str = "application";
/// Key holding the slot name.
pub const SLOT_FIELD: &str = "version";
/// Key holding the rollout percentage.
pub const ROLLOUT_FIELD: &str = "rollout";

/// One batched lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchRequest {
    pub table: String,
    pub application: String,
    pub slots: Vec<String>,
}

impl BatchRequest {
    pub fn tracks(&self, slot: &str) -> bool {
        self.slots.iter().any(|s| s == slot)
    }
}

/// The remote source of truth for rollout percentages.
///
/// Each call must reflect the latest committed write.
#[async_trait]
pub trait RolloutSource: Send + Sync {
    /// Fetch the items for every slot in `request`.
    ///
    /// Slots without a row are simply missing from the result.
    async fn batch_get(&self, request: &BatchRequest) -> SourceResult<Vec<Value>>;
}

/// Reads rollout rows from a JSON document on disk, once per call.
///
/// The document maps table names to arrays of items:
///
/// ```json
/// { "Rollouts": [ { "application": "app", "version": "canary", "rollout": 0.1 } ] }
/// ```
#[derive(Debug, Clone)]
pub struct FileSource {
    path: PathBuf,
}

impl FileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl RolloutSource for FileSource {
    async fn batch_get(&self, request: &BatchRequest) -> SourceResult<Vec<Value>> {
        let content = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| SourceError::Transport(format!("{}: {e}", self.path.display())))?;
        let document: Value =
            serde_json::from_str(&content).map_err(|e| SourceError::Malformed(e.to_string()))?;

        let rows = document
            .get(&request.table)
            .ok_or_else(|| SourceError::MissingTable(request.table.clone()))?
            .as_array()
            .ok_or_else(|| SourceError::Malformed(format!("table {:?} is not an array", request.table)))?;

        let items: Vec<Value> = rows
            .iter()
            .filter(|row| matches_request(row, request))
            .cloned()
            .collect();

        debug!(
            path = %self.path.display(),
            rows = rows.len(),
            matched = items.len(),
            "read rollout file"
        );
        Ok(items)
    }
}

/// Keep rows for this application and these slots.
///
/// Rows whose keys are missing or mistyped are kept so the fetcher can
/// report them.
fn matches_request(row: &Value, request: &BatchRequest) -> bool {
    if let Some(app) = row.get(APPLICATION_FIELD).and_then(Value::as_str) {
        if app != request.application {
            return false;
        }
    }
    match row.get(SLOT_FIELD).and_then(Value::as_str) {
        Some(slot) => request.tracks(slot),
        None => true,
    }
}

/// In-memory source whose contents and availability can be changed at runtime.
#[derive(Debug, Default)]
pub struct MemorySource {
    state: Mutex<MemoryState>,
    calls: AtomicUsize,
}

#[derive(Debug, Default)]
struct MemoryState {
    items: Vec<Value>,
    failure: Option<String>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the row for `slot`.
    pub fn set(&self, slot: &str, rollout: f64) {
        let mut state = self.state.lock().expect("memory source lock");
        state
            .items
            .retain(|item| item.get(SLOT_FIELD).and_then(Value::as_str) != Some(slot));
        state
            .items
            .push(json!({ SLOT_FIELD: slot, ROLLOUT_FIELD: rollout }));
    }

    /// Remove the row for `slot`.
    pub fn remove(&self, slot: &str) {
        let mut state = self.state.lock().expect("memory source lock");
        state
            .items
            .retain(|item| item.get(SLOT_FIELD).and_then(Value::as_str) != Some(slot));
    }

    /// Replace every row with raw items, well-formed or not.
    pub fn set_items(&self, items: Vec<Value>) {
        self.state.lock().expect("memory source lock").items = items;
    }

    /// Make every following call fail until [`MemorySource::recover`].
    pub fn fail(&self, message: impl Into<String>) {
        self.state.lock().expect("memory source lock").failure = Some(message.into());
    }

    pub fn recover(&self) {
        self.state.lock().expect("memory source lock").failure = None;
    }

    /// Number of batch reads served so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RolloutSource for MemorySource {
    async fn batch_get(&self, _request: &BatchRequest) -> SourceResult<Vec<Value>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let state = self.state.lock().expect("memory source lock");
        if let Some(message) = &state.failure {
            return Err(SourceError::Transport(message.clone()));
        }
        Ok(state.items.clone())
    }
}
