//! RolloutStore: last-known state of every observed slot.
//!
//! Pure data plus synchronization. The fetcher applies a whole batch inside
//! one write-lock critical section, so readers see either the state before a
//! pass or the state after it.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use tracing::debug;

/// Something that can provide a rollout percentage per slot.
pub trait Rollout: Send + Sync {
    /// Current percentage for `slot`.
    ///
    /// `None` means "do not trust any value": the slot was never observed or
    /// has gone stale. The value may lie outside `[0.0, 1.0]`; range checks
    /// belong to the caller.
    fn get(&self, slot: &str) -> Option<f64>;
}

impl<R: Rollout + ?Sized> Rollout for Arc<R> {
    fn get(&self, slot: &str) -> Option<f64> {
        (**self).get(slot)
    }
}

/// Value held per slot.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RolloutEntry {
    /// Last successfully fetched value, or 0 once the slot went unhealthy.
    pub percentage: f64,
    /// When the slot was last refreshed (or first observed).
    pub last_updated: Instant,
    pub healthy: bool,
}

/// Slot changes made by one reconciliation pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Existing slots refreshed with a new value.
    pub refreshed: Vec<String>,
    /// Slots seen for the first time.
    pub inserted: Vec<String>,
    /// Slots that crossed from healthy to unhealthy in this pass.
    pub went_unhealthy: Vec<String>,
}

/// Thread-safe slot → entry map.
#[derive(Debug, Clone, Default)]
pub struct RolloutStore {
    slots: Arc<RwLock<HashMap<String, RolloutEntry>>>,
}

impl RolloutStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the full entry for `slot`, healthy or not.
    pub fn entry(&self, slot: &str) -> Option<RolloutEntry> {
        let slots = self.slots.read().expect("rollout lock");
        slots.get(slot).copied()
    }

    /// Names of every slot observed so far.
    pub fn slots(&self) -> Vec<String> {
        let slots = self.slots.read().expect("rollout lock");
        slots.keys().cloned().collect()
    }

    /// Apply one fetch pass.
    ///
    /// Slots in `updates` are refreshed (or inserted) as healthy. Every other
    /// known slot keeps its value until it has gone unrefreshed for longer
    /// than `unhealthy`, at which point it is marked unhealthy and forced
    /// to 0.
    pub(crate) fn reconcile(
        &self,
        updates: &HashMap<String, f64>,
        now: Instant,
        unhealthy: Duration,
    ) -> ReconcileReport {
        let mut report = ReconcileReport::default();
        let mut slots = self.slots.write().expect("rollout lock");

        for (name, entry) in slots.iter_mut() {
            match updates.get(name) {
                Some(&percentage) => {
                    entry.percentage = percentage;
                    entry.last_updated = now;
                    entry.healthy = true;
                    report.refreshed.push(name.clone());
                }
                None => {
                    if now.saturating_duration_since(entry.last_updated) > unhealthy {
                        if entry.healthy {
                            report.went_unhealthy.push(name.clone());
                        }
                        entry.percentage = 0.0;
                        entry.healthy = false;
                    }
                }
            }
        }

        for (name, &percentage) in updates {
            if !slots.contains_key(name) {
                slots.insert(
                    name.clone(),
                    RolloutEntry {
                        percentage,
                        last_updated: now,
                        healthy: true,
                    },
                );
                report.inserted.push(name.clone());
            }
        }

        report
    }
}

impl Rollout for RolloutStore {
    fn get(&self, slot: &str) -> Option<f64> {
        let slots = self.slots.read().expect("rollout lock");
        match slots.get(slot) {
            None => {
                debug!(%slot, "request for unobserved rollout slot");
                None
            }
            Some(entry) if !entry.healthy => None,
            Some(entry) => Some(entry.percentage),
        }
    }
}
