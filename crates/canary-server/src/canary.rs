//! Canary placement.
//!
//! `decide` is the whole policy; `CanaryHandler` wires it to a rollout, a
//! random source and a monitor and renders the wire format.

use std::error::Error;
use std::sync::Arc;

use tracing::{debug, warn};

use canary_core::{CANARY_SLOT, Location};
use canary_metrics::Monitor;
use canary_rollout::Rollout;

use crate::error::DecisionError;
use crate::handler::Handler;
use crate::random::{RandomSource, ThreadRandom};

/// Outcome of one placement.
#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    /// The assignment reported back to the client.
    pub assignment: f64,
    pub location: Location,
    /// Set when a fail-safe path was taken.
    pub error: Option<DecisionError>,
}

impl Decision {
    fn master(assignment: f64, error: DecisionError) -> Self {
        Self {
            assignment,
            location: Location::Master,
            error: Some(error),
        }
    }

    /// `<assignment>\n<location>`; the server adds the final line feed.
    pub fn render(&self) -> String {
        format!("{}\n{}", self.assignment, self.location)
    }
}

/// Place one request.
///
/// 1. empty input draws a random assignment;
/// 2. unparseable input draws a fresh random assignment and lands in master;
/// 3. an assignment outside `[0, 1)` lands in master, reported as parsed;
/// 4. a missing rollout or one outside `[0, 1]` lands in master;
/// 5. otherwise canary iff `assignment < percentage`.
pub fn decide(
    input: &str,
    rollout: &dyn Rollout,
    slot: &str,
    random: &dyn RandomSource,
) -> Decision {
    let assignment = if input.is_empty() {
        random.next_assignment()
    } else {
        match parse_assignment(input) {
            Some(value) => value,
            None => {
                return Decision::master(
                    random.next_assignment(),
                    DecisionError::Unparseable(input.to_string()),
                );
            }
        }
    };

    if !(0.0..1.0).contains(&assignment) {
        return Decision::master(assignment, DecisionError::AssignmentOutOfRange(assignment));
    }

    let percentage = match rollout.get(slot) {
        None => return Decision::master(assignment, DecisionError::RolloutUnavailable),
        Some(p) if !(0.0..=1.0).contains(&p) => {
            return Decision::master(assignment, DecisionError::RolloutOutOfRange(p));
        }
        Some(p) => p,
    };

    let location = if assignment < percentage {
        Location::Canary
    } else {
        Location::Master
    };
    Decision {
        assignment,
        location,
        error: None,
    }
}

/// Finite numbers only; `-0` is folded into `0`.
fn parse_assignment(input: &str) -> Option<f64> {
    let value = input.parse::<f64>().ok().filter(|v| v.is_finite())?;
    Some(if value == 0.0 { 0.0 } else { value })
}

/// Handler answering placement requests from the `canary` slot.
pub struct CanaryHandler {
    monitor: Arc<dyn Monitor>,
    rollout: Arc<dyn Rollout>,
    random: Arc<dyn RandomSource>,
    slot: String,
}

impl CanaryHandler {
    pub fn new(monitor: Arc<dyn Monitor>, rollout: Arc<dyn Rollout>) -> Self {
        Self {
            monitor,
            rollout,
            random: Arc::new(ThreadRandom),
            slot: CANARY_SLOT.to_string(),
        }
    }

    /// Replace the random source (seeded or scripted assignments).
    pub fn with_random(mut self, random: Arc<dyn RandomSource>) -> Self {
        self.random = random;
        self
    }

    /// Read a slot other than `canary`.
    pub fn with_slot(mut self, slot: impl Into<String>) -> Self {
        self.slot = slot.into();
        self
    }

    pub fn decide(&self, input: &str) -> Decision {
        let decision = decide(input, &*self.rollout, &self.slot, &*self.random);
        match &decision.error {
            Some(e @ DecisionError::RolloutOutOfRange(_)) => {
                warn!(slot = %self.slot, error = %e, "falling back to master");
            }
            Some(e) => debug!(slot = %self.slot, error = %e, "falling back to master"),
            None => {}
        }
        self.monitor.record_handling(
            decision.location,
            decision.error.as_ref().map(|e| e as &dyn Error),
        );
        decision
    }
}

impl Handler for CanaryHandler {
    fn handle(&self, input: &str) -> String {
        self.decide(input).render()
    }
}
