//! The observability capability.

use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use canary_core::Location;

/// Records what the daemon does.
///
/// Implementations must not block and must swallow their own transport
/// failures; callers never look at the outcome.
pub trait Monitor: Send + Sync {
    /// Outcome of serving one connection (accept, read, write).
    fn record_serve(&self, error: Option<&dyn Error>);

    /// Wall time from accepting a connection to finishing its response.
    fn record_serving_time(&self, elapsed: Duration);

    /// Outcome of one placement decision.
    fn record_handling(&self, location: Location, error: Option<&dyn Error>);

    /// Outcome of applying one rollout item (or a failed batch).
    fn record_rollout_update(&self, error: Option<&dyn Error>);
}

impl<M: Monitor + ?Sized> Monitor for Arc<M> {
    fn record_serve(&self, error: Option<&dyn Error>) {
        (**self).record_serve(error)
    }

    fn record_serving_time(&self, elapsed: Duration) {
        (**self).record_serving_time(elapsed)
    }

    fn record_handling(&self, location: Location, error: Option<&dyn Error>) {
        (**self).record_handling(location, error)
    }

    fn record_rollout_update(&self, error: Option<&dyn Error>) {
        (**self).record_rollout_update(error)
    }
}

/// A monitor sink. Records nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NilMonitor;

impl Monitor for NilMonitor {
    fn record_serve(&self, _: Option<&dyn Error>) {}
    fn record_serving_time(&self, _: Duration) {}
    fn record_handling(&self, _: Location, _: Option<&dyn Error>) {}
    fn record_rollout_update(&self, _: Option<&dyn Error>) {}
}
