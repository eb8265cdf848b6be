//! MaintenanceToggler: background task mirroring a slot onto a marker file.
//!
//! Marker I/O goes through `tokio::fs` so a slow state directory never
//! stalls a runtime worker.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::fs::{self, OpenOptions};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info};

use canary_rollout::Rollout;

use crate::error::{MaintenanceError, MaintenanceResult};

/// Keeps the marker at `path` present while `slot` is positive.
///
/// Dropping the toggler ends its loop.
pub struct MaintenanceToggler {
    marker: Arc<Marker>,
    shutdown_tx: watch::Sender<bool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl MaintenanceToggler {
    /// Apply the current value once, then re-apply it every `interval`.
    ///
    /// Must be called from within a Tokio runtime.
    pub async fn start(
        path: impl Into<PathBuf>,
        rollout: Arc<dyn Rollout>,
        slot: impl Into<String>,
        interval: Duration,
    ) -> MaintenanceResult<Self> {
        let path = path.into();
        if path.as_os_str().is_empty() {
            return Err(MaintenanceError::EmptyPath);
        }
        if interval.is_zero() {
            return Err(MaintenanceError::ZeroInterval);
        }

        let marker = Arc::new(Marker {
            path,
            rollout,
            slot: slot.into(),
        });
        marker.sync().await;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(run_toggle_loop(
            Arc::clone(&marker),
            interval,
            shutdown_rx,
        ));

        info!(
            path = %marker.path.display(),
            slot = %marker.slot,
            interval_ms = interval.as_millis() as u64,
            "maintenance toggler started"
        );

        Ok(Self {
            marker,
            shutdown_tx,
            handle: Mutex::new(Some(handle)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.marker.path
    }

    /// Read the slot and apply it now.
    pub async fn update_now(&self) {
        self.marker.sync().await;
    }

    /// Apply `value` as if it had been read from the slot.
    pub async fn update(&self, value: Option<f64>) {
        self.marker.apply(value).await;
    }

    /// Whether the marker currently exists.
    pub async fn is_on(&self) -> bool {
        self.marker.exists().await
    }

    /// Signal the loop to exit and wait for it. Safe to call more than once.
    pub async fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
        let handle = self.handle.lock().expect("toggler handle lock").take();
        if let Some(handle) = handle {
            let _ = handle.await;
            info!(path = %self.marker.path.display(), "maintenance toggler stopped");
        }
    }
}

struct Marker {
    path: PathBuf,
    rollout: Arc<dyn Rollout>,
    slot: String,
}

impl Marker {
    async fn sync(&self) {
        let value = self.rollout.get(&self.slot);
        self.apply(value).await;
    }

    async fn apply(&self, value: Option<f64>) {
        match value {
            None => debug!(slot = %self.slot, "no rollout value, leaving maintenance marker as is"),
            Some(v) if v > 0.0 => self.turn_on().await,
            Some(_) => self.turn_off().await,
        }
    }

    async fn turn_on(&self) {
        let existed = self.exists().await;
        match OpenOptions::new().write(true).create(true).open(&self.path).await {
            Ok(_) if !existed => info!(path = %self.path.display(), "maintenance mode on"),
            Ok(_) => {}
            Err(e) => error!(path = %self.path.display(), error = %e, "failed to create maintenance marker"),
        }
    }

    async fn turn_off(&self) {
        match fs::remove_file(&self.path).await {
            Ok(()) => info!(path = %self.path.display(), "maintenance mode off"),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => error!(path = %self.path.display(), error = %e, "failed to remove maintenance marker"),
        }
    }

    async fn exists(&self) -> bool {
        fs::metadata(&self.path).await.is_ok()
    }
}

async fn run_toggle_loop(marker: Arc<Marker>, period: Duration, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = shutdown.changed() => {
                debug!("maintenance loop shutting down");
                break;
            }
            _ = ticker.tick() => marker.sync().await,
        }
    }
}
