//! Daemon wiring: builds every subsystem from a [`DaemonConfig`] and tears
//! them down in order.

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use tracing::info;

use canary_core::{CANARY_SLOT, DaemonConfig};
use canary_maintenance::MaintenanceToggler;
use canary_metrics::{Monitor, NilMonitor, StatsdMonitor};
use canary_rollout::{FileSource, RolloutFetcher, RolloutSource, RolloutStore};
use canary_server::{CanaryHandler, RandomSource, SeededRandom, ServerOptions, ThreadRandom, UnixServer};

/// The pluggable edges of the daemon.
pub struct Wiring {
    pub source: Arc<dyn RolloutSource>,
    pub monitor: Arc<dyn Monitor>,
    pub random: Arc<dyn RandomSource>,
}

impl Wiring {
    /// File-backed source, StatsD monitor when configured, and a seeded
    /// generator when `seed` is given.
    ///
    /// The StatsD target is resolved here, before any request is served.
    pub fn from_config(config: &DaemonConfig, seed: Option<u64>) -> anyhow::Result<Self> {
        let monitor: Arc<dyn Monitor> = match &config.metrics.statsd {
            Some(target) => {
                let statsd = StatsdMonitor::new(target, config.metrics.prefix.clone())
                    .with_context(|| format!("invalid statsd target {target:?}"))?;
                info!(
                    %target,
                    addr = %statsd.target(),
                    prefix = %config.metrics.prefix,
                    "statsd monitor enabled"
                );
                Arc::new(statsd)
            }
            None => Arc::new(NilMonitor),
        };
        let random: Arc<dyn RandomSource> = match seed {
            Some(seed) => Arc::new(SeededRandom::new(seed)),
            None => Arc::new(ThreadRandom),
        };
        Ok(Self {
            source: Arc::new(FileSource::new(&config.rollout.source)),
            monitor,
            random,
        })
    }
}

/// A running daemon.
pub struct Daemon {
    fetcher: RolloutFetcher,
    maintenance: MaintenanceToggler,
    server: UnixServer,
}

impl Daemon {
    /// Start the fetcher, the maintenance toggler and the socket server.
    ///
    /// Must be called from within a Tokio runtime.
    pub async fn start(config: &DaemonConfig, wiring: Wiring) -> anyhow::Result<Self> {
        config.validate().context("invalid configuration")?;

        let fetcher = RolloutFetcher::builder()
            .source(wiring.source)
            .monitor(wiring.monitor.clone())
            .table(config.rollout.table.clone())
            .application(config.rollout.application.clone())
            .slots(config.rollout.slots.iter().cloned())
            .delay(config.fetch_delay()?)
            .unhealthy(config.unhealthy_after()?)
            .spawn()
            .context("failed to start rollout fetcher")?;
        let store = Arc::new(fetcher.store());

        std::fs::create_dir_all(&config.maintenance.state_dir).with_context(|| {
            format!(
                "failed to create state dir {}",
                config.maintenance.state_dir.display()
            )
        })?;
        let maintenance = MaintenanceToggler::start(
            config.maintenance_marker(),
            store.clone(),
            config.maintenance.slot.clone(),
            config.maintenance_interval()?,
        )
        .await
        .context("failed to start maintenance toggler")?;

        let handler = CanaryHandler::new(wiring.monitor.clone(), store)
            .with_random(wiring.random)
            .with_slot(CANARY_SLOT);
        let options = ServerOptions {
            connection_timeout: config.connection_timeout()?,
            max_request_bytes: config.server.max_request_bytes,
            ..ServerOptions::default()
        };
        let server = UnixServer::start(
            wiring.monitor,
            Arc::new(handler),
            &config.server.socket,
            options,
        )
        .context("failed to start socket server")?;

        info!(
            application = %config.rollout.application,
            table = %config.rollout.table,
            socket = %config.server.socket.display(),
            "canaryd started"
        );

        Ok(Self {
            fetcher,
            maintenance,
            server,
        })
    }

    pub fn socket_path(&self) -> &Path {
        self.server.path()
    }

    pub fn marker_path(&self) -> &Path {
        self.maintenance.path()
    }

    pub fn store(&self) -> RolloutStore {
        self.fetcher.store()
    }

    pub fn maintenance(&self) -> &MaintenanceToggler {
        &self.maintenance
    }

    /// Drain the server, then stop the background loops.
    pub async fn shutdown(self) -> anyhow::Result<()> {
        self.server
            .close()
            .await
            .context("failed to close socket server")?;
        self.maintenance.stop().await;
        self.fetcher.stop().await;
        info!("canaryd stopped");
        Ok(())
    }
}
