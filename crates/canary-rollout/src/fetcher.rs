//! RolloutFetcher: background task that keeps the store in sync with the
//! remote source.
//!
//! One batch read per cycle covers every tracked slot. Valid items refresh
//! their slot; malformed items are reported and skipped; slots missing from
//! the batch age toward the unhealthy threshold.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use canary_core::DEFAULT_SLOTS;
use canary_metrics::{Monitor, NilMonitor};

use crate::error::{ItemError, RolloutError, SourceError};
use crate::source::{BatchRequest, ROLLOUT_FIELD, RolloutSource, SLOT_FIELD};
use crate::store::{ReconcileReport, RolloutStore};

/// Configures and starts a [`RolloutFetcher`].
pub struct FetcherBuilder {
    source: Option<Arc<dyn RolloutSource>>,
    monitor: Arc<dyn Monitor>,
    table: String,
    application: String,
    slots: Vec<String>,
    delay: Duration,
    unhealthy: Duration,
    fetch_timeout: Option<Duration>,
}

impl Default for FetcherBuilder {
    fn default() -> Self {
        Self {
            source: None,
            monitor: Arc::new(NilMonitor),
            table: String::new(),
            application: String::new(),
            slots: DEFAULT_SLOTS.iter().map(|s| s.to_string()).collect(),
            delay: Duration::from_secs(4),
            unhealthy: Duration::from_secs(8),
            fetch_timeout: None,
        }
    }
}

impl FetcherBuilder {
    pub fn source(mut self, source: Arc<dyn RolloutSource>) -> Self {
        self.source = Some(source);
        self
    }

    pub fn monitor(mut self, monitor: Arc<dyn Monitor>) -> Self {
        self.monitor = monitor;
        self
    }

    pub fn table(mut self, table: impl Into<String>) -> Self {
        self.table = table.into();
        self
    }

    pub fn application(mut self, application: impl Into<String>) -> Self {
        self.application = application.into();
        self
    }

    /// Slots fetched in every batch. Empty names are ignored.
    pub fn slots<I, S>(mut self, slots: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.slots = slots.into_iter().map(Into::into).collect();
        self
    }

    /// Delay between two fetch cycles.
    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// How long a slot may go unrefreshed before it is forced to 0.
    pub fn unhealthy(mut self, unhealthy: Duration) -> Self {
        self.unhealthy = unhealthy;
        self
    }

    /// Upper bound on one batch read. Defaults to the smaller of `delay`
    /// and `unhealthy`, so a hung read can never hold back staleness.
    pub fn fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = Some(timeout);
        self
    }

    /// Validate the configuration and start the fetch loop.
    ///
    /// Must be called from within a Tokio runtime. Nothing is spawned when
    /// validation fails.
    pub fn spawn(self) -> Result<RolloutFetcher, RolloutError> {
        let source = self.source.ok_or(RolloutError::MissingSource)?;
        if self.table.is_empty() {
            return Err(RolloutError::EmptyTable);
        }
        if self.application.is_empty() {
            return Err(RolloutError::EmptyApplication);
        }
        let mut slots: Vec<String> = self.slots.into_iter().filter(|s| !s.is_empty()).collect();
        slots.sort();
        slots.dedup();
        if slots.is_empty() {
            return Err(RolloutError::NoSlots);
        }
        if self.delay.is_zero() {
            return Err(RolloutError::ZeroDelay);
        }
        let fetch_timeout = self
            .fetch_timeout
            .unwrap_or_else(|| self.delay.min(self.unhealthy));
        if fetch_timeout.is_zero() {
            return Err(RolloutError::ZeroFetchTimeout);
        }

        let store = RolloutStore::new();
        let cycle = FetchCycle {
            source,
            monitor: self.monitor,
            request: BatchRequest {
                table: self.table,
                application: self.application,
                slots,
            },
            store: store.clone(),
            unhealthy: self.unhealthy,
            fetch_timeout,
        };

        info!(
            table = %cycle.request.table,
            application = %cycle.request.application,
            slots = ?cycle.request.slots,
            delay_ms = self.delay.as_millis() as u64,
            unhealthy_ms = self.unhealthy.as_millis() as u64,
            fetch_timeout_ms = fetch_timeout.as_millis() as u64,
            "rollout fetcher started"
        );

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let delay = self.delay;
        let handle = tokio::spawn(async move {
            run_fetch_loop(cycle, delay, shutdown_rx).await;
        });

        Ok(RolloutFetcher {
            store,
            shutdown_tx,
            handle: Mutex::new(Some(handle)),
        })
    }
}

/// Handle to the running fetch loop.
///
/// Dropping the handle stops the loop; the store (and its clones) keeps the
/// last reconciled state.
pub struct RolloutFetcher {
    store: RolloutStore,
    shutdown_tx: watch::Sender<bool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl RolloutFetcher {
    pub fn builder() -> FetcherBuilder {
        FetcherBuilder::default()
    }

    /// The store this fetcher writes to.
    pub fn store(&self) -> RolloutStore {
        self.store.clone()
    }

    /// Stop the loop and wait for it to exit.
    ///
    /// A cycle already past its remote read may still be applied. Calling
    /// this more than once is harmless.
    pub async fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
        let handle = self.handle.lock().expect("fetcher handle lock").take();
        if let Some(handle) = handle {
            let _ = handle.await;
            info!("rollout fetcher stopped");
        }
    }
}

/// Everything one fetch cycle needs.
struct FetchCycle {
    source: Arc<dyn RolloutSource>,
    monitor: Arc<dyn Monitor>,
    request: BatchRequest,
    store: RolloutStore,
    unhealthy: Duration,
    fetch_timeout: Duration,
}

impl FetchCycle {
    /// Read one batch and reconcile it into the store.
    async fn run(&self) -> ReconcileReport {
        let fetched = tokio::time::timeout(self.fetch_timeout, self.source.batch_get(&self.request))
            .await
            .unwrap_or(Err(SourceError::Timeout(self.fetch_timeout)));
        let updates = match fetched {
            Ok(items) => self.collect(&items),
            Err(e) => {
                self.monitor.record_rollout_update(Some(&e));
                warn!(error = %e, "could not fetch rollout values");
                HashMap::new()
            }
        };

        let now = tokio::time::Instant::now().into_std();
        let report = self.store.reconcile(&updates, now, self.unhealthy);

        for slot in &report.inserted {
            info!(%slot, percentage = updates[slot], "rollout slot observed");
        }
        for slot in &report.went_unhealthy {
            warn!(
                %slot,
                unhealthy_ms = self.unhealthy.as_millis() as u64,
                "rollout slot is stale, forcing rollout to 0"
            );
        }
        debug!(
            refreshed = report.refreshed.len(),
            inserted = report.inserted.len(),
            "rollout cycle applied"
        );
        report
    }

    /// Validate every item, keeping the good ones.
    fn collect(&self, items: &[Value]) -> HashMap<String, f64> {
        let mut updates = HashMap::new();
        for item in items {
            match parse_item(item, &self.request) {
                Ok((slot, percentage)) => {
                    self.monitor.record_rollout_update(None);
                    updates.insert(slot, percentage);
                }
                Err(e) => {
                    self.monitor.record_rollout_update(Some(&e));
                    warn!(error = %e, "skipping rollout item");
                }
            }
        }
        updates
    }
}

async fn run_fetch_loop(
    cycle: FetchCycle,
    delay: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            _ = cycle.run() => {}
        }

        tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            _ = tokio::time::sleep(delay) => {}
        }
    }
    debug!("rollout fetch loop exiting");
}

/// Validate one item and extract `(slot, percentage)`.
fn parse_item(item: &Value, request: &BatchRequest) -> Result<(String, f64), ItemError> {
    let fields = item.as_object().ok_or(ItemError::NotAnObject)?;

    let name = fields
        .get(SLOT_FIELD)
        .ok_or(ItemError::MissingKey(SLOT_FIELD))?
        .as_str()
        .ok_or(ItemError::NameNotString)?;
    if name.is_empty() {
        return Err(ItemError::EmptyName);
    }
    if !request.tracks(name) {
        return Err(ItemError::Untracked(name.to_string()));
    }

    let raw = fields
        .get(ROLLOUT_FIELD)
        .ok_or(ItemError::MissingKey(ROLLOUT_FIELD))?;
    let percentage = match raw {
        Value::Number(n) => n.as_f64().ok_or(ItemError::NotANumber)?,
        Value::String(s) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| ItemError::Unparseable(s.clone()))?,
        _ => return Err(ItemError::NotANumber),
    };
    if !percentage.is_finite() {
        return Err(ItemError::Unparseable(raw.to_string()));
    }
    if !(0.0..=1.0).contains(&percentage) {
        return Err(ItemError::OutOfRange(percentage));
    }

    Ok((name.to_string(), percentage))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MemorySource;
    use crate::store::Rollout;
    use async_trait::async_trait;
    use canary_metrics::CountingMonitor;
    use serde_json::json;

    use crate::error::SourceResult;

    /// Answers the first read, then never answers again.
    struct StallingSource {
        first: MemorySource,
        calls: std::sync::atomic::AtomicUsize,
    }

    #[async_trait]
    impl RolloutSource for StallingSource {
        async fn batch_get(&self, request: &BatchRequest) -> SourceResult<Vec<Value>> {
            let call = self
                .calls
                .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            if call == 0 {
                return self.first.batch_get(request).await;
            }
            std::future::pending().await
        }
    }

    fn request() -> BatchRequest {
        BatchRequest {
            table: "Rollouts".to_string(),
            application: "app".to_string(),
            slots: vec!["canary".to_string(), "maintenance".to_string()],
        }
    }

    fn builder(source: Arc<MemorySource>) -> FetcherBuilder {
        RolloutFetcher::builder()
            .source(source)
            .table("Rollouts")
            .application("app")
            .delay(Duration::from_secs(1))
            .unhealthy(Duration::from_secs(3))
    }

    #[test]
    fn parse_item_accepts_number_and_numeric_string() {
        let req = request();
        assert_eq!(
            parse_item(&json!({"version": "canary", "rollout": 0.25}), &req),
            Ok(("canary".to_string(), 0.25))
        );
        assert_eq!(
            parse_item(&json!({"version": "maintenance", "rollout": "1"}), &req),
            Ok(("maintenance".to_string(), 1.0))
        );
    }

    #[test]
    fn parse_item_rejects_malformed_items() {
        let req = request();
        let cases = [
            (json!("canary"), ItemError::NotAnObject),
            (json!({"rollout": 0.1}), ItemError::MissingKey(SLOT_FIELD)),
            (json!({"version": 7, "rollout": 0.1}), ItemError::NameNotString),
            (json!({"version": "", "rollout": 0.1}), ItemError::EmptyName),
            (
                json!({"version": "beta", "rollout": 0.1}),
                ItemError::Untracked("beta".to_string()),
            ),
            (json!({"version": "canary"}), ItemError::MissingKey(ROLLOUT_FIELD)),
            (json!({"version": "canary", "rollout": true}), ItemError::NotANumber),
            (
                json!({"version": "canary", "rollout": "lots"}),
                ItemError::Unparseable("lots".to_string()),
            ),
            (json!({"version": "canary", "rollout": 1.5}), ItemError::OutOfRange(1.5)),
            (json!({"version": "canary", "rollout": -0.1}), ItemError::OutOfRange(-0.1)),
        ];
        for (item, expected) in cases {
            assert_eq!(parse_item(&item, &req), Err(expected), "item: {item}");
        }
    }

    #[test]
    fn parse_item_rejects_non_finite_strings() {
        let req = request();
        assert!(matches!(
            parse_item(&json!({"version": "canary", "rollout": "NaN"}), &req),
            Err(ItemError::Unparseable(_))
        ));
    }

    #[tokio::test]
    async fn cycle_skips_bad_items_without_touching_entry() {
        let source = Arc::new(MemorySource::new());
        let monitor = Arc::new(CountingMonitor::new());
        let store = RolloutStore::new();
        let cycle = FetchCycle {
            source: source.clone(),
            monitor: monitor.clone(),
            request: request(),
            store: store.clone(),
            unhealthy: Duration::from_secs(8),
            fetch_timeout: Duration::from_secs(1),
        };

        source.set("canary", 0.4);
        cycle.run().await;
        assert_eq!(store.get("canary"), Some(0.4));

        source.set_items(vec![
            json!({"version": "canary", "rollout": "garbage"}),
            json!({"version": "maintenance", "rollout": 0.0}),
        ]);
        let report = cycle.run().await;

        assert_eq!(report.inserted, vec!["maintenance".to_string()]);
        assert_eq!(store.get("canary"), Some(0.4));
        assert_eq!(store.get("maintenance"), Some(0.0));

        let snap = monitor.snapshot();
        assert_eq!(snap.rollout_ok, 2);
        assert_eq!(snap.rollout_err, 1);
    }

    #[tokio::test]
    async fn batch_failure_is_reported_once() {
        let source = Arc::new(MemorySource::new());
        let monitor = Arc::new(CountingMonitor::new());
        let cycle = FetchCycle {
            source: source.clone(),
            monitor: monitor.clone(),
            request: request(),
            store: RolloutStore::new(),
            unhealthy: Duration::from_secs(8),
            fetch_timeout: Duration::from_secs(1),
        };

        source.fail("connection refused");
        let report = cycle.run().await;

        assert_eq!(report, ReconcileReport::default());
        assert_eq!(monitor.snapshot().rollout_err, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn read_timeout_is_a_batch_failure() {
        let monitor = Arc::new(CountingMonitor::new());
        let cycle = FetchCycle {
            source: Arc::new(StallingSource {
                first: MemorySource::new(),
                calls: Default::default(),
            }),
            monitor: monitor.clone(),
            request: request(),
            store: RolloutStore::new(),
            unhealthy: Duration::from_secs(8),
            fetch_timeout: Duration::from_secs(1),
        };

        cycle.run().await;
        let report = cycle.run().await;

        assert_eq!(report, ReconcileReport::default());
        assert_eq!(monitor.snapshot().rollout_err, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn hung_source_still_goes_stale() {
        let first = MemorySource::new();
        first.set("canary", 0.9);
        let source = Arc::new(StallingSource {
            first,
            calls: Default::default(),
        });
        let fetcher = RolloutFetcher::builder()
            .source(source.clone())
            .table("Rollouts")
            .application("app")
            .delay(Duration::from_secs(1))
            .unhealthy(Duration::from_secs(3))
            .spawn()
            .unwrap();
        let store = fetcher.store();

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(store.get("canary"), Some(0.9));

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(store.get("canary"), None);
        assert!(source.calls.load(std::sync::atomic::Ordering::SeqCst) > 2);

        fetcher.stop().await;
    }

    #[tokio::test]
    async fn spawn_requires_source() {
        let result = RolloutFetcher::builder()
            .table("Rollouts")
            .application("app")
            .spawn();
        assert!(matches!(result, Err(RolloutError::MissingSource)));
    }

    #[tokio::test]
    async fn spawn_validates_configuration() {
        let source = Arc::new(MemorySource::new());

        let err = builder(source.clone()).table("").spawn().err();
        assert!(matches!(err, Some(RolloutError::EmptyTable)));

        let err = builder(source.clone()).application("").spawn().err();
        assert!(matches!(err, Some(RolloutError::EmptyApplication)));

        let err = builder(source.clone()).slots([""]).spawn().err();
        assert!(matches!(err, Some(RolloutError::NoSlots)));

        let err = builder(source.clone()).delay(Duration::ZERO).spawn().err();
        assert!(matches!(err, Some(RolloutError::ZeroDelay)));

        let err = builder(source.clone())
            .fetch_timeout(Duration::ZERO)
            .spawn()
            .err();
        assert!(matches!(err, Some(RolloutError::ZeroFetchTimeout)));

        assert_eq!(source.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn loop_propagates_and_degrades_to_absent() {
        let source = Arc::new(MemorySource::new());
        source.set("canary", 0.5);
        let fetcher = builder(source.clone()).spawn().unwrap();
        let store = fetcher.store();

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(store.get("canary"), Some(0.5));

        source.set("canary", 0.2);
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(store.get("canary"), Some(0.2));

        // Remote outage: value held inside the window, dropped after it.
        source.fail("partition");
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(store.get("canary"), Some(0.2));
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(store.get("canary"), None);
        assert_eq!(store.entry("canary").unwrap().percentage, 0.0);

        source.recover();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(store.get("canary"), Some(0.2));

        fetcher.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn stop_ends_the_loop() {
        let source = Arc::new(MemorySource::new());
        source.set("canary", 0.5);
        let fetcher = builder(source.clone()).spawn().unwrap();

        tokio::time::sleep(Duration::from_millis(10)).await;
        fetcher.stop().await;
        let calls = source.calls();

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(source.calls(), calls);

        // Second stop is a no-op.
        fetcher.stop().await;
    }
}
