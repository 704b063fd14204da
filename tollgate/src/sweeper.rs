//! Background removal of stale windows
//!
//! Lazy pruning on every check keeps decisions correct on its own; the sweeper
//! only bounds memory by dropping keys that stopped sending requests.

use std::sync::Arc;
use std::time::Duration;
use tokio::{runtime::Handle, task::{self, JoinHandle}, time::{interval_at, Instant, MissedTickBehavior}};
use tokio_util::sync::CancellationToken;
use tollgate_store::{SweepReport, WindowStore};
use crate::error::Error;

const DEFAULT_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// How long timestamps are kept before a sweep removes them.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum Retention {
    /// Keep timestamps for as long as the largest window of the registered policies.
    #[default]
    LargestWindow,

    /// Keep timestamps for a fixed duration.
    ///
    /// Must not be shorter than the largest window, otherwise a sweep
    /// would forget requests that still count.
    Fixed(Duration),
}

/// Configuration of the background sweeper.
///
/// Default: a sweep every 5 minutes with [`Retention::LargestWindow`].
///
/// # Example
/// ```no_run
/// use std::time::Duration;
/// use tollgate::sweeper::{Retention, SweeperConfig};
///
/// let config = SweeperConfig::default()
///     .with_interval(Duration::from_secs(60))
///     .with_retention(Retention::Fixed(Duration::from_secs(2 * 60 * 60)));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SweeperConfig {
    interval: Duration,
    retention: Retention,
}

impl Default for SweeperConfig {
    #[inline]
    fn default() -> Self {
        Self {
            interval: DEFAULT_INTERVAL,
            retention: Retention::LargestWindow,
        }
    }
}

impl SweeperConfig {
    /// Sets the time between two sweeps.
    #[inline]
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Sets how long timestamps are kept.
    #[inline]
    pub fn with_retention(mut self, retention: Retention) -> Self {
        self.retention = retention;
        self
    }

    /// Time between two sweeps.
    #[inline(always)]
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Retention rule.
    #[inline(always)]
    pub fn retention(&self) -> Retention {
        self.retention
    }

    /// Resolves the retention against the largest configured window.
    pub(crate) fn resolve(&self, largest_window: Duration) -> Result<Duration, Error> {
        if self.interval.is_zero() {
            return Err(Error::invalid_configuration("sweep interval must be greater than zero"));
        }
        match self.retention {
            Retention::LargestWindow => Ok(largest_window),
            Retention::Fixed(retention) if retention < largest_window => Err(Error::invalid_configuration(format!(
                "retention of {retention:?} is shorter than the largest window of {largest_window:?}"
            ))),
            Retention::Fixed(retention) => Ok(retention),
        }
    }
}

/// A running background sweeper.
///
/// Dropping it cancels the sweeper without waiting;
/// use [`shutdown`](Self::shutdown) to wait for an in-progress sweep.
#[derive(Debug)]
pub struct Sweeper {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl Drop for Sweeper {
    #[inline]
    fn drop(&mut self) {
        self.token.cancel();
    }
}

impl Sweeper {
    /// Spawns a sweeper on the current Tokio runtime.
    ///
    /// The first sweep runs one `interval` after spawning.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::InvalidConfiguration`](crate::error::ErrorKind::InvalidConfiguration)
    /// if called outside a Tokio runtime or with a zero interval or retention.
    pub fn spawn(store: Arc<dyn WindowStore>, interval: Duration, retention: Duration) -> Result<Self, Error> {
        if interval.is_zero() || retention.is_zero() {
            return Err(Error::invalid_configuration("sweep interval and retention must be greater than zero"));
        }
        let runtime = Handle::try_current()
            .map_err(|_| Error::invalid_configuration("the sweeper must be started within a Tokio runtime"))?;

        let token = CancellationToken::new();
        let cancelled = token.clone();
        let handle = runtime.spawn(async move {
            #[cfg(feature = "tracing")]
            tracing::info!(?interval, ?retention, "rate limit sweeper started");

            let mut ticker = interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    _ = cancelled.cancelled() => break,
                    _ = ticker.tick() => {
                        // Runs to completion, cancellation is only observed between sweeps.
                        let store = store.clone();
                        if let Err(_err) = task::spawn_blocking(move || sweep(store.as_ref(), retention)).await {
                            #[cfg(feature = "tracing")]
                            tracing::error!("rate limit sweep terminated abnormally: {_err}");
                        }
                    }
                }
            }

            #[cfg(feature = "tracing")]
            tracing::info!("rate limit sweeper stopped");
        });

        Ok(Self { token, handle })
    }

    /// Returns `true` until the sweeper task has exited.
    #[inline]
    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }

    /// Stops the sweeper, waiting for a sweep in progress to complete.
    pub async fn shutdown(mut self) {
        self.token.cancel();
        if let Err(_err) = (&mut self.handle).await {
            #[cfg(feature = "tracing")]
            tracing::error!("rate limit sweeper terminated abnormally: {_err}");
        }
    }
}

/// Runs a single sweep, logging its outcome.
pub(crate) fn sweep(store: &dyn WindowStore, retention: Duration) -> Result<SweepReport, Error> {
    let result = store.sweep(retention);
    match &result {
        Ok(_report) => {
            #[cfg(feature = "tracing")]
            tracing::debug!(removed = _report.removed, remaining = _report.remaining, "rate limit sweep completed");
        },
        Err(_err) => {
            #[cfg(feature = "tracing")]
            tracing::error!("rate limit sweep failed: {_err}");
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use tollgate_store::{Decision, ManualTimeSource, SlidingWindowStore, WindowStatus};

    const MINUTE: Duration = Duration::from_secs(60);

    #[derive(Default)]
    struct CountingStore {
        sweeps: AtomicUsize,
        fail: bool,
    }

    impl WindowStore for CountingStore {
        fn check_and_record(&self, _: &str, _: Duration, _: u32) -> Result<Decision, Error> {
            Err(Error::store_unavailable("not used"))
        }

        fn status(&self, _: &str, _: Duration) -> Result<WindowStatus, Error> {
            Err(Error::store_unavailable("not used"))
        }

        fn reset(&self, _: &str) {}

        fn reset_all(&self) {}

        fn len(&self) -> usize {
            0
        }

        fn sweep(&self, _: Duration) -> Result<SweepReport, Error> {
            self.sweeps.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(Error::store_unavailable("broken on purpose"))
            } else {
                Ok(SweepReport::default())
            }
        }
    }

    #[test]
    fn it_creates_default_config() {
        let config = SweeperConfig::default();

        assert_eq!(config.interval(), Duration::from_secs(300));
        assert_eq!(config.retention(), Retention::LargestWindow);
    }

    #[test]
    fn it_resolves_retention() {
        let config = SweeperConfig::default();
        assert_eq!(config.resolve(MINUTE).unwrap(), MINUTE);

        let config = config.with_retention(Retention::Fixed(2 * MINUTE));
        assert_eq!(config.resolve(MINUTE).unwrap(), 2 * MINUTE);
        assert!(config.resolve(3 * MINUTE).unwrap_err().is_invalid_configuration());

        let config = SweeperConfig::default().with_interval(Duration::ZERO);
        assert!(config.resolve(MINUTE).is_err());
    }

    #[test]
    fn it_requires_runtime() {
        let store: Arc<dyn WindowStore> = Arc::new(SlidingWindowStore::new());

        let err = Sweeper::spawn(store, MINUTE, MINUTE).unwrap_err();

        assert!(err.is_invalid_configuration());
    }

    #[tokio::test]
    async fn it_refuses_zero_interval_or_retention() {
        let store: Arc<dyn WindowStore> = Arc::new(SlidingWindowStore::new());

        assert!(Sweeper::spawn(store.clone(), Duration::ZERO, MINUTE).is_err());
        assert!(Sweeper::spawn(store, MINUTE, Duration::ZERO).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn it_sweeps_on_every_tick() {
        let store = Arc::new(CountingStore::default());
        let sweeper = Sweeper::spawn(store.clone(), MINUTE, MINUTE).unwrap();

        tokio::time::sleep(MINUTE / 2).await;
        assert_eq!(store.sweeps.load(Ordering::SeqCst), 0);

        tokio::time::sleep(3 * MINUTE).await;
        assert_eq!(store.sweeps.load(Ordering::SeqCst), 3);

        sweeper.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn it_keeps_sweeping_after_failure() {
        let store = Arc::new(CountingStore { fail: true, ..Default::default() });
        let sweeper = Sweeper::spawn(store.clone(), MINUTE, MINUTE).unwrap();

        tokio::time::sleep(2 * MINUTE + Duration::from_secs(1)).await;

        assert_eq!(store.sweeps.load(Ordering::SeqCst), 2);
        assert!(sweeper.is_running());
        sweeper.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn it_stops_on_shutdown() {
        let store = Arc::new(CountingStore::default());
        let sweeper = Sweeper::spawn(store.clone(), MINUTE, MINUTE).unwrap();

        sweeper.shutdown().await;
        tokio::time::sleep(5 * MINUTE).await;

        assert_eq!(store.sweeps.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn it_removes_stale_windows() {
        let time = ManualTimeSource::new(0);
        let store = Arc::new(SlidingWindowStore::with_time_source(time.clone()));
        store.check_and_record("stale", MINUTE, 5).unwrap();

        let sweeper = Sweeper::spawn(store.clone(), MINUTE, MINUTE).unwrap();

        time.set(90_000);
        store.check_and_record("fresh", MINUTE, 5).unwrap();
        tokio::time::sleep(MINUTE + Duration::from_secs(1)).await;

        assert_eq!(store.len(), 1);
        assert_eq!(store.status("fresh", MINUTE).unwrap().count, 1);
        sweeper.shutdown().await;
    }

    #[test]
    fn it_sweeps_once() {
        let store = CountingStore::default();

        assert_eq!(sweep(&store, MINUTE).unwrap(), SweepReport::default());
        assert_eq!(store.sweeps.load(Ordering::SeqCst), 1);
    }

    #[derive(Default)]
    struct SlowStore {
        started: AtomicBool,
        finished: AtomicBool,
    }

    impl WindowStore for SlowStore {
        fn check_and_record(&self, _: &str, _: Duration, _: u32) -> Result<Decision, Error> {
            Err(Error::store_unavailable("not used"))
        }

        fn status(&self, _: &str, _: Duration) -> Result<WindowStatus, Error> {
            Err(Error::store_unavailable("not used"))
        }

        fn reset(&self, _: &str) {}

        fn reset_all(&self) {}

        fn len(&self) -> usize {
            0
        }

        fn sweep(&self, _: Duration) -> Result<SweepReport, Error> {
            if !self.started.swap(true, Ordering::SeqCst) {
                std::thread::sleep(Duration::from_millis(500));
                self.finished.store(true, Ordering::SeqCst);
            }
            Ok(SweepReport::default())
        }
    }

    #[tokio::test]
    async fn it_keeps_runtime_responsive_while_sweeping() {
        let store = Arc::new(SlowStore::default());
        let sweeper = Sweeper::spawn(store.clone(), Duration::from_millis(10), MINUTE).unwrap();

        while !store.started.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }

        let started = std::time::Instant::now();
        tokio::time::sleep(Duration::from_millis(5)).await;

        assert!(started.elapsed() < Duration::from_millis(250));
        assert!(!store.finished.load(Ordering::SeqCst));

        sweeper.shutdown().await;
        assert!(store.finished.load(Ordering::SeqCst));
    }
}
