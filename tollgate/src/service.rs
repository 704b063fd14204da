//! The rate limiting service: a shared store, named policies and the sweeper

use std::collections::HashMap;
use std::fmt::{Debug, Formatter};
use std::sync::Arc;
use std::time::Duration;
use tollgate_store::{SlidingWindowStore, SweepReport, TimeSource, WindowStatus, WindowStore};
use crate::{
    error::Error,
    key::{namespaced, PolicyName},
    presets::Preset,
    sweeper::{self, Sweeper, SweeperConfig},
    Policy,
    RateLimitFilter
};

/// Owns the window store shared by a set of named policies
/// and the background sweeper that keeps it small.
///
/// # Example
/// ```no_run
/// use std::time::Duration;
/// use tollgate::{presets::Preset, sweeper::SweeperConfig, Policy, RateLimiting};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), tollgate::error::Error> {
/// let mut limiting = RateLimiting::builder()
///     .with_preset(Preset::Auth)
///     .with_policy(Policy::new(20, Duration::from_secs(60)).with_name("search"))
///     .with_sweeper(SweeperConfig::default().with_interval(Duration::from_secs(60)))
///     .build()?;
///
/// limiting.start()?;
/// let search = limiting.filter("search")?;
/// # drop(search);
/// limiting.shutdown(false).await;
/// # Ok(())
/// # }
/// ```
pub struct RateLimiting {
    store: Arc<dyn WindowStore>,
    filters: HashMap<PolicyName, RateLimitFilter>,
    sweeper_config: SweeperConfig,
    retention: Duration,
    sweeper: Option<Sweeper>,
}

impl Debug for RateLimiting {
    #[inline]
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiting")
            .field("policies", &self.filters.keys().collect::<Vec<_>>())
            .field("sweeper_config", &self.sweeper_config)
            .field("retention", &self.retention)
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

/// Builds a [`RateLimiting`] service.
pub struct RateLimitingBuilder {
    policies: Vec<Policy>,
    sweeper: SweeperConfig,
    store: Option<Arc<dyn WindowStore>>,
}

impl Debug for RateLimitingBuilder {
    #[inline]
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimitingBuilder")
            .field("policies", &self.policies)
            .field("sweeper", &self.sweeper)
            .field("custom_store", &self.store.is_some())
            .finish()
    }
}

impl RateLimitingBuilder {
    /// Registers a policy under its [name](Policy::name).
    #[inline]
    pub fn with_policy(mut self, policy: Policy) -> Self {
        self.policies.push(policy);
        self
    }

    /// Registers a preset policy under the preset's name.
    #[inline]
    pub fn with_preset(self, preset: Preset) -> Self {
        self.with_policy(preset.policy())
    }

    /// Configures the background sweeper.
    #[inline]
    pub fn with_sweeper(mut self, config: SweeperConfig) -> Self {
        self.sweeper = config;
        self
    }

    /// Uses an in-memory store reading the time from `time_source`.
    #[inline]
    pub fn with_time_source<T>(self, time_source: T) -> Self
    where
        T: TimeSource + 'static
    {
        self.with_store(Arc::new(SlidingWindowStore::with_time_source(time_source)))
    }

    /// Uses a custom store.
    #[inline]
    pub fn with_store(mut self, store: Arc<dyn WindowStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Validates the configuration and builds the service.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::InvalidConfiguration`](crate::error::ErrorKind::InvalidConfiguration)
    /// if no policy is registered, two policies share a name, a policy is
    /// malformed or the sweeper configuration is inconsistent with the
    /// largest window.
    pub fn build(self) -> Result<RateLimiting, Error> {
        if self.policies.is_empty() {
            return Err(Error::invalid_configuration("at least one policy must be registered"));
        }

        let store = self.store.unwrap_or_else(|| Arc::new(SlidingWindowStore::new()));
        let mut filters = HashMap::with_capacity(self.policies.len());
        let mut largest_window = Duration::ZERO;

        for policy in self.policies {
            largest_window = largest_window.max(policy.window());

            let name: PolicyName = policy.name().into();
            let filter = RateLimitFilter::new(policy, store.clone())?;
            if filters.insert(name.clone(), filter).is_some() {
                return Err(Error::invalid_configuration(format!("policy {name} is registered twice")));
            }
        }

        let retention = self.sweeper.resolve(largest_window)?;
        Ok(RateLimiting {
            sweeper_config: self.sweeper,
            sweeper: None,
            store,
            filters,
            retention,
        })
    }
}

impl RateLimiting {
    /// Creates a builder with the default sweeper configuration
    /// and an in-memory store on the system clock.
    #[inline]
    pub fn builder() -> RateLimitingBuilder {
        RateLimitingBuilder {
            policies: Vec::new(),
            sweeper: SweeperConfig::default(),
            store: None,
        }
    }

    /// Starts the background sweeper. Does nothing if it is already running.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::InvalidConfiguration`](crate::error::ErrorKind::InvalidConfiguration)
    /// if called outside a Tokio runtime.
    pub fn start(&mut self) -> Result<(), Error> {
        if self.is_running() {
            return Ok(());
        }
        let sweeper = Sweeper::spawn(self.store.clone(), self.sweeper_config.interval(), self.retention)?;
        self.sweeper = Some(sweeper);
        Ok(())
    }

    /// Returns `true` while the background sweeper is running.
    #[inline]
    pub fn is_running(&self) -> bool {
        self.sweeper.as_ref().is_some_and(Sweeper::is_running)
    }

    /// Stops the background sweeper, waiting for a sweep in progress to complete.
    ///
    /// If `drain` is `true`, all recorded requests are forgotten afterwards.
    /// Filters remain usable; the service can be [started](Self::start) again.
    pub async fn shutdown(&mut self, drain: bool) {
        if let Some(sweeper) = self.sweeper.take() {
            sweeper.shutdown().await;
        }
        if drain {
            self.store.reset_all();
        }

        #[cfg(feature = "tracing")]
        tracing::info!(drain, "rate limiting shut down");
    }

    /// Returns the filter enforcing the policy registered under `name`.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::InvalidConfiguration`](crate::error::ErrorKind::InvalidConfiguration)
    /// if no such policy is registered.
    pub fn filter(&self, name: &str) -> Result<RateLimitFilter, Error> {
        self.get(name).cloned()
    }

    /// Returns the policy registered under `name`.
    #[inline]
    pub fn policy(&self, name: &str) -> Option<&Policy> {
        self.filters.get(name).map(RateLimitFilter::policy)
    }

    /// Returns the names of the registered policies, in no particular order.
    #[inline]
    pub fn policies(&self) -> impl Iterator<Item = &str> {
        self.filters.keys().map(|name| name.as_ref())
    }

    /// Returns a snapshot of `key`'s window under the policy `name`, without recording.
    ///
    /// `key` is the key as derived by the policy's key source, e.g. `"203.0.113.7"`.
    pub fn status(&self, name: &str, key: &str) -> Result<WindowStatus, Error> {
        let filter = self.get(name)?;
        self.store.status(&namespaced(name, key), filter.policy().window())
    }

    /// Forgets the requests of `key` under the policy `name`.
    pub fn reset(&self, name: &str, key: &str) -> Result<(), Error> {
        self.get(name)?;
        self.store.reset(&namespaced(name, key));
        Ok(())
    }

    /// Forgets all recorded requests.
    #[inline]
    pub fn reset_all(&self) {
        self.store.reset_all();
    }

    /// Number of tracked keys across all policies, including stale ones not yet swept.
    #[inline]
    pub fn size(&self) -> usize {
        self.store.len()
    }

    /// Runs a sweep immediately, independently of the background sweeper.
    #[inline]
    pub fn sweep(&self) -> Result<SweepReport, Error> {
        sweeper::sweep(self.store.as_ref(), self.retention)
    }

    /// Duration timestamps are kept for by sweeps.
    #[inline(always)]
    pub fn retention(&self) -> Duration {
        self.retention
    }

    /// Returns the shared store.
    #[inline(always)]
    pub fn store(&self) -> &Arc<dyn WindowStore> {
        &self.store
    }

    #[inline]
    fn get(&self, name: &str) -> Result<&RateLimitFilter, Error> {
        self.filters
            .get(name)
            .ok_or_else(|| Error::invalid_configuration(format!("policy {name} is not registered")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::Request;
    use tollgate_store::ManualTimeSource;
    use crate::{sweeper::Retention, RequestContext};

    const MINUTE: Duration = Duration::from_secs(60);

    fn create_ctx(ip: &str) -> RequestContext {
        RequestContext::from(Request::post("/login").body(()).unwrap())
            .with_peer_addr(format!("{ip}:50000").parse().unwrap())
    }

    fn create_service(time: &ManualTimeSource) -> RateLimiting {
        RateLimiting::builder()
            .with_preset(Preset::Auth)
            .with_policy(Policy::new(2, MINUTE).with_name("search"))
            .with_time_source(time.clone())
            .build()
            .unwrap()
    }

    #[test]
    fn it_builds_with_largest_window_retention() {
        let service = create_service(&ManualTimeSource::new(0));

        assert_eq!(service.retention(), Duration::from_secs(15 * 60));
        assert_eq!(service.size(), 0);
        assert!(!service.is_running());

        let mut names: Vec<_> = service.policies().collect();
        names.sort();
        assert_eq!(names, ["auth", "search"]);
    }

    #[test]
    fn it_refuses_invalid_configurations() {
        assert!(RateLimiting::builder().build().unwrap_err().is_invalid_configuration());

        let duplicate = RateLimiting::builder()
            .with_preset(Preset::Api)
            .with_preset(Preset::Api)
            .build();
        assert!(duplicate.unwrap_err().message().contains("twice"));

        let malformed = RateLimiting::builder()
            .with_policy(Policy::new(0, MINUTE))
            .build();
        assert!(malformed.is_err());

        let ambiguous_name = RateLimiting::builder()
            .with_policy(Policy::new(1, MINUTE).with_name("auth:login"))
            .build();
        assert!(ambiguous_name.unwrap_err().is_invalid_configuration());

        let short_retention = RateLimiting::builder()
            .with_preset(Preset::Upload)
            .with_sweeper(SweeperConfig::default().with_retention(Retention::Fixed(MINUTE)))
            .build();
        assert!(short_retention.unwrap_err().is_invalid_configuration());
    }

    #[test]
    fn it_looks_up_filters_by_name() {
        let service = create_service(&ManualTimeSource::new(0));

        assert_eq!(service.filter("auth").unwrap().policy().max_requests(), 5);
        assert_eq!(service.policy("search").unwrap().max_requests(), 2);
        assert!(service.policy("missing").is_none());
        assert!(service.filter("missing").unwrap_err().is_invalid_configuration());
    }

    #[test]
    fn it_shares_store_between_filters() {
        let service = create_service(&ManualTimeSource::new(0));
        let ctx = create_ctx("10.0.0.1");

        service.filter("auth").unwrap().check(&ctx).unwrap();
        service.filter("search").unwrap().check(&ctx).unwrap();
        service.filter("search").unwrap().check(&ctx).unwrap();

        assert_eq!(service.size(), 2);
        assert_eq!(service.store().status("search:10.0.0.1", MINUTE).unwrap().count, 2);
        assert_eq!(service.status("auth", "10.0.0.1").unwrap().count, 1);
        assert_eq!(service.status("search", "10.0.0.1").unwrap().count, 2);
        assert!(service.status("missing", "10.0.0.1").is_err());
    }

    #[test]
    fn it_resets_keys() {
        let service = create_service(&ManualTimeSource::new(0));
        let search = service.filter("search").unwrap();
        let ctx = create_ctx("10.0.0.1");

        search.check(&ctx).unwrap();
        search.check(&ctx).unwrap();
        assert!(search.check(&ctx).unwrap().is_reject());

        service.reset("search", "10.0.0.1").unwrap();
        assert!(search.check(&ctx).unwrap().is_continue());
        assert!(service.reset("missing", "10.0.0.1").is_err());

        service.reset_all();
        assert_eq!(service.size(), 0);
    }

    #[test]
    fn it_sweeps_on_demand() {
        let time = ManualTimeSource::new(0);
        let service = create_service(&time);

        service.filter("search").unwrap().check(&create_ctx("10.0.0.1")).unwrap();
        time.advance(Duration::from_secs(16 * 60));
        service.filter("search").unwrap().check(&create_ctx("10.0.0.2")).unwrap();

        let report = service.sweep().unwrap();

        assert_eq!(report.removed, 1);
        assert_eq!(report.remaining, 1);
    }

    #[tokio::test]
    async fn it_starts_and_shuts_down() {
        let mut service = create_service(&ManualTimeSource::new(0));
        service.filter("auth").unwrap().check(&create_ctx("10.0.0.1")).unwrap();

        service.start().unwrap();
        service.start().unwrap();
        assert!(service.is_running());

        service.shutdown(false).await;
        assert!(!service.is_running());
        assert_eq!(service.size(), 1);

        service.start().unwrap();
        service.shutdown(true).await;
        assert_eq!(service.size(), 0);
    }

    #[test]
    fn it_formats_debug_output() {
        let service = create_service(&ManualTimeSource::new(0));
        let debug_str = format!("{service:?}");

        assert!(debug_str.contains("RateLimiting"));
        assert!(debug_str.contains("running: false"));
    }
}
