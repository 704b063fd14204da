//! Window store abstractions and shared utilities.
//!
//! This module defines the core traits used by the Tollgate rate limiter:
//!
//! - [`WindowStore`] - a stateful, thread-safe mapping from a rate-limit key
//!   to the instants of its recent requests.
//! - [`TimeSource`] - a pluggable clock so that all time-dependent logic
//!   can be driven deterministically in tests.
//!
//! ## Thread safety
//!
//! All implementations of [`WindowStore`] provided by this crate are:
//!
//! - Safe to use concurrently
//! - Atomic per key: the prune-compare-append sequence of
//!   [`WindowStore::check_and_record`] is never interleaved with another
//!   call for the *same* key
//! - Free of a single global lock, so unrelated keys do not serialize
//!
//! ## Scope
//!
//! This module does **not** define how keys are derived from requests
//! or how decisions are turned into responses.
//! Those concerns are left to higher-level layers.

use std::sync::{Arc, OnceLock, atomic::{AtomicU64, Ordering::*}};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use crate::Error;

pub use decision::{Decision, SweepReport, WindowStatus};
pub use sliding_window::SlidingWindowStore;

mod decision;
mod sliding_window;

/// A keyed sliding-window store.
///
/// The meaning of the key is defined by the caller
/// (for example: client address, user ID, or a fixed route identifier).
///
/// Window durations and request ceilings are supplied per call, so a single
/// store may serve several policies at once.
pub trait WindowStore: Send + Sync {
    /// Prunes the key's record to `[now - window, now]` and, if fewer than
    /// `max_requests` instants remain, records `now`.
    ///
    /// # Errors
    ///
    /// - [`ErrorKind::InvalidConfiguration`](crate::ErrorKind::InvalidConfiguration)
    ///   for an empty key, a zero window or a zero ceiling.
    /// - [`ErrorKind::StoreUnavailable`](crate::ErrorKind::StoreUnavailable)
    ///   if the store itself is broken.
    ///
    /// Exceeding the limit is **not** an error, see [`Decision::is_allowed`].
    fn check_and_record(&self, key: &str, window: Duration, max_requests: u32) -> Result<Decision, Error>;

    /// Returns a read-only snapshot of the key's record pruned to `window`.
    ///
    /// Nothing is recorded, and the snapshot may be slightly stale.
    fn status(&self, key: &str, window: Duration) -> Result<WindowStatus, Error>;

    /// Removes the record of a single key. Absent keys are ignored.
    fn reset(&self, key: &str);

    /// Removes all records.
    fn reset_all(&self);

    /// Number of tracked keys, including stale ones not swept yet.
    fn len(&self) -> usize;

    /// Returns `true` if no keys are tracked.
    #[inline]
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Prunes every record to `retention` and removes records left empty.
    ///
    /// `retention` must be at least as long as the largest window used
    /// with this store, otherwise requests still in a window get dropped.
    fn sweep(&self, retention: Duration) -> Result<SweepReport, Error>;
}

impl<S: WindowStore + ?Sized> WindowStore for Arc<S> {
    #[inline]
    fn check_and_record(&self, key: &str, window: Duration, max_requests: u32) -> Result<Decision, Error> {
        (**self).check_and_record(key, window, max_requests)
    }

    #[inline]
    fn status(&self, key: &str, window: Duration) -> Result<WindowStatus, Error> {
        (**self).status(key, window)
    }

    #[inline]
    fn reset(&self, key: &str) {
        (**self).reset(key)
    }

    #[inline]
    fn reset_all(&self) {
        (**self).reset_all()
    }

    #[inline]
    fn len(&self) -> usize {
        (**self).len()
    }

    #[inline]
    fn sweep(&self, retention: Duration) -> Result<SweepReport, Error> {
        (**self).sweep(retention)
    }
}

/// A source of time used by the window store.
///
/// Time is expressed in **milliseconds since the Unix epoch**
/// and must be **monotonic** (non-decreasing).
pub trait TimeSource: Send + Sync {
    /// Returns the current time in milliseconds since [`UNIX_EPOCH`].
    fn now_millis(&self) -> u64;
}

/// Monotonic wall-clock time source.
///
/// The Unix time is captured once, together with an [`Instant`], and every
/// later reading adds the monotonic elapsed time to it.
/// This keeps epoch-based timestamps while avoiding wall-clock jumps
/// (NTP, manual adjustments, etc.).
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemTimeSource;

impl SystemTimeSource {
    #[inline]
    fn anchor() -> &'static (Instant, u64) {
        static START: OnceLock<(Instant, u64)> = OnceLock::new();
        START.get_or_init(|| {
            let epoch_millis = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(duration_millis)
                .unwrap_or_default();
            (Instant::now(), epoch_millis)
        })
    }
}

impl TimeSource for SystemTimeSource {
    #[inline]
    fn now_millis(&self) -> u64 {
        let &(start, epoch_millis) = Self::anchor();
        epoch_millis.saturating_add(duration_millis(start.elapsed()))
    }
}

/// A manually driven clock.
///
/// Clones share the same underlying time, so a test can hand one clone to a
/// store and keep another to move time forward.
#[derive(Debug, Default, Clone)]
pub struct ManualTimeSource {
    millis: Arc<AtomicU64>,
}

impl ManualTimeSource {
    /// Creates a clock that reads `millis` since the Unix epoch.
    #[inline]
    pub fn new(millis: u64) -> Self {
        Self { millis: Arc::new(AtomicU64::new(millis)) }
    }

    /// Moves the clock forward.
    #[inline]
    pub fn advance(&self, by: Duration) {
        self.millis.fetch_add(duration_millis(by), AcqRel);
    }

    /// Moves the clock to `millis` since the Unix epoch.
    ///
    /// Moving it backwards is allowed but breaks the monotonicity
    /// expected by the store, so tests should not do that.
    #[inline]
    pub fn set(&self, millis: u64) {
        self.millis.store(millis, Release);
    }
}

impl TimeSource for ManualTimeSource {
    #[inline]
    fn now_millis(&self) -> u64 {
        self.millis.load(Acquire)
    }
}

/// Saturating conversion of a [`Duration`] into whole milliseconds.
#[inline]
pub(crate) fn duration_millis(duration: Duration) -> u64 {
    duration
        .as_millis()
        .try_into()
        .unwrap_or(u64::MAX)
}
