//! Tools and data structures for a sliding-window log store.

use std::collections::VecDeque;
use std::time::Duration;
use dashmap::DashMap;
use super::{
    duration_millis,
    Decision,
    SweepReport,
    SystemTimeSource,
    TimeSource,
    WindowStatus,
    WindowStore
};
use crate::Error;

/// Internal per-key state: instants of recorded requests, oldest first.
///
/// Records are pruned lazily, on access or during a sweep.
#[derive(Debug, Default)]
struct Entry {
    timestamps: VecDeque<u64>,
}

impl Entry {
    /// Drops every instant older than `boundary`.
    #[inline]
    fn prune(&mut self, boundary: u64) {
        while self.timestamps.front().is_some_and(|&t| t < boundary) {
            self.timestamps.pop_front();
        }
    }

    /// Index of the first instant at or after `boundary`.
    #[inline]
    fn first_since(&self, boundary: u64) -> usize {
        self.timestamps.partition_point(|&t| t < boundary)
    }
}

/// A sliding-window log store.
///
/// Every recorded request instant is kept until it leaves the window, so the
/// window boundary moves continuously with time instead of resetting in fixed
/// buckets.
///
/// ## Characteristics
///
/// - **Exact**: no interpolation between adjacent windows.
/// - **Per-key atomicity**: the prune-compare-append sequence runs under the
///   write lock of the map shard that owns the key, so unrelated keys in other
///   shards proceed in parallel.
/// - **Memory** grows with `max_requests` per active key, and with the number
///   of keys until they are swept.
///
/// ## Algorithm
///
/// For a given `key` at time `now`:
///
/// 1. Drop instants older than `now - window`.
/// 2. If fewer than `max_requests` remain, append `now` and allow.
/// 3. Otherwise reject without recording.
///
/// ## Eviction
///
/// Records are pruned lazily by [`check_and_record`](WindowStore::check_and_record).
/// Keys that never come back are removed by [`sweep`](WindowStore::sweep).
#[derive(Debug)]
pub struct SlidingWindowStore<T: TimeSource = SystemTimeSource> {
    /// Per-key window records.
    storage: DashMap<Box<str>, Entry>,

    /// Time source used to determine the current time.
    time_source: T,
}

impl Default for SlidingWindowStore {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

impl SlidingWindowStore {
    /// Creates an empty store using the system clock.
    #[inline]
    pub fn new() -> Self {
        Self::with_time_source(SystemTimeSource)
    }
}

impl<T: TimeSource> SlidingWindowStore<T> {
    /// Creates an empty [`SlidingWindowStore`] with a custom [`TimeSource`].
    ///
    /// This is primarily useful for testing and deterministic scenarios.
    #[inline]
    pub fn with_time_source(time_source: T) -> Self {
        Self {
            storage: DashMap::with_capacity(1024),
            time_source,
        }
    }

    /// Returns the time source of this store.
    #[inline(always)]
    pub fn time_source(&self) -> &T {
        &self.time_source
    }

    #[inline]
    fn validate(key: &str, window_millis: u64) -> Result<(), Error> {
        if key.is_empty() {
            return Err(Error::invalid_configuration("key must not be empty"));
        }
        if window_millis == 0 {
            return Err(Error::invalid_configuration("window must be at least one millisecond"));
        }
        Ok(())
    }
}

impl<T: TimeSource> WindowStore for SlidingWindowStore<T> {
    #[inline]
    fn check_and_record(&self, key: &str, window: Duration, max_requests: u32) -> Result<Decision, Error> {
        let window = duration_millis(window);
        Self::validate(key, window)?;
        if max_requests == 0 {
            return Err(Error::invalid_configuration("max requests must be greater than zero"));
        }

        // Avoid allocating an owned key on the hot path when the record exists.
        // Both branches hold the shard write lock until `entry` is dropped.
        let mut entry = match self.storage.get_mut(key) {
            Some(entry) => entry,
            None => self.storage.entry(Box::from(key)).or_default(),
        };

        let now = self.time_source.now_millis();
        entry.prune(now.saturating_sub(window));

        let count = u32::try_from(entry.timestamps.len()).unwrap_or(u32::MAX);
        let allowed = count < max_requests;
        let count = if allowed {
            entry.timestamps.push_back(now);
            count + 1
        } else {
            count
        };

        let oldest = entry.timestamps.front().copied().unwrap_or(now);
        Ok(Decision::new(allowed, count, max_requests, oldest.saturating_add(window), now))
    }

    fn status(&self, key: &str, window: Duration) -> Result<WindowStatus, Error> {
        let window = duration_millis(window);
        Self::validate(key, window)?;

        let now = self.time_source.now_millis();
        let boundary = now.saturating_sub(window);

        let timestamps: Vec<u64> = self.storage
            .get(key)
            .map(|entry| {
                let first = entry.first_since(boundary);
                entry.timestamps.iter().skip(first).copied().collect()
            })
            .unwrap_or_default();

        let reset_at = timestamps.first().copied().unwrap_or(now).saturating_add(window);
        Ok(WindowStatus {
            count: u32::try_from(timestamps.len()).unwrap_or(u32::MAX),
            reset_at,
            timestamps,
        })
    }

    #[inline]
    fn reset(&self, key: &str) {
        self.storage.remove(key);
    }

    #[inline]
    fn reset_all(&self) {
        self.storage.clear();
    }

    #[inline]
    fn len(&self) -> usize {
        self.storage.len()
    }

    fn sweep(&self, retention: Duration) -> Result<SweepReport, Error> {
        let retention = duration_millis(retention);
        if retention == 0 {
            return Err(Error::invalid_configuration("retention must be at least one millisecond"));
        }

        let before = self.storage.len();
        // `retain` visits each shard under its write lock, the same lock
        // `check_and_record` holds, so a record is never pruned mid-check.
        // The clock is read per record: a key reused after the sweep began
        // carries an instant that is never older than the boundary.
        self.storage.retain(|_, entry| {
            let boundary = self.time_source.now_millis().saturating_sub(retention);
            entry.prune(boundary);
            !entry.timestamps.is_empty()
        });

        let remaining = self.storage.len();
        Ok(SweepReport {
            removed: before.saturating_sub(remaining),
            remaining,
        })
    }
}
