//! Values produced by a [`WindowStore`](super::WindowStore)

const MILLIS_PER_SEC: u64 = 1_000;

/// Outcome of a single [`check_and_record`](super::WindowStore::check_and_record) call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    allowed: bool,
    count: u32,
    limit: u32,
    reset_at: u64,
    now: u64,
}

impl Decision {
    #[inline]
    pub(crate) fn new(allowed: bool, count: u32, limit: u32, reset_at: u64, now: u64) -> Self {
        Self { allowed, count, limit, reset_at, now }
    }

    /// Returns `true` if the request was recorded and may proceed.
    #[inline(always)]
    pub fn is_allowed(&self) -> bool {
        self.allowed
    }

    /// Requests counted in the current window, including this one if allowed.
    #[inline(always)]
    pub fn count(&self) -> u32 {
        self.count
    }

    /// The request ceiling the decision was made against.
    #[inline(always)]
    pub fn limit(&self) -> u32 {
        self.limit
    }

    /// Requests left in the current window. Never negative.
    #[inline(always)]
    pub fn remaining(&self) -> u32 {
        self.limit.saturating_sub(self.count)
    }

    /// Instant (milliseconds since the Unix epoch) at which the oldest counted
    /// request leaves the window.
    #[inline(always)]
    pub fn reset_at(&self) -> u64 {
        self.reset_at
    }

    /// Instant (milliseconds since the Unix epoch) the decision was made at.
    #[inline(always)]
    pub fn decided_at(&self) -> u64 {
        self.now
    }

    /// Whole seconds until [`reset_at`](Self::reset_at), rounded up.
    ///
    /// Only meaningful for rejected requests, for which it is at least `1`.
    #[inline]
    pub fn retry_after_secs(&self) -> u64 {
        let wait = self.reset_at.saturating_sub(self.now);
        if self.allowed {
            wait.div_ceil(MILLIS_PER_SEC)
        } else {
            wait.max(1).div_ceil(MILLIS_PER_SEC)
        }
    }
}

/// A read-only snapshot of a key's window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowStatus {
    /// Requests within the window.
    pub count: u32,

    /// Instant (milliseconds since the Unix epoch) at which the oldest counted
    /// request leaves the window, or `now + window` for an empty one.
    pub reset_at: u64,

    /// Counted request instants, oldest first.
    pub timestamps: Vec<u64>,
}

/// Result of a [`sweep`](super::WindowStore::sweep) pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    /// Records deleted by this pass.
    pub removed: usize,

    /// Records still tracked after this pass.
    pub remaining: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn it_computes_remaining_without_going_negative() {
        let decision = Decision::new(false, 3, 3, 60_000, 30_000);
        assert_eq!(decision.remaining(), 0);

        let decision = Decision::new(true, 1, 3, 60_000, 0);
        assert_eq!(decision.remaining(), 2);
    }

    #[test]
    fn it_rounds_retry_after_up() {
        let decision = Decision::new(false, 3, 3, 60_000, 30_001);
        assert_eq!(decision.retry_after_secs(), 30);

        let decision = Decision::new(false, 3, 3, 60_000, 29_999);
        assert_eq!(decision.retry_after_secs(), 31);
    }

    #[test]
    fn it_never_asks_to_retry_immediately_when_rejected() {
        let decision = Decision::new(false, 3, 3, 60_000, 60_000);
        assert_eq!(decision.retry_after_secs(), 1);

        let decision = Decision::new(true, 1, 3, 60_000, 60_000);
        assert_eq!(decision.retry_after_secs(), 0);
    }
}
