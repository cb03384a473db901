//! Running-total accumulators that survive engine restarts.
//!
//! The engine reports byte counters cumulatively per attachment, so they
//! drop back to zero every time a torrent is detached and re-attached.
//! [`TransferTracker`] folds those per-attachment readings into a lifetime
//! total by accumulating deltas against the last observed reading.
//! [`DurationTracker`] builds on the same mechanism to meter elapsed
//! active and seeding time across stop/start cycles.

use std::ops::{AddAssign, Sub};

use chrono::{DateTime, Duration, Utc};

/// Accumulates a lifetime total from cumulative per-attachment readings.
///
/// Each [`update`](Self::update) folds the delta since the previous
/// reading into the running total, so a counter that restarts from zero
/// after a re-attach keeps accumulating instead of going backwards. Call
/// [`set_offset`](Self::set_offset) with zero right after attaching to
/// re-base against the fresh counter.
#[derive(Debug, Clone, Copy, Default)]
pub struct TransferTracker<T> {
    total: T,
    offset: T,
}

impl<T> TransferTracker<T>
where
    T: Copy + Default + AddAssign + Sub<Output = T>,
{
    /// A tracker with a zero total and zero offset.
    #[must_use]
    pub fn new() -> Self {
        Self {
            total: T::default(),
            offset: T::default(),
        }
    }

    /// Replace the running total and clear offset tracking.
    pub fn reset(&mut self, total: T) {
        self.total = total;
        self.offset = T::default();
    }

    /// Fold a cumulative reading into the total and return the new total.
    pub fn update(&mut self, cumulative: T) -> T {
        self.total += cumulative - self.offset;
        self.offset = cumulative;
        self.total
    }

    /// Re-base the delta computation against `offset`.
    pub fn set_offset(&mut self, offset: T) {
        self.offset = offset;
    }

    /// The accumulated lifetime total.
    #[must_use]
    pub fn total(&self) -> T {
        self.total
    }
}

/// Meters elapsed wall-clock time across start/stop stretches.
///
/// The tracker is lazy: the first [`update`](Self::update) after
/// construction, [`stop`](Self::stop), or [`reset_to`](Self::reset_to)
/// marks the start of a new stretch, and later updates fold the time
/// elapsed since that mark into the total. Time between stretches is not
/// counted.
#[derive(Debug, Clone, Copy, Default)]
pub struct DurationTracker {
    elapsed: TransferTracker<i64>,
    start: Option<DateTime<Utc>>,
}

impl DurationTracker {
    /// A stopped tracker with a zero total.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold time elapsed up to `now` into the total and return it.
    ///
    /// Starts a new stretch at `now` if none is running.
    pub fn update(&mut self, now: DateTime<Utc>) -> Duration {
        let started = match self.start {
            Some(at) => at,
            None => {
                self.start = Some(now);
                self.elapsed.set_offset(0);
                now
            }
        };
        let since_start = (now - started).num_seconds().max(0);
        Duration::seconds(self.elapsed.update(since_start))
    }

    /// End the current stretch, keeping the accumulated total.
    pub fn stop(&mut self) {
        self.start = None;
    }

    /// Replace the accumulated total and end any running stretch.
    ///
    /// Negative totals from a corrupt document are treated as zero.
    pub fn reset_to(&mut self, total: Duration) {
        self.elapsed.reset(total.num_seconds().max(0));
        self.start = None;
    }

    /// The accumulated total across all stretches so far.
    #[must_use]
    pub fn total(&self) -> Duration {
        Duration::seconds(self.elapsed.total())
    }

    /// Whether a stretch is currently running.
    #[must_use]
    pub fn is_counting(&self) -> bool {
        self.start.is_some()
    }
}
