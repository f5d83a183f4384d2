//! Wall-clock gate deciding when the next sample is due.
//!
//! The gate runs on every executed guest instruction, so the "not yet" path
//! is a single atomic load and an integer comparison.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

const MICROS_PER_SEC: u64 = 1_000_000;

/// Wall-clock time with microsecond granularity.
///
/// Ordering is lexicographic on (seconds, microseconds).
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Timestamp {
    pub secs: u64,
    pub micros: u32,
}

impl Timestamp {
    pub fn new(secs: u64, micros: u32) -> Self {
        Self { secs, micros }
    }

    /// Advances by `interval_us`, carrying microsecond overflow into seconds.
    /// Saturates at the latest representable time.
    pub fn advance(self, interval_us: u64) -> Self {
        Self::unpack(self.pack().saturating_add(interval_us))
    }

    /// Total microseconds since the epoch, saturating. Integer order
    /// matches `Ord` for normalized timestamps (micros below one million).
    fn pack(self) -> u64 {
        self.secs
            .saturating_mul(MICROS_PER_SEC)
            .saturating_add(self.micros as u64)
    }

    fn unpack(total_us: u64) -> Self {
        Self {
            secs: total_us / MICROS_PER_SEC,
            micros: (total_us % MICROS_PER_SEC) as u32,
        }
    }
}

impl From<Duration> for Timestamp {
    fn from(d: Duration) -> Self {
        Self {
            secs: d.as_secs(),
            micros: d.subsec_micros(),
        }
    }
}

/// Source of the current wall-clock time.
pub trait Clock: Send + Sync {
    fn now(&self) -> Timestamp;
}

/// Clock backed by `SystemTime`, equivalent to `gettimeofday`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(Timestamp::from)
            .unwrap_or_default()
    }
}

/// Rate limiter shared by every vCPU thread.
///
/// The threshold is kept as total microseconds and only ever moves
/// forward, by exactly one interval per accepted sample (saturating), so
/// accepted samples land on evenly spaced absolute times. Concurrent
/// callers race on a compare-and-swap: only one of them wins a given
/// interval.
#[derive(Debug)]
pub struct ClockGate {
    interval_us: u64,
    next_sample: AtomicU64,
}

impl ClockGate {
    /// `interval_us == 0` disables gating.
    pub fn new(interval_us: u64, start: Timestamp) -> Self {
        Self {
            interval_us,
            next_sample: AtomicU64::new(start.pack()),
        }
    }

    pub fn interval_us(&self) -> u64 {
        self.interval_us
    }

    /// Threshold the next sample has to reach.
    pub fn next_sample(&self) -> Timestamp {
        Timestamp::unpack(self.next_sample.load(Ordering::Relaxed))
    }

    /// Returns whether a sample should be taken at `now`, claiming the
    /// current interval if so.
    #[inline]
    pub fn should_sample(&self, now: Timestamp) -> bool {
        if self.interval_us == 0 {
            return true;
        }

        let now = now.pack();
        let mut next = self.next_sample.load(Ordering::Relaxed);
        loop {
            if now < next {
                return false;
            }
            let advanced = next.saturating_add(self.interval_us);
            match self.next_sample.compare_exchange_weak(
                next,
                advanced,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return true,
                Err(current) => next = current,
            }
        }
    }
}
