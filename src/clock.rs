// src/clock.rs
//! Monotonic millisecond clock built from a wrapping 32-bit RTOS tick
//! counter, plus the time-sync correction base.
//!
//! The 32->64 extension requires `now_ms` to be called more often than the
//! 32-bit wrap period. The worker's >= 1 Hz cadence satisfies this; a long
//! sleep that violates it corrupts the clock.

use crate::config::TIMESYNC_MAX_OFFSET_MS;
use crate::lock::StateMutex;
use crate::router::Clock;

/// Board-support tick source: a wrapping tick counter and its rate.
pub trait TickSource {
    fn ticks(&self) -> u32;
    fn ticks_per_second(&self) -> u32;
}

struct TickState {
    last_ticks32: u32,
    high: u64,
    /// Signed correction applied by time sync. Updating this base is the
    /// only clock adjustment; the tick counter itself is never stepped
    /// (stepping it backwards would falsely trigger the wrap extension).
    base_offset_ms: i64,
}

pub struct TickClock {
    source: alloc::boxed::Box<dyn TickSource + Send + Sync>,
    state: StateMutex<TickState>,
}

impl TickClock {
    pub fn new(source: alloc::boxed::Box<dyn TickSource + Send + Sync>) -> Self {
        Self {
            source,
            state: StateMutex::new(TickState {
                last_ticks32: 0,
                high: 0,
                base_offset_ms: 0,
            }),
        }
    }

    /// Extended tick count in milliseconds, before correction.
    fn raw_ms(&self, st: &mut TickState) -> u64 {
        let cur32 = self.source.ticks();
        if cur32 < st.last_ticks32 {
            st.high += 1u64 << 32;
        }
        st.last_ticks32 = cur32;

        let ticks64 = st.high | cur32 as u64;
        let tps = self.source.ticks_per_second().max(1) as u64;
        // Works even when the rate does not divide 1000.
        (ticks64 as u128 * 1_000 / tps as u128) as u64
    }

    /// Corrected monotonic milliseconds. Never negative: a correction can
    /// only slow the reported time down to zero, not below.
    pub fn now_ms(&self) -> u64 {
        let mut st = self.state.lock();
        let raw = self.raw_ms(&mut st) as i64;
        raw.saturating_add(st.base_offset_ms).max(0) as u64
    }

    /// Apply a time-sync correction to the clock base. Corrections with
    /// `|offset_ms| > TIMESYNC_MAX_OFFSET_MS` are discarded (spoof / bad
    /// reply guard). Returns whether the correction was applied.
    pub fn apply_offset_ms(&self, offset_ms: i64) -> bool {
        if offset_ms > TIMESYNC_MAX_OFFSET_MS || offset_ms < -TIMESYNC_MAX_OFFSET_MS {
            return false;
        }
        let mut st = self.state.lock();
        st.base_offset_ms += offset_ms;
        true
    }

    /// Current accumulated correction.
    pub fn base_offset_ms(&self) -> i64 {
        self.state.lock().base_offset_ms
    }
}

impl Clock for TickClock {
    #[inline]
    fn now_ms(&self) -> u64 {
        TickClock::now_ms(self)
    }
}
