//! Scoped helpers (C9): thin, non-owning clients of [`crate::clock::Clock`]
//! for hosts that want periodic checks or one-shot deadlines outside the
//! task registry. Deliberately minimal — anything richer belongs to the
//! periodic-interval/timeout helpers this crate's scope excludes.

use crate::clock::{delta, Clock};

/// Fires once per `period_us` of clock time. Call [`Beat::elapsed`] as often
/// as you like; it only returns `true` (and resets its reference point) once
/// the period has passed.
pub struct Beat<'c, C: Clock> {
    clock: &'c C,
    period_us: u32,
    last_us: u32,
}

impl<'c, C: Clock> Beat<'c, C> {
    pub fn new(clock: &'c C, period_us: u32) -> Self {
        let last_us = clock.now_us();
        Self {
            clock,
            period_us,
            last_us,
        }
    }

    pub fn elapsed(&mut self) -> bool {
        let now = self.clock.now_us();
        if delta(self.last_us, now) >= self.period_us {
            self.last_us = now;
            true
        } else {
            false
        }
    }
}

/// A one-shot deadline `duration_us` after construction.
pub struct Timeout<'c, C: Clock> {
    clock: &'c C,
    started_us: u32,
    duration_us: u32,
}

impl<'c, C: Clock> Timeout<'c, C> {
    pub fn new(clock: &'c C, duration_us: u32) -> Self {
        Self {
            clock,
            started_us: clock.now_us(),
            duration_us,
        }
    }

    pub fn expired(&self) -> bool {
        delta(self.started_us, self.clock.now_us()) >= self.duration_us
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::TestClock;

    #[test]
    fn beat_fires_once_per_period() {
        let clock = TestClock::new();
        let mut beat = Beat::new(&clock, 1000);
        assert!(!beat.elapsed());
        clock.advance(999);
        assert!(!beat.elapsed());
        clock.advance(1);
        assert!(beat.elapsed());
        assert!(!beat.elapsed());
    }

    #[test]
    fn timeout_expires_after_duration() {
        let clock = TestClock::new();
        let timeout = Timeout::new(&clock, 500);
        assert!(!timeout.expired());
        clock.advance(500);
        assert!(timeout.expired());
    }
}
