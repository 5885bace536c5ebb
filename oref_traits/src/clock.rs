use chrono::{DateTime, FixedOffset, Local};

/// Wall-clock instant with the pump's local UTC offset preserved.
pub type Timestamp = DateTime<FixedOffset>;

/// Wall-clock source for a decision cycle.
///
/// - now(): the "current time" every age and time-of-day computation uses
/// - minutes_since(): helper for event ages, negative for future events
pub trait Clock {
    fn now(&self) -> Timestamp;

    /// Minutes elapsed since `then` as a fractional value.
    fn minutes_since(&self, then: Timestamp) -> f64 {
        let ms = self.now().signed_duration_since(then).num_milliseconds();
        ms as f64 / 60_000.0
    }
}

/// Host local time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl SystemClock {
    #[inline]
    pub fn new() -> Self {
        Self
    }
}

impl Clock for SystemClock {
    #[inline]
    fn now(&self) -> Timestamp {
        Local::now().fixed_offset()
    }
}

/// Clock pinned to one instant; used for replays and tests.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock {
    at: Timestamp,
}

impl FixedClock {
    pub fn new(at: Timestamp) -> Self {
        Self { at }
    }

    /// Return a clock moved forward by `minutes`.
    pub fn advanced(self, minutes: i64) -> Self {
        Self {
            at: self.at + chrono::Duration::minutes(minutes),
        }
    }
}

impl Clock for FixedClock {
    #[inline]
    fn now(&self) -> Timestamp {
        self.at
    }
}
