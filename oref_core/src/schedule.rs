//! Time-of-day schedules: scheduled basal and carb ratios.

use chrono::Timelike;
use oref_traits::{CarbRatioLookup, Timestamp};

use crate::rounding::account_for_increments;

const MINUTES_PER_DAY: u32 = 24 * 60;

/// Minute of the local day.
#[inline]
pub fn minute_of_day(at: Timestamp) -> u32 {
    at.hour() * 60 + at.minute()
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BasalSegment {
    pub start_minutes: u32,
    pub rate: f64,
}

/// Scheduled basal covering 24 h; entries sorted by start, first at 00:00.
#[derive(Debug, Clone, PartialEq)]
pub struct BasalSchedule {
    segments: Vec<BasalSegment>,
}

impl BasalSchedule {
    /// Empty input falls back to a single zero-rate segment.
    pub fn new(mut segments: Vec<BasalSegment>) -> Self {
        segments.sort_by_key(|s| s.start_minutes);
        if segments.is_empty() {
            segments.push(BasalSegment {
                start_minutes: 0,
                rate: 0.0,
            });
        }
        Self { segments }
    }

    pub fn constant(rate: f64) -> Self {
        Self::new(vec![BasalSegment {
            start_minutes: 0,
            rate,
        }])
    }

    pub fn segments(&self) -> &[BasalSegment] {
        &self.segments
    }

    pub fn max_rate(&self) -> f64 {
        self.segments.iter().map(|s| s.rate).fold(0.0, f64::max)
    }

    fn segment_index(&self, minute: u32) -> usize {
        self.segments
            .iter()
            .rposition(|s| s.start_minutes <= minute)
            .unwrap_or(0)
    }

    pub fn rate_at(&self, at: Timestamp) -> f64 {
        self.segments[self.segment_index(minute_of_day(at))].rate
    }

    /// Scheduled insulin delivered between `from` and `to`, walking schedule
    /// segments across midnight. Each piece is floored to pump increments.
    pub fn insulin_between(&self, from: Timestamp, to: Timestamp, bolus_increment: f64) -> f64 {
        let mut remaining = to.signed_duration_since(from).num_seconds() as f64 / 3600.0;
        let mut cursor = from;
        let mut total = 0.0;
        while remaining > 0.0 {
            let minute = minute_of_day(cursor);
            let idx = self.segment_index(minute);
            let seg_end = self
                .segments
                .get(idx + 1)
                .map_or(MINUTES_PER_DAY, |s| s.start_minutes);
            let seg_left = f64::from(seg_end - minute) / 60.0;
            let piece = remaining.min(seg_left);
            let insulin = account_for_increments(self.segments[idx].rate * piece, bolus_increment);
            tracing::trace!(insulin, hours = piece, rate = self.segments[idx].rate, "scheduled insulin");
            total += insulin;
            remaining -= piece;
            // whole-minute cursor, as segment boundaries are minute aligned
            cursor = cursor.with_second(0).unwrap_or(cursor).with_nanosecond(0).unwrap_or(cursor)
                + chrono::Duration::seconds((piece * 3600.0).round() as i64);
        }
        total
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CarbUnits {
    #[default]
    Grams,
    Exchanges,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CarbRatioEntry {
    pub start_minutes: u32,
    pub ratio: f64,
}

/// Default [`CarbRatioLookup`] over a time-of-day table.
#[derive(Debug, Clone, PartialEq)]
pub struct CarbRatioSchedule {
    units: CarbUnits,
    entries: Vec<CarbRatioEntry>,
}

impl CarbRatioSchedule {
    pub fn new(units: CarbUnits, mut entries: Vec<CarbRatioEntry>) -> Self {
        entries.sort_by_key(|e| e.start_minutes);
        Self { units, entries }
    }

    pub fn constant(ratio: f64) -> Self {
        Self::new(
            CarbUnits::Grams,
            vec![CarbRatioEntry {
                start_minutes: 0,
                ratio,
            }],
        )
    }
}

impl CarbRatioLookup for CarbRatioSchedule {
    /// - Picks the last entry starting at or before the local minute.
    /// - Exchanges convert as `12 / ratio` grams per unit.
    /// - Ratios outside [3, 150] g/U are rejected.
    fn carb_ratio(&self, at: Timestamp) -> Option<f64> {
        let minute = minute_of_day(at);
        let entry = self
            .entries
            .iter()
            .rev()
            .find(|e| e.start_minutes <= minute)
            .or_else(|| self.entries.first())?;
        let ratio = match self.units {
            CarbUnits::Grams => entry.ratio,
            CarbUnits::Exchanges => 12.0 / entry.ratio,
        };
        if (3.0..=150.0).contains(&ratio) {
            Some(ratio)
        } else {
            tracing::warn!(ratio, "carb ratio out of bounds");
            None
        }
    }
}
