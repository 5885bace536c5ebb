//! Total daily dose reconstructed from the pump log.
//!
//! The log is newest first. Insulin is attributed to three buckets:
//! boluses, positive temp basals (floored to pump increments), and scheduled
//! basal for stretches no temp covered.

use oref_traits::{BasalRounder, Timestamp};
use serde::Serialize;

use crate::rounding::account_for_increments;
use crate::schedule::BasalSchedule;
use crate::types::PumpEvent;
use crate::util::{minutes_between, round0, round_to};

/// Below this many hours of history TDD-driven strategies are disabled.
pub const MIN_HISTORY_HOURS: f64 = 21.0;
const FILL_MAX_HOURS: f64 = 23.9;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct TddBreakdown {
    #[serde(rename = "TDD")]
    pub total: f64,
    pub bolus: f64,
    pub temp_basal: f64,
    pub scheduled_basal: f64,
    #[serde(skip)]
    pub pump_hours: f64,
}

impl TddBreakdown {
    pub fn enough_history(&self) -> bool {
        self.pump_hours >= MIN_HISTORY_HOURS
    }

    /// Share of the total delivered as boluses, in percent.
    pub fn bolus_percent(&self) -> f64 {
        if self.total > 0.0 {
            round0(self.bolus / self.total * 100.0)
        } else {
            0.0
        }
    }

    pub fn basal_percent(&self) -> f64 {
        if self.total > 0.0 {
            round0((self.temp_basal + self.scheduled_basal) / self.total * 100.0)
        } else {
            0.0
        }
    }
}

fn hours_between(later: Timestamp, earlier: Timestamp) -> f64 {
    minutes_between(later, earlier) / 60.0
}

fn add_hours(at: Timestamp, hours: f64) -> Timestamp {
    at + chrono::Duration::milliseconds((hours * 3_600_000.0).round() as i64)
}

/// Reconstruct the last ~24 h of delivered insulin.
pub fn total_daily_dose(
    history: &[PumpEvent],
    schedule: &BasalSchedule,
    now: Timestamp,
    bolus_increment: f64,
) -> TddBreakdown {
    let timed: Vec<(usize, Timestamp)> = history
        .iter()
        .enumerate()
        .filter_map(|(i, e)| e.at().map(|t| (i, t)))
        .collect();
    let (Some(&(_, newest)), Some(&(_, oldest))) = (timed.first(), timed.last()) else {
        tracing::debug!("pump history is empty");
        return TddBreakdown::default();
    };

    let start = if matches!(history.first(), Some(PumpEvent::TempBasalDuration { .. })) {
        now
    } else {
        newest
    };
    let pump_hours = hours_between(start, oldest);
    let mut scheduled = 0.0;
    if pump_hours > MIN_HISTORY_HOURS && pump_hours < FILL_MAX_HOURS {
        let missing = 24.0 - pump_hours;
        let filled = schedule.insulin_between(add_hours(oldest, -missing), oldest, bolus_increment);
        tracing::debug!(pump_hours, missing, filled, "filling missing pump history with scheduled basal");
        scheduled += filled;
    }

    let bolus: f64 = history
        .iter()
        .filter_map(|e| match *e {
            PumpEvent::Bolus { amount, .. } => Some(amount),
            _ => None,
        })
        .sum();

    let temp = temp_basal_insulin(history, now, bolus_increment);
    scheduled += gaps_after_zero_temps(history, schedule, bolus_increment);
    scheduled += gaps_after_completed_temps(history, schedule, bolus_increment);

    let total = bolus + temp + scheduled;
    tracing::debug!(total, bolus, temp_basal = temp, scheduled_basal = scheduled, pump_hours, "tdd");
    TddBreakdown {
        total: round_to(total, 5),
        bolus: round_to(bolus, 5),
        temp_basal: round_to(temp, 5),
        scheduled_basal: round_to(scheduled, 5),
        pump_hours,
    }
}

/// Temp basal events pair with the duration marker logged just before them
/// (one index newer). Each temp runs until the next newer temp or suspend,
/// minus any rewind-to-prime interval in between.
fn temp_basal_insulin(history: &[PumpEvent], now: Timestamp, bolus_increment: f64) -> f64 {
    let mut total = 0.0;
    for j in 1..history.len() {
        let PumpEvent::TempBasal { rate, .. } = history[j] else {
            continue;
        };
        if rate <= 0.0 {
            continue;
        }
        let PumpEvent::TempBasalDuration { at: past, minutes } = history[j - 1] else {
            continue;
        };
        let programmed = minutes / 60.0;
        let mut end = past;
        let mut rewind_hours = 0.0;
        let mut k = j;
        while k > 0 {
            k -= 1;
            if k == 0 {
                end = now;
                break;
            }
            if let PumpEvent::TempBasal { at, .. } | PumpEvent::PumpSuspend { at } = history[k] {
                end = at;
                break;
            }
            if k >= 2
                && let PumpEvent::Rewind { at: rewind_at } = history[k - 2]
            {
                let mut pp = k - 2;
                while pp >= 1 {
                    pp -= 1;
                    match history[pp] {
                        PumpEvent::Prime { at } => rewind_hours = hours_between(at, rewind_at),
                        _ => break,
                    }
                }
                // reservoir changed but the set was never primed back in time
                if rewind_hours >= programmed {
                    end = rewind_at;
                    rewind_hours = 0.0;
                }
            }
        }
        let ran = hours_between(end, past).min(programmed);
        let insulin = account_for_increments(rate * (ran - rewind_hours), bolus_increment);
        tracing::trace!(rate, hours = ran, rewind_hours, insulin, "temp basal insulin");
        total += insulin;
    }
    total
}

/// Scheduled basal after a zero-duration temp (temp cancel) or a pump
/// resume, up to the next newer temp basal.
fn gaps_after_zero_temps(history: &[PumpEvent], schedule: &BasalSchedule, bolus_increment: f64) -> f64 {
    let mut total = 0.0;
    for (k, event) in history.iter().enumerate() {
        let from = match *event {
            PumpEvent::TempBasalDuration { at, minutes } if minutes == 0.0 => at,
            PumpEvent::PumpResume { at } => at,
            _ => continue,
        };
        let until = history[..k].iter().rev().find_map(|e| match *e {
            PumpEvent::TempBasal { at, .. } => Some(at),
            _ => None,
        });
        if let Some(until) = until
            && until > from
        {
            total += schedule.insulin_between(from, until, bolus_increment);
        }
    }
    total
}

/// Scheduled basal between a temp that ran to completion and the next newer
/// temp or suspend.
fn gaps_after_completed_temps(
    history: &[PumpEvent],
    schedule: &BasalSchedule,
    bolus_increment: f64,
) -> f64 {
    let mut total = 0.0;
    for n in (1..history.len()).rev() {
        let PumpEvent::TempBasalDuration { at: old, minutes } = history[n] else {
            continue;
        };
        let programmed = minutes / 60.0;
        let next = history[..n].iter().rev().find_map(|e| match *e {
            PumpEvent::TempBasal { at, .. } | PumpEvent::PumpSuspend { at } => Some(at),
            _ => None,
        });
        let Some(next) = next else {
            continue;
        };
        if hours_between(next, old) - programmed > 0.0 {
            total += schedule.insulin_between(add_hours(old, programmed), next, bolus_increment);
        }
    }
    total
}

/// Newest bolus of at least `min_amount`, rounded like a basal rate, with
/// its age in whole minutes.
pub fn last_qualifying_bolus(
    history: &[PumpEvent],
    min_amount: f64,
    now: Timestamp,
    rounder: &impl BasalRounder,
) -> Option<(f64, f64)> {
    history.iter().find_map(|e| match *e {
        PumpEvent::Bolus { at, amount } if amount >= min_amount => {
            Some((rounder.round_basal(amount), round0(minutes_between(now, at))))
        }
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rounding::PumpRounding;
    use chrono::{DateTime, Duration};
    use rstest::rstest;

    fn t(h: i64, m: i64) -> Timestamp {
        DateTime::parse_from_rfc3339("2025-01-26T00:00:00+00:00").unwrap() + Duration::minutes(h * 60 + m)
    }

    #[test]
    fn empty_history_is_zero_and_not_enough() {
        let tdd = total_daily_dose(&[], &BasalSchedule::constant(1.0), t(12, 0), 0.1);
        assert_eq!(tdd.total, 0.0);
        assert!(!tdd.enough_history());
    }

    #[test]
    fn completed_temp_is_followed_by_scheduled_basal() {
        // newest first: temp 2.0 at 10:00 for 60 min, next temp at 12:00
        let history = vec![
            PumpEvent::TempBasalDuration { at: t(12, 0), minutes: 30.0 },
            PumpEvent::TempBasal { at: t(12, 0), rate: 0.0 },
            PumpEvent::TempBasalDuration { at: t(10, 0), minutes: 60.0 },
            PumpEvent::TempBasal { at: t(10, 0), rate: 2.0 },
        ];
        let tdd = total_daily_dose(&history, &BasalSchedule::constant(1.0), t(12, 15), 0.1);
        assert!((tdd.temp_basal - 2.0).abs() < 1e-9);
        assert!((tdd.scheduled_basal - 1.0).abs() < 1e-9);
    }

    #[rstest]
    #[case(&[2.0, 1.5], 1.2)]
    #[case(&[0.3], 0.85)]
    #[case(&[], 2.35)]
    #[case(&[4.0, 0.5, 0.25], 0.05)]
    fn total_is_boluses_plus_temp_delivery(#[case] boluses: &[f64], #[case] rate: f64) {
        // one temp from 09:00 for 3 h, replaced by a zero temp at 12:00
        let mut history = vec![
            PumpEvent::TempBasalDuration { at: t(12, 0), minutes: 30.0 },
            PumpEvent::TempBasal { at: t(12, 0), rate: 0.0 },
        ];
        for (i, &amount) in boluses.iter().enumerate() {
            history.push(PumpEvent::Bolus {
                at: t(11, 40 - 20 * i as i64),
                amount,
            });
        }
        history.push(PumpEvent::TempBasalDuration { at: t(9, 0), minutes: 180.0 });
        history.push(PumpEvent::TempBasal { at: t(9, 0), rate });

        let increment = 0.1;
        let tdd = total_daily_dose(&history, &BasalSchedule::constant(1.0), t(12, 5), increment);
        let bolus: f64 = boluses.iter().sum();
        let expected = bolus + rate * 3.0;
        assert!((tdd.bolus - bolus).abs() < 1e-9);
        assert_eq!(tdd.scheduled_basal, 0.0);
        assert!(
            expected - tdd.total > -1e-9 && expected - tdd.total <= increment + 1e-9,
            "total {} vs expected {expected}",
            tdd.total
        );
    }

    #[test]
    fn rewind_and_prime_time_is_not_counted() {
        // temp 1.0 from 08:00 for 120 min, rewind at 08:30 and prime at 09:00
        let history = vec![
            PumpEvent::TempBasal { at: t(10, 0), rate: 0.0 },
            PumpEvent::Prime { at: t(9, 0) },
            PumpEvent::Rewind { at: t(8, 30) },
            PumpEvent::Other,
            PumpEvent::TempBasalDuration { at: t(8, 0), minutes: 120.0 },
            PumpEvent::TempBasal { at: t(8, 0), rate: 1.0 },
        ];
        let tdd = total_daily_dose(&history, &BasalSchedule::constant(1.0), t(10, 5), 0.1);
        assert!((tdd.temp_basal - 1.5).abs() < 1e-9);
    }

    #[test]
    fn finds_newest_qualifying_bolus() {
        let history = vec![
            PumpEvent::Bolus { at: t(11, 50), amount: 0.3 },
            PumpEvent::Bolus { at: t(11, 40), amount: 2.0 },
        ];
        let got = last_qualifying_bolus(&history, 1.5, t(12, 0), &PumpRounding::default());
        assert_eq!(got, Some((2.0, 20.0)));
    }
}
