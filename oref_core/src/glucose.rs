//! Glucose trend analysis: turns a raw reading window into a [`GlucoseStatus`].
//!
//! The window is newest first. Four independent scans run over it:
//! - rolling deltas bucketed by age (last ~5 m, short ~5-15 m, long ~20-40 m)
//! - duration of a flat 2 mg/dL band (sensor stuck heuristic)
//! - duration and average of a ±5% band
//! - least-squares parabola over the trailing ~47 minutes

use oref_traits::Timestamp;

use crate::types::{GlucoseReading, GlucoseStatus, ParabolaFit, ReadingKind};
use crate::util::{minutes_between, round0, round_to};

const FLAT_BAND_MGDL: f64 = 2.0;
const FLAT_MAX_GAP_MINUTES: f64 = 11.0;
const FLAT_HORIZON_MINUTES: f64 = 60.0;
const PCT_BAND: f64 = 0.05;
const PCT_MAX_GAP_MINUTES: f64 = 13.0;

// Fit scaling keeps time and BG of the same magnitude.
const FIT_TIME_SCALE_SECS: f64 = 300.0;
const FIT_BG_SCALE: f64 = 50.0;
const FIT_WINDOW_SECS: f64 = 47.0 * 60.0;
const FIT_MAX_GAP_STEPS: f64 = 7.5 * 60.0 / FIT_TIME_SCALE_SECS;
const FIT_MIN_SECS: f64 = 20.0 * 60.0;

#[derive(Debug, Clone, Copy)]
struct Sample {
    date: Timestamp,
    glucose: f64,
}

fn mean(v: &[f64]) -> Option<f64> {
    (!v.is_empty()).then(|| v.iter().sum::<f64>() / v.len() as f64)
}

#[inline]
fn round4(v: f64) -> f64 {
    round_to(v, 4)
}

/// Build the trend snapshot for one cycle.
///
/// Readings without a glucose value are dropped first. Returns `None` when
/// nothing usable is left.
pub fn analyze(readings: &[GlucoseReading]) -> Option<GlucoseStatus> {
    let data: Vec<&GlucoseReading> = readings
        .iter()
        .filter(|r| r.glucose.is_some_and(|g| g != 0.0))
        .collect();
    let newest = *data.first()?;
    let samples: Vec<Sample> = data
        .iter()
        .map(|r| Sample {
            date: r.date,
            glucose: r.glucose.unwrap_or_default(),
        })
        .collect();
    let now_date = newest.date;
    let noise = newest.noise.unwrap_or(0.0);

    if samples.len() == 1 {
        let mut status = GlucoseStatus::flat(now_date, samples[0].glucose);
        status.noise = noise;
        status.device.clone_from(&newest.device);
        return Some(status);
    }

    // ── Rolling deltas ───────────────────────────────────────────────────────
    let mut now_bg = samples[0].glucose;
    let mut last_deltas = Vec::new();
    let mut short_deltas = Vec::new();
    let mut long_deltas = Vec::new();
    let mut avg_deltas = Vec::new();
    let mut last_cal = None;
    for (i, reading) in data.iter().enumerate().skip(1) {
        if reading.kind == ReadingKind::Calibration {
            last_cal = Some(i);
            break;
        }
        if reading.device != newest.device {
            break;
        }
        let then = samples[i];
        if then.glucose <= 39.0 {
            continue;
        }
        let minutes_ago = round0(minutes_between(now_date, then.date));
        let avg_del = (now_bg - then.glucose) / minutes_ago * 5.0;
        avg_deltas.push(avg_del);
        if 0.0 < minutes_ago && minutes_ago < 2.5 {
            now_bg = (now_bg + then.glucose) / 2.0;
        } else if 2.5 < minutes_ago && minutes_ago < 17.5 {
            short_deltas.push(avg_del);
            if minutes_ago < 7.5 {
                last_deltas.push(avg_del);
            }
        } else if 17.5 < minutes_ago && minutes_ago < 42.5 {
            long_deltas.push(avg_del);
        } else {
            break;
        }
    }
    let short_avg_delta = mean(&short_deltas).unwrap_or(0.0);
    let delta = mean(&last_deltas).unwrap_or(short_avg_delta);
    let long_avg_delta = mean(&long_deltas).unwrap_or(0.0);
    let avg_delta = avg_deltas.first().copied().unwrap_or(0.0);

    let cgm_flat_minutes = flat_band_minutes(now_bg, now_date, &samples);
    let (dura_isf_minutes, dura_isf_average) = pct_band(now_bg, now_date, &samples);
    let fit = if samples.len() > 3 {
        fit_parabola(&samples)
    } else {
        ParabolaFit::default()
    };

    tracing::debug!(
        glucose = now_bg,
        delta,
        short_avg_delta,
        long_avg_delta,
        cgm_flat_minutes,
        dura_isf_minutes,
        fit_correlation = fit.correlation,
        "glucose status"
    );

    Some(GlucoseStatus {
        glucose: round4(now_bg),
        delta: round4(delta),
        short_avg_delta: round4(short_avg_delta),
        long_avg_delta: round4(long_avg_delta),
        avg_delta: round4(avg_delta),
        noise,
        cgm_flat_minutes: round4(cgm_flat_minutes),
        dura_isf_minutes: round4(dura_isf_minutes),
        dura_isf_average: round4(dura_isf_average),
        fit: ParabolaFit {
            duration_minutes: round4(fit.duration_minutes),
            last_delta: round4(fit.last_delta),
            next_delta: round4(fit.next_delta),
            correlation: round4(fit.correlation),
            acceleration: fit.acceleration,
            a0: round4(fit.a0),
            a1: round4(fit.a1),
            a2: round4(fit.a2),
        },
        date: now_date,
        last_calibration_age: last_cal,
        device: newest.device.clone(),
    })
}

/// Minutes the window stayed within a 2 mg/dL band, bounded by an 11 minute
/// sampling gap or a one hour horizon.
fn flat_band_minutes(now_bg: f64, now_date: Timestamp, samples: &[Sample]) -> f64 {
    let mut min_bg = now_bg;
    let mut max_bg = now_bg;
    let mut old_date = now_date;
    let mut flat = 0.0;
    for then in samples.iter().skip(1) {
        min_bg = min_bg.min(then.glucose);
        max_bg = max_bg.max(then.glucose);
        if max_bg - min_bg > FLAT_BAND_MGDL
            || minutes_between(old_date, then.date) > FLAT_MAX_GAP_MINUTES
            || minutes_between(now_date, then.date) > FLAT_HORIZON_MINUTES
        {
            break;
        }
        old_date = then.date;
        flat = minutes_between(now_date, old_date);
    }
    flat
}

/// Duration (minutes) and running average of readings staying within ±5% of
/// that average.
fn pct_band(now_bg: f64, now_date: Timestamp, samples: &[Sample]) -> (f64, f64) {
    let mut sum = now_bg;
    let mut avg = now_bg;
    let mut minutes = 0.0;
    let mut n = 1.0;
    for then in samples.iter().skip(1) {
        n += 1.0;
        let age = round0(minutes_between(now_date, then.date));
        if age - minutes > PCT_MAX_GAP_MINUTES {
            break;
        }
        if then.glucose > avg * (1.0 - PCT_BAND) && then.glucose < avg * (1.0 + PCT_BAND) {
            sum += then.glucose;
            avg = sum / n;
            minutes = age;
        } else {
            break;
        }
    }
    (minutes, avg)
}

#[derive(Debug, Default, Clone, Copy)]
struct Sums {
    n: f64,
    x: f64,
    x2: f64,
    x3: f64,
    x4: f64,
    y: f64,
    xy: f64,
    x2y: f64,
}

impl Sums {
    fn add(&mut self, t: f64, bg: f64) {
        self.n += 1.0;
        self.x += t;
        self.x2 += t.powi(2);
        self.x3 += t.powi(3);
        self.x4 += t.powi(4);
        self.y += bg;
        self.xy += t * bg;
        self.x2y += t.powi(2) * bg;
    }

    /// Cramer's rule for `y = a t² + b t + c`; `None` when singular.
    fn solve(&self) -> Option<(f64, f64, f64)> {
        let Self {
            n,
            x,
            x2,
            x3,
            x4,
            y,
            xy,
            x2y,
        } = *self;
        let det_h = x4 * (x2 * n - x * x) - x3 * (x3 * n - x * x2) + x2 * (x3 * x - x2 * x2);
        if det_h == 0.0 {
            return None;
        }
        let det_a = x2y * (x2 * n - x * x) - xy * (x3 * n - x * x2) + y * (x3 * x - x2 * x2);
        let det_b = x4 * (xy * n - y * x) - x3 * (x2y * n - y * x2) + x2 * (x2y * x - xy * x2);
        let det_c = x4 * (x2 * y - x * xy) - x3 * (x3 * y - x * x2y) + x2 * (x3 * xy - x2 * x2y);
        Some((det_a / det_h, det_b / det_h, det_c / det_h))
    }
}

/// Best-R² parabola over growing trailing windows.
fn fit_parabola(samples: &[Sample]) -> ParabolaFit {
    let t0 = samples[0].date;
    let steps = |d: Timestamp| d.signed_duration_since(t0).num_milliseconds() as f64 / 1000.0 / FIT_TIME_SCALE_SECS;
    let mut best = ParabolaFit::default();
    let mut sums = Sums::default();
    let mut ti_last = 0.0;

    for (i, then) in samples.iter().enumerate() {
        if then.glucose <= 39.0 {
            continue;
        }
        let ti = steps(then.date);
        if -ti * FIT_TIME_SCALE_SECS > FIT_WINDOW_SECS {
            break;
        }
        if ti < ti_last - FIT_MAX_GAP_STEPS {
            if i < 3 || -ti * FIT_TIME_SCALE_SECS < FIT_MIN_SECS {
                // too little history before the gap for a usable fit
                best = ParabolaFit {
                    duration_minutes: -ti_last * FIT_TIME_SCALE_SECS / 60.0,
                    ..ParabolaFit::default()
                };
            }
            break;
        }
        ti_last = ti;
        sums.add(ti, then.glucose / FIT_BG_SCALE);
        if !(sums.n > 3.0 && -ti * FIT_TIME_SCALE_SECS > FIT_MIN_SECS) {
            continue;
        }
        let Some((a, b, c)) = sums.solve() else {
            continue;
        };
        let y_mean = sums.y / sums.n;
        let (mut ss_tot, mut ss_res) = (0.0, 0.0);
        for before in &samples[..=i] {
            let y = before.glucose / FIT_BG_SCALE;
            let t = steps(before.date);
            ss_tot += (y - y_mean).powi(2);
            ss_res += (y - (a * t * t + b * t + c)).powi(2);
        }
        let r_squ = if ss_tot == 0.0 { 0.64 } else { 1.0 - ss_res / ss_tot };
        if r_squ >= best.correlation {
            best = ParabolaFit {
                duration_minutes: -ti * FIT_TIME_SCALE_SECS / 60.0,
                last_delta: -FIT_BG_SCALE * (a - b),
                next_delta: FIT_BG_SCALE * (a + b),
                correlation: r_squ,
                acceleration: 2.0 * a * FIT_BG_SCALE,
                a0: c * FIT_BG_SCALE,
                a1: b * FIT_BG_SCALE,
                a2: a * FIT_BG_SCALE,
            };
        }
    }
    best
}
