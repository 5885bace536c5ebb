use chrono::{DateTime, Duration};
use criterion::{BatchSize, Criterion, black_box, criterion_group, criterion_main};
use oref_core::{CycleInputs, GlucoseReading, IobData, IobTick, Settings, analyze, determine_basal};

// Synthetic CGM window: slow sine around 140 mg/dL with additive noise, newest first
fn synth_readings(n: usize, noise_amp: f64, seed: u32) -> Vec<GlucoseReading> {
    // tiny PRNG
    let mut state = seed.max(1);
    let mut next_f64 = || {
        let mut x = state;
        x ^= x << 13;
        x ^= x >> 17;
        x ^= x << 5;
        state = x;
        f64::from(x) / (f64::from(u32::MAX) + 1.0)
    };
    let t0 = DateTime::parse_from_rfc3339("2025-01-26T12:00:00+00:00").unwrap();
    (0..n)
        .map(|i| {
            let t = i as f64 / 12.0;
            let bg = 140.0 + 40.0 * t.sin() + (next_f64() * 2.0 - 1.0) * noise_amp;
            GlucoseReading::sgv(t0 - Duration::minutes(5 * i as i64), bg.round())
        })
        .collect()
}

// IOB model output decaying from `iob` over four hours
fn decaying_iob(iob: f64) -> IobData {
    let ticks = (0..48)
        .map(|i| {
            let left = iob * (1.0 - i as f64 / 48.0);
            IobTick::new(left, 0.02 * (1.0 - i as f64 / 48.0), 0.015)
        })
        .collect();
    IobData {
        ticks,
        ..IobData::default()
    }
}

pub fn bench_cycle(c: &mut Criterion) {
    let mut g = c.benchmark_group("decision_cycle");
    // Allow quick tweaking without CLI flags (Criterion 0.5):
    //   BENCH_SAMPLE_SIZE=10 BENCH_MEAS_MS=50 cargo bench -p oref_core --bench predict
    if let Ok(ss) = std::env::var("BENCH_SAMPLE_SIZE") {
        if let Ok(n) = ss.parse::<usize>() {
            g.sample_size(n.max(10));
        }
    } else {
        g.sample_size(50);
    }
    if let Ok(ms) = std::env::var("BENCH_MEAS_MS")
        && let Ok(ms_u64) = ms.parse::<u64>()
    {
        g.measurement_time(std::time::Duration::from_millis(ms_u64));
    }

    let readings = synth_readings(48, 3.0, 0xC0FFEE);
    g.bench_function("analyze_window", |b| {
        b.iter(|| black_box(analyze(black_box(&readings))));
    });

    let Some(status) = analyze(&readings) else {
        return;
    };
    let now = status.date;
    let settings = Settings::default();
    for &iob in &[0.0f64, 1.5, 3.5] {
        let inputs = CycleInputs::builder(now)
            .glucose(status.clone())
            .iob(decaying_iob(iob))
            .micro_bolus_allowed(true)
            .build()
            .unwrap();
        g.bench_function(format!("determine_iob_{iob}"), |b| {
            b.iter_batched(
                || inputs.clone(),
                |i| black_box(determine_basal(black_box(&settings), &i)),
                BatchSize::SmallInput,
            );
        });
    }
    g.finish();
}

criterion_group!(predict, bench_cycle);
criterion_main!(predict);
