// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

use awgboard_compiler::{CodeFormat, Compiler, Quantizer, WaveKind, WaveUnit};
use awgboard_isa::device_traits::AWG_TRAITS;
use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use std::hint::black_box;

fn create_units(count: usize, len: usize) -> Vec<WaveUnit> {
    let samples: Vec<f64> = (0..len)
        .map(|i| (i as f64 * 0.01).sin() * 0.8)
        .collect();
    (0..count)
        .map(|i| {
            let kind = if i == 0 {
                WaveKind::Trigger
            } else {
                WaveKind::Delayed
            };
            // Gaps of 13 samples keep every unit off the clock grid.
            let start = (i * (len + 13)) as f64 / AWG_TRAITS.sampling_rate;
            WaveUnit::new(kind, start, samples.clone())
        })
        .collect()
}

fn bench_compile(c: &mut Criterion) {
    let compiler = Compiler::new(
        &AWG_TRAITS,
        Quantizer::new(&AWG_TRAITS, CodeFormat::Unsigned, 1.0, false),
    );
    let shapes = [(1, 4096), (16, 1024), (128, 256)];

    let mut group = c.benchmark_group("compile");

    for &(count, len) in &shapes {
        let units = create_units(count, len);
        group.bench_with_input(
            BenchmarkId::new("units", format!("{count}x{len}")),
            &units,
            |b, units| {
                b.iter(|| black_box(compiler.compile(units, false)));
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_compile);
criterion_main!(benches);
