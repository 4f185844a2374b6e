//! Compile-pipeline benchmarks: waveform rendering cost as a function of
//! pulse count, port count, and trigger-graph depth.
//!
//! For a single-shot lab run `compile` happens once, but for a swept
//! experiment it runs once per sweep point, so its cost scales into the
//! thousands of calls. These benchmarks track the two places that scale
//! with instruction count (`Port::execute_instructions` and
//! `Port::write_waveform`) and the one that scales with port count
//! (`dag::longest_path`).

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use pulseforge::prelude::*;

const PULSE_COUNTS: [usize; 4] = [10, 50, 200, 1000];
const PORT_COUNTS: [usize; 4] = [1, 4, 8, 16];

fn square_pulse(duration: f64) -> Instruction {
    Instruction::Pulse(Pulse::new(PulseKind::Square {
        amplitude: Param::literal(0.8),
        duration: Param::literal(duration),
    }))
}

/// A single port with `n` back-to-back 20 ns pulses.
fn build_single_port_sequence(n: usize) -> Sequence {
    let mut seq = Sequence::new();
    let port = Port::new("q0", PortConfig::default());
    for _ in 0..n {
        seq.add(square_pulse(20.0), port.clone()).unwrap();
    }
    seq
}

/// `n` ports, each with one pulse, triggered together at the end.
fn build_multi_port_sequence(n: usize) -> Sequence {
    let mut seq = Sequence::new();
    let ports: Vec<Port> = (0..n)
        .map(|i| Port::new(format!("q{i}"), PortConfig::default()))
        .collect();
    for port in &ports {
        seq.add(square_pulse(40.0), port.clone()).unwrap();
    }
    seq.trigger(ports, "left");
    seq
}

fn bench_compile_by_pulse_count(c: &mut Criterion) {
    let mut group = c.benchmark_group("compile/pulse_count");

    for count in PULSE_COUNTS {
        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::new("single_port", count), &count, |b, &n| {
            b.iter(|| {
                let mut seq = build_single_port_sequence(n);
                black_box(seq.compile().unwrap());
            });
        });
    }

    group.finish();
}

fn bench_compile_by_port_count(c: &mut Criterion) {
    let mut group = c.benchmark_group("compile/port_count");

    for count in PORT_COUNTS {
        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::new("triggered", count), &count, |b, &n| {
            b.iter(|| {
                let mut seq = build_multi_port_sequence(n);
                black_box(seq.compile().unwrap());
            });
        });
    }

    group.finish();
}

fn bench_recompile_after_sweep_point(c: &mut Criterion) {
    let mut group = c.benchmark_group("compile/sweep_point");

    group.bench_function("update_and_recompile", |b| {
        let mut seq = Sequence::new();
        let port = Port::new("q0", PortConfig::default());
        let amplitude = Variable::new("amp", (0..100).map(|i| i as f64 * 0.01).collect(), "V");
        seq.add(
            Instruction::Pulse(Pulse::new(PulseKind::Square {
                amplitude: Param::bound(amplitude),
                duration: Param::literal(100.0),
            })),
            port,
        )
        .unwrap();
        seq.compile().unwrap();

        let mut index = 0usize;
        b.iter(|| {
            index = (index + 1) % 100;
            let mut command = UpdateCommand::new();
            command.insert("amp".to_string(), index);
            seq.update_variables(&command).unwrap();
            black_box(seq.compile().unwrap());
        });
    });

    group.finish();
}

fn bench_longest_path(c: &mut Criterion) {
    let mut group = c.benchmark_group("dag/longest_path");

    for count in PORT_COUNTS {
        let edges: Vec<(TriggerIndex, TriggerIndex, f64)> =
            (0..count as TriggerIndex).map(|i| (i, i + 1, 20.0)).collect();
        group.bench_with_input(BenchmarkId::new("chain", count), &count, |b, &n| {
            b.iter(|| black_box(longest_path(n + 1, &edges).unwrap()));
        });
    }

    group.finish();
}

criterion_group!(
    compile_benches,
    bench_compile_by_pulse_count,
    bench_compile_by_port_count,
    bench_recompile_after_sweep_point,
);

criterion_group!(dag_benches, bench_longest_path);

criterion_main!(compile_benches, dag_benches);
