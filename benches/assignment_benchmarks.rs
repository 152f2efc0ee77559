//! Assignment hot-path benchmarks
//!
//! Measures first-time assignment per allocation method, the cached
//! repeat-assignment path and the raw participant hash.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use experiment_engine::experiment::assignment::{hash_bucket, participant_hash};
use experiment_engine::{
    AllocationMethod, ExperimentConfig, ExperimentEngine, ExperimentStatus, MetricDefinition,
    Variation,
};

fn engine_with(method: AllocationMethod) -> ExperimentEngine {
    let engine = ExperimentEngine::default();
    engine
        .create_experiment(
            ExperimentConfig::builder("bench", "Assignment benchmark")
                .with_variation(Variation::control("a", 40.0))
                .with_variation(Variation::new("b", 35.0))
                .with_variation(Variation::new("c", 25.0))
                .with_metric(MetricDefinition::conversion("signup"))
                .with_allocation(method)
                .with_status(ExperimentStatus::Active)
                .build(),
        )
        .unwrap();
    engine
}

fn bench_participant_hash(c: &mut Criterion) {
    let mut group = c.benchmark_group("participant_hash");

    for len in [8, 36, 128] {
        let id: String = "x".repeat(len);
        group.bench_with_input(BenchmarkId::new("hash", len), &id, |b, id| {
            b.iter(|| participant_hash(black_box(id)));
        });
        group.bench_with_input(BenchmarkId::new("bucket", len), &id, |b, id| {
            b.iter(|| hash_bucket(black_box(id)));
        });
    }

    group.finish();
}

fn bench_first_assignment(c: &mut Criterion) {
    let mut group = c.benchmark_group("first_assignment");

    for method in [
        AllocationMethod::Random,
        AllocationMethod::Hash,
        AllocationMethod::Sticky,
    ] {
        let engine = engine_with(method);
        let mut counter = 0u64;

        group.bench_function(BenchmarkId::new("method", method.as_str()), |b| {
            b.iter(|| {
                counter += 1;
                let participant = format!("participant_{counter}");
                black_box(engine.assign("bench", &participant, None))
            });
        });
    }

    group.finish();
}

fn bench_repeat_assignment(c: &mut Criterion) {
    let engine = engine_with(AllocationMethod::Hash);
    for i in 0..10_000 {
        engine.assign("bench", &format!("participant_{i}"), None);
    }

    c.bench_function("repeat_assignment", |b| {
        let mut i = 0u64;
        b.iter(|| {
            i = (i + 1) % 10_000;
            let participant = format!("participant_{i}");
            black_box(engine.assign("bench", &participant, None))
        });
    });
}

criterion_group!(
    name = assignment_benches;
    config = Criterion::default()
        .sample_size(100)
        .measurement_time(std::time::Duration::from_secs(3));
    targets = bench_participant_hash, bench_first_assignment, bench_repeat_assignment
);

criterion_main!(assignment_benches);
