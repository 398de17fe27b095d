//! Benchmarks for the job registry and the submission path.
//!
//! Run with: cargo bench

use chrono::Utc;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::time::Duration;
use trainyard_core::config::EngineConfig;
use trainyard_core::jobs::{JobEngine, JobFilter, JobId, JobRegistry, JobSpec, JobSubmission, ProgressSnapshot};

fn filled_registry(count: usize) -> (JobRegistry, Vec<JobId>) {
    let registry = JobRegistry::new();
    let ids = (0..count)
        .map(|_| registry.create(JobSpec::training(), 10).unwrap())
        .collect();
    (registry, ids)
}

fn bench_registry_create(c: &mut Criterion) {
    let registry = JobRegistry::new();
    c.bench_function("registry_create", |b| {
        b.iter(|| black_box(registry.create(JobSpec::optimization(), 100).unwrap()));
    });
}

fn bench_registry_snapshot(c: &mut Criterion) {
    let (registry, ids) = filled_registry(1_000);
    let id = ids[500];
    c.bench_function("registry_snapshot", |b| {
        b.iter(|| {
            let record = registry.get(black_box(id)).unwrap();
            black_box(ProgressSnapshot::from_record(&record, Utc::now()))
        });
    });
}

fn bench_registry_list(c: &mut Criterion) {
    let mut group = c.benchmark_group("registry_list");
    for count in [100, 1_000, 10_000] {
        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, &n| {
            let (registry, _) = filled_registry(n);
            b.iter(|| black_box(registry.list()));
        });
    }
    group.finish();
}

fn bench_submit_to_completion(c: &mut Criterion) {
    let mut group = c.benchmark_group("submit_to_completion");
    let rt = tokio::runtime::Runtime::new().unwrap();
    for jobs in [10, 100] {
        group.throughput(Throughput::Elements(jobs as u64));
        group.bench_with_input(BenchmarkId::from_parameter(jobs), &jobs, |b, &n| {
            let engine = rt.block_on(async {
                JobEngine::with_builtin(EngineConfig {
                    training_step_delay: Duration::ZERO,
                    optimization_step_delay: Duration::ZERO,
                    ..Default::default()
                })
                .unwrap()
            });
            b.iter(|| {
                rt.block_on(async {
                    let ids: Vec<JobId> = (0..n)
                        .map(|_| {
                            engine
                                .submit_job(JobSubmission::new(JobSpec::training()).with_total_steps(5))
                                .unwrap()
                        })
                        .collect();
                    for id in ids {
                        while !engine.get_progress(id).unwrap().status.is_terminal() {
                            tokio::task::yield_now().await;
                        }
                    }
                    black_box(engine.list_jobs(JobFilter::default()).len())
                })
            });
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_registry_create,
    bench_registry_snapshot,
    bench_registry_list,
    bench_submit_to_completion,
);
criterion_main!(benches);
