//! Single-tick strategy-selection cost, across worker pool sizes

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use pbt_scheduler::trial::{Hyperparameter, ModelType, TrialId, TrialState, WorkerId, WorkerKind};
use pbt_scheduler::worker::{SyntheticTrainStep, Worker};
use std::sync::Arc;

fn trial(id: u64) -> TrialState {
    TrialState::new(
        TrialId(id),
        Hyperparameter {
            lr: 0.01,
            momentum: 0.9,
            batch_size: 32,
            model_type: ModelType::Resnet18,
        },
        1000,
    )
}

/// Round-robin's CPU/GPU slot query cost scales with worker count, since
/// every worker is polled for `available_slots` each tick.
fn bench_slot_query_fanout(c: &mut Criterion) {
    let mut group = c.benchmark_group("slot_query_fanout");
    let rt = tokio::runtime::Runtime::new().unwrap();

    for worker_count in [2usize, 16, 64] {
        group.throughput(Throughput::Elements(worker_count as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(worker_count),
            &worker_count,
            |b, &worker_count| {
                let train_step = Arc::new(SyntheticTrainStep::new(0, 0.0));
                let workers: Vec<_> = (0..worker_count)
                    .map(|i| {
                        Arc::new(Worker::new(
                            WorkerId(i as u64),
                            WorkerKind::Cpu,
                            1,
                            10,
                            train_step.clone(),
                        ))
                        .handle()
                    })
                    .collect();

                b.to_async(&rt).iter(|| async {
                    let mut total = 0usize;
                    for worker in &workers {
                        total += black_box(worker.available_slots().await);
                    }
                    black_box(total)
                });
            },
        );
    }

    group.finish();
}

/// Cost of assigning and immediately awaiting one trial's completion handle
/// on a single CPU worker, end to end.
fn bench_assign_and_complete(c: &mut Criterion) {
    let mut group = c.benchmark_group("assign_and_complete");
    let rt = tokio::runtime::Runtime::new().unwrap();
    group.throughput(Throughput::Elements(1));

    group.bench_function("single_cpu_worker", |b| {
        let train_step = Arc::new(SyntheticTrainStep::new(0, 0.0));
        let worker = Arc::new(Worker::new(WorkerId(0), WorkerKind::Cpu, 1, 1, train_step)).handle();

        b.to_async(&rt).iter(|| async {
            let completion = worker.assign_trial(trial(1)).await;
            black_box(completion.await)
        });
    });

    group.finish();
}

criterion_group!(benches, bench_slot_query_fanout, bench_assign_and_complete);
criterion_main!(benches);
