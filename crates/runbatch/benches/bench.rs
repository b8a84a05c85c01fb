use core::{hint::black_box, time::Duration};
use criterion::{Criterion, Throughput, criterion_group, criterion_main};
use futures::future::try_join_all;
use runbatch::{Scheduler, SchedulerConfig, action_fn};
use std::time::Instant;
use tokio::runtime::Builder;

const BURST: usize = 4096;

fn noop_scheduler(intake_capacity: usize) -> Scheduler {
    Scheduler::spawn(
        action_fn(|| async { Ok::<(), core::convert::Infallible>(()) }),
        SchedulerConfig {
            intake_capacity,
            ..SchedulerConfig::default()
        },
    )
}

/// Fire-and-forget submissions from a single caller. Measures the intake path
/// and deadline bookkeeping of the control loop.
fn bench_submit_detached(c: &mut Criterion) {
    let mut group = c.benchmark_group("submit_detached");
    group.throughput(Throughput::Elements(BURST as u64));

    group.bench_function(format!("elems/{BURST}"), |b| {
        let rt = Builder::new_multi_thread()
            .enable_all()
            .worker_threads(1)
            .build()
            .unwrap();

        b.to_async(&rt).iter_custom(|iters| async move {
            let scheduler = noop_scheduler(BURST);
            let start = Instant::now();

            for _ in 0..iters {
                for i in 0..BURST {
                    let tolerance = Duration::from_millis((i % 50) as u64);
                    black_box(scheduler.submit(tolerance).await.unwrap());
                }
            }

            let elapsed = start.elapsed();
            scheduler.shutdown().await.unwrap();
            elapsed
        });
    });

    group.finish();
}

/// Many concurrent callers each waiting on their completion. Measures the end
/// to end cost of coalescing a burst into as few executions as possible.
fn bench_burst_with_completion(c: &mut Criterion) {
    let mut group = c.benchmark_group("burst_with_completion");
    group.sample_size(10);
    group.sampling_mode(criterion::SamplingMode::Flat);

    for callers in [1, 16, 256, 4096] {
        group.throughput(Throughput::Elements(callers as u64));
        group.bench_function(format!("callers/{callers}"), |b| {
            let rt = Builder::new_multi_thread().enable_all().build().unwrap();

            b.to_async(&rt).iter_custom(move |iters| async move {
                let scheduler = noop_scheduler(callers);
                let start = Instant::now();

                for _ in 0..iters {
                    let tasks: Vec<_> = (0..callers)
                        .map(|_| {
                            let scheduler = scheduler.clone();
                            tokio::spawn(async move {
                                scheduler
                                    .submit_with_completion(Duration::ZERO)
                                    .await?
                                    .await
                            })
                        })
                        .collect();

                    for report in try_join_all(tasks).await.unwrap() {
                        black_box(report.unwrap());
                    }
                }

                let elapsed = start.elapsed();
                scheduler.shutdown().await.unwrap();
                elapsed
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_submit_detached, bench_burst_with_completion);
criterion_main!(benches);
