use std::num::NonZeroU32;
use std::sync::Arc;
use std::sync::Barrier;
use std::thread;
use std::time::Duration;
use std::time::Instant;

use criterion::BenchmarkId;
use criterion::Criterion;
use criterion::black_box;
use criterion::criterion_group;
use criterion::criterion_main;

use limits_core::Algorithm;
use limits_core::Limit;
use limits_core::RateLimiter;
use limits_core::RollingWindowThrottler;
use limits_core::Strategy;
use limits_core::TokenBucket;

fn bench_single_strategy<S: Strategy>(group_name: &str, c: &mut Criterion, strategy: Arc<S>) {
    let mut group = c.benchmark_group(group_name);

    group.bench_function("single-threaded", |b| {
        b.iter(|| {
            let _ = black_box(strategy.as_ref()).try_acquire(black_box(1));
        })
    });

    group.finish();
}

fn bench_parallel_strategy<S: Strategy + 'static>(
    group_name: &str,
    c: &mut Criterion,
    strategy: Arc<S>,
) {
    let mut group = c.benchmark_group(group_name);

    for threads in [2, 4, 8].iter() {
        let num_threads = *threads;
        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{}-threads", num_threads)),
            &num_threads,
            |b, &n| {
                b.iter_custom(|iters| {
                    let barrier = Arc::new(Barrier::new(n + 1));
                    let mut handles = Vec::with_capacity(n);

                    for _ in 0..n {
                        let s = Arc::clone(&strategy);
                        let bar = Arc::clone(&barrier);
                        let iters_per_thread = iters / n as u64;

                        handles.push(thread::spawn(move || {
                            bar.wait();
                            for _ in 0..iters_per_thread {
                                let _ = black_box(s.try_acquire(1));
                            }
                        }));
                    }

                    barrier.wait();
                    let start = Instant::now();

                    for handle in handles {
                        let _ = handle.join();
                    }

                    start.elapsed()
                });
            },
        );
    }
    group.finish();
}

fn bench_rate_limiter(c: &mut Criterion) {
    let mut group = c.benchmark_group("RateLimiter-reserve");

    for (name, algorithm) in [
        ("fixed-window", Algorithm::FixedWindow),
        (
            "step-up",
            Algorithm::StepUp {
                steps: NonZeroU32::new(10).unwrap(),
            },
        ),
        ("rolling-window", Algorithm::RollingWindow),
    ] {
        let limiter = RateLimiter::global(Limit::fixed(1_000_000_000)).with_algorithm(algorithm);
        group.bench_function(name, |b| {
            b.iter(|| {
                let _ = black_box(limiter.reserve(black_box(1_024)));
            })
        });
    }

    group.finish();
}

fn run_all_benches(c: &mut Criterion) {
    // Large enough that the bench measures bookkeeping, not throttling.
    let capacity = 1_000_000_000;
    let period = Duration::from_secs(60);

    let tb = Arc::new(TokenBucket::fixed(capacity, period).unwrap());
    bench_single_strategy("TokenBucket", c, Arc::clone(&tb));
    bench_parallel_strategy("TokenBucket", c, tb);

    // Every grant is queued until it expires, so keep the window short.
    let rw = Arc::new(RollingWindowThrottler::new(1_000_000, Duration::from_secs(1)).unwrap());
    bench_single_strategy("RollingWindow", c, Arc::clone(&rw));
    bench_parallel_strategy("RollingWindow", c, rw);

    bench_rate_limiter(c);
}

criterion_group!(benches, run_all_benches);
criterion_main!(benches);
