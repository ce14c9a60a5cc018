use std::num::NonZeroU32;
use std::num::NonZeroUsize;
use std::ops::ControlFlow;
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

use governor::Quota;
use governor::RateLimiter;
use governor::clock::Clock;
use governor::clock::QuantaClock;
use governor::state::InMemoryState;
use governor::state::direct::NotKeyed;

use http::Method;

use bucket_limit::BucketTable;
use bucket_limit::GlobalLimiter;
use bucket_limit::Reason;
use bucket_limit::RouteData;
use bucket_limit::Strategy;

// Wrapper to bridge Governor into the Strategy trait
#[derive(Debug)]
struct GovernorStrategy {
    limiter: Arc<RateLimiter<NotKeyed, InMemoryState, QuantaClock>>,
    clock: QuantaClock,
}

impl Strategy for GovernorStrategy {
    fn process(&self) -> ControlFlow<Reason> {
        match self.limiter.check() {
            Ok(_) => ControlFlow::Continue(()),
            Err(negative) => {
                let now = self.clock.now();
                let wait: Duration = negative.wait_time_from(now);
                ControlFlow::Break(Reason::Overloaded { retry_after: wait })
            }
        }
    }
}

fn bench_single_strategy<S: Strategy>(group_name: &str, c: &mut Criterion, strategy: Arc<S>) {
    let mut group = c.benchmark_group(group_name);

    group.bench_function("single-threaded", |b| {
        b.iter(|| {
            let _ = black_box(strategy.as_ref()).process();
        })
    });

    group.finish();
}

fn bench_parallel_strategy<S: Strategy + Send + Sync + 'static>(
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
                                let _ = black_box(s.process());
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

fn bench_table(c: &mut Criterion) {
    let mut group = c.benchmark_group("BucketTable");
    let table = BucketTable::new();
    let routes: Vec<RouteData> = (0..64u64)
        .map(|i| {
            RouteData::new(
                &Method::POST,
                &format!("/channels/{}/messages", 123_456_789_012_345_678 + i),
            )
        })
        .collect();

    group.bench_function("resolve-hot", |b| {
        b.iter(|| {
            let _ = black_box(table.resolve(&routes[0]));
        })
    });

    group.bench_function("resolve-spread", |b| {
        let mut i = 0;
        b.iter(|| {
            i = (i + 1) % routes.len();
            let _ = black_box(table.resolve(&routes[i]));
        })
    });

    group.bench_function("route-derivation", |b| {
        b.iter(|| {
            black_box(RouteData::new(
                &Method::PUT,
                "/channels/123456789012345678/messages/223456789012345678/reactions/%F0%9F%91%8D/@me",
            ))
        })
    });

    group.finish();
}

fn run_all_benches(c: &mut Criterion) {
    let limit_val = 1_000_000;
    let limit = NonZeroUsize::new(limit_val).unwrap();

    let global = Arc::new(GlobalLimiter::new(limit));
    let unlimited = Arc::new(GlobalLimiter::unlimited());

    let gov_quota = Quota::per_second(NonZeroU32::new(limit_val as u32).unwrap());
    let gov_clock = QuantaClock::default();
    let gov_limiter = Arc::new(RateLimiter::direct_with_clock(gov_quota, gov_clock.clone()));
    let gov = Arc::new(GovernorStrategy {
        limiter: gov_limiter,
        clock: gov_clock,
    });

    bench_single_strategy("GlobalLimiter", c, Arc::clone(&global));
    bench_parallel_strategy("GlobalLimiter", c, global);

    bench_single_strategy("GlobalLimiter-Unlimited", c, Arc::clone(&unlimited));
    bench_parallel_strategy("GlobalLimiter-Unlimited", c, unlimited);

    bench_single_strategy("Governor", c, Arc::clone(&gov));
    bench_parallel_strategy("Governor", c, gov);

    bench_table(c);
}

criterion_group!(benches, run_all_benches);
criterion_main!(benches);
