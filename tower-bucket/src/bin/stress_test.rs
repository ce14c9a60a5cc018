use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

use bytes::Bytes;
use hdrhistogram::Histogram;
use tokio::sync::Barrier;
use tokio::task::JoinSet;
use tokio::time::sleep;
use tower::BoxError;
use tower::service_fn;
use tower_bucket::ApiRequest;
use tower_bucket::Rest;
use tower_bucket::RestError;
use tower_bucket::RestOptions;
use tracing_subscriber::EnvFilter;

/// Simulates the remote API: 50ms of latency and a five request bucket per channel.
async fn mock_api(_req: http::Request<Bytes>) -> Result<http::Response<Bytes>, BoxError> {
    sleep(Duration::from_millis(50)).await;
    Ok(http::Response::builder()
        .status(200)
        .header("x-ratelimit-limit", "5")
        .header("x-ratelimit-remaining", "4")
        .header("x-ratelimit-reset-after", "0.1")
        .body(Bytes::new())?)
}

#[derive(Default)]
struct RejectionCounter {
    rate_limited: usize,
    network: usize,
    deadline: usize,
    other: usize,
}

async fn run_load_test<T>(name: &str, rest: Rest<T>, channels: usize, total_reqs: usize)
where
    T: tower::Service<http::Request<Bytes>, Response = http::Response<Bytes>, Error = BoxError>
        + Clone
        + Send
        + Sync
        + 'static,
    T::Future: Send,
{
    let mut hist_elapsed = Histogram::<u64>::new_with_bounds(1, 600_000_000, 3).unwrap();

    let mut tasks = JoinSet::new();
    let mut rejections = RejectionCounter::default();

    let start = Instant::now();

    let barrier = Arc::new(Barrier::new(total_reqs));

    for i in 0..total_reqs {
        let rest = rest.clone();
        let bar = barrier.clone();
        let path = format!("/channels/{}/messages", 100_000_000_000_000_000 + i % channels);
        tasks.spawn(async move {
            bar.wait().await;
            let req_start = Instant::now();
            let res = rest.execute(ApiRequest::post(path)).await;
            (res, req_start.elapsed())
        });
    }

    let mut success_count = 0;

    while let Some(task) = tasks.join_next().await {
        let (res, elapsed) = task.expect("Task panicked");
        match res {
            Ok(_) => {
                success_count += 1;
                hist_elapsed.record(elapsed.as_micros() as u64).unwrap();
            }
            Err(RestError::RateLimited { .. }) => rejections.rate_limited += 1,
            Err(RestError::Network { .. }) => rejections.network += 1,
            Err(RestError::DeadlineExceeded { .. }) => rejections.deadline += 1,
            Err(_) => rejections.other += 1,
        }
    }

    let total_duration = start.elapsed();
    let goodput = success_count as f64 / total_duration.as_secs_f64();

    println!("--- {} ---", name);
    println!("Total Duration:  {:.2?}", total_duration);
    println!("Buckets:         {}", rest.buckets().bucket_count());
    println!("Success/Total:   {}/{}", success_count, total_reqs);
    println!("Success Rate:    {:.2} req/sec (Goodput)", goodput);

    if success_count > 0 {
        println!("P50 (Elapsed):   {}µs", hist_elapsed.value_at_quantile(0.5));
        println!(
            "P99 (Elapsed):   {}µs",
            hist_elapsed.value_at_quantile(0.99)
        );
    }

    let total_errors =
        rejections.rate_limited + rejections.network + rejections.deadline + rejections.other;
    println!("Errors:          {}", total_errors);
    if total_errors > 0 {
        println!("  └─ RateLimited: {}", rejections.rate_limited);
        println!("  └─ Network:     {}", rejections.network);
        println!("  └─ Deadline:    {}", rejections.deadline);
        if rejections.other > 0 {
            println!("  └─ Other:       {}", rejections.other);
        }
    }
    println!();
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let total_reqs = 2_000;

    // 1. Many buckets, generous global budget
    let options = RestOptions::default()
        .with_global_requests_per_second(NonZeroUsize::new(10_000))
        .with_offset(Duration::ZERO);
    let rest = Rest::new(service_fn(mock_api), options);
    rest.set_token("stress");
    run_load_test("Wide (200 buckets)", rest, 200, total_reqs).await;

    // 2. Few buckets, requests queue behind each other
    let options = RestOptions::default()
        .with_global_requests_per_second(NonZeroUsize::new(10_000))
        .with_offset(Duration::ZERO);
    let rest = Rest::new(service_fn(mock_api), options);
    rest.set_token("stress");
    run_load_test("Narrow (10 buckets)", rest, 10, total_reqs / 10).await;

    // 3. Many buckets, the global limiter is the bottleneck
    let options = RestOptions::default().with_offset(Duration::ZERO);
    let rest = Rest::new(service_fn(mock_api), options);
    rest.set_token("stress");
    run_load_test("Global (50 req/sec)", rest, 200, 200).await;

    Ok(())
}
