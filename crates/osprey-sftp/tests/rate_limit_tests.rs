//! Pacing behavior of the adaptive rate limiter through its public API.

use async_trait::async_trait;
use osprey_sftp::rate_limit::{AdaptiveRateLimiter, LatencyProbe, INITIAL_RATE, MAX_RATE, MIN_RATE};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;

struct StaticProbe(Duration);

#[async_trait]
impl LatencyProbe for StaticProbe {
    async fn measure(&self) -> osprey_sftp::Result<Duration> {
        Ok(self.0)
    }
}

fn quiet_limiter() -> AdaptiveRateLimiter {
    AdaptiveRateLimiter::new(Arc::new(StaticProbe(Duration::from_millis(200))))
}

#[tokio::test]
async fn test_all_bytes_arrive_at_the_sink() {
    let limiter = quiet_limiter();
    let (read_half, write_half) = tokio::io::duplex(512 * 1024);
    let mut writer = limiter.writer(write_half);

    let payload: Vec<u8> = (0..200 * 1024).map(|i| (i % 251) as u8).collect();
    let expected = payload.clone();

    let feed = tokio::spawn(async move {
        writer.write_all(&payload).await.unwrap();
        drop(writer.into_inner());
    });

    let mut received = Vec::new();
    let mut read_half = read_half;
    read_half.read_to_end(&mut received).await.unwrap();
    feed.await.unwrap();

    assert_eq!(received, expected);
}

#[tokio::test]
async fn test_rate_bounds_hold_for_any_sample_sequence() {
    let limiter = quiet_limiter();

    let samples = [10u64, 500, 500, 10, 500, 500, 500, 10, 10, 10, 10];
    for ms in samples {
        limiter.apply_sample(Duration::from_millis(ms)).await;
        let rate = limiter.current_rate().await;
        assert!(rate >= MIN_RATE && rate <= MAX_RATE);
        assert_eq!(limiter.burst_limit().await, (rate / 20).max(4096));
    }
}

#[tokio::test]
async fn test_steady_rate_bounds_throughput() {
    let limiter = quiet_limiter();
    let mut writer = limiter.writer(tokio::io::sink());

    // Beyond the initial bucket, 2 MiB/s in 50 ms slices admits at most
    // 100 KiB per tick; 500 KiB therefore needs at least four refills.
    let payload = vec![0u8; 500 * 1024];
    let start = std::time::Instant::now();
    writer.write_all(&payload).await.unwrap();
    let elapsed = start.elapsed();

    assert!(
        elapsed >= Duration::from_millis(150),
        "wrote {} bytes in {:?}, faster than {} B/s allows",
        payload.len(),
        elapsed,
        INITIAL_RATE
    );
}
