//! Adaptive upload pacing.
//!
//! A token bucket refilled on a fixed cadence bounds how fast upload bytes are
//! forwarded into the SFTP writer. The bucket's refill size tracks measured
//! SSH round-trip latency with an AIMD controller: additive increase while the
//! link is quiet, multiplicative decrease when latency climbs. Latency
//! sampling is injected through [`LatencyProbe`] so the controller can be
//! driven with synthetic sequences in tests.

use crate::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{Mutex, Notify};
use tokio::time::{interval_at, Instant};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Rate floor
pub const MIN_RATE: usize = 512 * 1024;
/// Starting rate
pub const INITIAL_RATE: usize = 2 * 1024 * 1024;
/// Rate ceiling
pub const MAX_RATE: usize = 10 * 1024 * 1024;

/// Bucket refill cadence; 20 buckets per second keeps burst jitter low
const REFILL_INTERVAL: Duration = Duration::from_millis(50);
/// How often latency is sampled
const PROBE_INTERVAL: Duration = Duration::from_secs(2);
/// Below this round trip, the link is considered quiet
const LATENCY_LOW: Duration = Duration::from_millis(100);
/// Above this round trip, the link is considered congested
const LATENCY_HIGH: Duration = Duration::from_millis(300);
/// Additive increase per quiet sample
const RATE_STEP: usize = 256 * 1024;
/// Refill amounts never drop below one SFTP-sized chunk
const MIN_BURST: usize = 4096;

const BUCKETS_PER_SEC: usize =
    (1000 / REFILL_INTERVAL.as_millis()) as usize;

/// One round-trip time sample on the transfer's SSH connection.
#[async_trait]
pub trait LatencyProbe: Send + Sync + 'static {
    async fn measure(&self) -> Result<Duration>;
}

struct Bucket {
    bytes_left: usize,
    limit: usize,
    current_rate: usize,
}

struct Shared {
    bucket: Mutex<Bucket>,
    refill: Notify,
    shutdown: CancellationToken,
}

/// Token bucket whose refill rate follows probed SSH latency.
///
/// Spawns two tasks on creation (refill ticker and latency probe); both stop
/// when [`shutdown`](AdaptiveRateLimiter::shutdown) is called or the limiter
/// is dropped.
pub struct AdaptiveRateLimiter {
    shared: Arc<Shared>,
}

impl AdaptiveRateLimiter {
    pub fn new(probe: Arc<dyn LatencyProbe>) -> Self {
        let limit = INITIAL_RATE / BUCKETS_PER_SEC;
        let shared = Arc::new(Shared {
            bucket: Mutex::new(Bucket {
                bytes_left: limit,
                limit,
                current_rate: INITIAL_RATE,
            }),
            refill: Notify::new(),
            shutdown: CancellationToken::new(),
        });

        let refill_shared = Arc::clone(&shared);
        tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + REFILL_INTERVAL, REFILL_INTERVAL);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let mut bucket = refill_shared.bucket.lock().await;
                        bucket.bytes_left = bucket.limit;
                        drop(bucket);
                        refill_shared.refill.notify_waiters();
                    }
                    _ = refill_shared.shutdown.cancelled() => break,
                }
            }
        });

        let probe_shared = Arc::clone(&shared);
        tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + PROBE_INTERVAL, PROBE_INTERVAL);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match probe.measure().await {
                            Ok(latency) => adjust(&probe_shared, latency).await,
                            // Transient probe failures leave the rate alone
                            Err(e) => debug!("Latency probe failed: {}", e),
                        }
                    }
                    _ = probe_shared.shutdown.cancelled() => break,
                }
            }
        });

        Self { shared }
    }

    /// Feed one latency sample into the controller. The probe task calls this
    /// every probe interval; tests call it directly.
    pub async fn apply_sample(&self, latency: Duration) {
        adjust(&self.shared, latency).await;
    }

    /// Current target rate in bytes per second
    pub async fn current_rate(&self) -> usize {
        self.shared.bucket.lock().await.current_rate
    }

    /// Bytes handed out per refill tick
    pub async fn burst_limit(&self) -> usize {
        self.shared.bucket.lock().await.limit
    }

    /// Wrap a sink so writes through it obey the bucket
    pub fn writer<W: AsyncWrite + Unpin>(&self, inner: W) -> ThrottledWriter<W> {
        ThrottledWriter {
            inner,
            shared: Arc::clone(&self.shared),
        }
    }

    /// Stop both tickers and fail any writer blocked on a refill
    pub fn shutdown(&self) {
        self.shared.shutdown.cancel();
    }
}

impl Drop for AdaptiveRateLimiter {
    fn drop(&mut self) {
        self.shared.shutdown.cancel();
    }
}

async fn adjust(shared: &Shared, latency: Duration) {
    let mut bucket = shared.bucket.lock().await;
    if latency < LATENCY_LOW {
        bucket.current_rate = (bucket.current_rate + RATE_STEP).min(MAX_RATE);
    } else if latency > LATENCY_HIGH {
        bucket.current_rate = (bucket.current_rate * 2 / 3).max(MIN_RATE);
    }
    bucket.limit = (bucket.current_rate / BUCKETS_PER_SEC).max(MIN_BURST);
}

/// Byte sink bounded by the limiter's bucket.
///
/// Bytes are taken from the bucket before being forwarded to the inner
/// writer; a writer that finds the bucket empty parks until the next refill
/// tick or limiter shutdown, whichever comes first.
pub struct ThrottledWriter<W> {
    inner: W,
    shared: Arc<Shared>,
}

impl<W: AsyncWrite + Unpin> ThrottledWriter<W> {
    pub async fn write_all(&mut self, data: &[u8]) -> std::io::Result<()> {
        let mut written = 0;
        while written < data.len() {
            let take = loop {
                // Register for the wakeup before re-checking the bucket so a
                // refill between the check and the await is not missed.
                let notified = self.shared.refill.notified();
                {
                    let mut bucket = self.shared.bucket.lock().await;
                    if bucket.bytes_left > 0 {
                        let take = bucket.bytes_left.min(data.len() - written);
                        bucket.bytes_left -= take;
                        break take;
                    }
                }
                tokio::select! {
                    _ = notified => {}
                    _ = self.shared.shutdown.cancelled() => {
                        return Err(std::io::Error::new(
                            std::io::ErrorKind::BrokenPipe,
                            "rate limiter shut down",
                        ));
                    }
                }
            };

            self.inner.write_all(&data[written..written + take]).await?;
            written += take;
        }
        Ok(())
    }

    /// Hand back the inner writer (dropping it is how the pipe signals EOF)
    pub fn into_inner(self) -> W {
        self.inner
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StaticProbe(Duration);

    #[async_trait]
    impl LatencyProbe for StaticProbe {
        async fn measure(&self) -> Result<Duration> {
            Ok(self.0)
        }
    }

    struct FailingProbe;

    #[async_trait]
    impl LatencyProbe for FailingProbe {
        async fn measure(&self) -> Result<Duration> {
            Err(crate::Error::Connection("probe lost".into()))
        }
    }

    fn limiter_with_latency(latency: Duration) -> AdaptiveRateLimiter {
        AdaptiveRateLimiter::new(Arc::new(StaticProbe(latency)))
    }

    #[tokio::test]
    async fn test_initial_state() {
        let limiter = limiter_with_latency(Duration::from_millis(200));
        assert_eq!(limiter.current_rate().await, INITIAL_RATE);
        assert_eq!(limiter.burst_limit().await, INITIAL_RATE / 20);
    }

    #[tokio::test]
    async fn test_low_latency_grows_rate_additively() {
        let limiter = limiter_with_latency(Duration::from_millis(200));

        let mut previous = limiter.current_rate().await;
        for _ in 0..3 {
            limiter.apply_sample(Duration::from_millis(20)).await;
            let rate = limiter.current_rate().await;
            assert_eq!(rate, (previous + 256 * 1024).min(MAX_RATE));
            assert!(rate >= previous);
            previous = rate;
        }
        assert_eq!(limiter.burst_limit().await, previous / 20);
    }

    #[tokio::test]
    async fn test_rate_is_capped_at_max() {
        let limiter = limiter_with_latency(Duration::from_millis(200));
        for _ in 0..64 {
            limiter.apply_sample(Duration::from_millis(10)).await;
        }
        assert_eq!(limiter.current_rate().await, MAX_RATE);
    }

    #[tokio::test]
    async fn test_high_latency_backs_off_to_floor() {
        let limiter = limiter_with_latency(Duration::from_millis(200));

        let mut previous = limiter.current_rate().await;
        for _ in 0..16 {
            limiter.apply_sample(Duration::from_millis(500)).await;
            let rate = limiter.current_rate().await;
            assert!(rate <= previous);
            assert!(rate >= MIN_RATE);
            previous = rate;
        }
        assert_eq!(limiter.current_rate().await, MIN_RATE);
    }

    #[tokio::test]
    async fn test_in_band_latency_leaves_rate_unchanged() {
        let limiter = limiter_with_latency(Duration::from_millis(200));
        limiter.apply_sample(Duration::from_millis(150)).await;
        limiter.apply_sample(Duration::from_millis(299)).await;
        assert_eq!(limiter.current_rate().await, INITIAL_RATE);
    }

    #[tokio::test]
    async fn test_probe_failure_leaves_rate_unchanged() {
        let limiter = AdaptiveRateLimiter::new(Arc::new(FailingProbe));
        // Probe task never adjusts on error; simulate the passage of samples
        assert_eq!(limiter.current_rate().await, INITIAL_RATE);
    }

    #[tokio::test]
    async fn test_writer_paces_beyond_first_bucket() {
        let limiter = limiter_with_latency(Duration::from_millis(200));
        let mut writer = limiter.writer(tokio::io::sink());

        // 300 KiB = one full initial bucket (100 KiB) plus two more refills
        let payload = vec![0u8; 300 * 1024];
        let start = std::time::Instant::now();
        writer.write_all(&payload).await.unwrap();
        let elapsed = start.elapsed();

        assert!(
            elapsed >= Duration::from_millis(80),
            "finished too fast: {:?}",
            elapsed
        );
        assert!(elapsed < Duration::from_secs(2), "stalled: {:?}", elapsed);
    }

    #[tokio::test]
    async fn test_shutdown_unblocks_writer() {
        let limiter = limiter_with_latency(Duration::from_millis(200));
        let burst = limiter.burst_limit().await;

        let mut writer = limiter.writer(tokio::io::sink());
        limiter.shutdown();

        // No refill can arrive after shutdown, so a payload larger than any
        // bucket the writer could still find must park and then fail.
        let err = writer
            .write_all(&vec![0u8; burst * 2 + 1])
            .await
            .unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::BrokenPipe);
    }
}
