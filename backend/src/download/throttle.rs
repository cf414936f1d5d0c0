//! Leaky-bucket bandwidth limiter for a single transfer

use std::time::Duration;
use tokio::time::Instant;

/// Length of the rolling measurement window
const WINDOW: Duration = Duration::from_secs(1);

/// Sleeps the caller whenever the bytes seen in the current window would
/// exceed the configured rate, then starts a new window every second.
///
/// Some drift within a window is expected; this is not a token bucket.
#[derive(Debug)]
pub struct Throttle {
    limit: u64,
    window_start: Instant,
    window_bytes: u64,
}

impl Throttle {
    /// `limit` is in bytes per second and must be non-zero
    pub fn new(limit: u64) -> Self {
        Self {
            limit: limit.max(1),
            window_start: Instant::now(),
            window_bytes: 0,
        }
    }

    /// Account for `bytes` just written, sleeping off any overage
    pub async fn consume(&mut self, bytes: usize) {
        self.window_bytes += bytes as u64;
        let elapsed = self.window_start.elapsed();

        let allowed = Duration::from_secs_f64(self.window_bytes as f64 / self.limit as f64);
        if allowed > elapsed {
            tokio::time::sleep(allowed - elapsed).await;
        }

        if elapsed >= WINDOW {
            self.window_start = Instant::now();
            self.window_bytes = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn holds_throughput_near_the_limit() {
        let mut throttle = Throttle::new(1000);
        let start = Instant::now();

        for _ in 0..4 {
            throttle.consume(500).await;
        }

        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(1900), "{elapsed:?}");
        assert!(elapsed <= Duration::from_millis(2600), "{elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn does_not_sleep_under_the_limit() {
        let mut throttle = Throttle::new(1_000_000);
        let start = Instant::now();
        tokio::time::advance(Duration::from_millis(100)).await;

        throttle.consume(1000).await;

        assert_eq!(start.elapsed(), Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn zero_limit_is_one_byte_per_second() {
        let mut throttle = Throttle::new(0);
        let start = Instant::now();

        throttle.consume(2).await;

        assert_eq!(start.elapsed(), Duration::from_secs(2));
    }
}
