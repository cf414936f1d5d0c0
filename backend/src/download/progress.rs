//! Progress aggregation and speed sampling

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

/// Minimum spacing between speed samples
pub const SAMPLE_INTERVAL: Duration = Duration::from_secs(1);

/// Last reported byte count per segment.
///
/// The total is a sum over segments, so it does not depend on the order in
/// which different segments report.
#[derive(Debug, Default, Clone)]
pub struct SegmentTotals {
    reported: BTreeMap<usize, u64>,
}

impl SegmentTotals {
    /// Record the cumulative bytes of `segment` and return the new total
    pub fn report(&mut self, segment: usize, bytes: u64) -> u64 {
        self.reported.insert(segment, bytes);
        self.total()
    }

    pub fn total(&self) -> u64 {
        self.reported.values().sum()
    }
}

/// Transfer speed measured between samples at least a second apart
#[derive(Debug, Clone)]
pub struct SpeedSampler {
    last_at: Instant,
    last_bytes: u64,
    speed: f64,
}

impl SpeedSampler {
    pub fn new(now: Instant, bytes: u64) -> Self {
        Self {
            last_at: now,
            last_bytes: bytes,
            speed: 0.0,
        }
    }

    /// Take a sample if the interval has passed; returns the new speed
    pub fn sample(&mut self, now: Instant, bytes: u64) -> Option<f64> {
        let elapsed = now.saturating_duration_since(self.last_at);
        if elapsed < SAMPLE_INTERVAL {
            return None;
        }

        self.speed = bytes.saturating_sub(self.last_bytes) as f64 / elapsed.as_secs_f64();
        self.last_at = now;
        self.last_bytes = bytes;
        Some(self.speed)
    }

    /// Bytes per second as of the last sample
    pub fn speed(&self) -> f64 {
        self.speed
    }

    /// Time left, known only with a non-zero speed and a known size
    pub fn eta(&self, total: u64, downloaded: u64) -> Option<Duration> {
        if self.speed > 0.0 && total > 0 {
            let remaining = total.saturating_sub(downloaded) as f64;
            Some(Duration::from_secs_f64(remaining / self.speed))
        } else {
            None
        }
    }
}
