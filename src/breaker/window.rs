use serde::Serialize;
use std::time::Duration;
use tokio::time::Instant;

/// Outcome counters for one slice of the rolling window
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Bucket {
    pub successes: u64,
    pub failures: u64,
}

impl Bucket {
    pub fn volume(&self) -> u64 {
        self.successes + self.failures
    }

    /// Failure share of the volume, 0.0 when empty
    pub fn error_percentage(&self) -> f64 {
        if self.volume() == 0 {
            return 0.0;
        }
        self.failures as f64 * 100.0 / self.volume() as f64
    }
}

/// Fixed ring of buckets advanced by the clock.
///
/// The bucket at `current` collects outcomes for `bucket_duration` starting at
/// `current_start`; moving forward zeroes every bucket that is skipped over.
#[derive(Debug)]
pub struct RollingWindow {
    buckets: Vec<Bucket>,
    bucket_duration: Duration,
    current: usize,
    current_start: Instant,
}

impl RollingWindow {
    pub fn new(bucket_count: usize, bucket_duration: Duration, now: Instant) -> Self {
        Self {
            buckets: vec![Bucket::default(); bucket_count.max(1)],
            bucket_duration,
            current: 0,
            current_start: now,
        }
    }

    pub fn record_success(&mut self, now: Instant) {
        self.advance(now);
        self.buckets[self.current].successes += 1;
    }

    pub fn record_failure(&mut self, now: Instant) {
        self.advance(now);
        self.buckets[self.current].failures += 1;
    }

    /// Sum of every bucket still inside the window
    pub fn totals(&mut self, now: Instant) -> Bucket {
        self.advance(now);
        self.buckets.iter().fold(Bucket::default(), |acc, b| Bucket {
            successes: acc.successes + b.successes,
            failures: acc.failures + b.failures,
        })
    }

    pub fn clear(&mut self, now: Instant) {
        self.buckets.fill(Bucket::default());
        self.current = 0;
        self.current_start = now;
    }

    fn advance(&mut self, now: Instant) {
        if self.bucket_duration.is_zero() {
            return;
        }
        let elapsed = now.saturating_duration_since(self.current_start);
        let bucket_nanos = self.bucket_duration.as_nanos();
        let steps = elapsed.as_nanos() / bucket_nanos;
        if steps == 0 {
            return;
        }

        let len = self.buckets.len();
        let to_clear = steps.min(len as u128) as usize;
        for _ in 0..to_clear {
            self.current = (self.current + 1) % len;
            self.buckets[self.current] = Bucket::default();
        }
        self.current_start += Duration::from_nanos((steps * bucket_nanos) as u64);
    }
}
