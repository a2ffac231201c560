//! Bytes-per-second estimate over a trailing 5-second window.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

const WINDOW: Duration = Duration::from_secs(5);

#[derive(Debug)]
pub struct SpeedEstimator {
    samples: VecDeque<(Instant, u64)>,
}

impl Default for SpeedEstimator {
    fn default() -> Self {
        SpeedEstimator { samples: VecDeque::new() }
    }
}

impl SpeedEstimator {
    pub fn record(&mut self, bytes: u64) {
        let now = Instant::now();
        self.samples.push_back((now, bytes));
        self.evict_stale(now);
    }

    fn evict_stale(&mut self, now: Instant) {
        while let Some((at, _)) = self.samples.front() {
            if now.duration_since(*at) > WINDOW {
                self.samples.pop_front();
            } else {
                break;
            }
        }
    }

    /// Bytes/sec averaged over whatever of the last 5s has elapsed.
    pub fn bps(&mut self) -> u64 {
        let now = Instant::now();
        self.evict_stale(now);
        if self.samples.is_empty() {
            return 0;
        }
        let total: u64 = self.samples.iter().map(|(_, bytes)| bytes).sum();
        let span = now.duration_since(self.samples.front().unwrap().0).as_secs_f64().max(0.001);
        (total as f64 / span) as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_when_empty() {
        let mut estimator = SpeedEstimator::default();
        assert_eq!(estimator.bps(), 0);
    }

    #[test]
    fn accumulates_recent_samples() {
        let mut estimator = SpeedEstimator::default();
        estimator.record(1024);
        estimator.record(2048);
        assert!(estimator.bps() > 0);
    }
}
