//! Batch progress snapshots.

use std::time::Duration;

use serde::Serialize;

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Aggregate state of a batch, updated by a single aggregator as items finish.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Progress {
    pub total: usize,
    /// Items that succeeded.
    pub completed: usize,
    pub failed: usize,
    /// Items never started because the batch was cancelled.
    pub cancelled: usize,
    pub bytes_transferred: u64,
    pub elapsed: Duration,
}

impl Progress {
    pub fn new(total: usize) -> Self {
        Self {
            total,
            ..Self::default()
        }
    }

    /// Items with a final outcome.
    pub fn processed(&self) -> usize {
        self.completed + self.failed + self.cancelled
    }

    pub fn is_finished(&self) -> bool {
        self.processed() >= self.total
    }

    pub fn percent_complete(&self) -> f64 {
        if self.total == 0 {
            return 100.0;
        }
        self.processed() as f64 / self.total as f64 * 100.0
    }

    /// MB/s over the elapsed time so far.
    pub fn throughput_mbps(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs <= 0.0 {
            return 0.0;
        }
        self.bytes_transferred as f64 / BYTES_PER_MB / secs
    }
}

impl std::fmt::Display for Progress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}/{} done, {} failed, {:.1} MB at {:.2} MB/s",
            self.completed,
            self.total,
            self.failed,
            self.bytes_transferred as f64 / BYTES_PER_MB,
            self.throughput_mbps()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn throughput_is_bytes_over_elapsed() {
        let p = Progress {
            total: 2,
            completed: 2,
            bytes_transferred: 10 * 1024 * 1024,
            elapsed: Duration::from_secs(2),
            ..Progress::default()
        };
        assert!((p.throughput_mbps() - 5.0).abs() < 1e-9);
        assert!(p.is_finished());
    }

    #[test]
    fn zero_elapsed_has_zero_throughput() {
        let p = Progress {
            bytes_transferred: 100,
            ..Progress::new(1)
        };
        assert_eq!(p.throughput_mbps(), 0.0);
    }

    #[test]
    fn percent_counts_every_outcome() {
        let p = Progress {
            completed: 1,
            failed: 1,
            cancelled: 2,
            ..Progress::new(8)
        };
        assert_eq!(p.percent_complete(), 50.0);
        assert!(!p.is_finished());
        assert_eq!(Progress::new(0).percent_complete(), 100.0);
    }
}
