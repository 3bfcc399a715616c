//! Rolling timing statistics.
//!
//! Used by the sync coordinator for self-monitoring: average and maximum
//! batch cost over the most recent samples.

use std::collections::VecDeque;

/// Default number of samples kept for rolling averages.
pub const DEFAULT_WINDOW: usize = 100;

/// Rolling statistics over a bounded window of millisecond samples.
#[derive(Debug, Clone)]
pub struct RollingStats {
    samples: VecDeque<f64>,
    window: usize,
    sum: f64,
    max: f64,
    total: u64,
}

impl Default for RollingStats {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW)
    }
}

impl RollingStats {
    /// Creates an empty tracker keeping at most `window` samples.
    pub fn new(window: usize) -> Self {
        let window = window.max(1);
        Self {
            samples: VecDeque::with_capacity(window),
            window,
            sum: 0.0,
            max: 0.0,
            total: 0,
        }
    }

    /// Records a new sample.
    pub fn record(&mut self, ms: f64) {
        let ms = ms.max(0.0);
        if self.samples.len() >= self.window {
            if let Some(old) = self.samples.pop_front() {
                self.sum -= old;
            }
        }
        self.samples.push_back(ms);
        self.sum += ms;
        self.total += 1;
        if ms > self.max {
            self.max = ms;
        }
    }

    /// Returns the number of samples currently in the window.
    pub fn count(&self) -> usize {
        self.samples.len()
    }

    /// Number of samples ever recorded.
    pub fn total(&self) -> u64 {
        self.total
    }

    /// Average of the samples in the window.
    pub fn average_ms(&self) -> f64 {
        if self.samples.is_empty() {
            0.0
        } else {
            (self.sum / self.samples.len() as f64).max(0.0)
        }
    }

    /// Maximum ever observed.
    pub fn max_ms(&self) -> f64 {
        self.max
    }

    /// Most recent sample.
    pub fn last_ms(&self) -> f64 {
        self.samples.back().copied().unwrap_or(0.0)
    }

    /// Clears all samples.
    pub fn clear(&mut self) {
        self.samples.clear();
        self.sum = 0.0;
        self.max = 0.0;
        self.total = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rolling_stats() {
        let mut stats = RollingStats::default();
        stats.record(10.0);
        stats.record(20.0);
        stats.record(30.0);

        assert_eq!(stats.count(), 3);
        assert_eq!(stats.average_ms(), 20.0);
        assert_eq!(stats.max_ms(), 30.0);
        assert_eq!(stats.last_ms(), 30.0);
    }

    #[test]
    fn test_rolling_stats_window() {
        let mut stats = RollingStats::new(DEFAULT_WINDOW);
        for i in 0..150 {
            stats.record(i as f64);
        }
        assert_eq!(stats.count(), DEFAULT_WINDOW);
        assert_eq!(stats.total(), 150);
        // Window holds 50..150.
        assert!((stats.average_ms() - 99.5).abs() < 1e-9);
        assert_eq!(stats.max_ms(), 149.0);
    }
}
