//! Online statistics accumulators.
//!
//! `ValueStatistics` keeps mean/variance/min/max in O(1) per sample;
//! `CountStat` is a monotonic counter whose `get_change` yields the delta
//! since the previous call, which is how interval rates are computed
//! without wall-clock bucketing.

use std::sync::atomic::{AtomicU64, Ordering};

/// Running mean/variance/min/max over a stream of samples.
#[derive(Debug, Clone)]
pub struct ValueStatistics {
    count: u64,
    mean: f64,
    sum: f64,
    sum_of_squares: f64,
    min: f64,
    max: f64,
}

impl Default for ValueStatistics {
    fn default() -> Self {
        Self::new()
    }
}

impl ValueStatistics {
    pub fn new() -> Self {
        Self {
            count: 0,
            mean: 0.0,
            sum: 0.0,
            sum_of_squares: 0.0,
            min: f64::MAX,
            max: f64::MIN,
        }
    }

    pub fn clear(&mut self) {
        *self = Self::new();
    }

    /// Recompute the running aggregates with one new sample.
    pub fn update(&mut self, value: f64) {
        self.count += 1;
        if value < self.min {
            self.min = value;
        }
        if value > self.max {
            self.max = value;
        }
        // Running mean avoids accumulating sum/count drift on long runs.
        self.mean = (value - self.mean) / self.count as f64 + self.mean;
        self.sum += value;
        self.sum_of_squares += value * value;
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn average(&self) -> f64 {
        self.mean
    }

    pub fn variance(&self) -> f64 {
        if self.count < 2 {
            return 0.0;
        }
        let n = self.count as f64;
        (self.sum_of_squares - self.sum * self.sum / n) / (n - 1.0)
    }

    pub fn std_dev(&self) -> f64 {
        self.variance().sqrt()
    }

    pub fn min_value(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.min
        }
    }

    pub fn max_value(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.max
        }
    }

    /// Fold another accumulator's aggregates into this one (multi-thread
    /// fan-in of per-thread interval statistics).
    pub fn merge(&mut self, other: &ValueStatistics) {
        if other.count == 0 {
            return;
        }
        self.count += other.count;
        self.sum += other.sum;
        self.sum_of_squares += other.sum_of_squares;
        if other.min < self.min {
            self.min = other.min;
        }
        if other.max > self.max {
            self.max = other.max;
        }
        self.mean = self.sum / self.count as f64;
    }

    /// One-line interval summary in the harness's display format.
    pub fn format_line(&self, value_label: &str, count_label: &str) -> String {
        format!(
            "{value_label}: Avg: {:8.1} StdDev: {:8.1} Max: {:8.1} Min: {:8.1}, {count_label}: {}",
            self.average(),
            self.std_dev(),
            self.max_value(),
            self.min_value(),
            self.count
        )
    }
}

/// Monotonic counter with interval-delta reads.
///
/// Writers are the hot threads (`increment`/`add`); the collector thread
/// reads totals and deltas. Relaxed ordering is enough - the stats are
/// approximate by design.
#[derive(Debug, Default)]
pub struct CountStat {
    total: AtomicU64,
    prev: AtomicU64,
}

impl CountStat {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn init(&self) {
        self.total.store(0, Ordering::Relaxed);
        self.prev.store(0, Ordering::Relaxed);
    }

    pub fn increment(&self) {
        self.total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(&self, n: u64) {
        self.total.fetch_add(n, Ordering::Relaxed);
    }

    pub fn total(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    /// Delta since the previous `get_change` call; advances the snapshot.
    pub fn get_change(&self) -> u64 {
        let total = self.total.load(Ordering::Relaxed);
        let prev = self.prev.swap(total, Ordering::Relaxed);
        total - prev
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn value_statistics_simple_sequence() {
        let mut stats = ValueStatistics::new();
        for v in [1.0, 2.0, 3.0] {
            stats.update(v);
        }
        assert_eq!(stats.count(), 3);
        assert!((stats.average() - 2.0).abs() < 1e-9);
        assert_eq!(stats.min_value(), 1.0);
        assert_eq!(stats.max_value(), 3.0);
        // Sample variance of {1,2,3} is 1.
        assert!((stats.variance() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn single_sample_has_zero_variance() {
        let mut stats = ValueStatistics::new();
        stats.update(42.0);
        assert_eq!(stats.variance(), 0.0);
        assert_eq!(stats.std_dev(), 0.0);
    }

    #[test]
    fn empty_statistics_report_zero_extrema() {
        let stats = ValueStatistics::new();
        assert_eq!(stats.min_value(), 0.0);
        assert_eq!(stats.max_value(), 0.0);
        assert_eq!(stats.count(), 0);
    }

    #[test]
    fn clear_resets_accumulators() {
        let mut stats = ValueStatistics::new();
        stats.update(10.0);
        stats.clear();
        assert_eq!(stats.count(), 0);
        stats.update(5.0);
        assert_eq!(stats.average(), 5.0);
    }

    #[test]
    fn merge_combines_aggregates() {
        let mut a = ValueStatistics::new();
        let mut b = ValueStatistics::new();
        for v in [1.0, 2.0] {
            a.update(v);
        }
        for v in [3.0, 4.0] {
            b.update(v);
        }
        a.merge(&b);

        let mut combined = ValueStatistics::new();
        for v in [1.0, 2.0, 3.0, 4.0] {
            combined.update(v);
        }
        assert_eq!(a.count(), 4);
        assert!((a.average() - combined.average()).abs() < 1e-9);
        assert!((a.variance() - combined.variance()).abs() < 1e-9);
        assert_eq!(a.min_value(), 1.0);
        assert_eq!(a.max_value(), 4.0);
    }

    #[test]
    fn count_stat_change_is_idempotent_without_writes() {
        let stat = CountStat::new();
        stat.add(5);
        stat.increment();
        assert_eq!(stat.get_change(), 6);
        // No intervening writes: the second delta is zero.
        assert_eq!(stat.get_change(), 0);
        assert_eq!(stat.total(), 6);
        stat.increment();
        assert_eq!(stat.get_change(), 1);
    }
}
