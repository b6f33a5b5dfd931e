//! Process CPU/memory sampling for the stats columns.
//!
//! Reads /proc on Linux; reports zeros on platforms without it. CPU usage
//! is the jiffy delta between samples against wall time.

use std::time::Instant;

pub struct ResourceUsageStats {
    prev_cpu_jiffies: u64,
    prev_sample: Instant,
}

impl Default for ResourceUsageStats {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceUsageStats {
    pub fn new() -> Self {
        Self {
            prev_cpu_jiffies: Self::cpu_jiffies().unwrap_or(0),
            prev_sample: Instant::now(),
        }
    }

    fn cpu_jiffies() -> Option<u64> {
        let stat = std::fs::read_to_string("/proc/self/stat").ok()?;
        // utime/stime are the 2nd and 3rd fields after the parenthesized
        // command name.
        let rest = stat.rsplit(')').next()?;
        let fields: Vec<&str> = rest.split_whitespace().collect();
        let utime: u64 = fields.get(11)?.parse().ok()?;
        let stime: u64 = fields.get(12)?.parse().ok()?;
        Some(utime + stime)
    }

    pub fn memory_mb() -> f64 {
        let Ok(statm) = std::fs::read_to_string("/proc/self/statm") else {
            return 0.0;
        };
        let rss_pages: u64 = statm
            .split_whitespace()
            .nth(1)
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);
        (rss_pages * 4096) as f64 / (1024.0 * 1024.0)
    }

    /// CPU percent since the previous sample, plus resident MB.
    pub fn sample(&mut self) -> (f64, f64) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.prev_sample).as_secs_f64();
        self.prev_sample = now;

        let jiffies = Self::cpu_jiffies().unwrap_or(self.prev_cpu_jiffies);
        let delta = jiffies.saturating_sub(self.prev_cpu_jiffies);
        self.prev_cpu_jiffies = jiffies;

        // Assumes the common 100Hz jiffy clock.
        let cpu = if elapsed > 0.0 {
            (delta as f64 / 100.0) / elapsed * 100.0
        } else {
            0.0
        };
        (cpu, Self::memory_mb())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sampling_never_panics_and_is_non_negative() {
        let mut stats = ResourceUsageStats::new();
        let (cpu, mem) = stats.sample();
        assert!(cpu >= 0.0);
        assert!(mem >= 0.0);
    }
}
