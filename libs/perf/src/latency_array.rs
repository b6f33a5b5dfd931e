//! Precomputed latency sampling schedule.
//!
//! Stamping the same position of every burst would bias the latency sample
//! toward one phase of the tick. Instead, a randomized schedule is built
//! once at startup: for each one-second block, exactly `latency_msgs_per_sec`
//! tick slots carry a message index to stamp, everything else holds `-1`.
//! Several independent blocks are precomputed so the pattern has no visible
//! period, and `next()` walks the whole array cyclically.

use crate::PerfError;
use rand::Rng;

/// Inputs to [`LatencyRandomArray::create`].
#[derive(Debug, Clone, Copy, Default)]
pub struct LatencyRandomArrayOptions {
    pub total_msgs_per_sec: u32,
    pub latency_msgs_per_sec: u32,
    pub ticks_per_sec: u32,
    /// Independent one-second schedules to precompute.
    pub array_count: u32,
}

/// Cyclic schedule of which message in each tick's burst carries a
/// latency timestamp (`-1` = none this tick).
#[derive(Debug, Clone)]
pub struct LatencyRandomArray {
    array: Vec<i32>,
    index: usize,
}

impl LatencyRandomArray {
    /// Build the schedule. Every option must be positive and the latency
    /// rate must fit the total rate and tick count; anything else is a
    /// configuration error, never clamped.
    pub fn create(options: &LatencyRandomArrayOptions) -> Result<Self, PerfError> {
        if options.total_msgs_per_sec == 0 {
            return Err(PerfError::InvalidLatencyArrayOptions {
                name: "total_msgs_per_sec",
                value: 0,
                reason: "must be positive",
            });
        }
        if options.latency_msgs_per_sec == 0 {
            return Err(PerfError::InvalidLatencyArrayOptions {
                name: "latency_msgs_per_sec",
                value: 0,
                reason: "must be positive",
            });
        }
        if options.ticks_per_sec == 0 {
            return Err(PerfError::InvalidLatencyArrayOptions {
                name: "ticks_per_sec",
                value: 0,
                reason: "must be positive",
            });
        }
        if options.array_count == 0 {
            return Err(PerfError::InvalidLatencyArrayOptions {
                name: "array_count",
                value: 0,
                reason: "must be positive",
            });
        }
        if options.latency_msgs_per_sec > options.total_msgs_per_sec {
            return Err(PerfError::InvalidLatencyArrayOptions {
                name: "latency_msgs_per_sec",
                value: options.latency_msgs_per_sec as i64,
                reason: "exceeds total_msgs_per_sec",
            });
        }
        if options.latency_msgs_per_sec > options.ticks_per_sec {
            return Err(PerfError::InvalidLatencyArrayOptions {
                name: "latency_msgs_per_sec",
                value: options.latency_msgs_per_sec as i64,
                reason: "exceeds ticks_per_sec, at most one sample fits per tick",
            });
        }

        let ticks = options.ticks_per_sec as usize;
        let latency_per_sec = options.latency_msgs_per_sec as usize;
        let msgs_per_tick = (options.total_msgs_per_sec / options.ticks_per_sec) as i32;
        let msgs_per_tick_remainder = (options.total_msgs_per_sec % options.ticks_per_sec) as usize;

        let mut rng = rand::thread_rng();
        let mut array = vec![-1i32; ticks * options.array_count as usize];

        for block in array.chunks_mut(ticks) {
            // Sentinel-fill the first latency_per_sec slots, then scatter
            // them with pairwise swaps. Not a textbook unbiased shuffle,
            // which is fine for spreading samples across a second.
            for cell in block.iter_mut().take(latency_per_sec) {
                *cell = 1;
            }
            for _ in 0..ticks {
                let a = rng.gen_range(0..ticks);
                let b = rng.gen_range(0..ticks);
                block.swap(a, b);
            }
            // Replace each sentinel with a message index valid for its
            // tick's burst, the first ticks getting the rate remainder.
            for (tick, cell) in block.iter_mut().enumerate() {
                if *cell == 1 {
                    let burst = msgs_per_tick + if tick < msgs_per_tick_remainder { 1 } else { 0 };
                    *cell = rng.gen_range(0..burst);
                }
            }
        }

        Ok(Self { array, index: 0 })
    }

    /// Next scheduled slot, wrapping at the end of the array.
    pub fn next(&mut self) -> i32 {
        let value = self.array[self.index];
        self.index = (self.index + 1) % self.array.len();
        value
    }

    pub fn len(&self) -> usize {
        self.array.len()
    }

    pub fn is_empty(&self) -> bool {
        self.array.is_empty()
    }

    #[cfg(test)]
    fn as_slice(&self) -> &[i32] {
        &self.array
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(total: u32, latency: u32, ticks: u32, count: u32) -> LatencyRandomArrayOptions {
        LatencyRandomArrayOptions {
            total_msgs_per_sec: total,
            latency_msgs_per_sec: latency,
            ticks_per_sec: ticks,
            array_count: count,
        }
    }

    #[test]
    fn block_invariants_hold() {
        let array = LatencyRandomArray::create(&options(100, 10, 10, 5)).unwrap();
        assert_eq!(array.len(), 50);
        for block in array.as_slice().chunks(10) {
            let samples = block.iter().filter(|&&v| v != -1).count();
            assert_eq!(samples, 10);
            for &value in block {
                assert!((0..10).contains(&value), "index {value} out of burst range");
            }
        }
    }

    #[test]
    fn sparse_schedule_keeps_sample_count_per_block() {
        let array = LatencyRandomArray::create(&options(1000, 3, 10, 4)).unwrap();
        assert_eq!(array.len(), 40);
        for block in array.as_slice().chunks(10) {
            assert_eq!(block.iter().filter(|&&v| v != -1).count(), 3);
            for &value in block.iter().filter(|&&v| v != -1) {
                assert!((0..100).contains(&value));
            }
        }
    }

    #[test]
    fn remainder_ticks_allow_one_extra_index() {
        // 105 msgs over 10 ticks: first 5 ticks burst 11, the rest 10.
        let array = LatencyRandomArray::create(&options(105, 10, 10, 20)).unwrap();
        for block in array.as_slice().chunks(10) {
            for (tick, &value) in block.iter().enumerate() {
                let burst = if tick < 5 { 11 } else { 10 };
                assert!((0..burst).contains(&value));
            }
        }
    }

    #[test]
    fn next_wraps_cyclically() {
        let mut array = LatencyRandomArray::create(&options(10, 1, 2, 1)).unwrap();
        let first: Vec<i32> = (0..array.len()).map(|_| array.next()).collect();
        let second: Vec<i32> = (0..array.len()).map(|_| array.next()).collect();
        assert_eq!(first, second);
    }

    #[test]
    fn zero_options_are_hard_errors() {
        assert!(LatencyRandomArray::create(&options(0, 1, 1, 1)).is_err());
        assert!(LatencyRandomArray::create(&options(1, 0, 1, 1)).is_err());
        assert!(LatencyRandomArray::create(&options(1, 1, 0, 1)).is_err());
        assert!(LatencyRandomArray::create(&options(1, 1, 1, 0)).is_err());
    }

    #[test]
    fn latency_rate_above_total_is_rejected() {
        let err = LatencyRandomArray::create(&options(10, 20, 100, 1)).unwrap_err();
        assert!(matches!(err, PerfError::InvalidLatencyArrayOptions { .. }));
    }
}
