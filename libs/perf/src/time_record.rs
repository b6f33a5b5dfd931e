//! Pooled latency-record queues.
//!
//! A `TimeRecord` ships a start/end timestamp pair from the hot
//! encode/decode path to the stats thread. Records circulate between two
//! lock-free queues - a free pool and the filled-record queue - so the hot
//! path never allocates once the pool is primed and the total record count
//! stays bounded by the pool size.
//!
//! Ordering across records is not preserved and does not matter: latency
//! statistics are order-independent aggregates.

use lockfree::queue::Queue;

/// One latency sample: timestamps plus the tick rate they are measured in
/// (ticks per microsecond).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimeRecord {
    pub start_time: u64,
    pub end_time: u64,
    pub ticks: u64,
}

impl TimeRecord {
    /// Latency in microseconds.
    pub fn latency_usec(&self) -> f64 {
        (self.end_time.saturating_sub(self.start_time)) as f64 / self.ticks as f64
    }
}

/// Producer/consumer pair of queues recycling `TimeRecord`s.
pub struct TimeRecordQueue {
    pool: Queue<TimeRecord>,
    records: Queue<TimeRecord>,
}

impl TimeRecordQueue {
    /// Prime the free pool with `capacity` records.
    pub fn with_capacity(capacity: usize) -> Self {
        let pool = Queue::new();
        for _ in 0..capacity {
            pool.push(TimeRecord::default());
        }
        Self {
            pool,
            records: Queue::new(),
        }
    }

    /// Producer side: move a record from the pool to the filled queue.
    /// Returns `false` (sample dropped) when the pool is exhausted, which
    /// bounds memory instead of growing under a slow consumer.
    pub fn submit(&self, start_time: u64, end_time: u64, ticks: u64) -> bool {
        match self.pool.pop() {
            Some(mut record) => {
                record.start_time = start_time;
                record.end_time = end_time;
                record.ticks = ticks;
                self.records.push(record);
                true
            }
            None => false,
        }
    }

    /// Consumer side: drain every filled record through `f`, returning each
    /// to the pool afterwards.
    pub fn drain<F: FnMut(&TimeRecord)>(&self, mut f: F) -> usize {
        let mut drained = 0;
        while let Some(record) = self.records.pop() {
            f(&record);
            drained += 1;
            self.pool.push(record);
        }
        drained
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn submit_then_drain_round_trips_samples() {
        let queue = TimeRecordQueue::with_capacity(4);
        assert!(queue.submit(100, 350, 1));
        assert!(queue.submit(200, 900, 1));

        let mut latencies = Vec::new();
        let drained = queue.drain(|record| latencies.push(record.latency_usec()));
        assert_eq!(drained, 2);
        latencies.sort_by(|a, b| a.partial_cmp(b).unwrap());
        assert_eq!(latencies, vec![250.0, 700.0]);
    }

    #[test]
    fn pool_bounds_outstanding_records() {
        let queue = TimeRecordQueue::with_capacity(2);
        assert!(queue.submit(1, 2, 1));
        assert!(queue.submit(3, 4, 1));
        // Pool empty: the sample is dropped, not allocated.
        assert!(!queue.submit(5, 6, 1));
        queue.drain(|_| {});
        // Records returned to the pool are reusable.
        assert!(queue.submit(7, 8, 1));
    }

    #[test]
    fn ticks_scale_latency_units() {
        let record = TimeRecord {
            start_time: 0,
            end_time: 5000,
            ticks: 1000,
        };
        assert_eq!(record.latency_usec(), 5.0);
    }

    #[test]
    fn concurrent_producer_and_consumer() {
        let queue = Arc::new(TimeRecordQueue::with_capacity(1024));
        let producer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || {
                for i in 0..1000u64 {
                    while !queue.submit(i, i + 10, 1) {
                        thread::yield_now();
                    }
                }
            })
        };

        let mut seen = 0usize;
        while seen < 1000 {
            seen += queue.drain(|record| {
                assert_eq!(record.end_time - record.start_time, 10);
            });
        }
        producer.join().unwrap();
    }
}
