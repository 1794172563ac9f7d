//! Rolling traffic statistics shared by both transports.

use std::collections::VecDeque;
use std::iter::Sum;
use std::ops::Add;

use crate::atomic::Atomic;
use crate::DEFAULT_STATISTICS_WINDOW;

/// A bounded window of the most recent per-interval samples.
#[derive(Debug, Clone, PartialEq)]
pub struct StatisticsWindow<T> {
    values: VecDeque<T>,
    capacity: usize,
}

impl<T> StatisticsWindow<T>
where
    T: Copy + Add<Output = T> + Sum<T>,
{
    /// Create an empty window retaining at most `capacity` samples.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            values: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a sample, evicting the oldest ones beyond capacity.
    pub fn add(&mut self, value: T) {
        self.values.push_back(value);
        while self.values.len() > self.capacity {
            self.values.pop_front();
        }
    }

    /// Sum of the retained samples.
    pub fn total(&self) -> T {
        self.values.iter().copied().sum()
    }

    /// Retained samples, oldest first.
    pub fn values(&self) -> impl Iterator<Item = &T> {
        self.values.iter()
    }

    /// Most recent sample.
    pub fn last(&self) -> Option<T> {
        self.values.back().copied()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.values.clear();
    }
}

/// Byte counts accumulated during one sampling interval.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IntervalSample {
    pub received: i64,
    pub queued: i64,
    pub sent: i64,
    pub discarded: i64,
}

/// Live counters updated by the reader and writer workers.
///
/// The per-interval counters are drained by [`TrafficCounters::drain_interval`];
/// the queue gauge and the totals are never reset mid-session.
#[derive(Debug, Default)]
pub struct TrafficCounters {
    received: Atomic<i64>,
    queued: Atomic<i64>,
    sent: Atomic<i64>,
    discarded: Atomic<i64>,
    queue_bytes_out: Atomic<i64>,
    total_bytes_in: Atomic<i64>,
    total_bytes_out: Atomic<i64>,
}

impl TrafficCounters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes read from the peer.
    pub fn record_received(&self, bytes: usize) {
        let bytes = bytes as i64;
        self.received.mutate(|v| *v += bytes);
        self.total_bytes_in.mutate(|v| *v += bytes);
    }

    /// Bytes handed to the output queue.
    pub fn record_queued(&self, bytes: usize) {
        let bytes = bytes as i64;
        self.queued.mutate(|v| *v += bytes);
        self.queue_bytes_out.mutate(|v| *v += bytes);
    }

    /// Bytes written to the peer.
    pub fn record_sent(&self, bytes: usize) {
        let bytes = bytes as i64;
        self.sent.mutate(|v| *v += bytes);
        self.total_bytes_out.mutate(|v| *v += bytes);
        self.queue_bytes_out.mutate(|v| *v -= bytes);
    }

    /// Bytes dropped because they waited past the write timeout.
    pub fn record_discarded(&self, bytes: usize) {
        let bytes = bytes as i64;
        self.discarded.mutate(|v| *v += bytes);
        self.queue_bytes_out.mutate(|v| *v -= bytes);
    }

    /// Bytes whose write failed with an I/O error.
    pub fn record_failed(&self, bytes: usize) {
        let bytes = bytes as i64;
        self.queue_bytes_out.mutate(|v| *v -= bytes);
    }

    /// Read and reset the per-interval counters.
    pub fn drain_interval(&self) -> IntervalSample {
        IntervalSample {
            received: self.received.take(),
            queued: self.queued.take(),
            sent: self.sent.take(),
            discarded: self.discarded.take(),
        }
    }

    /// Bytes currently waiting in the output queue.
    pub fn queue_bytes_out(&self) -> i64 {
        self.queue_bytes_out.value()
    }

    pub fn total_bytes_in(&self) -> i64 {
        self.total_bytes_in.value()
    }

    pub fn total_bytes_out(&self) -> i64 {
        self.total_bytes_out.value()
    }

    /// Forget bytes left in a queue that was torn down.
    pub fn clear_queue(&self) {
        self.queue_bytes_out.swap(0);
    }

    /// Zero every counter, including the gauge and totals.
    pub fn reset(&self) {
        self.drain_interval();
        self.queue_bytes_out.swap(0);
        self.total_bytes_in.swap(0);
        self.total_bytes_out.swap(0);
    }
}

/// Moving-window traffic statistics of one socket.
#[derive(Debug, Clone, PartialEq)]
pub struct SocketStatistics {
    pub received: StatisticsWindow<i64>,
    pub queued: StatisticsWindow<i64>,
    pub sent: StatisticsWindow<i64>,
    pub discarded: StatisticsWindow<i64>,
}

impl SocketStatistics {
    pub fn new(window: usize) -> Self {
        Self {
            received: StatisticsWindow::new(window),
            queued: StatisticsWindow::new(window),
            sent: StatisticsWindow::new(window),
            discarded: StatisticsWindow::new(window),
        }
    }

    /// Push one interval sample into every window.
    pub fn record(&mut self, sample: IntervalSample) {
        self.received.add(sample.received);
        self.queued.add(sample.queued);
        self.sent.add(sample.sent);
        self.discarded.add(sample.discarded);
    }

    /// Share of outbound bytes dropped over the window, in `0.0..=1.0`.
    pub fn discard_ratio(&self) -> f64 {
        let sent = self.sent.total() as f64;
        let discarded = self.discarded.total() as f64;
        if sent + discarded <= 0.0 {
            return 0.0;
        }
        discarded / (discarded + sent)
    }

    /// Bytes queued over the window that were neither sent nor discarded.
    pub fn bytes_in_queue(&self) -> i64 {
        (self.queued.total() - self.sent.total() - self.discarded.total()).max(0)
    }

    /// Number of samples currently retained.
    pub fn samples(&self) -> usize {
        self.sent.len()
    }

    pub fn clear(&mut self) {
        self.received.clear();
        self.queued.clear();
        self.sent.clear();
        self.discarded.clear();
    }
}

impl Default for SocketStatistics {
    fn default() -> Self {
        Self::new(DEFAULT_STATISTICS_WINDOW)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_retains_most_recent() {
        let mut window = StatisticsWindow::new(5);
        for value in 1..=8i64 {
            window.add(value);
        }

        assert_eq!(window.len(), 5);
        assert_eq!(window.values().copied().collect::<Vec<_>>(), vec![4, 5, 6, 7, 8]);
        assert_eq!(window.total(), 30);
    }

    #[test]
    fn test_window_under_capacity() {
        let mut window = StatisticsWindow::new(5);
        window.add(3i64);
        window.add(4);

        assert_eq!(window.len(), 2);
        assert_eq!(window.total(), 7);
        assert_eq!(window.last(), Some(4));
    }

    #[test]
    fn test_window_bound_for_many_sizes() {
        for capacity in 1..8usize {
            for inserted in 0..20i64 {
                let mut window = StatisticsWindow::new(capacity);
                for value in 0..inserted {
                    window.add(value);
                }
                let kept = (inserted as usize).min(capacity);
                let expected: i64 = (inserted - kept as i64..inserted).sum();

                assert_eq!(window.len(), kept);
                assert_eq!(window.total(), expected);
            }
        }
    }

    #[test]
    fn test_drain_interval_resets_counters() {
        let counters = TrafficCounters::new();
        counters.record_received(100);
        counters.record_queued(300);
        counters.record_sent(200);
        counters.record_discarded(100);

        let sample = counters.drain_interval();
        assert_eq!(
            sample,
            IntervalSample {
                received: 100,
                queued: 300,
                sent: 200,
                discarded: 100,
            }
        );
        assert_eq!(counters.drain_interval(), IntervalSample::default());
        assert_eq!(counters.queue_bytes_out(), 0);
        assert_eq!(counters.total_bytes_out(), 200);
        assert_eq!(counters.total_bytes_in(), 100);
    }

    #[test]
    fn test_discard_ratio() {
        let mut stats = SocketStatistics::new(5);
        assert_eq!(stats.discard_ratio(), 0.0);

        stats.record(IntervalSample {
            received: 0,
            queued: 4000,
            sent: 3000,
            discarded: 1000,
        });

        assert!((stats.discard_ratio() - 0.25).abs() < f64::EPSILON);
        assert_eq!(stats.bytes_in_queue(), 0);
    }
}
