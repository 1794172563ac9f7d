//! Metrics collection and reporting.

use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tracing::{debug, warn};

use livecast_ipc::{TransportMetrics, WarningType};
use livecast_transport::SocketStatistics;

/// Turns transport statistics into metrics and bandwidth warnings.
pub struct MetricsCollector {
    start_time: RwLock<Option<Instant>>,
    last_report_time: RwLock<Instant>,
    statistics_interval: Duration,
    insufficient_bandwidth_percent: f64,
    insufficient: RwLock<bool>,
}

impl MetricsCollector {
    pub fn new(statistics_interval: Duration, insufficient_bandwidth_percent: f64) -> Self {
        Self {
            start_time: RwLock::new(None),
            last_report_time: RwLock::new(Instant::now()),
            statistics_interval,
            insufficient_bandwidth_percent,
            insufficient: RwLock::new(false),
        }
    }

    /// Start metrics collection.
    pub fn start(&self) {
        *self.start_time.write() = Some(Instant::now());
        *self.last_report_time.write() = Instant::now();
        *self.insufficient.write() = false;
    }

    /// Stop metrics collection.
    pub fn stop(&self) {
        *self.start_time.write() = None;
    }

    pub fn is_started(&self) -> bool {
        self.start_time.read().is_some()
    }

    /// Whether `interval` has passed since the last report.
    pub fn is_due(&self, interval: Duration) -> bool {
        self.is_started() && self.last_report_time.read().elapsed() >= interval
    }

    /// Current metrics for the given statistics.
    pub fn snapshot(&self, statistics: &SocketStatistics, queue_bytes_out: i64) -> TransportMetrics {
        let span = self.statistics_interval.as_secs_f64() * statistics.samples() as f64;
        let rate = |total: i64| -> u64 {
            if span > 0.0 {
                (total.max(0) as f64 / span) as u64
            } else {
                0
            }
        };

        let discard_percent = statistics.discard_ratio() * 100.0;
        let uptime_seconds = self
            .start_time
            .read()
            .map(|s| s.elapsed().as_secs())
            .unwrap_or(0);

        TransportMetrics {
            sent_bytes_per_sec: rate(statistics.sent.total()),
            received_bytes_per_sec: rate(statistics.received.total()),
            discarded_bytes_per_sec: rate(statistics.discarded.total()),
            discard_percent,
            bytes_in_queue: statistics.bytes_in_queue(),
            queue_bytes_out,
            insufficient_bandwidth: statistics.discarded.total() > 0
                && discard_percent > self.insufficient_bandwidth_percent,
            uptime_seconds,
        }
    }

    /// Warnings raised by `metrics`.
    ///
    /// Insufficient bandwidth is reported once when it starts; it is
    /// reported again only after the link has recovered in between.
    pub fn check_warnings(&self, metrics: &TransportMetrics) -> Vec<WarningType> {
        let mut warnings = Vec::new();

        let was_insufficient = {
            let mut insufficient = self.insufficient.write();
            std::mem::replace(&mut *insufficient, metrics.insufficient_bandwidth)
        };
        if metrics.insufficient_bandwidth && !was_insufficient {
            warn!(
                discard_percent = metrics.discard_percent,
                bytes_in_queue = metrics.bytes_in_queue,
                "Insufficient bandwidth"
            );
            warnings.push(WarningType::InsufficientBandwidth {
                discard_percent: metrics.discard_percent,
                bytes_in_queue: metrics.bytes_in_queue,
            });
        } else if !metrics.insufficient_bandwidth && was_insufficient {
            debug!("Bandwidth sufficient again");
        }

        warnings
    }

    /// Update last report time.
    pub fn mark_reported(&self) {
        *self.last_report_time.write() = Instant::now();
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), 0.0)
    }
}

#[cfg(test)]
mod tests {
    use livecast_transport::IntervalSample;

    use super::*;

    fn statistics(samples: &[(i64, i64, i64)]) -> SocketStatistics {
        let mut statistics = SocketStatistics::new(5);
        for &(queued, sent, discarded) in samples {
            statistics.record(IntervalSample {
                received: 0,
                queued,
                sent,
                discarded,
            });
        }
        statistics
    }

    #[test]
    fn test_snapshot_rates() {
        let collector = MetricsCollector::default();
        let stats = statistics(&[(2000, 2000, 0), (4000, 3000, 1000)]);

        let metrics = collector.snapshot(&stats, 0);

        assert_eq!(metrics.sent_bytes_per_sec, 2500);
        assert_eq!(metrics.discarded_bytes_per_sec, 500);
        assert!((metrics.discard_percent - 1000.0 / 6000.0 * 100.0).abs() < 1e-9);
        assert!(metrics.insufficient_bandwidth);
    }

    #[test]
    fn test_no_traffic_is_not_insufficient() {
        let collector = MetricsCollector::default();

        let metrics = collector.snapshot(&SocketStatistics::default(), 0);

        assert_eq!(metrics.sent_bytes_per_sec, 0);
        assert!(!metrics.insufficient_bandwidth);
        assert!(collector.check_warnings(&metrics).is_empty());
    }

    #[test]
    fn test_threshold_applies() {
        let collector = MetricsCollector::new(Duration::from_secs(1), 25.0);
        let stats = statistics(&[(1000, 800, 200)]);

        assert!(!collector.snapshot(&stats, 0).insufficient_bandwidth);
    }

    #[test]
    fn test_warning_raised_once_per_episode() {
        let collector = MetricsCollector::default();
        let congested = collector.snapshot(&statistics(&[(1000, 500, 500)]), 0);
        let clear = collector.snapshot(&statistics(&[(1000, 1000, 0)]), 0);

        assert_eq!(collector.check_warnings(&congested).len(), 1);
        assert!(collector.check_warnings(&congested).is_empty());
        assert!(collector.check_warnings(&clear).is_empty());
        assert_eq!(collector.check_warnings(&congested).len(), 1);
    }
}
