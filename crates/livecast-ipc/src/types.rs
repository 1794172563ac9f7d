//! Common types used across IPC messages.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Invalid configuration values.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("No target URL configured")]
    MissingUrl,

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

/// Configuration for publishing one stream.
///
/// Every field has a default, so a config file only needs `url`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Target URL, `rtmp://host[:port]/app` or `srt://host:port?options`.
    pub url: String,

    /// TCP connect timeout (RTMP).
    pub connect_timeout_ms: u64,

    /// Age at which a queued RTMP chunk is discarded instead of written.
    pub write_timeout_ms: u64,

    /// Time allowed from connect to handshake completion (RTMP).
    pub handshake_timeout_ms: u64,

    /// Statistics sampling period.
    pub statistics_interval_ms: u64,

    /// Samples kept per statistics window.
    pub statistics_window: usize,

    /// Outbound RTMP chunk size to announce; the protocol default when unset.
    pub chunk_size: Option<u32>,

    /// SRT `sndtimeo`, applied after connect when set.
    pub srt_send_timeout_ms: Option<u64>,

    /// SRT status polling period.
    pub srt_poll_interval_ms: u64,

    pub reconnect: ReconnectConfig,

    /// Discard percentage above which bandwidth is reported insufficient.
    pub insufficient_bandwidth_percent: f64,

    /// Metrics reporting period.
    pub metrics_interval_ms: u64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            connect_timeout_ms: 15_000,
            write_timeout_ms: 500,
            handshake_timeout_ms: 10_000,
            statistics_interval_ms: 1_000,
            statistics_window: 5,
            chunk_size: None,
            srt_send_timeout_ms: None,
            srt_poll_interval_ms: 30,
            reconnect: ReconnectConfig::default(),
            insufficient_bandwidth_percent: 0.0,
            metrics_interval_ms: 1_000,
        }
    }
}

impl StreamConfig {
    /// Config for `url` with every other field defaulted.
    pub fn with_url(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.url.trim().is_empty() {
            return Err(ConfigError::MissingUrl);
        }
        if self.write_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "write_timeout_ms",
                reason: "must be positive".to_string(),
            });
        }
        if self.statistics_window == 0 {
            return Err(ConfigError::InvalidValue {
                field: "statistics_window",
                reason: "must keep at least one sample".to_string(),
            });
        }
        if let Some(size) = self.chunk_size {
            if size == 0 || size > 0x7FFF_FFFF {
                return Err(ConfigError::InvalidValue {
                    field: "chunk_size",
                    reason: format!("{size} is outside 1..=2147483647"),
                });
            }
        }
        if !(0.0..=100.0).contains(&self.insufficient_bandwidth_percent) {
            return Err(ConfigError::InvalidValue {
                field: "insufficient_bandwidth_percent",
                reason: "must be within 0..=100".to_string(),
            });
        }
        Ok(())
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    pub fn statistics_interval(&self) -> Duration {
        Duration::from_millis(self.statistics_interval_ms)
    }

    pub fn srt_send_timeout(&self) -> Option<Duration> {
        self.srt_send_timeout_ms.map(Duration::from_millis)
    }

    pub fn srt_poll_interval(&self) -> Duration {
        Duration::from_millis(self.srt_poll_interval_ms)
    }

    pub fn metrics_interval(&self) -> Duration {
        Duration::from_millis(self.metrics_interval_ms)
    }
}

/// Reconnect backoff settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    /// Retries before giving up; 0 disables reconnecting.
    pub max_attempts: u32,

    /// Delay before the first retry, doubled for each following one.
    pub base_delay_ms: u64,

    pub max_delay_ms: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 1_000,
            max_delay_ms: 32_000,
        }
    }
}

/// Connection status reported by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionStatus {
    Connecting,
    Connected,
    Broken,
    Closed,
}

/// Traffic metrics over the statistics window.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransportMetrics {
    /// Average send rate in bytes per second.
    pub sent_bytes_per_sec: u64,

    /// Average receive rate in bytes per second.
    pub received_bytes_per_sec: u64,

    /// Average discard rate in bytes per second.
    pub discarded_bytes_per_sec: u64,

    /// Share of outbound bytes discarded over the window (0-100).
    pub discard_percent: f64,

    /// Bytes queued over the window that were neither sent nor discarded.
    pub bytes_in_queue: i64,

    /// Bytes currently waiting in the output queue.
    pub queue_bytes_out: i64,

    /// Whether the discard percentage is above the configured threshold.
    pub insufficient_bandwidth: bool,

    /// Time since publishing started.
    pub uptime_seconds: u64,
}

/// Types of performance warnings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WarningType {
    /// The link cannot carry the produced payload; chunks are being discarded.
    InsufficientBandwidth {
        discard_percent: f64,
        bytes_in_queue: i64,
    },
}
