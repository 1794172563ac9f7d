//! RTMP and SRT publishing transports.
//!
//! [`rtmp::RtmpSocket`] performs the RTMP handshake and frames chunks over
//! TCP, discarding queued chunks that miss the write timeout.
//! [`srt::SrtSocket`] drives a native SRT caller socket. Both report
//! through delegates and keep moving-window [`SocketStatistics`]; the
//! [`Transport`] trait puts them behind one interface.

mod atomic;
mod connection;
mod error;
mod payload;
pub mod rtmp;
pub mod srt;
mod stats;
mod transport;

pub use atomic::Atomic;
pub use connection::ReconnectPolicy;
pub use error::TransportError;
pub use payload::split_payload;
pub use rtmp::{RtmpSocket, RtmpTransport};
pub use srt::{SrtSocket, SrtTransport};
pub use stats::{IntervalSample, SocketStatistics, StatisticsWindow, TrafficCounters};
pub use transport::{Transport, TransportKind, TransportListener, TransportStatus};

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

/// Samples kept by each statistics window.
pub const DEFAULT_STATISTICS_WINDOW: usize = 5;

/// Maximum reconnection attempts.
pub const MAX_RECONNECT_ATTEMPTS: u32 = 5;

/// Base reconnect delay in milliseconds.
pub const BASE_RECONNECT_DELAY_MS: u64 = 1000;
