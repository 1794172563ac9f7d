//! RTMP client transport.

mod chunk;
mod handshake;
mod socket;
mod transport;

use std::time::Duration;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::stats::SocketStatistics;
use crate::DEFAULT_STATISTICS_WINDOW;

pub use chunk::{
    chunk_stream, message_type, ChunkType, RtmpChunk, RtmpMessage, DEFAULT_CHUNK_SIZE,
    EXTENDED_TIMESTAMP, MAX_CHUNK_SIZE,
};
pub use handshake::{Handshake, PROTOCOL_VERSION, SIG_SIZE};
pub use socket::{MessageLock, RtmpSocket};
pub use transport::RtmpTransport;

/// Default RTMP port.
pub const DEFAULT_PORT: u16 = 1935;

/// Connection lifecycle of the RTMP socket.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum RtmpReadyState {
    #[default]
    Uninitialized,
    VersionSent,
    AckSent,
    HandshakeDone,
    Closing,
    Closed,
}

impl RtmpReadyState {
    pub fn name(self) -> &'static str {
        match self {
            Self::Uninitialized => "Uninitialized",
            Self::VersionSent => "VersionSent",
            Self::AckSent => "AckSent",
            Self::HandshakeDone => "HandshakeDone",
            Self::Closing => "Closing",
            Self::Closed => "Closed",
        }
    }
}

/// NetConnection status codes raised by the socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RtmpStatus {
    ConnectSuccess,
    ConnectFailed,
    ConnectClosed,
}

impl RtmpStatus {
    pub fn code(self) -> &'static str {
        match self {
            Self::ConnectSuccess => "NetConnection.Connect.Success",
            Self::ConnectFailed => "NetConnection.Connect.Failed",
            Self::ConnectClosed => "NetConnection.Connect.Closed",
        }
    }

    pub fn level(self) -> &'static str {
        match self {
            Self::ConnectFailed => "error",
            Self::ConnectSuccess | Self::ConnectClosed => "status",
        }
    }
}

/// Receiver of socket notifications.
///
/// The socket keeps only a weak reference, so the delegate never outlives
/// the owner that registered it.
pub trait RtmpSocketDelegate: Send + Sync {
    /// Ready state changed.
    fn did_set_ready_state(&self, state: RtmpReadyState);

    /// A NetConnection status event.
    fn dispatch(&self, status: RtmpStatus);

    /// Raw inbound bytes received after the handshake.
    fn listen(&self, bytes: Bytes);

    /// A new statistics sample was taken.
    fn did_update_statistics(&self, _statistics: &SocketStatistics) {}
}

/// RTMP socket tuning.
#[derive(Debug, Clone)]
pub struct RtmpSocketConfig {
    /// TCP connect timeout.
    pub connect_timeout: Duration,

    /// Chunks queued longer than this are dropped instead of written.
    pub write_timeout: Duration,

    /// Time allowed from TCP connect to `HandshakeDone`.
    pub handshake_timeout: Duration,

    /// Sampling period of the statistics windows.
    pub statistics_interval: Duration,

    /// Samples kept per statistics window.
    pub statistics_window: usize,

    /// Size of a single socket read.
    pub read_buffer_size: usize,
}

impl Default for RtmpSocketConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(15),
            write_timeout: Duration::from_millis(500),
            handshake_timeout: Duration::from_secs(10),
            statistics_interval: Duration::from_secs(1),
            statistics_window: DEFAULT_STATISTICS_WINDOW,
            read_buffer_size: 4096,
        }
    }
}
