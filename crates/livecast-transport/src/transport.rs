//! Transport-agnostic publishing interface.

use std::sync::Weak;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::TransportError;
use crate::stats::SocketStatistics;
use crate::TransportResult;

/// Which wire protocol a transport speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransportKind {
    Rtmp,
    Srt,
}

impl TransportKind {
    /// Pick the transport from the URL scheme.
    pub fn from_url(url: &Url) -> TransportResult<Self> {
        match url.scheme() {
            "rtmp" => Ok(Self::Rtmp),
            "srt" => Ok(Self::Srt),
            other => Err(TransportError::InvalidUrl(format!(
                "Unsupported scheme: {}",
                other
            ))),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Rtmp => "RTMP",
            Self::Srt => "SRT",
        }
    }
}

/// Connection status as seen by the stream layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransportStatus {
    /// A connection attempt is in progress.
    Connecting,
    /// Ready to carry media.
    Connected,
    /// The connection failed or was lost.
    Broken,
    /// The connection was released.
    Closed,
}

/// Receiver of transport notifications.
pub trait TransportListener: Send + Sync {
    fn transport_status(&self, status: TransportStatus);

    /// Inbound bytes, for transports that carry any.
    fn transport_data(&self, _bytes: Bytes) {}

    /// A statistics sample was taken.
    fn transport_statistics(&self, _statistics: &SocketStatistics) {}
}

/// A connection that carries encoded payload to a server.
///
/// Calls never block on the network. Only configuration errors are
/// returned; everything else arrives through the listener.
pub trait Transport: Send + Sync {
    fn kind(&self) -> TransportKind;

    /// Start connecting.
    fn connect(&self) -> TransportResult<()>;

    /// Queue payload for sending.
    fn write(&self, payload: Bytes);

    /// Release the connection. Idempotent.
    fn close(&self);

    /// Register the single listener, held weakly.
    fn set_listener(&self, listener: Weak<dyn TransportListener>);

    /// Latest traffic statistics.
    fn statistics(&self) -> SocketStatistics;

    /// Bytes accepted but not yet sent or discarded.
    fn queue_bytes_out(&self) -> i64 {
        0
    }
}
