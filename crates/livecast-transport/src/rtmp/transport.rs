//! [`Transport`] adapter over [`RtmpSocket`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Instant;

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, warn};
use url::Url;

use super::chunk::{chunk_stream, message_type, ChunkType, RtmpChunk, RtmpMessage};
use super::socket::RtmpSocket;
use super::{RtmpReadyState, RtmpSocketConfig, RtmpSocketDelegate, RtmpStatus, DEFAULT_PORT};
use crate::error::TransportError;
use crate::stats::SocketStatistics;
use crate::transport::{Transport, TransportKind, TransportListener, TransportStatus};
use crate::TransportResult;

/// Forwards socket notifications to the transport listener.
#[derive(Default)]
struct RtmpBridge {
    listener: RwLock<Option<Weak<dyn TransportListener>>>,
}

impl RtmpBridge {
    fn notify(&self, status: TransportStatus) {
        if let Some(listener) = self.listener() {
            listener.transport_status(status);
        }
    }

    fn listener(&self) -> Option<Arc<dyn TransportListener>> {
        self.listener.read().as_ref().and_then(Weak::upgrade)
    }
}

impl RtmpSocketDelegate for RtmpBridge {
    fn did_set_ready_state(&self, state: RtmpReadyState) {
        match state {
            RtmpReadyState::Uninitialized => self.notify(TransportStatus::Connecting),
            RtmpReadyState::Closed => self.notify(TransportStatus::Closed),
            _ => {}
        }
    }

    fn dispatch(&self, status: RtmpStatus) {
        debug!(code = status.code(), level = status.level(), "RTMP status");
        match status {
            RtmpStatus::ConnectSuccess => self.notify(TransportStatus::Connected),
            RtmpStatus::ConnectFailed | RtmpStatus::ConnectClosed => {
                self.notify(TransportStatus::Broken)
            }
        }
    }

    fn listen(&self, bytes: Bytes) {
        if let Some(listener) = self.listener() {
            listener.transport_data(bytes);
        }
    }

    fn did_update_statistics(&self, statistics: &SocketStatistics) {
        if let Some(listener) = self.listener() {
            listener.transport_statistics(statistics);
        }
    }
}

/// Publishes payload as RTMP messages on one chunk stream.
pub struct RtmpTransport {
    socket: RtmpSocket,
    bridge: Arc<RtmpBridge>,
    host: String,
    port: u16,
    chunk_stream_id: u32,
    message_type: u8,
    stream_id: u32,
    chunk_size: Option<usize>,
    chunk_size_announced: AtomicBool,
    epoch: Mutex<Instant>,
}

impl RtmpTransport {
    /// Create a transport for `host:port`.
    pub fn new(host: impl Into<String>, port: u16, config: RtmpSocketConfig) -> TransportResult<Self> {
        let socket = RtmpSocket::new(config)?;
        let bridge = Arc::new(RtmpBridge::default());
        let delegate: Arc<dyn RtmpSocketDelegate> = bridge.clone();
        socket.set_delegate(Arc::downgrade(&delegate));

        Ok(Self {
            socket,
            bridge,
            host: host.into(),
            port,
            chunk_stream_id: chunk_stream::VIDEO,
            message_type: message_type::VIDEO,
            stream_id: 1,
            chunk_size: None,
            chunk_size_announced: AtomicBool::new(false),
            epoch: Mutex::new(Instant::now()),
        })
    }

    /// Create a transport from an `rtmp://host[:port]/...` URL.
    pub fn from_url(url: &Url, config: RtmpSocketConfig) -> TransportResult<Self> {
        if url.scheme() != "rtmp" {
            return Err(TransportError::InvalidUrl(
                "URL must start with rtmp://".to_string(),
            ));
        }
        let host = url
            .host_str()
            .ok_or_else(|| TransportError::InvalidUrl("Missing host".to_string()))?;
        let port = url.port().unwrap_or(DEFAULT_PORT);

        Self::new(host, port, config)
    }

    /// Chunk stream, message type and message stream id used for payload.
    pub fn with_message_route(mut self, chunk_stream_id: u32, message_type: u8, stream_id: u32) -> Self {
        self.chunk_stream_id = chunk_stream_id;
        self.message_type = message_type;
        self.stream_id = stream_id;
        self
    }

    /// Announce this outbound chunk size before the first payload.
    pub fn with_chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = Some(size);
        self
    }

    pub fn socket(&self) -> &RtmpSocket {
        &self.socket
    }

    fn timestamp(&self) -> u32 {
        self.epoch.lock().elapsed().as_millis() as u32
    }
}

impl Transport for RtmpTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Rtmp
    }

    fn connect(&self) -> TransportResult<()> {
        *self.epoch.lock() = Instant::now();
        self.chunk_size_announced.store(false, Ordering::SeqCst);
        self.socket.connect(&self.host, self.port);
        Ok(())
    }

    fn write(&self, payload: Bytes) {
        if let Some(size) = self.chunk_size {
            if !self.chunk_size_announced.swap(true, Ordering::SeqCst) {
                if let Err(e) = self.socket.announce_chunk_size(size) {
                    debug!("Chunk size announcement skipped: {}", e);
                    self.chunk_size_announced.store(false, Ordering::SeqCst);
                }
            }
        }

        let message = RtmpMessage::new(self.message_type, self.stream_id, self.timestamp(), payload);
        let chunk = RtmpChunk::new(ChunkType::Zero, self.chunk_stream_id, message);
        if let Err(e) = self.socket.send_chunk(&chunk, None) {
            warn!("RTMP payload dropped: {}", e);
        }
    }

    fn close(&self) {
        self.socket.close(false);
    }

    fn set_listener(&self, listener: Weak<dyn TransportListener>) {
        *self.bridge.listener.write() = Some(listener);
    }

    fn statistics(&self) -> SocketStatistics {
        self.socket.statistics()
    }

    fn queue_bytes_out(&self) -> i64 {
        self.socket.queue_bytes_out()
    }
}
