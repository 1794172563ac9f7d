//! [`Transport`] adapter over [`SrtSocket`].

use std::sync::{Arc, Weak};

use bytes::Bytes;
use parking_lot::RwLock;
use url::Url;

use super::native::SrtApi;
use super::socket::SrtSocket;
use super::{SrtSocketConfig, SrtSocketDelegate, SrtSocketStatus};
use crate::stats::SocketStatistics;
use crate::transport::{Transport, TransportKind, TransportListener, TransportStatus};
use crate::TransportResult;

#[derive(Default)]
struct SrtBridge {
    listener: RwLock<Option<Weak<dyn TransportListener>>>,
}

impl SrtBridge {
    fn listener(&self) -> Option<Arc<dyn TransportListener>> {
        self.listener.read().as_ref().and_then(Weak::upgrade)
    }
}

impl SrtSocketDelegate for SrtBridge {
    fn status(&self, status: SrtSocketStatus) {
        let status = match status {
            SrtSocketStatus::Connecting => TransportStatus::Connecting,
            SrtSocketStatus::Connected => TransportStatus::Connected,
            SrtSocketStatus::Broken => TransportStatus::Broken,
            SrtSocketStatus::Closed => TransportStatus::Closed,
            _ => return,
        };
        if let Some(listener) = self.listener() {
            listener.transport_status(status);
        }
    }

    fn did_update_statistics(&self, statistics: &SocketStatistics) {
        if let Some(listener) = self.listener() {
            listener.transport_statistics(statistics);
        }
    }
}

/// Publishes payload to one `srt://` URL.
pub struct SrtTransport {
    socket: SrtSocket,
    bridge: Arc<SrtBridge>,
    uri: Url,
}

impl SrtTransport {
    pub fn new(uri: Url, api: Arc<dyn SrtApi>, config: SrtSocketConfig) -> Self {
        let socket = SrtSocket::new(api, config);
        let bridge = Arc::new(SrtBridge::default());
        let delegate: Arc<dyn SrtSocketDelegate> = bridge.clone();
        socket.set_delegate(Arc::downgrade(&delegate));
        Self { socket, bridge, uri }
    }

    pub fn socket(&self) -> &SrtSocket {
        &self.socket
    }
}

impl Transport for SrtTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Srt
    }

    fn connect(&self) -> TransportResult<()> {
        self.socket.connect(&self.uri)
    }

    fn write(&self, payload: Bytes) {
        self.socket.write(payload);
    }

    fn close(&self) {
        self.socket.close();
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
