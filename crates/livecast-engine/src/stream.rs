//! Transport-agnostic publishing lifecycle.

use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};

use bytes::Bytes;
use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, instrument, trace, warn};

use livecast_ipc::StreamState;
use livecast_transport::{
    Atomic, SocketStatistics, Transport, TransportError, TransportListener, TransportStatus,
};

use crate::error::EngineResult;
use crate::pump::{OutputPump, PayloadSink};

/// Receiver of stream notifications.
pub trait StreamObserver: Send + Sync {
    fn stream_state(&self, _state: StreamState) {}

    /// Every status the transport reports, before the stream reacts to it.
    fn transport_status(&self, _status: TransportStatus) {}

    /// The transport rejected `connect`.
    fn publish_failed(&self, _error: &TransportError) {}

    fn statistics(&self, _statistics: &SocketStatistics) {}
}

enum Lifecycle {
    Publish,
    Close,
    Status(TransportStatus),
    Stop,
}

/// Moves transport notifications onto the lifecycle queue.
struct LifecycleListener {
    lifecycle: Sender<Lifecycle>,
    core: Weak<Core>,
}

impl TransportListener for LifecycleListener {
    fn transport_status(&self, status: TransportStatus) {
        let _ = self.lifecycle.send(Lifecycle::Status(status));
    }

    fn transport_statistics(&self, statistics: &SocketStatistics) {
        if let Some(observer) = self.core.upgrade().and_then(|core| core.observer()) {
            observer.statistics(statistics);
        }
    }
}

struct Core {
    transport: Arc<dyn Transport>,
    ready_state: Atomic<StreamState>,
    pump: Mutex<Option<Box<dyn OutputPump>>>,
    observer: RwLock<Option<Weak<dyn StreamObserver>>>,
}

impl Core {
    fn observer(&self) -> Option<Arc<dyn StreamObserver>> {
        self.observer.read().as_ref().and_then(Weak::upgrade)
    }

    fn set_ready_state(&self, state: StreamState) {
        let previous = self.ready_state.swap(state);
        if previous == state {
            return;
        }
        debug!(from = previous.name(), to = state.name(), "Stream state changed");
        if let Some(observer) = self.observer() {
            observer.stream_state(state);
        }
    }

    fn publish(&self) {
        let state = self.ready_state.value();
        if state != StreamState::Initialized {
            debug!(state = state.name(), "Publish ignored");
            return;
        }
        info!(transport = self.transport.kind().name(), "Publishing");
        if let Err(e) = self.transport.connect() {
            warn!("Transport connect failed: {}", e);
            if let Some(observer) = self.observer() {
                observer.publish_failed(&e);
            }
        }
    }

    fn on_status(self: &Arc<Self>, status: TransportStatus) {
        trace!(?status, "Transport status");
        if let Some(observer) = self.observer() {
            observer.transport_status(status);
        }

        match (status, self.ready_state.value()) {
            (TransportStatus::Connected, StreamState::Initialized) => {
                self.set_ready_state(StreamState::Connected);
                if let Some(pump) = self.pump.lock().as_mut() {
                    pump.start(Arc::new(CoreSink(Arc::downgrade(self))));
                }
                self.set_ready_state(StreamState::Publishing);
            }
            (
                TransportStatus::Broken | TransportStatus::Closed,
                StreamState::Connected | StreamState::Publishing,
            ) => self.close(),
            _ => {}
        }
    }

    fn close(&self) {
        if self.ready_state.value() == StreamState::Publishing {
            if let Some(pump) = self.pump.lock().as_mut() {
                pump.stop();
            }
        }
        self.transport.close();
        self.set_ready_state(StreamState::Initialized);
    }

    fn did_output(&self, data: Bytes) {
        if self.ready_state.value() == StreamState::Publishing {
            self.transport.write(data);
        } else {
            trace!(bytes = data.len(), "Payload dropped, not publishing");
        }
    }
}

struct CoreSink(Weak<Core>);

impl PayloadSink for CoreSink {
    fn did_output(&self, data: Bytes) {
        if let Some(core) = self.0.upgrade() {
            core.did_output(data);
        }
    }
}

/// A publishing stream over one transport.
///
/// `publish` and `close` only enqueue work; every state transition runs
/// on the stream's lifecycle thread, in order.
pub struct Stream {
    core: Arc<Core>,
    lifecycle: Sender<Lifecycle>,
    _listener: Arc<LifecycleListener>,
    worker: Option<JoinHandle<()>>,
}

impl Stream {
    pub fn new(transport: Arc<dyn Transport>) -> EngineResult<Self> {
        let core = Arc::new(Core {
            transport,
            ready_state: Atomic::new(StreamState::Initialized),
            pump: Mutex::new(None),
            observer: RwLock::new(None),
        });
        let (lifecycle, receiver) = unbounded();

        let listener = Arc::new(LifecycleListener {
            lifecycle: lifecycle.clone(),
            core: Arc::downgrade(&core),
        });
        let weak: Arc<dyn TransportListener> = listener.clone();
        core.transport.set_listener(Arc::downgrade(&weak));

        let worker_core = Arc::clone(&core);
        let worker = thread::Builder::new()
            .name("livecast-stream".to_string())
            .spawn(move || run_lifecycle(worker_core, receiver))?;

        Ok(Self {
            core,
            lifecycle,
            _listener: listener,
            worker: Some(worker),
        })
    }

    /// Attach the producer started on `Publishing`.
    pub fn with_pump(self, pump: Box<dyn OutputPump>) -> Self {
        *self.core.pump.lock() = Some(pump);
        self
    }

    pub fn set_observer(&self, observer: Weak<dyn StreamObserver>) {
        *self.core.observer.write() = Some(observer);
    }

    /// Connect the transport. Ignored unless `Initialized`.
    #[instrument(name = "stream_publish", skip(self))]
    pub fn publish(&self) {
        let _ = self.lifecycle.send(Lifecycle::Publish);
    }

    /// Stop the pump, release the transport and return to `Initialized`.
    #[instrument(name = "stream_close", skip(self))]
    pub fn close(&self) {
        let _ = self.lifecycle.send(Lifecycle::Close);
    }

    pub fn ready_state(&self) -> StreamState {
        self.core.ready_state.value()
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.core.transport
    }

    pub fn statistics(&self) -> SocketStatistics {
        self.core.transport.statistics()
    }
}

impl PayloadSink for Stream {
    fn did_output(&self, data: Bytes) {
        self.core.did_output(data);
    }
}

impl Drop for Stream {
    fn drop(&mut self) {
        let _ = self.lifecycle.send(Lifecycle::Close);
        let _ = self.lifecycle.send(Lifecycle::Stop);
        if let Some(worker) = self.worker.take() {
            if worker.thread().id() != thread::current().id() {
                let _ = worker.join();
            }
        }
    }
}

fn run_lifecycle(core: Arc<Core>, receiver: Receiver<Lifecycle>) {
    for message in receiver.iter() {
        match message {
            Lifecycle::Publish => core.publish(),
            Lifecycle::Close => core.close(),
            Lifecycle::Status(status) => core.on_status(status),
            Lifecycle::Stop => break,
        }
    }
    trace!("Stream lifecycle stopped");
}

#[cfg(test)]
mod tests {
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::time::{Duration, Instant};

    use livecast_transport::rtmp::{RtmpReadyState, RtmpSocketConfig, SIG_SIZE};
    use livecast_transport::{RtmpTransport, TransportKind, TransportResult};

    use super::*;
    use crate::pump::ChannelPump;

    #[derive(Default)]
    struct FakeTransport {
        listener: RwLock<Option<Weak<dyn TransportListener>>>,
        connects: Mutex<u32>,
        closes: Mutex<u32>,
        writes: Mutex<Vec<Bytes>>,
        refuse: Mutex<Option<String>>,
    }

    impl FakeTransport {
        fn emit(&self, status: TransportStatus) {
            let listener = self.listener.read().as_ref().and_then(Weak::upgrade);
            if let Some(listener) = listener {
                listener.transport_status(status);
            }
        }
    }

    impl Transport for FakeTransport {
        fn kind(&self) -> TransportKind {
            TransportKind::Rtmp
        }

        fn connect(&self) -> TransportResult<()> {
            if let Some(reason) = self.refuse.lock().clone() {
                return Err(TransportError::InvalidUrl(reason));
            }
            *self.connects.lock() += 1;
            Ok(())
        }

        fn write(&self, payload: Bytes) {
            self.writes.lock().push(payload);
        }

        fn close(&self) {
            *self.closes.lock() += 1;
        }

        fn set_listener(&self, listener: Weak<dyn TransportListener>) {
            *self.listener.write() = Some(listener);
        }

        fn statistics(&self) -> SocketStatistics {
            SocketStatistics::default()
        }
    }

    #[derive(Default)]
    struct Recorder {
        states: Mutex<Vec<StreamState>>,
        failures: Mutex<Vec<String>>,
    }

    impl StreamObserver for Recorder {
        fn stream_state(&self, state: StreamState) {
            self.states.lock().push(state);
        }

        fn publish_failed(&self, error: &TransportError) {
            self.failures.lock().push(error.to_string());
        }
    }

    fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        false
    }

    fn observed(stream: &Stream) -> Arc<Recorder> {
        let recorder = Arc::new(Recorder::default());
        let weak: Arc<dyn StreamObserver> = recorder.clone();
        stream.set_observer(Arc::downgrade(&weak));
        recorder
    }

    fn publishing(transport: &Arc<FakeTransport>, stream: &Stream) {
        stream.publish();
        assert!(wait_for(|| *transport.connects.lock() == 1));
        transport.emit(TransportStatus::Connected);
        assert!(wait_for(|| stream.ready_state() == StreamState::Publishing));
    }

    #[test]
    fn test_publish_reaches_publishing() {
        let transport = Arc::new(FakeTransport::default());
        let stream = Stream::new(transport.clone()).unwrap();
        let recorder = observed(&stream);

        publishing(&transport, &stream);

        assert_eq!(
            recorder.states.lock().clone(),
            vec![StreamState::Connected, StreamState::Publishing]
        );
    }

    #[test]
    fn test_publish_ignored_unless_initialized() {
        let transport = Arc::new(FakeTransport::default());
        let stream = Stream::new(transport.clone()).unwrap();
        publishing(&transport, &stream);

        stream.publish();
        stream.close();

        assert!(wait_for(|| stream.ready_state() == StreamState::Initialized));
        assert_eq!(*transport.connects.lock(), 1);
    }

    #[test]
    fn test_close_is_idempotent_from_any_state() {
        let transport = Arc::new(FakeTransport::default());
        let stream = Stream::new(transport.clone()).unwrap();

        stream.close();
        stream.close();
        assert!(wait_for(|| *transport.closes.lock() == 2));
        assert_eq!(stream.ready_state(), StreamState::Initialized);

        publishing(&transport, &stream);
        stream.close();
        stream.close();
        assert!(wait_for(|| *transport.closes.lock() == 4));
        assert_eq!(stream.ready_state(), StreamState::Initialized);
    }

    #[test]
    fn test_broken_transport_closes_stream() {
        let transport = Arc::new(FakeTransport::default());
        let stream = Stream::new(transport.clone()).unwrap();
        let (tx, rx) = crossbeam_channel::unbounded();
        let stream = stream.with_pump(Box::new(ChannelPump::new(rx)));
        publishing(&transport, &stream);

        transport.emit(TransportStatus::Broken);

        assert!(wait_for(|| stream.ready_state() == StreamState::Initialized));
        assert_eq!(*transport.closes.lock(), 1);
        tx.send(Bytes::from_static(b"late")).unwrap();
        thread::sleep(Duration::from_millis(100));
        assert!(transport.writes.lock().is_empty());
    }

    #[test]
    fn test_payload_only_forwarded_while_publishing() {
        let transport = Arc::new(FakeTransport::default());
        let stream = Stream::new(transport.clone()).unwrap();

        stream.did_output(Bytes::from_static(b"early"));
        publishing(&transport, &stream);
        stream.did_output(Bytes::from_static(b"frame"));

        assert_eq!(transport.writes.lock().clone(), vec![Bytes::from_static(b"frame")]);
    }

    #[test]
    fn test_connect_error_reported() {
        let transport = Arc::new(FakeTransport::default());
        *transport.refuse.lock() = Some("bad scheme".to_string());
        let stream = Stream::new(transport.clone()).unwrap();
        let recorder = observed(&stream);

        stream.publish();

        assert!(wait_for(|| !recorder.failures.lock().is_empty()));
        assert_eq!(stream.ready_state(), StreamState::Initialized);
    }

    #[test]
    fn test_rtmp_publish_close_releases_everything() {
        let server = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = server.local_addr().unwrap().port();
        let peer = thread::spawn(move || {
            let (mut conn, _) = server.accept().unwrap();
            let mut c0c1 = vec![0u8; 1 + SIG_SIZE];
            conn.read_exact(&mut c0c1).unwrap();

            let mut reply = vec![3u8];
            reply.extend(std::iter::repeat(7u8).take(SIG_SIZE));
            reply.extend_from_slice(&c0c1[1..]);
            conn.write_all(&reply).unwrap();

            let mut c2 = vec![0u8; SIG_SIZE];
            conn.read_exact(&mut c2).unwrap();

            let mut received = 0usize;
            let mut buf = [0u8; 4096];
            loop {
                match conn.read(&mut buf) {
                    Ok(0) | Err(_) => break,
                    Ok(n) => received += n,
                }
            }
            received
        });

        let transport = Arc::new(
            RtmpTransport::new("127.0.0.1", port, RtmpSocketConfig::default()).unwrap(),
        );
        let (tx, rx) = crossbeam_channel::unbounded();
        let stream = Stream::new(transport.clone())
            .unwrap()
            .with_pump(Box::new(ChannelPump::new(rx)));

        stream.publish();
        assert!(wait_for(|| stream.ready_state() == StreamState::Publishing));
        for _ in 0..10 {
            tx.send(Bytes::from(vec![0xAB; 1000])).unwrap();
        }
        assert!(wait_for(|| transport.socket().total_bytes_out() >= 10_000));

        stream.close();
        assert!(wait_for(|| stream.ready_state() == StreamState::Initialized));
        assert!(wait_for(|| transport.socket().ready_state() == RtmpReadyState::Closed));
        assert_eq!(transport.queue_bytes_out(), 0);

        let received = peer.join().unwrap();
        assert!(received >= 10_000);
    }
}
