//! RTMP socket: TCP connection, handshake driver and output queue.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use bytes::{Buf, Bytes, BytesMut};
use parking_lot::{Mutex, ReentrantMutex, RwLock};
use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::TcpStream;
use tokio::runtime::{Handle, Runtime};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, instrument, trace, warn};

use super::chunk::{
    chunk_stream, ChunkType, RtmpChunk, RtmpMessage, DEFAULT_CHUNK_SIZE, MAX_CHUNK_SIZE,
};
use super::handshake::{Handshake, SIG_SIZE};
use super::{RtmpReadyState, RtmpSocketConfig, RtmpSocketDelegate, RtmpStatus};
use crate::atomic::Atomic;
use crate::error::TransportError;
use crate::stats::{SocketStatistics, TrafficCounters};
use crate::TransportResult;

/// In-flight flag of one message.
///
/// Set when the message is framed and cleared once its last chunk has been
/// written, discarded or dropped with the connection. A producer can skip
/// frames while the previous one is still locked.
#[derive(Debug, Clone, Default)]
pub struct MessageLock(Arc<AtomicBool>);

impl MessageLock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_locked(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    fn acquire(&self) {
        self.0.store(true, Ordering::Release);
    }

    fn release(&self) {
        self.0.store(false, Ordering::Release);
    }
}

/// A wire chunk waiting for the writer.
#[derive(Debug)]
pub(crate) struct OutboundChunk {
    data: Bytes,
    enqueued_at: Instant,
    lock: Option<MessageLock>,
}

impl OutboundChunk {
    pub(crate) fn new(data: Bytes, lock: Option<MessageLock>) -> Self {
        Self {
            data,
            enqueued_at: Instant::now(),
            lock,
        }
    }
}

impl Drop for OutboundChunk {
    fn drop(&mut self) {
        if let Some(lock) = self.lock.take() {
            lock.release();
        }
    }
}

/// Write queued chunks in order, dropping those that waited too long.
pub(crate) async fn drain_outbound<W>(
    mut receiver: UnboundedReceiver<OutboundChunk>,
    mut writer: W,
    counters: &TrafficCounters,
    write_timeout: Duration,
) where
    W: AsyncWrite + Unpin,
{
    while let Some(chunk) = receiver.recv().await {
        let len = chunk.data.len();
        let waited = chunk.enqueued_at.elapsed();

        if waited >= write_timeout {
            trace!(bytes = len, waited_ms = waited.as_millis() as u64, "Discarding stale chunk");
            counters.record_discarded(len);
            continue;
        }

        match writer.write_all(&chunk.data).await {
            Ok(()) => counters.record_sent(len),
            Err(e) => {
                warn!(bytes = len, "RTMP write failed: {}", e);
                counters.record_failed(len);
            }
        }
    }

    debug!("Output queue closed");
}

/// Tasks and queue of one TCP connection.
struct Session {
    generation: u64,
    outbound: UnboundedSender<OutboundChunk>,
    tasks: Vec<JoinHandle<()>>,
}

impl Session {
    fn teardown(self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

struct Shared {
    config: RtmpSocketConfig,
    ready_state: Atomic<RtmpReadyState>,
    delegate: RwLock<Option<Weak<dyn RtmpSocketDelegate>>>,
    events: Mutex<Vec<RtmpStatus>>,
    handshake: Mutex<Handshake>,
    input_buffer: Mutex<BytesMut>,
    chunk_size_s: Atomic<usize>,
    chunk_size_c: Atomic<usize>,
    counters: TrafficCounters,
    statistics: RwLock<SocketStatistics>,
    session: Mutex<Option<Session>>,
    generation: AtomicU64,
    /// Held while the ready state changes, so a closed connection stays closed.
    transition: ReentrantMutex<()>,
}

impl Shared {
    fn delegate(&self) -> Option<Arc<dyn RtmpSocketDelegate>> {
        self.delegate.read().as_ref().and_then(Weak::upgrade)
    }

    fn set_ready_state(&self, state: RtmpReadyState) {
        let previous = self.ready_state.swap(state);
        debug!(
            previous = previous.name(),
            current = state.name(),
            "RTMP ready state"
        );

        if let Some(delegate) = self.delegate() {
            delegate.did_set_ready_state(state);
        }
    }

    fn is_current(&self, generation: u64) -> bool {
        self.session
            .lock()
            .as_ref()
            .is_some_and(|session| session.generation == generation)
    }

    /// Move connection `generation` forward.
    ///
    /// Returns false, changing nothing, once that connection was closed or
    /// replaced. Completing the handshake also raises `ConnectSuccess`.
    fn advance_ready_state(&self, generation: u64, state: RtmpReadyState) -> bool {
        let _transition = self.transition.lock();
        if !self.is_current(generation) {
            trace!(generation, state = state.name(), "Connection already closed");
            return false;
        }
        self.set_ready_state(state);
        if state == RtmpReadyState::HandshakeDone {
            info!("RTMP handshake done");
            self.events.lock().push(RtmpStatus::ConnectSuccess);
            self.flush_events();
        }
        true
    }

    fn flush_events(&self) {
        let Some(delegate) = self.delegate() else {
            return;
        };
        let events = std::mem::take(&mut *self.events.lock());
        for event in events {
            delegate.dispatch(event);
        }
    }

    /// Queue raw bytes for the writer of connection `generation`, or of
    /// whichever connection is open when `None`.
    fn do_output(&self, generation: Option<u64>, data: Bytes, lock: Option<MessageLock>) -> usize {
        let len = data.len();
        let chunk = OutboundChunk::new(data, lock);

        let session = self.session.lock();
        let Some(session) = session
            .as_ref()
            .filter(|session| generation.map_or(true, |g| g == session.generation))
        else {
            trace!(bytes = len, "No connection, dropping output");
            return 0;
        };

        self.counters.record_queued(len);
        if session.outbound.send(chunk).is_err() {
            self.counters.record_failed(len);
        }
        len
    }

    fn attach_task(&self, generation: u64, task: JoinHandle<()>) {
        match self.session.lock().as_mut() {
            Some(session) if session.generation == generation => session.tasks.push(task),
            _ => task.abort(),
        }
    }

    /// Tear the current connection down.
    ///
    /// With `expected` set, only that connection generation is closed; a
    /// stale task never closes a newer connection.
    fn close(&self, expected: Option<u64>, is_disconnected: bool) {
        let _transition = self.transition.lock();
        let session = {
            let mut session = self.session.lock();
            let current = match session.as_ref() {
                Some(current) => current.generation,
                None => return,
            };
            if expected.is_some_and(|g| g != current) {
                return;
            }
            session.take()
        };
        let Some(session) = session else {
            return;
        };

        if is_disconnected {
            let status = if self.ready_state.value() == RtmpReadyState::HandshakeDone {
                RtmpStatus::ConnectClosed
            } else {
                RtmpStatus::ConnectFailed
            };
            info!(code = status.code(), "RTMP connection ended");
            self.events.lock().push(status);
        }

        self.set_ready_state(RtmpReadyState::Closing);
        session.teardown();
        self.counters.clear_queue();
        self.set_ready_state(RtmpReadyState::Closed);
        self.flush_events();
    }

    async fn run_connection(
        self: Arc<Self>,
        generation: u64,
        addr: String,
        receiver: UnboundedReceiver<OutboundChunk>,
        handle: Handle,
    ) {
        let stream =
            match tokio::time::timeout(self.config.connect_timeout, TcpStream::connect(&addr)).await
            {
                Ok(Ok(stream)) => stream,
                Ok(Err(e)) => {
                    warn!(addr = %addr, "TCP connect failed: {}", e);
                    self.close(Some(generation), true);
                    return;
                }
                Err(_) => {
                    warn!(addr = %addr, "TCP connect timed out");
                    self.close(Some(generation), true);
                    return;
                }
            };

        if let Err(e) = stream.set_nodelay(true) {
            debug!("Failed to set TCP_NODELAY: {}", e);
        }
        let (reader, writer) = stream.into_split();

        // The peer may answer as soon as C0+C1 is out, so the state moves first.
        if !self.advance_ready_state(generation, RtmpReadyState::VersionSent) {
            return;
        }
        debug!(addr = %addr, "TCP connection established, sending C0+C1");
        let challenge = self.handshake.lock().generate_challenge();
        self.do_output(Some(generation), challenge, None);

        let shared = Arc::clone(&self);
        let write_timeout = self.config.write_timeout;
        self.attach_task(
            generation,
            handle.spawn(async move {
                drain_outbound(receiver, writer, &shared.counters, write_timeout).await;
            }),
        );
        self.attach_task(
            generation,
            handle.spawn(Arc::clone(&self).receive(generation, reader)),
        );
        self.attach_task(generation, handle.spawn(Arc::clone(&self).run_sampler()));
        self.attach_task(
            generation,
            handle.spawn(Arc::clone(&self).watch_handshake(generation)),
        );
    }

    async fn receive(self: Arc<Self>, generation: u64, mut reader: OwnedReadHalf) {
        let mut buf = vec![0u8; self.config.read_buffer_size.max(1)];

        loop {
            match reader.read(&mut buf).await {
                Ok(0) => {
                    debug!("RTMP peer closed the connection");
                    break;
                }
                Ok(n) => {
                    self.counters.record_received(n);
                    self.input_buffer.lock().extend_from_slice(&buf[..n]);
                    self.listen(generation);
                }
                Err(e) => {
                    debug!("RTMP read failed: {}", e);
                    break;
                }
            }
        }

        self.close(Some(generation), true);
    }

    /// Advance the handshake or forward input, depending on the ready state.
    fn listen(&self, generation: u64) {
        loop {
            match self.ready_state.value() {
                RtmpReadyState::VersionSent => {
                    let ack = {
                        let mut input = self.input_buffer.lock();
                        if input.len() < SIG_SIZE + 1 {
                            return;
                        }
                        let ack = self.handshake.lock().derive_ack(&input);
                        input.advance(SIG_SIZE + 1);
                        ack
                    };
                    if !self.advance_ready_state(generation, RtmpReadyState::AckSent) {
                        return;
                    }
                    self.do_output(Some(generation), ack, None);
                }
                RtmpReadyState::AckSent => {
                    {
                        let mut input = self.input_buffer.lock();
                        if input.len() < SIG_SIZE {
                            return;
                        }
                        input.advance(SIG_SIZE);
                    }
                    if !self.advance_ready_state(generation, RtmpReadyState::HandshakeDone) {
                        return;
                    }
                }
                RtmpReadyState::HandshakeDone => {
                    if !self.is_current(generation) {
                        return;
                    }
                    let bytes = {
                        let mut input = self.input_buffer.lock();
                        if input.is_empty() {
                            return;
                        }
                        input.split().freeze()
                    };
                    if let Some(delegate) = self.delegate() {
                        delegate.listen(bytes);
                    }
                    return;
                }
                _ => return,
            }
        }
    }

    async fn run_sampler(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.config.statistics_interval);
        ticker.tick().await;

        loop {
            ticker.tick().await;
            self.sample_statistics();
        }
    }

    fn sample_statistics(&self) -> SocketStatistics {
        let sample = self.counters.drain_interval();
        let snapshot = {
            let mut statistics = self.statistics.write();
            statistics.record(sample);
            statistics.clone()
        };

        if let Some(delegate) = self.delegate() {
            delegate.did_update_statistics(&snapshot);
        }
        snapshot
    }

    async fn watch_handshake(self: Arc<Self>, generation: u64) {
        tokio::time::sleep(self.config.handshake_timeout).await;

        let state = self.ready_state.value();
        if state != RtmpReadyState::HandshakeDone {
            warn!(
                state = state.name(),
                timeout_ms = self.config.handshake_timeout.as_millis() as u64,
                "RTMP handshake timed out"
            );
            self.close(Some(generation), true);
        }
    }
}

/// RTMP client socket.
///
/// Network I/O runs on a tokio runtime; every public method returns without
/// waiting on the network.
pub struct RtmpSocket {
    shared: Arc<Shared>,
    handle: Handle,
    runtime: Option<Runtime>,
}

impl RtmpSocket {
    /// Create a socket with its own I/O runtime.
    pub fn new(config: RtmpSocketConfig) -> TransportResult<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("livecast-rtmp")
            .enable_all()
            .build()
            .map_err(TransportError::Io)?;
        let handle = runtime.handle().clone();

        Ok(Self {
            shared: Self::shared(config),
            handle,
            runtime: Some(runtime),
        })
    }

    /// Create a socket that runs its I/O on an existing runtime.
    pub fn with_handle(config: RtmpSocketConfig, handle: Handle) -> Self {
        Self {
            shared: Self::shared(config),
            handle,
            runtime: None,
        }
    }

    fn shared(config: RtmpSocketConfig) -> Arc<Shared> {
        let window = config.statistics_window;
        Arc::new(Shared {
            config,
            ready_state: Atomic::new(RtmpReadyState::Uninitialized),
            delegate: RwLock::new(None),
            events: Mutex::new(Vec::new()),
            handshake: Mutex::new(Handshake::new()),
            input_buffer: Mutex::new(BytesMut::new()),
            chunk_size_s: Atomic::new(DEFAULT_CHUNK_SIZE),
            chunk_size_c: Atomic::new(DEFAULT_CHUNK_SIZE),
            counters: TrafficCounters::new(),
            statistics: RwLock::new(SocketStatistics::new(window)),
            session: Mutex::new(None),
            generation: AtomicU64::new(0),
            transition: ReentrantMutex::new(()),
        })
    }

    /// Register the single delegate, flushing any events queued without one.
    pub fn set_delegate(&self, delegate: Weak<dyn RtmpSocketDelegate>) {
        *self.shared.delegate.write() = Some(delegate);
        self.shared.flush_events();
    }

    /// Open a connection and start the handshake.
    ///
    /// Failures are reported as a `ConnectFailed` status event.
    #[instrument(name = "rtmp_connect", skip(self))]
    pub fn connect(&self, host: &str, port: u16) {
        let shared = &self.shared;
        let _transition = shared.transition.lock();
        shared.close(None, false);

        shared.handshake.lock().reset();
        shared.set_ready_state(RtmpReadyState::Uninitialized);
        shared.chunk_size_s.swap(DEFAULT_CHUNK_SIZE);
        shared.chunk_size_c.swap(DEFAULT_CHUNK_SIZE);
        shared.counters.reset();
        shared.statistics.write().clear();
        shared.input_buffer.lock().clear();

        let generation = shared.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let (sender, receiver) = mpsc::unbounded_channel();
        *shared.session.lock() = Some(Session {
            generation,
            outbound: sender,
            tasks: Vec::new(),
        });

        info!(host = %host, port = port, "Connecting to RTMP server");
        let addr = format!("{}:{}", host, port);
        let task = self.handle.spawn(Arc::clone(shared).run_connection(
            generation,
            addr,
            receiver,
            self.handle.clone(),
        ));
        shared.attach_task(generation, task);
    }

    /// Close the connection.
    ///
    /// `is_disconnected` queues `ConnectClosed` (after the handshake) or
    /// `ConnectFailed` for the delegate. No-op without a connection.
    #[instrument(name = "rtmp_close", skip(self))]
    pub fn close(&self, is_disconnected: bool) {
        self.shared.close(None, is_disconnected);
    }

    /// Frame a message and queue its chunks in order.
    ///
    /// Returns the message length. Chunks that wait longer than the write
    /// timeout are dropped silently; see [`RtmpSocket::statistics`].
    pub fn send_chunk(&self, chunk: &RtmpChunk, lock: Option<MessageLock>) -> TransportResult<usize> {
        if self.ready_state() != RtmpReadyState::HandshakeDone {
            return Err(TransportError::NotConnected);
        }

        let pieces = chunk.split(self.shared.chunk_size_s.value());
        let last = pieces.len().saturating_sub(1);
        let mut lock = lock;
        if let Some(lock) = &lock {
            lock.acquire();
        }

        for (index, piece) in pieces.into_iter().enumerate() {
            let tag = if index == last { lock.take() } else { None };
            self.shared.do_output(None, piece, tag);
        }

        trace!(
            csid = chunk.chunk_stream_id,
            message_type = chunk.message.message_type,
            bytes = chunk.message.len(),
            "Queued RTMP message"
        );
        Ok(chunk.message.len())
    }

    /// Send Set Chunk Size and switch the outbound chunk size.
    ///
    /// `size` is clamped to `1..=MAX_CHUNK_SIZE`; the clamped value is both
    /// announced and used.
    pub fn announce_chunk_size(&self, size: usize) -> TransportResult<()> {
        let size = size.clamp(1, MAX_CHUNK_SIZE);
        let message = RtmpMessage::set_chunk_size(size);
        let chunk = RtmpChunk::new(ChunkType::Zero, chunk_stream::CONTROL, message);
        self.send_chunk(&chunk, None)?;
        self.shared.chunk_size_s.swap(size);
        debug!(size = size, "Outbound chunk size changed");
        Ok(())
    }

    /// Record the peer's announced chunk size.
    pub fn set_inbound_chunk_size(&self, size: usize) {
        self.shared.chunk_size_c.swap(size.clamp(1, MAX_CHUNK_SIZE));
    }

    pub fn chunk_size_s(&self) -> usize {
        self.shared.chunk_size_s.value()
    }

    pub fn chunk_size_c(&self) -> usize {
        self.shared.chunk_size_c.value()
    }

    pub fn ready_state(&self) -> RtmpReadyState {
        self.shared.ready_state.value()
    }

    pub fn is_connected(&self) -> bool {
        self.shared.session.lock().is_some()
    }

    /// Latest statistics windows.
    pub fn statistics(&self) -> SocketStatistics {
        self.shared.statistics.read().clone()
    }

    /// Take a statistics sample now instead of waiting for the timer.
    pub fn sample_statistics(&self) -> SocketStatistics {
        self.shared.sample_statistics()
    }

    /// Bytes queued but not yet written or discarded.
    pub fn queue_bytes_out(&self) -> i64 {
        self.shared.counters.queue_bytes_out()
    }

    pub fn total_bytes_in(&self) -> i64 {
        self.shared.counters.total_bytes_in()
    }

    pub fn total_bytes_out(&self) -> i64 {
        self.shared.counters.total_bytes_out()
    }
}

impl Drop for RtmpSocket {
    fn drop(&mut self) {
        self.shared.close(None, false);
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rtmp::{message_type, PROTOCOL_VERSION};
    use std::future::Future;
    use std::io::{Read, Write};
    use std::net::{TcpListener, TcpStream as StdTcpStream};
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use std::thread;

    #[derive(Default)]
    struct RecordingDelegate {
        states: Mutex<Vec<RtmpReadyState>>,
        statuses: Mutex<Vec<RtmpStatus>>,
        received: Mutex<Vec<u8>>,
    }

    impl RtmpSocketDelegate for RecordingDelegate {
        fn did_set_ready_state(&self, state: RtmpReadyState) {
            self.states.lock().push(state);
        }

        fn dispatch(&self, status: RtmpStatus) {
            self.statuses.lock().push(status);
        }

        fn listen(&self, bytes: Bytes) {
            self.received.lock().extend_from_slice(&bytes);
        }
    }

    fn register(socket: &RtmpSocket) -> Arc<RecordingDelegate> {
        let delegate = Arc::new(RecordingDelegate::default());
        let weak: Weak<dyn RtmpSocketDelegate> = Arc::downgrade(&delegate) as _;
        socket.set_delegate(weak);
        delegate
    }

    fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while std::time::Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(10));
        }
        condition()
    }

    fn server_response() -> Vec<u8> {
        let mut bytes = vec![PROTOCOL_VERSION];
        bytes.extend((0..SIG_SIZE).map(|i| (i % 251) as u8));
        bytes
    }

    /// Accept one client and answer its handshake. Returns the peer and C1.
    fn complete_handshake(listener: &TcpListener) -> (StdTcpStream, Vec<u8>) {
        let (mut peer, _) = listener.accept().unwrap();
        let mut c0c1 = vec![0u8; SIG_SIZE + 1];
        peer.read_exact(&mut c0c1).unwrap();

        let response = server_response();
        peer.write_all(&response).unwrap();
        let mut c2 = vec![0u8; SIG_SIZE];
        peer.read_exact(&mut c2).unwrap();
        peer.write_all(&c0c1[1..]).unwrap();

        (peer, c0c1[1..].to_vec())
    }

    fn unused_port() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    }

    /// Writer that stalls once before its `stall_at`-th write.
    struct StallingWriter {
        written: Vec<u8>,
        writes: usize,
        stall_at: usize,
        stall: Duration,
        sleep: Option<Pin<Box<tokio::time::Sleep>>>,
    }

    impl AsyncWrite for StallingWriter {
        fn poll_write(
            mut self: Pin<&mut Self>,
            cx: &mut Context<'_>,
            buf: &[u8],
        ) -> Poll<std::io::Result<usize>> {
            let this = &mut *self;
            if this.writes + 1 == this.stall_at {
                let stall = this.stall;
                let sleep = this
                    .sleep
                    .get_or_insert_with(|| Box::pin(tokio::time::sleep(stall)));
                if sleep.as_mut().poll(cx).is_pending() {
                    return Poll::Pending;
                }
                this.sleep = None;
            }
            this.writes += 1;
            this.written.extend_from_slice(buf);
            Poll::Ready(Ok(buf.len()))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_overloaded_link_discards_stale_chunks() {
        let counters = TrafficCounters::new();
        let (sender, receiver) = mpsc::unbounded_channel();

        for index in 0..100u8 {
            counters.record_queued(1000);
            sender
                .send(OutboundChunk::new(Bytes::from(vec![index; 1000]), None))
                .unwrap();
        }
        drop(sender);

        let mut writer = StallingWriter {
            written: Vec::new(),
            writes: 0,
            stall_at: 50,
            stall: Duration::from_millis(600),
            sleep: None,
        };
        drain_outbound(receiver, &mut writer, &counters, Duration::from_millis(500)).await;

        let sample = counters.drain_interval();
        assert_eq!(sample.sent, 50_000);
        assert_eq!(sample.discarded, 50_000);
        assert_eq!(counters.queue_bytes_out(), 0);

        let order: Vec<u8> = writer.written.chunks(1000).map(|c| c[0]).collect();
        assert_eq!(order, (0..50u8).collect::<Vec<_>>());
    }

    #[tokio::test(start_paused = true)]
    async fn test_chunk_at_budget_is_discarded() {
        let counters = TrafficCounters::new();
        let (sender, receiver) = mpsc::unbounded_channel();
        let lock = MessageLock::new();
        lock.acquire();

        counters.record_queued(10);
        sender
            .send(OutboundChunk::new(Bytes::from_static(&[0u8; 10]), Some(lock.clone())))
            .unwrap();
        counters.record_queued(20);
        sender
            .send(OutboundChunk::new(Bytes::from_static(&[1u8; 20]), None))
            .unwrap();
        drop(sender);

        tokio::time::advance(Duration::from_millis(500)).await;
        let mut written: Vec<u8> = Vec::new();
        drain_outbound(receiver, &mut written, &counters, Duration::from_millis(500)).await;

        let sample = counters.drain_interval();
        assert!(written.is_empty());
        assert_eq!(sample.sent, 0);
        assert_eq!(sample.discarded, 30);
        assert!(!lock.is_locked());
    }

    #[tokio::test(start_paused = true)]
    async fn test_fresh_chunk_is_sent() {
        let counters = TrafficCounters::new();
        let (sender, receiver) = mpsc::unbounded_channel();

        counters.record_queued(4);
        sender
            .send(OutboundChunk::new(Bytes::from_static(b"abcd"), None))
            .unwrap();
        drop(sender);

        tokio::time::advance(Duration::from_millis(499)).await;
        let mut written: Vec<u8> = Vec::new();
        drain_outbound(receiver, &mut written, &counters, Duration::from_millis(500)).await;

        assert_eq!(written, b"abcd");
        assert_eq!(counters.drain_interval().sent, 4);
    }

    #[test]
    fn test_handshake_done_after_exact_s2() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let socket = RtmpSocket::new(RtmpSocketConfig::default()).unwrap();
        let delegate = register(&socket);

        socket.connect("127.0.0.1", port);
        let (mut peer, _) = listener.accept().unwrap();

        let mut c0c1 = vec![0u8; SIG_SIZE + 1];
        peer.read_exact(&mut c0c1).unwrap();
        assert_eq!(c0c1[0], PROTOCOL_VERSION);

        let response = server_response();
        peer.write_all(&response).unwrap();
        let mut c2 = vec![0u8; SIG_SIZE];
        peer.read_exact(&mut c2).unwrap();
        assert_eq!(&c2[..], &response[1..]);
        assert!(wait_until(|| socket.ready_state() == RtmpReadyState::AckSent));

        peer.write_all(&c0c1[1..SIG_SIZE]).unwrap();
        thread::sleep(Duration::from_millis(100));
        assert_eq!(socket.ready_state(), RtmpReadyState::AckSent);

        peer.write_all(&c0c1[SIG_SIZE..]).unwrap();
        assert!(wait_until(|| socket.ready_state() == RtmpReadyState::HandshakeDone));

        let states = delegate.states.lock().clone();
        assert_eq!(
            states,
            vec![
                RtmpReadyState::Uninitialized,
                RtmpReadyState::VersionSent,
                RtmpReadyState::AckSent,
                RtmpReadyState::HandshakeDone,
            ]
        );
    }

    #[test]
    fn test_inbound_bytes_forwarded_after_handshake() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let socket = RtmpSocket::new(RtmpSocketConfig::default()).unwrap();
        let delegate = register(&socket);

        socket.connect("127.0.0.1", port);
        let (mut peer, _) = complete_handshake(&listener);
        assert!(wait_until(|| socket.ready_state() == RtmpReadyState::HandshakeDone));

        peer.write_all(b"chunk-stream-bytes").unwrap();
        assert!(wait_until(|| delegate.received.lock().len() == 18));
        assert_eq!(&delegate.received.lock()[..], b"chunk-stream-bytes");
        assert!(socket.total_bytes_in() >= (2 * SIG_SIZE + 1 + 18) as i64);
    }

    #[test]
    fn test_send_before_handshake_is_rejected() {
        let socket = RtmpSocket::new(RtmpSocketConfig::default()).unwrap();
        let chunk = RtmpChunk::new(
            ChunkType::Zero,
            chunk_stream::VIDEO,
            RtmpMessage::new(message_type::VIDEO, 1, 0, Bytes::from_static(b"frame")),
        );

        assert!(matches!(
            socket.send_chunk(&chunk, None),
            Err(TransportError::NotConnected)
        ));
    }

    #[test]
    fn test_message_written_in_chunks() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let socket = RtmpSocket::new(RtmpSocketConfig::default()).unwrap();
        let _delegate = register(&socket);

        socket.connect("127.0.0.1", port);
        let (mut peer, _) = complete_handshake(&listener);
        assert!(wait_until(|| socket.ready_state() == RtmpReadyState::HandshakeDone));

        let payload = Bytes::from(vec![7u8; 300]);
        let chunk = RtmpChunk::new(
            ChunkType::Zero,
            chunk_stream::VIDEO,
            RtmpMessage::new(message_type::VIDEO, 1, 0, payload),
        );
        let lock = MessageLock::new();
        assert_eq!(socket.send_chunk(&chunk, Some(lock.clone())).unwrap(), 300);

        let expected: Vec<u8> = chunk.split(DEFAULT_CHUNK_SIZE).concat();
        let mut received = vec![0u8; expected.len()];
        peer.read_exact(&mut received).unwrap();
        assert_eq!(received, expected);

        assert!(wait_until(|| !lock.is_locked()));
        assert!(wait_until(|| socket.queue_bytes_out() == 0));
        let statistics = socket.sample_statistics();
        assert_eq!(statistics.discarded.total(), 0);
        assert!(statistics.sent.total() >= expected.len() as i64);
    }

    #[test]
    fn test_announce_chunk_size() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let socket = RtmpSocket::new(RtmpSocketConfig::default()).unwrap();
        let _delegate = register(&socket);

        socket.connect("127.0.0.1", port);
        let (mut peer, _) = complete_handshake(&listener);
        assert!(wait_until(|| socket.ready_state() == RtmpReadyState::HandshakeDone));

        socket.announce_chunk_size(4096).unwrap();
        assert_eq!(socket.chunk_size_s(), 4096);

        let mut control = [0u8; 16];
        peer.read_exact(&mut control).unwrap();
        assert_eq!(control[0], chunk_stream::CONTROL as u8);
        assert_eq!(control[7], message_type::SET_CHUNK_SIZE);
        assert_eq!(&control[12..16], &[0x00, 0x00, 0x10, 0x00]);

        socket.announce_chunk_size(usize::MAX).unwrap();
        assert_eq!(socket.chunk_size_s(), MAX_CHUNK_SIZE);
        peer.read_exact(&mut control).unwrap();
        assert_eq!(&control[12..16], &[0x7F, 0xFF, 0xFF, 0xFF]);
    }

    #[test]
    fn test_inbound_chunk_size_is_clamped() {
        let socket = RtmpSocket::new(RtmpSocketConfig::default()).unwrap();

        socket.set_inbound_chunk_size(0);
        assert_eq!(socket.chunk_size_c(), 1);
        socket.set_inbound_chunk_size(usize::MAX);
        assert_eq!(socket.chunk_size_c(), MAX_CHUNK_SIZE);
    }

    #[test]
    fn test_closed_connection_does_not_advance() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let socket = RtmpSocket::new(RtmpSocketConfig::default()).unwrap();
        let delegate = register(&socket);

        socket.connect("127.0.0.1", port);
        let (_peer, _) = listener.accept().unwrap();
        assert!(wait_until(|| socket.ready_state() == RtmpReadyState::VersionSent));
        let generation = socket.shared.generation.load(Ordering::SeqCst);

        socket.close(false);
        assert!(!socket
            .shared
            .advance_ready_state(generation, RtmpReadyState::HandshakeDone));

        assert_eq!(socket.ready_state(), RtmpReadyState::Closed);
        assert_eq!(
            delegate.states.lock().last().copied(),
            Some(RtmpReadyState::Closed)
        );
        assert!(delegate.statuses.lock().is_empty());
    }

    #[test]
    fn test_eager_server_handshake_completes() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let socket = RtmpSocket::new(RtmpSocketConfig::default()).unwrap();
        let _delegate = register(&socket);

        socket.connect("127.0.0.1", port);
        let (mut peer, _) = listener.accept().unwrap();
        // S0+S1+S2 before reading anything from the client.
        let mut response = server_response();
        response.extend(vec![0u8; SIG_SIZE]);
        peer.write_all(&response).unwrap();

        let mut c0c1c2 = vec![0u8; 2 * SIG_SIZE + 1];
        peer.read_exact(&mut c0c1c2).unwrap();
        assert_eq!(c0c1c2[0], PROTOCOL_VERSION);
        assert_eq!(&c0c1c2[SIG_SIZE + 1..], &response[1..SIG_SIZE + 1]);
        assert!(wait_until(|| socket.ready_state() == RtmpReadyState::HandshakeDone));
    }

    #[test]
    fn test_connect_failure_reports_connect_failed() {
        let socket = RtmpSocket::new(RtmpSocketConfig::default()).unwrap();
        let delegate = register(&socket);

        socket.connect("127.0.0.1", unused_port());

        assert!(wait_until(|| socket.ready_state() == RtmpReadyState::Closed));
        assert!(wait_until(|| !delegate.statuses.lock().is_empty()));
        assert_eq!(delegate.statuses.lock()[0], RtmpStatus::ConnectFailed);
        assert!(!socket.is_connected());
    }

    #[test]
    fn test_events_kept_until_delegate_registered() {
        let socket = RtmpSocket::new(RtmpSocketConfig::default()).unwrap();
        socket.connect("127.0.0.1", unused_port());
        assert!(wait_until(|| socket.ready_state() == RtmpReadyState::Closed));

        let delegate = register(&socket);
        assert_eq!(delegate.statuses.lock().clone(), vec![RtmpStatus::ConnectFailed]);
    }

    #[test]
    fn test_peer_close_reports_connect_closed() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let socket = RtmpSocket::new(RtmpSocketConfig::default()).unwrap();
        let delegate = register(&socket);

        socket.connect("127.0.0.1", port);
        let (peer, _) = complete_handshake(&listener);
        assert!(wait_until(|| socket.ready_state() == RtmpReadyState::HandshakeDone));

        drop(peer);
        assert!(wait_until(|| socket.ready_state() == RtmpReadyState::Closed));
        assert_eq!(
            delegate.statuses.lock().clone(),
            vec![RtmpStatus::ConnectSuccess, RtmpStatus::ConnectClosed]
        );
    }

    #[test]
    fn test_silent_peer_hits_handshake_timeout() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let config = RtmpSocketConfig {
            handshake_timeout: Duration::from_millis(200),
            ..Default::default()
        };
        let socket = RtmpSocket::new(config).unwrap();
        let delegate = register(&socket);

        socket.connect("127.0.0.1", port);
        let (_peer, _) = listener.accept().unwrap();

        assert!(wait_until(|| socket.ready_state() == RtmpReadyState::Closed));
        assert_eq!(delegate.statuses.lock().clone(), vec![RtmpStatus::ConnectFailed]);
    }

    #[test]
    fn test_close_is_idempotent() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let socket = RtmpSocket::new(RtmpSocketConfig::default()).unwrap();
        let delegate = register(&socket);

        socket.close(true);
        assert_eq!(socket.ready_state(), RtmpReadyState::Uninitialized);

        socket.connect("127.0.0.1", port);
        let (_peer, _) = complete_handshake(&listener);
        assert!(wait_until(|| socket.ready_state() == RtmpReadyState::HandshakeDone));

        socket.close(false);
        socket.close(true);
        assert_eq!(socket.ready_state(), RtmpReadyState::Closed);
        assert_eq!(delegate.statuses.lock().clone(), vec![RtmpStatus::ConnectSuccess]);
        assert_eq!(socket.queue_bytes_out(), 0);
    }
}
