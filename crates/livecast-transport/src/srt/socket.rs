//! SRT caller socket with status polling.

use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use bytes::Bytes;
use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::{Mutex, ReentrantMutex, RwLock};
use tracing::{debug, info, instrument, trace, warn};
use url::Url;

use super::native::{SrtApi, SrtHandle};
use super::option::{OptionBinding, OptionValue, SrtOptions, SrtSocketOption};
use super::{SrtSocketConfig, SrtSocketDelegate, SrtSocketStatus};
use crate::atomic::Atomic;
use crate::error::TransportError;
use crate::payload::split_payload;
use crate::stats::{SocketStatistics, TrafficCounters};
use crate::TransportResult;

/// Native handle and output queue of one connect..close cycle.
struct Session {
    handle: Arc<SrtHandle>,
    sender: Sender<Bytes>,
    receiver: Receiver<Bytes>,
    writer: Option<JoinHandle<()>>,
}

struct Shared {
    api: Arc<dyn SrtApi>,
    config: SrtSocketConfig,
    session: RwLock<Option<Session>>,
    retired_writer: Mutex<Option<JoinHandle<()>>>,
    status: Atomic<SrtSocketStatus>,
    running: Atomic<bool>,
    generation: AtomicU64,
    transition: ReentrantMutex<()>,
    delegate: RwLock<Option<Weak<dyn SrtSocketDelegate>>>,
    options: Mutex<SrtOptions>,
    uri: Mutex<Option<Url>>,
    counters: TrafficCounters,
    statistics: RwLock<SocketStatistics>,
}

impl Shared {
    fn delegate(&self) -> Option<Arc<dyn SrtSocketDelegate>> {
        self.delegate.read().as_ref().and_then(Weak::upgrade)
    }

    fn handle(&self) -> Option<Arc<SrtHandle>> {
        self.session.read().as_ref().map(|session| session.handle.clone())
    }

    fn update_status(&self, status: SrtSocketStatus) {
        let previous = self.status.swap(status);
        if previous == status {
            return;
        }
        debug!(from = %previous, to = %status, "SRT status changed");
        if let Some(delegate) = self.delegate() {
            delegate.status(status);
        }
        match status {
            SrtSocketStatus::Broken => {
                warn!("SRT connection broken");
                self.close();
            }
            SrtSocketStatus::Closed => self.stop_running(),
            _ => {}
        }
    }

    fn stop_running(&self) {
        self.running.swap(false);
    }

    fn close(&self) {
        let _transition = self.transition.lock();
        let Some(mut session) = self.session.write().take() else {
            return;
        };
        session.handle.close();

        // Payloads the writer has not picked up leave the queue unsent.
        let abandoned: usize = session.receiver.try_iter().map(|data| data.len()).sum();
        self.counters.record_failed(abandoned);
        *self.retired_writer.lock() = session.writer.take();

        info!(socket = session.handle.raw(), abandoned, "SRT socket closed");
        drop(session);
        self.update_status(SrtSocketStatus::Closed);
    }

    /// Wait for the writer of the last closed session to finish.
    fn join_retired_writer(&self) {
        let Some(writer) = self.retired_writer.lock().take() else {
            return;
        };
        if writer.thread().id() == thread::current().id() {
            return;
        }
        if writer.join().is_err() {
            warn!("SRT writer panicked");
        }
    }

    fn sample_statistics(&self) {
        let sample = self.counters.drain_interval();
        let snapshot = {
            let mut statistics = self.statistics.write();
            statistics.record(sample);
            statistics.clone()
        };
        if let Some(delegate) = self.delegate() {
            delegate.did_update_statistics(&snapshot);
        }
    }

    fn run_polling(self: Arc<Self>, generation: u64) {
        let mut last_sample = Instant::now();
        while self.running.value() {
            {
                let _transition = self.transition.lock();
                if self.generation.load(Ordering::SeqCst) != generation {
                    break;
                }
                match self.handle() {
                    Some(handle) => self.update_status(handle.status()),
                    None => break,
                }
            }
            if last_sample.elapsed() >= self.config.statistics_interval {
                last_sample = Instant::now();
                self.sample_statistics();
            }
            thread::sleep(self.config.poll_interval);
        }
        trace!(generation, "SRT polling stopped");
    }

    /// Send the payloads of one session through that session's handle.
    fn run_writer(self: Arc<Self>, handle: Arc<SrtHandle>, receiver: Receiver<Bytes>) {
        let payload_size = self.config.payload_size;
        for data in receiver.iter() {
            for piece in split_payload(&data, payload_size) {
                if handle.is_closed() {
                    self.counters.record_failed(piece.len());
                    continue;
                }
                match handle.send(&piece) {
                    Ok(_) => self.counters.record_sent(piece.len()),
                    Err(e) => {
                        warn!("SRT send failed: {}", e);
                        self.counters.record_failed(piece.len());
                    }
                }
            }
        }
        trace!(socket = handle.raw(), "SRT writer stopped");
    }
}

/// A caller-mode SRT socket.
///
/// `connect` blocks until the native connect returns. Status is then
/// polled on a background thread and every change is reported to the
/// delegate; a broken connection closes the socket.
pub struct SrtSocket {
    shared: Arc<Shared>,
}

impl SrtSocket {
    pub fn new(api: Arc<dyn SrtApi>, config: SrtSocketConfig) -> Self {
        let statistics = SocketStatistics::new(config.statistics_window);
        Self {
            shared: Arc::new(Shared {
                api,
                config,
                session: RwLock::new(None),
                retired_writer: Mutex::new(None),
                status: Atomic::new(SrtSocketStatus::Init),
                running: Atomic::new(false),
                generation: AtomicU64::new(0),
                transition: ReentrantMutex::new(()),
                delegate: RwLock::new(None),
                options: Mutex::new(SrtOptions::new()),
                uri: Mutex::new(None),
                counters: TrafficCounters::new(),
                statistics: RwLock::new(statistics),
            }),
        }
    }

    pub fn set_delegate(&self, delegate: Weak<dyn SrtSocketDelegate>) {
        *self.shared.delegate.write() = Some(delegate);
    }

    /// Connect to `srt://host:port[?options]`.
    ///
    /// The URL is validated before any native socket exists. Does nothing
    /// if the socket is already open.
    #[instrument(name = "srt_connect", skip(self), fields(uri = %uri))]
    pub fn connect(&self, uri: &Url) -> TransportResult<()> {
        if self.shared.session.read().is_some() {
            debug!("SRT socket already open");
            return Ok(());
        }
        self.shared.join_retired_writer();

        let addr = resolve(uri)?;
        let mut options = SrtOptions::from_uri(uri)?;
        options.insert(SrtSocketOption::RcvSyn, OptionValue::Bool(true))?;
        options.insert(SrtSocketOption::TsbpdMode, OptionValue::Bool(true))?;

        let handle = SrtHandle::create(self.shared.api.clone())?;
        options.configure(&handle, OptionBinding::Pre)?;
        handle.connect(addr)?;

        options.insert(SrtSocketOption::SndSyn, OptionValue::Bool(true))?;
        if let Some(timeout) = self.shared.config.send_timeout {
            options.insert_millis(SrtSocketOption::SndTimeo, timeout)?;
        }
        options.configure(&handle, OptionBinding::Post)?;

        let handle = Arc::new(handle);
        let (sender, receiver) = unbounded();

        let _transition = self.shared.transition.lock();
        let generation = self.shared.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.shared.counters.reset();
        self.shared.statistics.write().clear();
        self.shared.status.swap(SrtSocketStatus::Init);
        *self.shared.options.lock() = options;
        *self.shared.uri.lock() = Some(uri.clone());

        let writer = {
            let shared = self.shared.clone();
            let handle = handle.clone();
            let receiver = receiver.clone();
            thread::Builder::new()
                .name("livecast-srt-writer".to_string())
                .spawn(move || shared.run_writer(handle, receiver))?
        };
        *self.shared.session.write() = Some(Session {
            handle,
            sender,
            receiver,
            writer: Some(writer),
        });
        self.shared.running.swap(true);

        let poller = self.shared.clone();
        thread::Builder::new()
            .name("livecast-srt-poll".to_string())
            .spawn(move || poller.run_polling(generation))?;

        info!(%addr, "SRT socket connected");
        Ok(())
    }

    /// Queue payload; it is sent in pieces of at most the payload size.
    pub fn write(&self, data: Bytes) {
        let session = self.shared.session.read();
        let Some(session) = session.as_ref() else {
            trace!(bytes = data.len(), "SRT write while closed");
            return;
        };
        let len = data.len();
        self.shared.counters.record_queued(len);
        if session.sender.send(data).is_err() {
            self.shared.counters.record_failed(len);
        }
    }

    /// Release the native socket and report `Closed`. Idempotent.
    pub fn close(&self) {
        self.shared.close();
    }

    pub fn status(&self) -> SrtSocketStatus {
        self.shared.status.value()
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.value()
    }

    pub fn is_open(&self) -> bool {
        self.shared.session.read().is_some()
    }

    /// Options applied by the last successful connect.
    pub fn options(&self) -> SrtOptions {
        self.shared.options.lock().clone()
    }

    pub fn uri(&self) -> Option<Url> {
        self.shared.uri.lock().clone()
    }

    pub fn statistics(&self) -> SocketStatistics {
        self.shared.statistics.read().clone()
    }

    /// Take a statistics sample now.
    pub fn sample_statistics(&self) {
        self.shared.sample_statistics();
    }

    pub fn queue_bytes_out(&self) -> i64 {
        self.shared.counters.queue_bytes_out()
    }

    pub fn total_bytes_out(&self) -> i64 {
        self.shared.counters.total_bytes_out()
    }
}

impl Drop for SrtSocket {
    fn drop(&mut self) {
        self.shared.close();
        self.shared.stop_running();
        self.shared.join_retired_writer();
    }
}

fn resolve(uri: &Url) -> TransportResult<SocketAddr> {
    if uri.scheme() != "srt" {
        return Err(TransportError::InvalidUrl(
            "URL must start with srt://".to_string(),
        ));
    }
    let host = uri
        .host_str()
        .ok_or_else(|| TransportError::InvalidUrl("Missing host".to_string()))?;
    let port = uri
        .port()
        .ok_or_else(|| TransportError::InvalidUrl("Missing port".to_string()))?;

    let addrs: Vec<SocketAddr> = (host, port)
        .to_socket_addrs()
        .map_err(|e| TransportError::InvalidUrl(format!("Cannot resolve {}: {}", host, e)))?
        .collect();
    addrs
        .iter()
        .find(|addr| addr.is_ipv4())
        .or_else(|| addrs.first())
        .copied()
        .ok_or_else(|| TransportError::InvalidUrl(format!("No address for {}", host)))
}
