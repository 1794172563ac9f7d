//! Output pumps feeding muxed payload into a stream.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use bytes::Bytes;
use crossbeam_channel::{Receiver, RecvTimeoutError};
use tracing::{debug, warn};

/// Receives muxed byte runs from a producer.
pub trait PayloadSink: Send + Sync {
    fn did_output(&self, data: Bytes);
}

/// The encoder/muxer side of a stream.
///
/// Started when the stream reaches `Publishing` and stopped when it
/// leaves it. May be started again after a stop.
pub trait OutputPump: Send {
    fn start(&mut self, sink: Arc<dyn PayloadSink>);
    fn stop(&mut self);
}

/// Forwards byte runs from a channel to the sink on a worker thread.
pub struct ChannelPump {
    receiver: Receiver<Bytes>,
    running: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl ChannelPump {
    /// Poll period for noticing `stop`.
    const POLL_INTERVAL: Duration = Duration::from_millis(50);

    pub fn new(receiver: Receiver<Bytes>) -> Self {
        Self {
            receiver,
            running: Arc::new(AtomicBool::new(false)),
            worker: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

impl OutputPump for ChannelPump {
    fn start(&mut self, sink: Arc<dyn PayloadSink>) {
        if let Some(handle) = self.worker.take() {
            if self.is_running() {
                debug!("Pump already running");
                self.worker = Some(handle);
                return;
            }
            let _ = handle.join();
        }
        self.running.store(true, Ordering::SeqCst);

        let receiver = self.receiver.clone();
        let running = Arc::clone(&self.running);
        let spawned = thread::Builder::new()
            .name("livecast-pump".to_string())
            .spawn(move || {
                let mut forwarded: u64 = 0;
                while running.load(Ordering::SeqCst) {
                    match receiver.recv_timeout(Self::POLL_INTERVAL) {
                        Ok(data) => {
                            forwarded += data.len() as u64;
                            sink.did_output(data);
                        }
                        Err(RecvTimeoutError::Timeout) => {}
                        Err(RecvTimeoutError::Disconnected) => {
                            debug!("Pump input ended");
                            break;
                        }
                    }
                }
                running.store(false, Ordering::SeqCst);
                debug!(forwarded, "Pump stopped");
            });

        match spawned {
            Ok(handle) => self.worker = Some(handle),
            Err(e) => {
                warn!("Failed to start pump: {}", e);
                self.running.store(false, Ordering::SeqCst);
            }
        }
    }

    fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for ChannelPump {
    fn drop(&mut self) {
        self.stop();
    }
}
