//! Main engine orchestrator.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::{select, unbounded, Receiver, Sender};
use parking_lot::RwLock;
use tracing::{debug, error, info, instrument, warn};

use livecast_ipc::{
    ConnectionStatus, EngineCommand, EngineEvent, EngineState, StopReason, StreamConfig,
    StreamState,
};
use livecast_transport::{ReconnectPolicy, TransportError, TransportStatus};

use crate::error::EngineResult;
use crate::factory::{reconnect_policy, TransportFactory};
use crate::metrics::MetricsCollector;
use crate::pump::OutputPump;
use crate::stream::{Stream, StreamObserver};

/// Wake-up period for retry timers and metrics.
const TICK: Duration = Duration::from_millis(50);

/// Creates a fresh output pump for each stream.
pub type OutputFactory = Box<dyn Fn() -> Box<dyn OutputPump> + Send>;

enum Notice {
    State(StreamState),
    Status(TransportStatus),
    PublishFailed { message: String, recoverable: bool },
}

/// Forwards one stream's notifications to the engine loop, tagged with
/// the stream's id so late notices from a replaced stream are ignored.
struct Forwarder {
    stream_id: u64,
    notices: Sender<(u64, Notice)>,
}

impl Forwarder {
    fn forward(&self, notice: Notice) {
        let _ = self.notices.send((self.stream_id, notice));
    }
}

impl StreamObserver for Forwarder {
    fn stream_state(&self, state: StreamState) {
        self.forward(Notice::State(state));
    }

    fn transport_status(&self, status: TransportStatus) {
        self.forward(Notice::Status(status));
    }

    fn publish_failed(&self, error: &TransportError) {
        let recoverable = matches!(
            error,
            TransportError::IllegalState(_) | TransportError::Io(_)
        );
        self.forward(Notice::PublishFailed {
            message: error.to_string(),
            recoverable,
        });
    }
}

struct ActiveStream {
    id: u64,
    stream: Stream,
    config: StreamConfig,
    _forwarder: Arc<Forwarder>,
}

/// The publishing engine.
///
/// Runs a command loop that owns at most one [`Stream`], reconnects it
/// with exponential backoff when the connection breaks, and reports
/// state, transport status and metrics as [`EngineEvent`]s.
pub struct Engine {
    command_rx: Receiver<EngineCommand>,
    event_tx: Sender<EngineEvent>,
    notice_tx: Sender<(u64, Notice)>,
    notice_rx: Receiver<(u64, Notice)>,
    state: Arc<RwLock<EngineState>>,
    factory: TransportFactory,
    output: Option<OutputFactory>,
    active: Option<ActiveStream>,
    next_stream_id: u64,
    policy: ReconnectPolicy,
    attempt: u32,
    retry_at: Option<Instant>,
    metrics: MetricsCollector,
}

impl Engine {
    /// Create a new engine.
    pub fn new(command_rx: Receiver<EngineCommand>, event_tx: Sender<EngineEvent>) -> Self {
        let (notice_tx, notice_rx) = unbounded();
        Self {
            command_rx,
            event_tx,
            notice_tx,
            notice_rx,
            state: Arc::new(RwLock::new(EngineState::Idle)),
            factory: TransportFactory::new(),
            output: None,
            active: None,
            next_stream_id: 0,
            policy: ReconnectPolicy::default(),
            attempt: 0,
            retry_at: None,
            metrics: MetricsCollector::default(),
        }
    }

    pub fn with_factory(mut self, factory: TransportFactory) -> Self {
        self.factory = factory;
        self
    }

    /// Producer attached to every stream the engine publishes.
    pub fn with_output<F>(mut self, output: F) -> Self
    where
        F: Fn() -> Box<dyn OutputPump> + Send + 'static,
    {
        self.output = Some(Box::new(output));
        self
    }

    /// Shared view of the engine state.
    pub fn state(&self) -> Arc<RwLock<EngineState>> {
        Arc::clone(&self.state)
    }

    /// Run the engine (blocking).
    #[instrument(name = "engine_run", skip(self))]
    pub fn run(&mut self) {
        info!("Engine starting");
        self.send_event(EngineEvent::Ready);

        let commands = self.command_rx.clone();
        let notices = self.notice_rx.clone();
        loop {
            select! {
                recv(commands) -> command => match command {
                    Ok(command) => {
                        if !self.handle_command(command) {
                            break;
                        }
                    }
                    Err(_) => {
                        info!("Command channel disconnected, shutting down");
                        self.stop_stream(StopReason::Shutdown);
                        break;
                    }
                },
                recv(notices) -> notice => {
                    if let Ok((stream_id, notice)) = notice {
                        self.handle_notice(stream_id, notice);
                    }
                },
                default(TICK) => {}
            }
            self.tick();
        }

        info!("Engine stopped");
    }

    /// Handle a command. Returns false if engine should stop.
    fn handle_command(&mut self, command: EngineCommand) -> bool {
        debug!(?command, "Handling command");

        match command {
            EngineCommand::Publish { config } => self.start_stream(config),
            EngineCommand::Close => self.stop_stream(StopReason::UserRequested),
            EngineCommand::GetState => self.send_state(),
            EngineCommand::Shutdown => {
                self.stop_stream(StopReason::Shutdown);
                self.send_event(EngineEvent::Shutdown);
                return false;
            }
        }

        true
    }

    #[instrument(name = "start_stream", skip(self, config), fields(url = %config.url))]
    fn start_stream(&mut self, config: StreamConfig) {
        // Idempotent: ignore while a publish is in progress
        if self.state.read().is_active() {
            debug!("Already publishing, ignoring publish command");
            return;
        }

        info!("Starting stream");
        let active = match self.build_stream(config) {
            Ok(active) => active,
            Err(e) => {
                error!("Stream setup failed: {}", e);
                self.fail(e.to_string(), e.is_recoverable());
                return;
            }
        };

        self.policy = reconnect_policy(&active.config);
        self.attempt = 0;
        self.retry_at = None;
        self.metrics = MetricsCollector::new(
            active.config.statistics_interval(),
            active.config.insufficient_bandwidth_percent,
        );

        let url = active.config.url.clone();
        active.stream.publish();
        self.active = Some(active);
        self.transition_to(EngineState::Connecting { url, attempt: 0 });
    }

    fn build_stream(&mut self, config: StreamConfig) -> EngineResult<ActiveStream> {
        let transport = self.factory.create(&config)?;
        let mut stream = Stream::new(transport)?;
        if let Some(output) = &self.output {
            stream = stream.with_pump(output());
        }

        self.next_stream_id += 1;
        let forwarder = Arc::new(Forwarder {
            stream_id: self.next_stream_id,
            notices: self.notice_tx.clone(),
        });
        let observer: Arc<dyn StreamObserver> = forwarder.clone();
        stream.set_observer(Arc::downgrade(&observer));

        Ok(ActiveStream {
            id: self.next_stream_id,
            stream,
            config,
            _forwarder: forwarder,
        })
    }

    #[instrument(name = "stop_stream", skip(self))]
    fn stop_stream(&mut self, reason: StopReason) {
        if self.active.is_none() {
            // Leave an error state behind on an explicit close
            if !self.state.read().is_idle() && reason == StopReason::UserRequested {
                self.transition_to(EngineState::Idle);
            }
            debug!("No stream, ignoring stop");
            return;
        }

        info!(?reason, "Stopping stream");
        self.transition_to(EngineState::Stopping {
            reason: reason.clone(),
        });
        self.release_stream();
        self.transition_to(EngineState::Idle);
        info!("Stream stopped");
    }

    fn release_stream(&mut self) {
        self.retry_at = None;
        self.metrics.stop();
        if let Some(active) = self.active.take() {
            active.stream.close();
            // Dropping the stream waits for its lifecycle thread
            drop(active);
        }
    }

    fn handle_notice(&mut self, stream_id: u64, notice: Notice) {
        if self.active.as_ref().map(|a| a.id) != Some(stream_id) {
            debug!(stream_id, "Ignoring notice from a released stream");
            return;
        }

        match notice {
            Notice::State(StreamState::Publishing) => {
                self.attempt = 0;
                self.retry_at = None;
                self.metrics.start();
                let url = self
                    .active
                    .as_ref()
                    .map(|a| a.config.url.clone())
                    .unwrap_or_default();
                info!(%url, "Stream is live");
                self.transition_to(EngineState::Live { url });
            }
            Notice::State(state) => debug!(state = state.name(), "Stream state"),
            Notice::Status(status) => {
                self.send_event(EngineEvent::Transport(connection_status(status)));
                if status == TransportStatus::Broken {
                    self.connection_lost();
                }
            }
            Notice::PublishFailed {
                message,
                recoverable,
            } => {
                if recoverable {
                    warn!("Connect failed: {}", message);
                    self.connection_lost();
                } else {
                    error!("Connect rejected: {}", message);
                    self.release_stream();
                    self.fail(message, false);
                }
            }
        }
    }

    fn connection_lost(&mut self) {
        if !self.state.read().is_active() || self.retry_at.is_some() {
            return;
        }
        self.metrics.stop();

        if self.policy.should_retry(self.attempt) {
            let delay = self.policy.delay_for_attempt(self.attempt);
            self.attempt += 1;
            self.retry_at = Some(Instant::now() + delay);

            warn!(
                attempt = self.attempt,
                delay_ms = delay.as_millis() as u64,
                "Connection lost, reconnecting"
            );
            self.transition_to(EngineState::Reconnecting {
                attempt: self.attempt,
                max_attempts: self.policy.max_attempts,
            });
            self.send_event(EngineEvent::Reconnecting {
                attempt: self.attempt,
                max_attempts: self.policy.max_attempts,
                delay_ms: delay.as_millis() as u64,
            });
        } else {
            let reason = StopReason::RetriesExhausted {
                attempts: self.attempt,
            };
            error!("{}", reason.message());
            self.release_stream();
            self.fail(reason.message(), true);
        }
    }

    fn tick(&mut self) {
        if let Some(retry_at) = self.retry_at {
            if Instant::now() >= retry_at {
                self.retry_at = None;
                if let Some(active) = &self.active {
                    info!(attempt = self.attempt, "Reconnecting");
                    active.stream.publish();
                    let url = active.config.url.clone();
                    self.transition_to(EngineState::Connecting {
                        url,
                        attempt: self.attempt,
                    });
                }
            }
        }

        let interval = match &self.active {
            Some(active) => active.config.metrics_interval(),
            None => return,
        };
        if self.state.read().is_live() && self.metrics.is_due(interval) {
            self.emit_metrics();
        }
    }

    fn emit_metrics(&self) {
        let Some(active) = &self.active else {
            return;
        };
        let statistics = active.stream.statistics();
        let queue_bytes_out = active.stream.transport().queue_bytes_out();
        let metrics = self.metrics.snapshot(&statistics, queue_bytes_out);

        // Check for warnings
        for warning in self.metrics.check_warnings(&metrics) {
            self.send_event(EngineEvent::Warning(warning));
        }
        self.send_event(EngineEvent::Metrics(metrics));

        self.metrics.mark_reported();
    }

    fn fail(&self, message: String, recoverable: bool) {
        self.send_event(EngineEvent::Error {
            recoverable,
            message: message.clone(),
        });
        self.transition_to(EngineState::Error {
            message,
            recoverable,
        });
    }

    fn send_state(&self) {
        let state = self.state.read().clone();
        self.send_event(EngineEvent::StateChanged {
            previous: Box::new(state.clone()),
            current: Box::new(state),
        });
    }

    fn transition_to(&self, new_state: EngineState) {
        let previous = {
            let mut state = self.state.write();
            let prev = state.clone();
            *state = new_state.clone();
            prev
        };

        debug!(
            previous = %previous.name(),
            current = %new_state.name(),
            "State transition"
        );

        self.send_event(EngineEvent::StateChanged {
            previous: Box::new(previous),
            current: Box::new(new_state),
        });
    }

    fn send_event(&self, event: EngineEvent) {
        if let Err(e) = self.event_tx.try_send(event) {
            warn!("Failed to send event: {}", e);
        }
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.release_stream();
    }
}

fn connection_status(status: TransportStatus) -> ConnectionStatus {
    match status {
        TransportStatus::Connecting => ConnectionStatus::Connecting,
        TransportStatus::Connected => ConnectionStatus::Connected,
        TransportStatus::Broken => ConnectionStatus::Broken,
        TransportStatus::Closed => ConnectionStatus::Closed,
    }
}
