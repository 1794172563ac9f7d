//! Stream lifecycle and publishing engine for livecast.
//!
//! [`Stream`] drives one transport through `Initialized → Connected →
//! Publishing` and feeds it from an [`OutputPump`]. [`Engine`] runs the
//! command loop around it: it builds transports from configuration,
//! reconnects with backoff and reports metrics.

mod error;
mod factory;
mod metrics;
mod orchestrator;
mod pump;
mod stream;

pub use error::{EngineError, EngineResult};
pub use factory::{reconnect_policy, TransportFactory};
pub use metrics::MetricsCollector;
pub use orchestrator::{Engine, OutputFactory};
pub use pump::{ChannelPump, OutputPump, PayloadSink};
pub use stream::{Stream, StreamObserver};

use crossbeam_channel::{Receiver, Sender};
use livecast_ipc::{EngineCommand, EngineEvent};

/// Create an engine instance with IPC channels.
pub fn create_engine(
    command_rx: Receiver<EngineCommand>,
    event_tx: Sender<EngineEvent>,
) -> Engine {
    Engine::new(command_rx, event_tx)
}
