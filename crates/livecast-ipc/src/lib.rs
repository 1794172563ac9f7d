//! Typed client<->engine messages for livecast.
//!
//! This crate defines the message and configuration types exchanged
//! between a front end (the CLI) and the publishing engine.

mod commands;
mod events;
mod state;
mod types;

pub use commands::EngineCommand;
pub use events::EngineEvent;
pub use state::{EngineState, StopReason, StreamState};
pub use types::{
    ConfigError, ConnectionStatus, ReconnectConfig, StreamConfig, TransportMetrics, WarningType,
};

use crossbeam_channel::{Receiver, Sender};

/// Channel capacity for commands (client → engine).
pub const COMMAND_CHANNEL_CAPACITY: usize = 64;

/// Channel capacity for events (engine → client).
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Creates a bounded command channel.
pub fn command_channel() -> (Sender<EngineCommand>, Receiver<EngineCommand>) {
    crossbeam_channel::bounded(COMMAND_CHANNEL_CAPACITY)
}

/// Creates a bounded event channel.
pub fn event_channel() -> (Sender<EngineEvent>, Receiver<EngineEvent>) {
    crossbeam_channel::bounded(EVENT_CHANNEL_CAPACITY)
}
