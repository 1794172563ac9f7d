//! Events sent from the engine to the client.

use serde::{Deserialize, Serialize};

use crate::state::EngineState;
use crate::types::{ConnectionStatus, TransportMetrics, WarningType};

/// Events that the engine can send to the client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EngineEvent {
    /// Engine state has changed.
    StateChanged {
        /// Previous state.
        previous: Box<EngineState>,

        /// Current state.
        current: Box<EngineState>,
    },

    /// The transport reported a connection status.
    Transport(ConnectionStatus),

    /// Updated traffic metrics.
    Metrics(TransportMetrics),

    /// Performance warning detected.
    Warning(WarningType),

    /// Error occurred.
    Error {
        /// Whether the error is recoverable.
        recoverable: bool,

        /// Error message.
        message: String,
    },

    /// A reconnect attempt is scheduled.
    Reconnecting {
        /// 1-based attempt number.
        attempt: u32,

        max_attempts: u32,

        /// Wait before the attempt.
        delay_ms: u64,
    },

    /// Engine is ready.
    Ready,

    /// Engine has shut down.
    Shutdown,
}
