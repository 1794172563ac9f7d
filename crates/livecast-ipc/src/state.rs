//! Engine and stream state types.

use serde::{Deserialize, Serialize};

/// Ready state of a publishing stream.
///
/// Moves `Initialized → Connected → Publishing` and falls back to
/// `Initialized` whenever the stream closes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum StreamState {
    #[default]
    Initialized,
    Connected,
    Publishing,
}

impl StreamState {
    pub fn name(self) -> &'static str {
        match self {
            Self::Initialized => "Initialized",
            Self::Connected => "Connected",
            Self::Publishing => "Publishing",
        }
    }
}

/// The current state of the engine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub enum EngineState {
    /// Engine is idle, not publishing.
    #[default]
    Idle,

    /// Waiting for the transport to connect.
    Connecting {
        /// Target URL.
        url: String,

        /// Reconnect attempt, 0 for the first connect.
        attempt: u32,
    },

    /// Payload is flowing to the server.
    Live {
        /// Target URL.
        url: String,
    },

    /// The connection was lost and a retry is scheduled.
    Reconnecting {
        /// 1-based attempt number.
        attempt: u32,

        max_attempts: u32,
    },

    /// Engine is stopping.
    Stopping {
        /// Reason for stopping.
        reason: StopReason,
    },

    /// Engine encountered an error.
    Error {
        /// Error message.
        message: String,

        /// Whether a new publish may succeed.
        recoverable: bool,
    },
}

impl EngineState {
    /// Returns true if the engine is in the Idle state.
    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }

    /// Returns true if the engine is currently live.
    pub fn is_live(&self) -> bool {
        matches!(self, Self::Live { .. })
    }

    /// Returns true while a publish is wanted, connected or not.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            Self::Connecting { .. } | Self::Live { .. } | Self::Reconnecting { .. }
        )
    }

    /// Returns true if the engine is stopping.
    pub fn is_stopping(&self) -> bool {
        matches!(self, Self::Stopping { .. })
    }

    /// Returns true if the engine is in an error state.
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error { .. })
    }

    /// Returns a simple string representation of the state.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Idle => "Idle",
            Self::Connecting { .. } => "Connecting",
            Self::Live { .. } => "Live",
            Self::Reconnecting { .. } => "Reconnecting",
            Self::Stopping { .. } => "Stopping",
            Self::Error { .. } => "Error",
        }
    }
}

/// Reason for stopping the stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopReason {
    /// The client asked to close.
    UserRequested,

    /// The engine is shutting down.
    Shutdown,

    /// Reconnecting gave up.
    RetriesExhausted { attempts: u32 },
}

impl StopReason {
    /// Returns a display message for this reason.
    pub fn message(&self) -> String {
        match self {
            Self::UserRequested => "Stream closed by user".to_string(),
            Self::Shutdown => "Engine shutting down".to_string(),
            Self::RetriesExhausted { attempts } => {
                format!("Connection lost after {attempts} reconnect attempts")
            }
        }
    }
}
