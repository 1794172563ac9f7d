//! Commands sent from the client to the engine.

use serde::{Deserialize, Serialize};

use crate::types::StreamConfig;

/// Commands that the client can send to the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EngineCommand {
    /// Connect and start publishing with the given configuration.
    Publish { config: StreamConfig },

    /// Stop publishing and release the connection.
    Close,

    /// Request current engine state.
    GetState,

    /// Shutdown the engine completely.
    Shutdown,
}
