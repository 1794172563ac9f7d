//! Error types for the engine.

use thiserror::Error;

use livecast_ipc::ConfigError;
use livecast_transport::TransportError;

/// Errors raised while setting up a stream.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The URL asks for SRT but no SRT library is available.
    #[error("SRT support is not available in this build")]
    SrtUnavailable,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    /// Whether retrying the same configuration may succeed.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Transport(TransportError::IllegalState(_))
                | Self::Transport(TransportError::Io(_))
                | Self::Io(_)
        )
    }
}

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;
