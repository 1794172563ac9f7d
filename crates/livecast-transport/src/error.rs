//! Error types for the transport module.

use thiserror::Error;

/// Errors that can occur during transport operations.
///
/// Only configuration and argument problems surface through this type.
/// Network failures after `connect` returns are reported as status events.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The connection URL is malformed, uses the wrong scheme or lacks a host/port.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// The native layer refused an operation (socket creation, connect).
    #[error("Illegal state: {0}")]
    IllegalState(String),

    /// A socket option or argument could not be applied.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The transport has no established session.
    #[error("Not connected")]
    NotConnected,

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
