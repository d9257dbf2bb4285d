//! Error types for relay backends.

use thiserror::Error;

/// Relay error type.
#[derive(Error, Debug)]
pub enum RelayError {
    /// No transport is registered for the configured protocol
    #[error("Unsupported client protocol: '{0}'")]
    UnsupportedProtocol(String),

    /// Protocol-specific options failed validation
    #[error("Invalid options for destination '{destination}': {reason}")]
    InvalidOptions { destination: String, reason: String },

    /// Message routed to a destination id that was never configured
    #[error("Unknown destination: {0}")]
    UnknownDestination(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Transport-level failure (send, connect)
    #[error("Transport error: {0}")]
    Transport(String),

    /// Send attempted on a transport that has no live connection
    #[error("Transport not connected")]
    NotConnected,

    /// The backend task is gone
    #[error("Backend '{0}' is closed")]
    BackendClosed(String),

    /// IO error (socket, file operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for relay operations.
pub type RelayResult<T> = Result<T, RelayError>;
