//! Error types for the connection and component layers.

use thiserror::Error;

/// Errors raised by the transport layer.
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// Underlying socket I/O failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The connection has been shut down or the peer is gone.
    #[error("Connection closed: {0}")]
    Closed(String),

    /// The connection manager has been shut down.
    #[error("Connection manager has been shut down")]
    ManagerClosed,

    /// A message could not be encoded or decoded.
    #[error("Codec error: {0}")]
    Codec(String),

    /// An inbound frame exceeded the codec's frame limit.
    #[error("Frame of {got} bytes exceeds limit of {limit} bytes")]
    FrameTooLarge { got: usize, limit: usize },
}

impl ConnectionError {
    /// Creates a closed-connection error.
    pub fn closed(msg: impl Into<String>) -> Self {
        Self::Closed(msg.into())
    }

    /// Creates a codec error.
    pub fn codec(msg: impl std::fmt::Display) -> Self {
        Self::Codec(msg.to_string())
    }
}

/// Errors surfaced to a component trying to join, or joined to, a kernel.
#[derive(Debug, Error)]
pub enum ComponentError {
    /// The transport failed before or during the exchange.
    #[error("Connection failed: {0}")]
    Connection(#[from] ConnectionError),

    /// The kernel explicitly refused the join request.
    #[error("Kernel refused connection: {0}")]
    ConnectionRefused(String),

    /// The handshake wait was interrupted (connection died before a reply).
    #[error("Interrupted while waiting for a handshake reply")]
    Interrupted,
}
