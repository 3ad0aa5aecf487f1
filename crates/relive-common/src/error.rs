//! Common error types for relive.

use thiserror::Error;

/// Result type alias using relive's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type for relive operations.
#[derive(Debug, Error)]
pub enum Error {
    /// The relay channel could not be opened. Surfaced to the caller, never retried.
    #[error("relay unavailable: {0}")]
    RelayUnavailable(String),

    /// A session description was rejected or negotiation timed out.
    #[error("negotiation failed: {0}")]
    NegotiationFailed(String),

    /// Connectivity was lost after negotiation.
    #[error("transport error: {0}")]
    TransportError(String),

    /// Playback was requested before anything was captured.
    #[error("recording buffer is empty")]
    EmptyBuffer,

    /// Serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Create a relay-unavailable error from any displayable type.
    pub fn relay_unavailable(msg: impl std::fmt::Display) -> Self {
        Self::RelayUnavailable(msg.to_string())
    }

    /// Create a negotiation error from any displayable type.
    pub fn negotiation(msg: impl std::fmt::Display) -> Self {
        Self::NegotiationFailed(msg.to_string())
    }

    /// Create a transport error from any displayable type.
    pub fn transport(msg: impl std::fmt::Display) -> Self {
        Self::TransportError(msg.to_string())
    }

    /// Create a serialization error from any displayable type.
    pub fn serialization(msg: impl std::fmt::Display) -> Self {
        Self::Serialization(msg.to_string())
    }

    /// Create a config error from any displayable type.
    pub fn config(msg: impl std::fmt::Display) -> Self {
        Self::Config(msg.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization(err)
    }
}
