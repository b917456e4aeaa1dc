//! Error types for the LiveCast environment abstraction.

use thiserror::Error;

/// Errors that can occur in the environment abstraction layer.
#[derive(Debug, Error)]
pub enum EnvError {
    /// The peer went away (closed socket, dropped receiver, failed write)
    #[error("Peer disconnected: {0}")]
    Disconnected(String),

    /// Message serialization failed
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl EnvError {
    /// Creates a disconnect error.
    pub fn disconnected(msg: impl Into<String>) -> Self {
        Self::Disconnected(msg.into())
    }

    /// Returns true if this error means the peer is gone.
    pub fn is_disconnect(&self) -> bool {
        matches!(self, Self::Disconnected(_))
    }
}

impl From<serde_json::Error> for EnvError {
    fn from(err: serde_json::Error) -> Self {
        Self::SerializationError(err.to_string())
    }
}
