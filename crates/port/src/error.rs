//! Error types for ports and channels.

use thiserror::Error;

/// Result type alias for port and channel operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by ports and channels.
#[derive(Debug, Error)]
pub enum Error {
    /// The underlying port has been disconnected by either peer.
    #[error("Port disconnected")]
    Disconnected,

    /// A message exceeded the port's size limit.
    #[error("Message size {size} exceeds maximum {max}")]
    MessageTooLarge {
        /// Size of the serialized message.
        size: usize,
        /// Maximum allowed size.
        max: usize,
    },

    /// The channel was disposed before the operation could run.
    #[error("Channel disposed")]
    Disposed,

    /// An envelope could not be converted to or from its wire value.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
