//! Error types for the messaging layer.

use bridge_port::ErrorInfo;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for messaging operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error code sent back when a responder panics.
pub const HANDLER_PANICKED: &str = "HANDLER_PANICKED";

/// Error code used when a `stream-error` envelope carries no details.
pub const UNKNOWN_ERROR: &str = "UNKNOWN_ERROR";

/// Main error type for messaging operations.
#[derive(Clone, Debug, Error)]
pub enum Error {
    /// The channel was torn down while the call was outstanding.
    #[error("Channel disposed")]
    Disposed,

    /// The responder answered with an error.
    #[error("Remote error: {0}")]
    Remote(ErrorInfo),

    /// No response arrived in time.
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    /// The channel rejected an envelope.
    #[error("Channel error: {0}")]
    Channel(Arc<bridge_port::Error>),
}

impl Error {
    /// Whether this error was caused by channel disposal.
    ///
    /// Disposal errors are the only ones worth retrying on a fresh channel.
    #[must_use]
    pub const fn is_disposed(&self) -> bool {
        matches!(self, Self::Disposed)
    }

    /// The remote error details, if the responder produced this error.
    #[must_use]
    pub const fn remote(&self) -> Option<&ErrorInfo> {
        match self {
            Self::Remote(info) => Some(info),
            _ => None,
        }
    }
}

impl From<bridge_port::Error> for Error {
    fn from(err: bridge_port::Error) -> Self {
        match err {
            bridge_port::Error::Disposed | bridge_port::Error::Disconnected => Self::Disposed,
            other => Self::Channel(Arc::new(other)),
        }
    }
}

impl From<ErrorInfo> for Error {
    fn from(info: ErrorInfo) -> Self {
        Self::Remote(info)
    }
}
