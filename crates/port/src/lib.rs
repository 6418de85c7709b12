//! Port and channel abstractions for extension messaging.
//!
//! A [`Port`] is the platform's raw message primitive: ordered, asynchronous
//! and fire-and-forget, with no notion of replies. A [`Channel`] wraps a port
//! and exchanges typed [`Envelope`]s with fan-out delivery and disposal.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

/// Envelope-level channel over a port.
pub mod channel;

/// Wire envelope.
pub mod envelope;

/// Error types.
pub mod error;

pub use channel::{Channel, HandlerId};
pub use envelope::{CorrelationId, Envelope, EnvelopeKind, ErrorInfo};
pub use error::{Error, Result};

use std::fmt::Debug;
use std::pin::Pin;

use futures::Stream;
use serde_json::Value;

/// Raw bidirectional message primitive between two contexts.
///
/// Ports handle:
/// - Ordered, asynchronous delivery of opaque JSON values
/// - Teardown by either peer at any time
pub trait Port: Debug + Send + Sync + 'static {
    /// Name the port was opened with.
    fn name(&self) -> &str;

    /// Enqueue a message for the peer.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Disconnected`] if the port has been torn down.
    fn post_message(&self, message: Value) -> Result<()>;

    /// Stream of messages from the peer.
    ///
    /// The stream ends once the port is disconnected by either side. Callers
    /// should take this stream once; it is not a fan-out.
    fn incoming(&self) -> Pin<Box<dyn Stream<Item = Value> + Send>>;

    /// Tear the port down. Idempotent.
    fn disconnect(&self);
}
