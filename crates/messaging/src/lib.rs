//! Request/response and streaming messaging between two extension contexts.
//!
//! [`Messaging`] turns a fire-and-forget [`Channel`](bridge_port::Channel)
//! into a bidirectional call layer: every request and stream carries a
//! correlation id, replies are matched back through a per-channel
//! [`CorrelationRegistry`], and disposing the channel fails everything still
//! outstanding.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

/// Error types.
pub mod error;

/// Responder traits.
pub mod handler;

/// Named payloads.
pub mod message;

/// The messaging core and its builder.
pub mod messaging;

/// Correlation of replies to outstanding calls.
pub mod registry;

/// Caller-side stream lifecycle.
pub mod state;

/// Responder-side stream handle.
pub mod subscriber;

/// Caller-side stream handle.
pub mod subscription;

pub use error::{Error, HANDLER_PANICKED, Result, UNKNOWN_ERROR};
pub use handler::{Cleanup, RequestHandler, StreamHandler};
pub use message::Message;
pub use messaging::{Messaging, MessagingBuilder, MessagingOptions};
pub use registry::{ActiveSubscription, CorrelationRegistry};
pub use state::{CallEvent, CallState};
pub use subscriber::Subscriber;
pub use subscription::{StreamCanceller, StreamSubscription};
