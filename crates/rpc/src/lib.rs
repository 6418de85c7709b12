//! Typed procedure calls and subscriptions over a messaging channel.
//!
//! A background context exposes a [`Router`] with
//! [`apply_messaging_handler`]; a UI context calls it through a
//! [`MessagingLink`]. Queries and mutations travel as requests, subscriptions
//! as streams, and procedure failures cross the channel as an [`ErrorShape`].
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

/// Error codes, procedure errors and their wire shape.
pub mod error;

/// Client link.
pub mod link;

/// Wire payloads.
pub mod message;

/// Push streams with teardown.
pub mod observable;

/// Procedures and routing.
pub mod procedure;

/// Server handler.
pub mod server;

/// Payload transformers.
pub mod transformer;

pub use error::{
    ClientError, ErrorCode, ErrorShape, ErrorShapeData, ProcedureError, Result, TransformError,
};
pub use link::{MessagingLink, MessagingLinkOptions};
pub use message::{Operation, ProcedureResult, ResponseMessage, ResultKind};
pub use observable::{
    Emitter, FnObserver, Observable, ObservableStream, Observer, Teardown, Unsubscribable,
};
pub use procedure::{ProcedureCall, ProcedureOutput, ProcedureType, Router};
pub use server::{MessagingHandlerOptions, apply_messaging_handler};
pub use transformer::{DataTransformer, IdentityTransformer};
