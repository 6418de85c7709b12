//! Named payloads exchanged through [`Messaging`](crate::Messaging).

use bridge_port::Envelope;
use serde_json::Value;

/// A named payload sent to, or received from, the peer.
#[derive(Clone, Debug, PartialEq)]
pub struct Message {
    /// Logical endpoint the message is addressed to.
    pub name: String,
    /// Payload.
    pub data: Value,
    /// Opaque context passed through to the responder unmodified.
    pub context: Option<Value>,
}

impl Message {
    /// Creates a message without context.
    pub fn new(name: impl Into<String>, data: Value) -> Self {
        Self {
            name: name.into(),
            data,
            context: None,
        }
    }

    /// Attaches pass-through context.
    #[must_use]
    pub fn with_context(mut self, context: Value) -> Self {
        self.context = Some(context);
        self
    }

    pub(crate) fn from_envelope(envelope: &Envelope) -> Self {
        Self {
            name: envelope.name.clone(),
            data: envelope.data_or_null(),
            context: envelope.context.clone(),
        }
    }
}
