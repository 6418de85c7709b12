//! Payloads carried inside messaging envelopes.

use crate::error::ErrorShape;
use crate::procedure::ProcedureType;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A procedure call as sent by the link.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    /// Procedure type.
    #[serde(rename = "type")]
    pub procedure_type: ProcedureType,
    /// Procedure path.
    pub path: String,
    /// Transformed input.
    #[serde(default)]
    pub input: Value,
    /// Link-local operation number.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    /// Caller-supplied context.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,
}

/// Discriminates what a [`ProcedureResult`] carries.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultKind {
    /// A value.
    #[default]
    Data,
    /// The subscription is live.
    Started,
    /// The subscription ended normally.
    Stopped,
}

/// Successful half of a [`ResponseMessage`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProcedureResult {
    /// What this result means. Absent on the wire means data.
    #[serde(rename = "type", default)]
    pub kind: ResultKind,
    /// Transformed value, for data results.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Reply to an operation, or one event of a subscription.
///
/// Serialized as `{"result": {...}}` or `{"error": {...}}`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseMessage {
    /// Success.
    Result(ProcedureResult),
    /// Failure.
    Error(ErrorShape),
}

impl ResponseMessage {
    /// A data result.
    #[must_use]
    pub const fn data(data: Value) -> Self {
        Self::Result(ProcedureResult {
            kind: ResultKind::Data,
            data: Some(data),
        })
    }

    /// Subscription started marker.
    #[must_use]
    pub const fn started() -> Self {
        Self::Result(ProcedureResult {
            kind: ResultKind::Started,
            data: None,
        })
    }

    /// Subscription stopped marker.
    #[must_use]
    pub const fn stopped() -> Self {
        Self::Result(ProcedureResult {
            kind: ResultKind::Stopped,
            data: None,
        })
    }

    /// An error.
    #[must_use]
    pub const fn error(shape: ErrorShape) -> Self {
        Self::Error(shape)
    }

    /// Encodes for an envelope.
    ///
    /// # Errors
    ///
    /// Fails only if a payload cannot be represented as JSON.
    pub fn to_value(&self) -> serde_json::Result<Value> {
        serde_json::to_value(self)
    }
}
