//! Wire envelope exchanged over a channel.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Identifier binding a request or stream to its replies.
///
/// Generated by the initiating side and echoed verbatim by the responder.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(Uuid);

impl CorrelationId {
    /// Generates a fresh random correlation id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for CorrelationId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Kind of an envelope.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EnvelopeKind {
    /// Fire-and-forget message.
    Send,
    /// Request awaiting exactly one response.
    Request,
    /// Response to a request.
    Response,
    /// Opens a stream.
    StreamStart,
    /// One value of a stream.
    StreamData,
    /// Terminal stream error.
    StreamError,
    /// Terminal stream completion.
    StreamEnd,
    /// Caller-side cancellation of a stream.
    Unsubscribe,
}

impl EnvelopeKind {
    /// Returns the wire name of this kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Send => "send",
            Self::Request => "request",
            Self::Response => "response",
            Self::StreamStart => "stream-start",
            Self::StreamData => "stream-data",
            Self::StreamError => "stream-error",
            Self::StreamEnd => "stream-end",
            Self::Unsubscribe => "unsubscribe",
        }
    }
}

impl fmt::Display for EnvelopeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured error carried by `response` and `stream-error` envelopes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// Error code for categorization.
    pub code: String,
    /// Human-readable error message.
    pub message: String,
    /// Optional additional details.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ErrorInfo {
    /// Creates an error without additional details.
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            data: None,
        }
    }

    /// Attaches additional details.
    #[must_use]
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}

impl fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for ErrorInfo {}

/// The unit exchanged on the wire.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    /// What this envelope means.
    pub kind: EnvelopeKind,
    /// Correlation id, absent for `send`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<CorrelationId>,
    /// Logical endpoint or procedure path.
    pub name: String,
    /// Serialized payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    /// Error details for failed responses and stream errors.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
    /// Opaque pass-through context.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,
}

impl Envelope {
    const fn bare(kind: EnvelopeKind, id: Option<CorrelationId>, name: String) -> Self {
        Self {
            kind,
            id,
            name,
            data: None,
            error: None,
            context: None,
        }
    }

    /// Fire-and-forget message.
    pub fn send(name: impl Into<String>, data: Value, context: Option<Value>) -> Self {
        Self {
            data: Some(data),
            context,
            ..Self::bare(EnvelopeKind::Send, None, name.into())
        }
    }

    /// Request expecting one response.
    pub fn request(
        id: CorrelationId,
        name: impl Into<String>,
        data: Value,
        context: Option<Value>,
    ) -> Self {
        Self {
            data: Some(data),
            context,
            ..Self::bare(EnvelopeKind::Request, Some(id), name.into())
        }
    }

    /// Response to a request, carrying either a value or an error.
    pub fn response(
        id: CorrelationId,
        name: impl Into<String>,
        result: std::result::Result<Value, ErrorInfo>,
    ) -> Self {
        let mut envelope = Self::bare(EnvelopeKind::Response, Some(id), name.into());
        match result {
            Ok(data) => envelope.data = Some(data),
            Err(error) => envelope.error = Some(error),
        }
        envelope
    }

    /// Opens a stream.
    pub fn stream_start(
        id: CorrelationId,
        name: impl Into<String>,
        data: Value,
        context: Option<Value>,
    ) -> Self {
        Self {
            data: Some(data),
            context,
            ..Self::bare(EnvelopeKind::StreamStart, Some(id), name.into())
        }
    }

    /// One stream value.
    pub fn stream_data(id: CorrelationId, name: impl Into<String>, data: Value) -> Self {
        Self {
            data: Some(data),
            ..Self::bare(EnvelopeKind::StreamData, Some(id), name.into())
        }
    }

    /// Terminal stream error.
    pub fn stream_error(id: CorrelationId, name: impl Into<String>, error: ErrorInfo) -> Self {
        Self {
            error: Some(error),
            ..Self::bare(EnvelopeKind::StreamError, Some(id), name.into())
        }
    }

    /// Terminal stream completion.
    pub fn stream_end(id: CorrelationId, name: impl Into<String>) -> Self {
        Self::bare(EnvelopeKind::StreamEnd, Some(id), name.into())
    }

    /// Caller-side cancellation.
    pub fn unsubscribe(id: CorrelationId, name: impl Into<String>) -> Self {
        Self::bare(EnvelopeKind::Unsubscribe, Some(id), name.into())
    }

    /// Returns the payload, or `null` when absent.
    #[must_use]
    pub fn data_or_null(&self) -> Value {
        self.data.clone().unwrap_or(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_wire_shape() {
        let id = CorrelationId::new();
        let envelope = Envelope::request(id, "greet", json!({"name": "Ada"}), None);
        let value = serde_json::to_value(&envelope).unwrap();

        assert_eq!(value["kind"], "request");
        assert_eq!(value["id"], id.to_string());
        assert_eq!(value["name"], "greet");
        assert_eq!(value["data"]["name"], "Ada");
        assert!(value.get("error").is_none());
        assert!(value.get("context").is_none());
    }

    #[test]
    fn test_send_has_no_id() {
        let value = serde_json::to_value(Envelope::send("log", json!(1), None)).unwrap();
        assert_eq!(value["kind"], "send");
        assert!(value.get("id").is_none());
    }

    #[test]
    fn test_error_response_decodes() {
        let id = CorrelationId::new();
        let raw = json!({
            "kind": "response",
            "id": id.to_string(),
            "name": "greet",
            "error": { "code": "NOT_FOUND", "message": "missing" }
        });
        let envelope: Envelope = serde_json::from_value(raw).unwrap();

        assert_eq!(envelope.kind, EnvelopeKind::Response);
        assert_eq!(envelope.id, Some(id));
        assert_eq!(envelope.error, Some(ErrorInfo::new("NOT_FOUND", "missing")));
        assert_eq!(envelope.data, None);
    }

    #[test]
    fn test_stream_kinds_are_kebab_case() {
        let id = CorrelationId::new();
        let start = serde_json::to_value(Envelope::stream_start(id, "t", json!({}), None)).unwrap();
        let end = serde_json::to_value(Envelope::stream_end(id, "t")).unwrap();
        assert_eq!(start["kind"], "stream-start");
        assert_eq!(end["kind"], "stream-end");
        assert_eq!(EnvelopeKind::StreamError.to_string(), "stream-error");
    }

    #[test]
    fn test_unknown_kind_is_rejected() {
        let raw = json!({ "kind": "bogus", "name": "x" });
        assert!(serde_json::from_value::<Envelope>(raw).is_err());
    }
}
