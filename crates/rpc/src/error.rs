//! Error types for procedures and their clients.

use bridge_port::ErrorInfo;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use thiserror::Error;

/// Result type alias for procedure resolvers.
pub type Result<T> = std::result::Result<T, ProcedureError>;

/// Category of a procedure failure.
///
/// Each code maps to a JSON-RPC 2.0 error number and an HTTP status so the
/// shape on the wire matches what HTTP-based clients expect.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Input could not be parsed.
    ParseError,
    /// Input was parsed but is invalid.
    BadRequest,
    /// Unexpected failure in the resolver.
    InternalServerError,
    /// Not implemented.
    NotImplemented,
    /// Caller is not authenticated.
    Unauthorized,
    /// Caller is not allowed.
    Forbidden,
    /// No such procedure or resource.
    NotFound,
    /// Procedure exists but not with this type.
    MethodNotSupported,
    /// Timed out.
    Timeout,
    /// Conflicting state.
    Conflict,
    /// A precondition did not hold.
    PreconditionFailed,
    /// Input too large.
    PayloadTooLarge,
    /// Rate limited.
    TooManyRequests,
    /// Caller went away before the call finished.
    ClientClosedRequest,
}

impl ErrorCode {
    /// Every code, in declaration order.
    pub const ALL: [Self; 14] = [
        Self::ParseError,
        Self::BadRequest,
        Self::InternalServerError,
        Self::NotImplemented,
        Self::Unauthorized,
        Self::Forbidden,
        Self::NotFound,
        Self::MethodNotSupported,
        Self::Timeout,
        Self::Conflict,
        Self::PreconditionFailed,
        Self::PayloadTooLarge,
        Self::TooManyRequests,
        Self::ClientClosedRequest,
    ];

    /// Wire name, e.g. `NOT_FOUND`.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ParseError => "PARSE_ERROR",
            Self::BadRequest => "BAD_REQUEST",
            Self::InternalServerError => "INTERNAL_SERVER_ERROR",
            Self::NotImplemented => "NOT_IMPLEMENTED",
            Self::Unauthorized => "UNAUTHORIZED",
            Self::Forbidden => "FORBIDDEN",
            Self::NotFound => "NOT_FOUND",
            Self::MethodNotSupported => "METHOD_NOT_SUPPORTED",
            Self::Timeout => "TIMEOUT",
            Self::Conflict => "CONFLICT",
            Self::PreconditionFailed => "PRECONDITION_FAILED",
            Self::PayloadTooLarge => "PAYLOAD_TOO_LARGE",
            Self::TooManyRequests => "TOO_MANY_REQUESTS",
            Self::ClientClosedRequest => "CLIENT_CLOSED_REQUEST",
        }
    }

    /// Parses a wire name.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|code| code.as_str() == name)
    }

    /// JSON-RPC 2.0 error number.
    #[must_use]
    pub const fn json_rpc_code(self) -> i32 {
        match self {
            Self::ParseError => -32700,
            Self::BadRequest => -32600,
            Self::InternalServerError | Self::NotImplemented => -32603,
            Self::Unauthorized => -32001,
            Self::Forbidden => -32003,
            Self::NotFound => -32004,
            Self::MethodNotSupported => -32005,
            Self::Timeout => -32008,
            Self::Conflict => -32009,
            Self::PreconditionFailed => -32012,
            Self::PayloadTooLarge => -32013,
            Self::TooManyRequests => -32029,
            Self::ClientClosedRequest => -32099,
        }
    }

    /// Matching HTTP status.
    #[must_use]
    pub const fn http_status(self) -> u16 {
        match self {
            Self::ParseError | Self::BadRequest => 400,
            Self::InternalServerError => 500,
            Self::NotImplemented => 501,
            Self::Unauthorized => 401,
            Self::Forbidden => 403,
            Self::NotFound => 404,
            Self::MethodNotSupported => 405,
            Self::Timeout => 408,
            Self::Conflict => 409,
            Self::PreconditionFailed => 412,
            Self::PayloadTooLarge => 413,
            Self::TooManyRequests => 429,
            Self::ClientClosedRequest => 499,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error raised by a procedure resolver, or by the router itself.
#[derive(Clone, Debug, Error, PartialEq)]
#[error("{code}: {message}")]
pub struct ProcedureError {
    /// Category.
    pub code: ErrorCode,
    /// Human-readable message.
    pub message: String,
    /// Optional details, not sent over the wire.
    pub cause: Option<Value>,
}

impl ProcedureError {
    /// Creates an error with no cause.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            cause: None,
        }
    }

    /// Attaches a cause.
    #[must_use]
    pub fn with_cause(mut self, cause: Value) -> Self {
        self.cause = Some(cause);
        self
    }

    /// `BAD_REQUEST`.
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::BadRequest, message)
    }

    /// `NOT_FOUND`.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::NotFound, message)
    }

    /// `INTERNAL_SERVER_ERROR`.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalServerError, message)
    }
}

/// Metadata carried in [`ErrorShape::data`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorShapeData {
    /// Wire name of the code.
    pub code: ErrorCode,
    /// HTTP status for the code.
    pub http_status: u16,
    /// Path of the procedure that failed, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

/// A procedure error as it crosses the wire.
///
/// ```json
/// { "code": -32004, "message": "...", "data": { "code": "NOT_FOUND", "httpStatus": 404, "path": "greet" } }
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorShape {
    /// JSON-RPC error number.
    pub code: i32,
    /// Human-readable message.
    pub message: String,
    /// Code name, HTTP status and path.
    pub data: ErrorShapeData,
}

impl ErrorShape {
    /// Builds the wire shape of `error` raised at `path`.
    #[must_use]
    pub fn from_error(error: &ProcedureError, path: Option<&str>) -> Self {
        Self {
            code: error.code.json_rpc_code(),
            message: error.message.clone(),
            data: ErrorShapeData {
                code: error.code,
                http_status: error.code.http_status(),
                path: path.map(str::to_owned),
            },
        }
    }

    /// The error code.
    #[must_use]
    pub const fn error_code(&self) -> ErrorCode {
        self.data.code
    }

    /// Reconstructs the resolver-side error.
    #[must_use]
    pub fn to_procedure_error(&self) -> ProcedureError {
        ProcedureError::new(self.data.code, self.message.clone())
    }
}

impl fmt::Display for ErrorShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.data.code, self.message)
    }
}

impl From<ErrorShape> for ErrorInfo {
    fn from(shape: ErrorShape) -> Self {
        let info = Self::new(shape.data.code.as_str(), shape.message.clone());
        match serde_json::to_value(&shape) {
            Ok(data) => info.with_data(data),
            Err(_) => info,
        }
    }
}

impl From<ErrorInfo> for ErrorShape {
    fn from(info: ErrorInfo) -> Self {
        if let Some(shape) = info
            .data
            .as_ref()
            .and_then(|data| serde_json::from_value::<Self>(data.clone()).ok())
        {
            return shape;
        }

        let code = ErrorCode::from_name(&info.code).unwrap_or(ErrorCode::InternalServerError);
        Self::from_error(&ProcedureError::new(code, info.message), None)
    }
}

/// A data transformer rejected a payload.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("Transform failed: {0}")]
pub struct TransformError(pub String);

impl From<TransformError> for ProcedureError {
    fn from(err: TransformError) -> Self {
        Self::new(ErrorCode::BadRequest, err.0)
    }
}

/// Error surfaced to callers of a [`MessagingLink`](crate::MessagingLink).
#[derive(Clone, Debug, Error)]
pub enum ClientError {
    /// The procedure failed on the server.
    #[error("Procedure error: {0}")]
    Procedure(ErrorShape),

    /// The messaging layer failed, e.g. the channel was disposed.
    #[error("Messaging error: {0}")]
    Messaging(bridge_messaging::Error),

    /// The reply could not be decoded.
    #[error("Decode error: {0}")]
    Decode(String),
}

impl ClientError {
    /// The procedure error code, if the failure maps to one.
    #[must_use]
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            Self::Procedure(shape) => Some(shape.error_code()),
            Self::Messaging(bridge_messaging::Error::Timeout(_)) => Some(ErrorCode::Timeout),
            Self::Messaging(_) => None,
            Self::Decode(_) => Some(ErrorCode::ParseError),
        }
    }

    /// Whether the channel was torn down under the call.
    #[must_use]
    pub const fn is_disposed(&self) -> bool {
        matches!(self, Self::Messaging(err) if err.is_disposed())
    }

    /// The wire shape, for procedure failures.
    #[must_use]
    pub const fn shape(&self) -> Option<&ErrorShape> {
        match self {
            Self::Procedure(shape) => Some(shape),
            _ => None,
        }
    }
}

impl From<bridge_messaging::Error> for ClientError {
    fn from(err: bridge_messaging::Error) -> Self {
        match err {
            bridge_messaging::Error::Remote(info) => Self::Procedure(info.into()),
            other => Self::Messaging(other),
        }
    }
}

impl From<TransformError> for ClientError {
    fn from(err: TransformError) -> Self {
        Self::Decode(err.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_codes_round_trip_by_name() {
        for code in ErrorCode::ALL {
            assert_eq!(ErrorCode::from_name(code.as_str()), Some(code));
            assert_eq!(serde_json::to_value(code).unwrap(), json!(code.as_str()));
        }
        assert_eq!(ErrorCode::from_name("NOPE"), None);
    }

    #[test]
    fn test_shape_wire_format() {
        let error = ProcedureError::not_found("missing");
        let shape = ErrorShape::from_error(&error, Some("user.get"));

        assert_eq!(
            serde_json::to_value(&shape).unwrap(),
            json!({
                "code": -32004,
                "message": "missing",
                "data": { "code": "NOT_FOUND", "httpStatus": 404, "path": "user.get" }
            })
        );
    }

    #[test]
    fn test_shape_survives_error_info() {
        let shape = ErrorShape::from_error(&ProcedureError::bad_request("bad input"), Some("greet"));
        let info = ErrorInfo::from(shape.clone());

        assert_eq!(info.code, "BAD_REQUEST");
        assert_eq!(info.message, "bad input");
        assert_eq!(ErrorShape::from(info), shape);
    }

    #[test]
    fn test_plain_error_info_maps_by_code() {
        let shape = ErrorShape::from(ErrorInfo::new("FORBIDDEN", "no"));
        assert_eq!(shape.error_code(), ErrorCode::Forbidden);
        assert_eq!(shape.code, -32003);

        let shape = ErrorShape::from(ErrorInfo::new("HANDLER_PANICKED", "boom"));
        assert_eq!(shape.error_code(), ErrorCode::InternalServerError);
        assert_eq!(shape.message, "boom");
    }

    #[test]
    fn test_client_error_classification() {
        let disposed = ClientError::from(bridge_messaging::Error::Disposed);
        assert!(disposed.is_disposed());
        assert_eq!(disposed.code(), None);

        let remote = ClientError::from(bridge_messaging::Error::Remote(ErrorInfo::new(
            "CONFLICT", "taken",
        )));
        assert!(!remote.is_disposed());
        assert_eq!(remote.code(), Some(ErrorCode::Conflict));
    }
}
