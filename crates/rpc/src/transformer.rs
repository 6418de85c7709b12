//! Payload transformation applied on both ends of a call.

use crate::error::TransformError;

use serde_json::Value;

/// Encodes values before they go on the wire and decodes them on arrival.
///
/// Server and client must use matching transformers.
pub trait DataTransformer: Send + Sync + 'static {
    /// Encodes an outgoing value.
    ///
    /// # Errors
    ///
    /// Returns [`TransformError`] if the value cannot be encoded.
    fn serialize(&self, value: Value) -> Result<Value, TransformError>;

    /// Decodes an incoming value.
    ///
    /// # Errors
    ///
    /// Returns [`TransformError`] if the value is not in the expected form.
    fn deserialize(&self, value: Value) -> Result<Value, TransformError>;
}

/// Passes values through unchanged.
#[derive(Clone, Copy, Debug, Default)]
pub struct IdentityTransformer;

impl DataTransformer for IdentityTransformer {
    fn serialize(&self, value: Value) -> Result<Value, TransformError> {
        Ok(value)
    }

    fn deserialize(&self, value: Value) -> Result<Value, TransformError> {
        Ok(value)
    }
}
