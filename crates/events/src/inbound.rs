//! Decoding of post change notifications.
//!
//! Two shapes arrive on the inbound queue:
//!
//! ```text
//! direct:   { "operation": "CREATE", "post": { ... } }
//! wrapped:  { "MessageId": "...", "Message": "{\"_id\":...}",
//!             "MessageAttributes": { "operation": { "Type": "String", "Value": "CREATE" } } }
//! ```
//!
//! The operation is looked up in this order: bus attribute, wrapper
//! attribute, body field.

use serde_json::Value as JsonValue;
use thiserror::Error;

use authors_core::{Operation, Post};

use crate::message::{BusMessage, OPERATION_ATTRIBUTE};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("malformed json in {context}: {message}")]
    MalformedJson { context: &'static str, message: String },

    #[error("missing field: {0}")]
    MissingField(&'static str),

    #[error("unknown operation: {0}")]
    UnknownOperation(String),
}

impl DecodeError {
    fn malformed(context: &'static str, err: impl ToString) -> Self {
        Self::MalformedJson {
            context,
            message: err.to_string(),
        }
    }
}

/// A decoded post change ready for the reconciler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundChange {
    /// Stable id for consumer-side deduplication.
    pub idempotency_key: String,
    pub operation: Operation,
    pub post: Post,
}

impl InboundChange {
    pub fn decode(message: &BusMessage) -> Result<Self, DecodeError> {
        let body: JsonValue =
            serde_json::from_str(message.body()).map_err(|e| DecodeError::malformed("body", e))?;

        let (post_value, wrapper_operation, key) = match body.get("Message") {
            Some(inner) => {
                let post_value = match inner {
                    JsonValue::String(raw) => serde_json::from_str::<JsonValue>(raw)
                        .map_err(|e| DecodeError::malformed("Message", e))?,
                    JsonValue::Object(_) => inner.clone(),
                    _ => return Err(DecodeError::malformed("Message", "expected a string or object")),
                };
                let operation = body
                    .pointer("/MessageAttributes/operation/Value")
                    .and_then(JsonValue::as_str)
                    .map(str::to_string);
                let key = body
                    .get("MessageId")
                    .and_then(JsonValue::as_str)
                    .map(str::to_string);
                (post_value, operation, key)
            }
            None => {
                let post_value = body.get("post").cloned().ok_or(DecodeError::MissingField("post"))?;
                (post_value, None, None)
            }
        };

        let raw_operation = message
            .attribute(OPERATION_ATTRIBUTE)
            .map(str::to_string)
            .or(wrapper_operation)
            .or_else(|| body.get("operation").and_then(JsonValue::as_str).map(str::to_string))
            .ok_or(DecodeError::MissingField("operation"))?;

        let operation: Operation = raw_operation
            .parse()
            .map_err(|_| DecodeError::UnknownOperation(raw_operation.clone()))?;

        let post = decode_post(post_value)?;

        Ok(Self {
            idempotency_key: key.unwrap_or_else(|| message.message_id().to_string()),
            operation,
            post,
        })
    }
}

fn decode_post(value: JsonValue) -> Result<Post, DecodeError> {
    if !value.is_object() {
        return Err(DecodeError::malformed("post", "expected an object"));
    }
    if value.get("_id").is_none() && value.get("id").is_none() {
        return Err(DecodeError::MissingField("post._id"));
    }
    serde_json::from_value(value).map_err(|e| DecodeError::malformed("post", e))
}
