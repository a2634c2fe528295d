//! Logical message schema for Ferry.
//!
//! Messages are the plaintext carried inside an envelope. Requests look like
//! `{type, requestId?, data?}`; replies add either `status: "Success"` with
//! `data`, or an `error` string.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Error text sent when no handler is registered for a message type.
pub const UNSUPPORTED_TYPE: &str = "Unsupported message type";

/// Error text sent when a handler fails.
pub const HANDLER_ERROR: &str = "handler_error";

/// Reply status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Status {
    /// The request was handled.
    Success,
}

/// A logical message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Message type, used to select a handler.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,

    /// Client-chosen correlation id, echoed in replies.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,

    /// Arbitrary payload.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "present"
    )]
    pub data: Option<Value>,

    /// Error text for failed requests.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Reply status.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<Status>,
}

// Keeps an explicit `"data": null` as `Some(Value::Null)` instead of `None`.
fn present<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

fn take_field<T: DeserializeOwned>(fields: &mut Map<String, Value>, key: &str) -> Option<T> {
    fields
        .remove(key)
        .and_then(|value| serde_json::from_value(value).ok())
}

impl Message {
    /// Create a request message.
    #[must_use]
    pub fn request(kind: impl Into<String>) -> Self {
        Self {
            kind: Some(kind.into()),
            ..Self::default()
        }
    }

    /// Set the request id.
    #[must_use]
    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    /// Set the payload.
    #[must_use]
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Create a success reply to `request`.
    #[must_use]
    pub fn success(request: &Message, data: Value) -> Self {
        Self {
            kind: request.kind.clone(),
            request_id: request.request_id.clone(),
            data: Some(data),
            error: None,
            status: Some(Status::Success),
        }
    }

    /// Create an error reply to `request`.
    #[must_use]
    pub fn error(request: &Message, error: impl Into<String>) -> Self {
        Self {
            kind: request.kind.clone(),
            request_id: request.request_id.clone(),
            data: None,
            error: Some(error.into()),
            status: None,
        }
    }

    /// Reply for a message whose type has no handler.
    ///
    /// Only the type is echoed back.
    #[must_use]
    pub fn unsupported(kind: Option<&str>) -> Self {
        Self {
            kind: kind.map(str::to_owned),
            error: Some(UNSUPPORTED_TYPE.to_owned()),
            ..Self::default()
        }
    }

    /// Generic reply for a request whose handler failed.
    #[must_use]
    pub fn handler_error(kind: Option<&str>) -> Self {
        Self {
            kind: kind.map(str::to_owned),
            error: Some(HANDLER_ERROR.to_owned()),
            ..Self::default()
        }
    }

    /// Interpret an arbitrary JSON value as a message.
    ///
    /// Non-objects become an empty message with no type. Fields of an object
    /// are read one by one, so a mistyped `requestId` or `status` is dropped
    /// without losing the `type`.
    #[must_use]
    pub fn from_value(value: Value) -> Self {
        let Value::Object(mut fields) = value else {
            return Self::default();
        };

        Self {
            kind: take_field(&mut fields, "type"),
            request_id: take_field(&mut fields, "requestId"),
            data: fields.remove("data"),
            error: take_field(&mut fields, "error"),
            status: take_field(&mut fields, "status"),
        }
    }

    /// Get the message type.
    #[must_use]
    pub fn kind(&self) -> Option<&str> {
        self.kind.as_deref()
    }

    /// Look up a string field in the payload object.
    #[must_use]
    pub fn data_str(&self, field: &str) -> Option<&str> {
        self.data.as_ref()?.get(field)?.as_str()
    }

    /// Check whether this is an error reply.
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}
