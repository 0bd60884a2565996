//! Response envelope codec
//!
//! Every reply the agent publishes is one of two JSON shapes:
//! ```text
//! {"data": {"status": "...", "result": ...}}
//! {"error": {"message": "...", "errors": [...]}}
//! ```
//!
//! The enum makes the third shape (both or neither) unrepresentable.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Errors that can occur while encoding envelopes
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("JSON encode error: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Two-variant response envelope: success data or error, never both
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Envelope {
    #[serde(rename = "data")]
    Data(ResponseData),
    #[serde(rename = "error")]
    Error(ResponseError),
}

/// Success payload; `result` is absent on the early acknowledgement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseData {
    pub status: ResponseStatus,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub result: Option<Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStatus {
    Received,
    Complete,
}

/// Failure payload; `errors` carries kind-specific detail values
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseError {
    pub message: String,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub errors: Vec<Value>,
}

impl Envelope {
    /// Acknowledgement published before a command is dispatched
    pub fn received() -> Self {
        Envelope::Data(ResponseData {
            status: ResponseStatus::Received,
            result: None,
        })
    }

    /// Terminal envelope for a successful invocation
    pub fn complete(result: Value) -> Self {
        Envelope::Data(ResponseData {
            status: ResponseStatus::Complete,
            result: Some(result),
        })
    }

    /// Terminal envelope for a failed invocation
    pub fn error(message: impl Into<String>, errors: Vec<Value>) -> Self {
        Envelope::Error(ResponseError {
            message: message.into(),
            errors,
        })
    }

    /// Serialize for publication
    pub fn to_bytes(&self) -> Result<Bytes, CodecError> {
        Ok(Bytes::from(serde_json::to_vec(self)?))
    }
}

/// Best-effort extraction of `{"args": [...], "kwargs": {...}}` from an
/// inbound payload
///
/// Both fields are optional. A malformed or non-object payload yields empty
/// args and kwargs; this function never fails.
pub fn parse_payload(payload: &[u8]) -> (Vec<Value>, Map<String, Value>) {
    #[derive(Default, Deserialize)]
    struct Request {
        #[serde(default)]
        args: Vec<Value>,
        #[serde(default)]
        kwargs: Map<String, Value>,
    }

    let request: Request = serde_json::from_slice(payload).unwrap_or_default();
    (request.args, request.kwargs)
}
