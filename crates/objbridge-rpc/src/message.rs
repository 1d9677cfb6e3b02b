use serde::{Deserialize, Serialize};
use serde_json::Value;

/// An outbound or inbound call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcRequest {
    pub id: u64,
    pub method: String,
    pub params: Vec<Value>,
}

/// Error payload of a failed call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorObject {
    pub message: String,
    /// Structured detail for peers that understand it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ErrorObject {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}

/// The answer to an [`RpcRequest`], matched by `id`.
///
/// Exactly one of `result` and `error` is set on the wire. A present but
/// `null` result deserializes as `None` and is read back as `null`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcResponse {
    pub id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorObject>,
}

impl RpcResponse {
    pub fn ok(id: u64, result: Value) -> Self {
        Self {
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn err(id: u64, error: ErrorObject) -> Self {
        Self {
            id,
            result: None,
            error: Some(error),
        }
    }

    pub fn into_result(self) -> std::result::Result<Value, ErrorObject> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(self.result.unwrap_or(Value::Null)),
        }
    }
}

/// A classified inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum RpcMessage {
    Request(RpcRequest),
    Response(RpcResponse),
}

/// Classify a raw inbound message.
///
/// An object with a `result` or `error` key is a response; one with both
/// `method` and `params` is a request. Anything else yields `Ok(None)` and
/// is meant to be ignored. Classification looks at keys only; a message
/// that classifies but has malformed fields is a JSON error.
pub fn classify(raw: &[u8]) -> serde_json::Result<Option<RpcMessage>> {
    let value: Value = serde_json::from_slice(raw)?;
    let Some(object) = value.as_object() else {
        return Ok(None);
    };

    if object.contains_key("result") || object.contains_key("error") {
        return serde_json::from_value(value).map(|r| Some(RpcMessage::Response(r)));
    }
    if object.contains_key("method") && object.contains_key("params") {
        return serde_json::from_value(value).map(|r| Some(RpcMessage::Request(r)));
    }
    Ok(None)
}
