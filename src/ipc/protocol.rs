//! JSON-RPC 2.0 envelopes and the message codec.
//!
//! Outbound calls are rendered as compact JSON and framed with the
//! double line-break delimiter. Inbound chunks are parsed into either a
//! [`Reply`] (carries an id, plus a result or an error) or a
//! counterparty-initiated notification, which this client does not serve.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ipc::error::CodecError;
use crate::ipc::framing::encode_frame;
use crate::ipc::id::RequestId;

/// JSON-RPC protocol version emitted on every call.
pub const JSONRPC_VERSION: &str = "2.0";

/// Outbound call envelope.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: &'static str,
    pub id: u64,
    pub method: String,
    pub params: Value,
}

impl JsonRpcRequest {
    pub fn new(method: impl Into<String>, params: Value, id: u64) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id,
            method: method.into(),
            params,
        }
    }
}

/// Error object carried by a failed reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Inbound reply envelope: an identifier and exactly one outcome.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub id: RequestId,
    pub outcome: Result<Value, JsonRpcError>,
}

/// A decoded inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Reply(Reply),
    /// Message initiated by the counterparty (it has a `method`).
    Notification { method: String },
}

#[derive(Deserialize)]
struct RawMessage {
    #[serde(default)]
    id: Option<RequestId>,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<JsonRpcError>,
}

/// Encode a call into a delimiter-terminated frame.
///
/// # Errors
///
/// - `CodecError::Encode` if serialization fails
/// - `CodecError::Oversized` if the encoded call exceeds `max_size`
pub fn encode_request(request: &JsonRpcRequest, max_size: usize) -> Result<Vec<u8>, CodecError> {
    let body = serde_json::to_vec(request).map_err(CodecError::Encode)?;
    encode_frame(body, max_size)
}

/// Decode one frame (without its delimiter).
///
/// A missing or `null` result decodes as `Value::Null`. If a reply carries
/// both a result and an error, the error wins.
///
/// # Errors
///
/// - `CodecError::Parse` if the chunk is not a JSON object of the expected shape
/// - `CodecError::MissingId` if a reply has no usable identifier
pub fn decode_message(frame: &[u8]) -> Result<Inbound, CodecError> {
    let raw: RawMessage = serde_json::from_slice(frame).map_err(CodecError::Parse)?;

    if let Some(method) = raw.method {
        return Ok(Inbound::Notification { method });
    }

    let id = match raw.id {
        Some(id) if !id.is_absent() => id,
        _ => return Err(CodecError::MissingId),
    };

    let outcome = match raw.error {
        Some(error) => Err(error),
        None => Ok(raw.result.unwrap_or(Value::Null)),
    };

    Ok(Inbound::Reply(Reply { id, outcome }))
}
