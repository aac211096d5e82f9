//! Error types for the IPC layer.
//!
//! `IpcError` is what a caller of [`IpcClient`](super::IpcClient) sees.
//! `CodecError` and `RegistryError` stay inside the transport: the loops log
//! them and carry on, or translate them into an `IpcError` for the one caller
//! they concern.

use std::time::Duration;

use thiserror::Error;

use crate::ipc::protocol::JsonRpcError;

/// Caller-facing error types.
///
/// Each variant is returned only to the caller whose call it concerns.
#[derive(Debug, Error)]
pub enum IpcError {
    /// The client is not running (never started, or shut down).
    #[error("Client is shut down")]
    ClientShutDown,

    /// `startup` was called on a client that already left `NotStarted`.
    #[error("Client already started")]
    AlreadyStarted,

    /// No reply arrived within the configured window.
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    /// The counterparty answered with a JSON-RPC error object.
    #[error("Server error {code}: {message}")]
    ServerError {
        /// JSON-RPC error code
        code: i64,
        /// Error message
        message: String,
        /// Optional additional data
        data: Option<serde_json::Value>,
    },

    /// Transport-level failure attributable to this call.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Parameters could not be serialized, or the result could not be
    /// decoded into the requested type.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<JsonRpcError> for IpcError {
    fn from(err: JsonRpcError) -> Self {
        IpcError::ServerError {
            code: err.code,
            message: err.message,
            data: err.data,
        }
    }
}

/// Framing and message codec failures.
#[derive(Debug, Error)]
pub enum CodecError {
    /// A chunk was not a valid JSON-RPC reply.
    #[error("Malformed message: {0}")]
    Parse(#[source] serde_json::Error),

    /// A reply carried no usable identifier.
    #[error("Reply has no id")]
    MissingId,

    /// A message exceeded the configured size limit.
    #[error("Message size {size} exceeds maximum {max} bytes")]
    Oversized { size: usize, max: usize },

    /// An outbound envelope could not be serialized.
    #[error("Failed to encode message: {0}")]
    Encode(#[source] serde_json::Error),

    /// The underlying stream failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CodecError {
    /// Whether the stream can no longer be read after this error.
    pub fn is_fatal(&self) -> bool {
        matches!(self, CodecError::Io(_))
    }
}

/// Pending-call registry failures.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Call {0} is already registered")]
    Duplicate(u64),

    /// The registry was drained at shutdown and accepts no new calls.
    #[error("Registry is closed")]
    Closed,
}
