//! IPC client for JSON-RPC communication with a long-lived counterparty.
//!
//! This module provides the Rust-side transport for talking JSON-RPC 2.0 to
//! a single process over a pair of already-open byte streams (its stdout
//! and stdin, a Unix socket, a pipe pair).
//!
//! # Architecture
//!
//! ```text
//!  callers ──► IpcClient::invoke ──► outbound queue ──► writer loop ──► output stream
//!     ▲                │
//!     │           PendingCalls (id -> reply slot)
//!     │                ▲
//!     └──── reply ─────┴──── reader loop ◄── input stream
//! ```
//!
//! Calls are written strictly in submission order. Replies may arrive in any
//! order and are paired with their callers by id.
//!
//! # Protocol
//!
//! Each message is compact JSON terminated by two line feeds:
//!
//! ```text
//! {"jsonrpc":"2.0","id":1,"method":"ping","params":{}}\n
//! \n
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use jrpc_pipe::ipc::IpcClient;
//! use serde_json::json;
//!
//! let client = IpcClient::new();
//! client.startup(stdout_of_counterparty, stdin_of_counterparty).await?;
//! let result = client.call("getinfo", json!({})).await?;
//! client.shutdown().await;
//! ```

mod client;
mod config;
mod error;
mod framing;
mod id;
mod method;
mod pending;
mod protocol;
mod reader;
mod writer;

pub use client::{ClientState, IpcClient};
pub use config::{ClientConfig, DEFAULT_TIMEOUT_SECS, MAX_MESSAGE_SIZE_ENV, TIMEOUT_ENV};
pub use error::{CodecError, IpcError, RegistryError};
pub use framing::{encode_frame, write_frame, FrameDecoder, FrameReader, DELIMITER, MAX_MESSAGE_SIZE};
pub use id::{IdGenerator, RequestId};
pub use method::RpcMethod;
pub use pending::{PendingCalls, Settlement};
pub use protocol::{decode_message, encode_request, Inbound, JsonRpcError, JsonRpcRequest, Reply};
pub use writer::OUTBOUND_QUEUE_CAPACITY;
