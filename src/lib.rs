//! jrpc-pipe Library
//!
//! Client-side JSON-RPC 2.0 transport for talking to one long-lived
//! counterparty process over a pair of byte streams:
//!
//! - `ipc` - framing, message codec, reply correlation, and the `IpcClient`
//!
//! # IPC Module
//!
//! ```ignore
//! use jrpc_pipe::ipc::{ClientConfig, IpcClient};
//!
//! let client = IpcClient::with_config(ClientConfig::from_env());
//! client.startup(input, output).await?;
//! let result = client.call("getinfo", serde_json::json!({})).await?;
//! client.shutdown().await;
//! ```

pub mod ipc;
