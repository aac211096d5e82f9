//! Typed method definitions.
//!
//! A request type names its wire method and the type its result decodes
//! into. Per-method catalogs implement this trait and call
//! [`IpcClient::request`](super::IpcClient::request).

use serde::de::DeserializeOwned;
use serde::Serialize;

/// A JSON-RPC method whose parameters are `Self`.
///
/// ```ignore
/// #[derive(Serialize)]
/// struct ListPeers {
///     #[serde(skip_serializing_if = "Option::is_none")]
///     id: Option<String>,
/// }
///
/// impl RpcMethod for ListPeers {
///     type Response = PeersResponse;
///
///     fn name(&self) -> &'static str {
///         "listpeers"
///     }
/// }
///
/// let peers = client.request(&ListPeers { id: None }).await?;
/// ```
pub trait RpcMethod: Serialize {
    /// Type the reply's `result` decodes into.
    type Response: DeserializeOwned;

    /// Wire method name.
    fn name(&self) -> &'static str;
}
