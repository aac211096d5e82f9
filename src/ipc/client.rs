//! JSON-RPC 2.0 client over a pair of byte streams.
//!
//! This module provides `IpcClient`, which multiplexes concurrent calls over
//! one input stream and one output stream. Calls are written in submission
//! order by a writer task; replies are matched back to their callers by id
//! by a reader task, in whatever order they arrive.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::ipc::config::ClientConfig;
use crate::ipc::error::IpcError;
use crate::ipc::id::IdGenerator;
use crate::ipc::method::RpcMethod;
use crate::ipc::pending::{PendingCalls, Settlement};
use crate::ipc::protocol::{JsonRpcRequest, Reply};
use crate::ipc::reader::run_reader;
use crate::ipc::writer::{run_writer, OUTBOUND_QUEUE_CAPACITY};

/// Client lifecycle. `ShutDown` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    NotStarted,
    Running,
    ShutDown,
}

/// Handles owned while the client is running.
struct Loops {
    outbound: mpsc::Sender<JsonRpcRequest>,
    shutdown_tx: watch::Sender<bool>,
    writer: JoinHandle<()>,
    reader: JoinHandle<()>,
}

enum Lifecycle {
    NotStarted,
    Running(Loops),
    ShutDown,
}

/// Cancels a call's registry entry when the call finishes or is dropped.
///
/// Cancelling an entry that was already resolved or drained is a no-op.
struct EntryGuard<'a> {
    pending: &'a PendingCalls,
    id: u64,
}

impl Drop for EntryGuard<'_> {
    fn drop(&mut self) {
        self.pending.cancel(self.id);
    }
}

/// JSON-RPC client for a single long-lived counterparty.
///
/// The counterparty's streams arrive already open. `startup()` binds the
/// client to them; from then on any number of tasks may call through a
/// shared reference (typically `Arc<IpcClient>`).
///
/// # Connection Lifecycle
///
/// - `startup()` - Launch the writer and reader loops on the given streams
/// - `invoke()` / `call()` / `request()` - Send a call and wait for its reply (with timeout)
/// - `shutdown()` - Stop both loops and release every waiting caller
///
/// # Example
///
/// ```ignore
/// use jrpc_pipe::ipc::IpcClient;
/// use serde_json::json;
///
/// let client = IpcClient::new();
/// client.startup(child_stdout, child_stdin).await?;
///
/// let info = client.call("getinfo", json!({})).await?;
///
/// client.shutdown().await;
/// ```
pub struct IpcClient {
    lifecycle: Mutex<Lifecycle>,
    ids: IdGenerator,
    pending: Arc<PendingCalls>,
    /// Request timeout in milliseconds.
    timeout_ms: AtomicU64,
    max_message_size: usize,
}

impl Default for IpcClient {
    fn default() -> Self {
        Self::new()
    }
}

impl IpcClient {
    /// Client with the default configuration (20 second timeout).
    pub fn new() -> Self {
        Self::with_config(ClientConfig::default())
    }

    pub fn with_config(config: ClientConfig) -> Self {
        Self {
            lifecycle: Mutex::new(Lifecycle::NotStarted),
            ids: IdGenerator::new(),
            pending: Arc::new(PendingCalls::new()),
            timeout_ms: AtomicU64::new(duration_to_millis(config.timeout)),
            max_message_size: config.max_message_size,
        }
    }

    fn lock_lifecycle(&self) -> MutexGuard<'_, Lifecycle> {
        self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ClientState {
        match *self.lock_lifecycle() {
            Lifecycle::NotStarted => ClientState::NotStarted,
            Lifecycle::Running(_) => ClientState::Running,
            Lifecycle::ShutDown => ClientState::ShutDown,
        }
    }

    /// Set the request timeout duration.
    ///
    /// Applies to calls issued after this returns. Default is 20 seconds.
    pub fn set_timeout(&self, timeout: Duration) {
        self.timeout_ms
            .store(duration_to_millis(timeout), Ordering::Relaxed);
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms.load(Ordering::Relaxed))
    }

    /// Number of calls currently awaiting a reply.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Launch the writer and reader loops on the counterparty's streams.
    ///
    /// `input` carries replies from the counterparty; `output` carries calls
    /// to it.
    ///
    /// # Errors
    ///
    /// Returns `IpcError::AlreadyStarted` unless the client is `NotStarted`.
    /// A client that was shut down cannot be started again.
    pub async fn startup<R, W>(&self, input: R, output: W) -> Result<(), IpcError>
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let mut lifecycle = self.lock_lifecycle();
        if !matches!(*lifecycle, Lifecycle::NotStarted) {
            return Err(IpcError::AlreadyStarted);
        }

        let (outbound, queue) = mpsc::channel(OUTBOUND_QUEUE_CAPACITY);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let writer = tokio::spawn(run_writer(queue, output, self.max_message_size));
        let reader = tokio::spawn(run_reader(
            input,
            Arc::clone(&self.pending),
            shutdown_rx,
            self.max_message_size,
        ));

        *lifecycle = Lifecycle::Running(Loops {
            outbound,
            shutdown_tx,
            writer,
            reader,
        });
        info!("IPC client started");
        Ok(())
    }

    /// Send a call and wait for its reply, decoding the result into `R`.
    ///
    /// This method:
    /// 1. Assigns the next call id and registers a reply slot for it
    /// 2. Queues the call for the writer loop
    /// 3. Waits for the reply, the timeout, or shutdown, whichever is first
    /// 4. Decodes the result, or converts a carried error
    ///
    /// Use `R = serde_json::Value` to receive the raw result.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - The client is not running, or shuts down while waiting (`IpcError::ClientShutDown`)
    /// - No reply arrives in time (`IpcError::Timeout`)
    /// - The counterparty returns an error (`IpcError::ServerError`)
    /// - Params or result do not (de)serialize (`IpcError::Serialization`)
    /// - The output stream has failed (`IpcError::Protocol`)
    pub async fn invoke<P, R>(&self, method: &str, params: P) -> Result<R, IpcError>
    where
        P: Serialize,
        R: DeserializeOwned,
    {
        let outbound = self.outbound()?;
        let params = serde_json::to_value(params)?;

        let id = self.ids.next();
        // Ids never repeat, so registration only fails once the registry is closed
        let mut slot = self
            .pending
            .register(id)
            .map_err(|_| IpcError::ClientShutDown)?;
        let _entry = EntryGuard {
            pending: &self.pending,
            id,
        };

        let request = JsonRpcRequest::new(method, params, id);
        let window = self.timeout();

        let waited = timeout(window, async {
            // Shutdown settles the slot while the call may still be waiting
            // for room in the queue
            tokio::select! {
                biased;
                settled = &mut slot => {
                    return settled.map_err(|_| IpcError::ClientShutDown);
                }
                sent = outbound.send(request) => {
                    sent.map_err(|_| IpcError::Protocol("outbound queue closed".to_string()))?;
                }
            }
            // The slot is only dropped unsettled if the registry itself goes away
            slot.await.map_err(|_| IpcError::ClientShutDown)
        })
        .await;

        match waited {
            Ok(Ok(Settlement::Reply(reply))) => Self::process_reply(reply),
            Ok(Ok(Settlement::ShutDown)) => Err(IpcError::ClientShutDown),
            Ok(Err(e)) => Err(e),
            Err(_) => {
                debug!("Call {} ({}) timed out after {:?}", id, method, window);
                Err(IpcError::Timeout(window))
            }
        }
    }

    /// Send a call with raw JSON params and return the raw JSON result.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let result = client.call("listpeers", json!({})).await?;
    /// let peers: PeersResponse = serde_json::from_value(result)?;
    /// ```
    pub async fn call(&self, method: &str, params: Value) -> Result<Value, IpcError> {
        self.invoke(method, params).await
    }

    /// Send a typed method call.
    pub async fn request<M>(&self, method: &M) -> Result<M::Response, IpcError>
    where
        M: RpcMethod,
    {
        self.invoke(method.name(), method).await
    }

    /// Stop the client and release every waiting caller.
    ///
    /// Closes the outbound queue (the writer loop flushes what is already
    /// queued, bounded by the client timeout, then exits), signals the
    /// reader loop to stop, and drains the registry so blocked callers get
    /// `IpcError::ClientShutDown`, including callers still waiting for room
    /// in the queue. A loop that does not finish within the grace period is
    /// aborted, which drops its stream. Idempotent. Shutting down a client that
    /// never started makes it unusable as well.
    pub async fn shutdown(&self) {
        let loops = {
            let mut lifecycle = self.lock_lifecycle();
            match std::mem::replace(&mut *lifecycle, Lifecycle::ShutDown) {
                Lifecycle::Running(loops) => Some(loops),
                Lifecycle::NotStarted | Lifecycle::ShutDown => None,
            }
        };

        let released = self.pending.drain_all();

        let Some(Loops {
            outbound,
            shutdown_tx,
            writer,
            reader,
        }) = loops
        else {
            return;
        };

        info!("Shutting down IPC client ({} pending calls released)", released);
        drop(outbound);
        let _ = shutdown_tx.send(true);

        let grace = self.timeout();
        let writer_abort = writer.abort_handle();
        if timeout(grace, writer).await.is_err() {
            warn!("Writer loop did not finish flushing within {:?}, aborting", grace);
            writer_abort.abort();
        }
        let reader_abort = reader.abort_handle();
        if timeout(grace, reader).await.is_err() {
            warn!("Reader loop did not stop within {:?}, aborting", grace);
            reader_abort.abort();
        }
    }

    fn outbound(&self) -> Result<mpsc::Sender<JsonRpcRequest>, IpcError> {
        match &*self.lock_lifecycle() {
            Lifecycle::Running(loops) => Ok(loops.outbound.clone()),
            Lifecycle::NotStarted | Lifecycle::ShutDown => Err(IpcError::ClientShutDown),
        }
    }

    /// Extract the result of a reply, or convert its error.
    fn process_reply<R: DeserializeOwned>(reply: Reply) -> Result<R, IpcError> {
        match reply.outcome {
            Ok(result) => Ok(serde_json::from_value(result)?),
            Err(err) => Err(err.into()),
        }
    }
}

fn duration_to_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
