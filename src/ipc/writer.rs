//! Outbound writer loop.
//!
//! One task per client owns the output stream. It takes calls off the
//! outbound queue in submission order and fully writes each one before
//! taking the next, so wire order always equals submission order.

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{debug, error, trace};

use crate::ipc::framing::write_frame;
use crate::ipc::protocol::{encode_request, JsonRpcRequest};

/// Capacity of the outbound queue between callers and the writer loop.
pub const OUTBOUND_QUEUE_CAPACITY: usize = 64;

/// Drain `queue` onto `output` until the queue is closed.
///
/// A call that fails to encode is logged and dropped; its caller times out.
/// A failed write means the output stream is gone, so the loop stops and
/// later sends to the queue fail.
pub(crate) async fn run_writer<W>(
    mut queue: mpsc::Receiver<JsonRpcRequest>,
    mut output: W,
    max_message_size: usize,
) where
    W: AsyncWrite + Unpin,
{
    debug!("Writer loop started");

    while let Some(request) = queue.recv().await {
        let frame = match encode_request(&request, max_message_size) {
            Ok(frame) => frame,
            Err(e) => {
                error!(
                    "Dropping call {} ({}): {}",
                    request.id, request.method, e
                );
                continue;
            }
        };

        if let Err(e) = write_frame(&mut output, &frame).await {
            error!(
                "Failed to write call {} ({}): {}",
                request.id, request.method, e
            );
            return;
        }
        trace!("Sent call {} ({})", request.id, request.method);
    }

    if let Err(e) = output.shutdown().await {
        debug!("Failed to close output stream: {}", e);
    }
    debug!("Writer loop stopped");
}
