//! Inbound reader loop.
//!
//! One task per client owns the input stream. Each frame is decoded on the
//! reader task and its registry resolution is handed to a short-lived task,
//! so a slow resolution never holds up the next read. Resolution is a map
//! removal plus a oneshot send; the number of those tasks in flight is
//! still capped at [`MAX_IN_FLIGHT_RESOLUTIONS`].
//!
//! Nothing read from the stream can stop the loop except end of stream, a
//! stream I/O error, or the shutdown signal. On the way out the registry is
//! drained so no caller waits out its timeout for a reply that cannot come.

use std::sync::Arc;

use tokio::io::AsyncRead;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::ipc::error::CodecError;
use crate::ipc::framing::FrameReader;
use crate::ipc::pending::PendingCalls;
use crate::ipc::protocol::{decode_message, Inbound};

/// Upper bound on concurrently running reply resolutions.
pub const MAX_IN_FLIGHT_RESOLUTIONS: usize = 256;

/// Read replies from `input` until end of stream or shutdown.
pub(crate) async fn run_reader<R>(
    input: R,
    pending: Arc<PendingCalls>,
    mut shutdown: watch::Receiver<bool>,
    max_message_size: usize,
) where
    R: AsyncRead + Unpin,
{
    debug!("Reader loop started");

    let mut frames = FrameReader::new(input, max_message_size);
    let mut resolutions = JoinSet::new();

    loop {
        if *shutdown.borrow() {
            debug!("Reader loop stopping on shutdown");
            break;
        }

        let next = tokio::select! {
            biased;
            _ = shutdown.changed() => {
                debug!("Reader loop stopping on shutdown");
                break;
            }
            Some(_) = resolutions.join_next(), if !resolutions.is_empty() => continue,
            next = frames.next_frame() => next,
        };

        match next {
            Ok(Some(frame)) => {
                while resolutions.len() >= MAX_IN_FLIGHT_RESOLUTIONS {
                    resolutions.join_next().await;
                }
                dispatch(&frame, &pending, &mut resolutions);
            }
            Ok(None) => {
                info!("Input stream closed by counterparty");
                break;
            }
            Err(e) if e.is_fatal() => {
                error!("Failed to read from input stream: {}", e);
                break;
            }
            Err(e) => warn!("Dropping unreadable message: {}", e),
        }
    }

    // Let replies already read reach their callers before draining.
    while resolutions.join_next().await.is_some() {}

    let released = pending.drain_all();
    if released > 0 {
        warn!("Released {} pending calls after reader exit", released);
    }
    debug!("Reader loop stopped");
}

/// Decode one frame and, if it is a reply, resolve it on its own task.
fn dispatch(frame: &[u8], pending: &Arc<PendingCalls>, resolutions: &mut JoinSet<()>) {
    match decode_message(frame) {
        Ok(Inbound::Reply(reply)) => {
            let Some(id) = reply.id.as_u64() else {
                warn!("No pending call for reply with id {}", reply.id);
                return;
            };
            let pending = Arc::clone(pending);
            resolutions.spawn(async move {
                pending.resolve(id, reply);
            });
        }
        Ok(Inbound::Notification { method }) => {
            debug!("Ignoring counterparty message: {}", method);
        }
        Err(CodecError::MissingId) => {
            warn!(
                "Dropping reply without id: {}",
                String::from_utf8_lossy(frame)
            );
        }
        Err(e) => warn!("Failed to parse message: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipc::framing::MAX_MESSAGE_SIZE;
    use crate::ipc::pending::Settlement;
    use serde_json::json;
    use std::time::Duration;
    use tokio::io::AsyncWriteExt;
    use tokio::time::timeout;

    /// Test timeout to prevent hanging tests.
    const TEST_TIMEOUT: Duration = Duration::from_secs(5);

    fn settled_result(settlement: Settlement) -> serde_json::Value {
        match settlement {
            Settlement::Reply(reply) => reply.outcome.expect("expected a result"),
            Settlement::ShutDown => panic!("Expected reply, got shutdown"),
        }
    }

    #[tokio::test]
    async fn test_reader_resolves_out_of_order_replies() {
        let pending = Arc::new(PendingCalls::new());
        let rx1 = pending.register(1).unwrap();
        let rx2 = pending.register(2).unwrap();

        let (mut wire, input) = tokio::io::duplex(1024);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let reader = tokio::spawn(run_reader(
            input,
            Arc::clone(&pending),
            shutdown_rx,
            MAX_MESSAGE_SIZE,
        ));

        wire.write_all(b"{\"id\":2,\"result\":\"two\"}\n\n{\"id\":\"1\",\"result\":\"one\"}\n\n")
            .await
            .unwrap();

        let first = timeout(TEST_TIMEOUT, rx1).await.expect("Test timed out").unwrap();
        let second = timeout(TEST_TIMEOUT, rx2).await.expect("Test timed out").unwrap();
        assert_eq!(settled_result(first), json!("one"));
        assert_eq!(settled_result(second), json!("two"));

        drop(wire);
        timeout(TEST_TIMEOUT, reader).await.expect("Test timed out").unwrap();
    }

    #[tokio::test]
    async fn test_reader_survives_garbage_and_strays() {
        let pending = Arc::new(PendingCalls::new());
        let rx = pending.register(3).unwrap();

        let (mut wire, input) = tokio::io::duplex(1024);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let _reader = tokio::spawn(run_reader(
            input,
            Arc::clone(&pending),
            shutdown_rx,
            MAX_MESSAGE_SIZE,
        ));

        wire.write_all(b"this is not json\n\n").await.unwrap();
        wire.write_all(b"{\"result\":{}}\n\n").await.unwrap();
        wire.write_all(b"{\"id\":99,\"result\":{}}\n\n").await.unwrap();
        wire.write_all(b"{\"method\":\"log\",\"params\":{}}\n\n").await.unwrap();
        wire.write_all(b"{\"id\":3,\"result\":{\"ok\":true}}\n\n").await.unwrap();

        let settlement = timeout(TEST_TIMEOUT, rx).await.expect("Test timed out").unwrap();
        assert_eq!(settled_result(settlement), json!({"ok": true}));
        assert!(pending.is_empty());
    }

    #[tokio::test]
    async fn test_reader_drains_registry_at_end_of_stream() {
        let pending = Arc::new(PendingCalls::new());
        let rx = pending.register(4).unwrap();

        let (wire, input) = tokio::io::duplex(64);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let reader = tokio::spawn(run_reader(
            input,
            Arc::clone(&pending),
            shutdown_rx,
            MAX_MESSAGE_SIZE,
        ));

        drop(wire);

        let settlement = timeout(TEST_TIMEOUT, rx).await.expect("Test timed out").unwrap();
        assert!(matches!(settlement, Settlement::ShutDown));
        timeout(TEST_TIMEOUT, reader).await.expect("Test timed out").unwrap();
        assert!(pending.is_closed());
    }

    #[tokio::test]
    async fn test_reader_stops_on_shutdown_signal() {
        let pending = Arc::new(PendingCalls::new());
        let rx = pending.register(5).unwrap();

        // Keep the write side open so only the signal can stop the loop
        let (_wire, input) = tokio::io::duplex(64);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let reader = tokio::spawn(run_reader(
            input,
            Arc::clone(&pending),
            shutdown_rx,
            MAX_MESSAGE_SIZE,
        ));

        shutdown_tx.send(true).unwrap();

        timeout(TEST_TIMEOUT, reader).await.expect("Test timed out").unwrap();
        let settlement = timeout(TEST_TIMEOUT, rx).await.expect("Test timed out").unwrap();
        assert!(matches!(settlement, Settlement::ShutDown));
    }
}
