//! Double line-break message framing for JSON-RPC over byte streams.
//!
//! Every message is a UTF-8 JSON document followed by two consecutive
//! line feeds. Compact JSON never contains a raw line feed, so the delimiter
//! cannot occur inside a message body.
//!
//! # Wire Format
//!
//! ```text
//! {"jsonrpc":"2.0","id":1,"method":"ping","params":{}}\n
//! \n
//! ```
//!
//! Reads from the underlying stream are not assumed to line up with message
//! boundaries: [`FrameDecoder`] buffers partial input until a delimiter shows
//! up, and a single read may yield several frames.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::warn;

use crate::ipc::error::CodecError;

/// Message terminator.
pub const DELIMITER: &[u8] = b"\n\n";

/// Default maximum message size (100MB) to prevent OOM from a buggy counterparty.
pub const MAX_MESSAGE_SIZE: usize = 100 * 1024 * 1024;

const READ_CHUNK_SIZE: usize = 8 * 1024;

/// Append the delimiter to an encoded message body.
///
/// # Errors
///
/// Returns `CodecError::Oversized` if the body exceeds `max_size`.
pub fn encode_frame(mut body: Vec<u8>, max_size: usize) -> Result<Vec<u8>, CodecError> {
    if body.len() > max_size {
        return Err(CodecError::Oversized {
            size: body.len(),
            max: max_size,
        });
    }
    body.extend_from_slice(DELIMITER);
    Ok(body)
}

/// Write one already-framed message and flush it.
pub async fn write_frame<W>(writer: &mut W, frame: &[u8]) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(frame).await?;
    writer.flush().await
}

/// Incremental splitter for delimiter-terminated messages.
///
/// Bytes are fed in with [`extend`](Self::extend) in whatever sizes the
/// stream produced them; complete frames come out of
/// [`next_frame`](Self::next_frame) without the delimiter.
#[derive(Debug)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
    /// Offset up to which `buffer` is known not to contain a delimiter.
    scanned: usize,
    max_size: usize,
    /// Bytes dropped so far from an oversized frame, if one is being skipped.
    discarding: Option<usize>,
}

impl FrameDecoder {
    pub fn new(max_size: usize) -> Self {
        Self {
            buffer: Vec::new(),
            scanned: 0,
            max_size,
            discarding: None,
        }
    }

    pub fn extend(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Number of buffered bytes not yet returned as a frame.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Pop the next complete frame.
    ///
    /// Returns `None` when more input is needed. Blank frames (extra line
    /// breaks between messages) are skipped. A frame larger than the size
    /// limit is thrown away and reported once as `CodecError::Oversized`.
    pub fn next_frame(&mut self) -> Option<Result<Vec<u8>, CodecError>> {
        loop {
            let start = self.scanned.saturating_sub(DELIMITER.len() - 1);
            let found = self.buffer[start..]
                .windows(DELIMITER.len())
                .position(|w| w == DELIMITER)
                .map(|pos| start + pos);

            let Some(end) = found else {
                self.scanned = self.buffer.len();
                self.shed_oversized();
                return None;
            };

            let mut frame: Vec<u8> = self.buffer.drain(..end + DELIMITER.len()).collect();
            frame.truncate(end);
            self.scanned = 0;

            if let Some(dropped) = self.discarding.take() {
                return Some(Err(CodecError::Oversized {
                    size: dropped + frame.len(),
                    max: self.max_size,
                }));
            }

            if frame.iter().all(u8::is_ascii_whitespace) {
                continue;
            }

            if frame.len() > self.max_size {
                return Some(Err(CodecError::Oversized {
                    size: frame.len(),
                    max: self.max_size,
                }));
            }

            return Some(Ok(frame));
        }
    }

    /// Drop the head of an undelimited buffer once it passes the size limit,
    /// keeping the last byte in case it starts a delimiter.
    fn shed_oversized(&mut self) {
        if self.discarding.is_none() && self.buffer.len() <= self.max_size {
            return;
        }
        let keep_from = self.buffer.len().saturating_sub(DELIMITER.len() - 1);
        let dropped = self.discarding.unwrap_or(0) + keep_from;
        self.buffer.drain(..keep_from);
        self.scanned = self.buffer.len();
        self.discarding = Some(dropped);
    }
}

/// Reads delimiter-terminated frames from an async byte stream.
pub struct FrameReader<R> {
    inner: R,
    decoder: FrameDecoder,
    chunk: Box<[u8]>,
}

impl<R> FrameReader<R>
where
    R: AsyncRead + Unpin,
{
    pub fn new(inner: R, max_size: usize) -> Self {
        Self {
            inner,
            decoder: FrameDecoder::new(max_size),
            chunk: vec![0u8; READ_CHUNK_SIZE].into_boxed_slice(),
        }
    }

    /// Read the next frame from the stream.
    ///
    /// Returns `Ok(None)` once the stream is exhausted. Incomplete trailing
    /// bytes at end of stream are logged and discarded.
    ///
    /// # Errors
    ///
    /// - `CodecError::Oversized` for a frame over the size limit (the reader
    ///   stays usable)
    /// - `CodecError::Io` if the stream fails (the reader is done)
    pub async fn next_frame(&mut self) -> Result<Option<Vec<u8>>, CodecError> {
        loop {
            if let Some(frame) = self.decoder.next_frame() {
                return frame.map(Some);
            }

            let n = self.inner.read(&mut self.chunk).await?;
            if n == 0 {
                let leftover = self.decoder.buffered();
                if leftover > 0 && !self.decoder.buffer.iter().all(u8::is_ascii_whitespace) {
                    warn!("Discarding {} bytes of incomplete message at end of stream", leftover);
                }
                return Ok(None);
            }
            self.decoder.extend(&self.chunk[..n]);
        }
    }
}
