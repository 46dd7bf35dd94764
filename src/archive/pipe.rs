//! In-memory pipe between the archive producer and the transport.
//!
//! The producer writes through a blocking [`std::io::Write`] end; the
//! consumer reads [`Bytes`] chunks from an async [`Stream`]. The channel is
//! bounded, so a slow consumer stalls the producer instead of letting the
//! archive pile up in memory.

use bytes::Bytes;
use futures::Stream;
use std::io::{self, Write};
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;

/// Chunks buffered between producer and consumer
pub const PIPE_CAPACITY: usize = 16;

/// Size of each chunk handed to the consumer
pub const CHUNK_SIZE: usize = 64 * 1024; // 64KB

type Chunk = io::Result<Bytes>;

/// Create a connected writer/stream pair.
pub fn archive_pipe() -> (PipeWriter, ArchiveStream) {
    let (tx, rx) = mpsc::channel(PIPE_CAPACITY);
    (
        PipeWriter {
            tx,
            buf: Vec::with_capacity(CHUNK_SIZE),
        },
        ArchiveStream { rx },
    )
}

// =============================================================================
// Producer side
// =============================================================================

/// Blocking write end of the pipe.
///
/// Must be driven from a blocking context (a plain thread or
/// `spawn_blocking`), never from inside an async task.
pub struct PipeWriter {
    tx: mpsc::Sender<Chunk>,
    buf: Vec<u8>,
}

impl PipeWriter {
    fn send_pending(&mut self) -> io::Result<()> {
        if self.buf.is_empty() {
            return Ok(());
        }
        let chunk = std::mem::replace(&mut self.buf, Vec::with_capacity(CHUNK_SIZE));
        self.tx
            .blocking_send(Ok(Bytes::from(chunk)))
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "archive consumer went away"))
    }

    /// Flush buffered bytes and close the pipe; the consumer sees end-of-stream.
    pub fn finish(mut self) -> io::Result<()> {
        self.send_pending()
    }

    /// Abort the stream. The consumer receives `err` instead of end-of-stream.
    pub fn fail(self, err: &io::Error) {
        // Consumer may already be gone, nothing left to tell
        let _ = self
            .tx
            .blocking_send(Err(io::Error::new(err.kind(), err.to_string())));
    }
}

impl Write for PipeWriter {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        let room = CHUNK_SIZE - self.buf.len();
        let n = room.min(data.len());
        self.buf.extend_from_slice(&data[..n]);
        if self.buf.len() >= CHUNK_SIZE {
            self.send_pending()?;
        }
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.send_pending()
    }
}

// =============================================================================
// Consumer side
// =============================================================================

/// Read end of the pipe: a stream of archive chunks.
///
/// An `Err` item means the producer aborted; nothing follows it.
#[derive(Debug)]
pub struct ArchiveStream {
    rx: mpsc::Receiver<Chunk>,
}

impl ArchiveStream {
    /// Drain the whole stream into memory.
    pub async fn collect_bytes(mut self) -> io::Result<Vec<u8>> {
        let mut out = Vec::new();
        while let Some(chunk) = self.rx.recv().await {
            out.extend_from_slice(&chunk?);
        }
        Ok(out)
    }
}

impl Stream for ArchiveStream {
    type Item = Chunk;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}
