//! The process's own stdin/stdout as one local endpoint.
//!
//! Stdin is read on a detached OS thread that feeds a channel. A blocked
//! read there never holds up the session or runtime shutdown: once the
//! remote side closes, the process can exit with stdin still open.

use std::io::{self, Read};
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf, Stdout};
use tokio::sync::mpsc;
use tracing::debug;

const STDIN_CHUNK: usize = 32 * 1024;

/// Chunks in flight between the reader thread and the session.
const STDIN_QUEUE: usize = 16;

/// Reads from `R` and writes to `W`, presented as a single duplex endpoint
/// so it can be spliced like a socket.
pub struct StdioStream<R = ThreadReader, W = Stdout> {
    reader: R,
    writer: W,
}

impl StdioStream {
    pub fn new() -> Self {
        Self {
            reader: ThreadReader::spawn(io::stdin()),
            writer: tokio::io::stdout(),
        }
    }
}

impl Default for StdioStream {
    fn default() -> Self {
        Self::new()
    }
}

impl<R, W> StdioStream<R, W> {
    pub fn from_parts(reader: R, writer: W) -> Self {
        Self { reader, writer }
    }
}

/// Async view of a blocking reader driven by its own thread.
///
/// Dropping it does not stop the thread; the thread exits on its next
/// read once the channel is closed, or with the process.
pub struct ThreadReader {
    rx: mpsc::Receiver<io::Result<Vec<u8>>>,
    pending: Vec<u8>,
    offset: usize,
}

impl ThreadReader {
    pub fn spawn<R>(mut source: R) -> Self
    where
        R: Read + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(STDIN_QUEUE);
        let spawned = std::thread::Builder::new()
            .name("vmfwd-stdin".into())
            .spawn(move || {
                let mut buf = vec![0u8; STDIN_CHUNK];
                loop {
                    let chunk = match source.read(&mut buf) {
                        Ok(0) => break,
                        Ok(n) => Ok(buf[..n].to_vec()),
                        Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                        Err(e) => Err(e),
                    };
                    let failed = chunk.is_err();
                    if tx.blocking_send(chunk).is_err() || failed {
                        break;
                    }
                }
            });

        // On failure the closure, and with it the sender, is dropped, so
        // reads see end of input.
        if let Err(e) = spawned {
            debug!(error = %e, "cannot spawn stdin reader thread");
        }
        Self {
            rx,
            pending: Vec::new(),
            offset: 0,
        }
    }
}

impl AsyncRead for ThreadReader {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if self.offset >= self.pending.len() {
            match self.rx.poll_recv(cx) {
                Poll::Pending => return Poll::Pending,
                // Thread finished: end of input.
                Poll::Ready(None) => return Poll::Ready(Ok(())),
                Poll::Ready(Some(Err(e))) => return Poll::Ready(Err(e)),
                Poll::Ready(Some(Ok(chunk))) => {
                    self.pending = chunk;
                    self.offset = 0;
                }
            }
        }

        let this = &mut *self;
        let n = (this.pending.len() - this.offset).min(buf.remaining());
        buf.put_slice(&this.pending[this.offset..this.offset + n]);
        this.offset += n;
        Poll::Ready(Ok(()))
    }
}

impl<R: AsyncRead + Unpin, W: Unpin> AsyncRead for StdioStream<R, W> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.reader).poll_read(cx, buf)
    }
}

impl<R: Unpin, W: AsyncWrite + Unpin> AsyncWrite for StdioStream<R, W> {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.writer).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.writer).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.writer).poll_shutdown(cx)
    }
}
