//! Client-side stream abstractions.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

/// Any duplex byte stream a client can be connected through (plain TCP or
/// TLS-terminated TCP).
pub trait ClientStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> ClientStream for T {}

/// Wraps a client stream and remembers whether any response byte has been
/// written to it.
///
/// Once something went out, a failure can no longer be reported with a fresh
/// status line; the only option left is to drop the connection.
pub struct TrackedStream<'a> {
    inner: &'a mut dyn ClientStream,
    written: u64,
}

impl<'a> TrackedStream<'a> {
    pub fn new(inner: &'a mut dyn ClientStream) -> Self {
        Self { inner, written: 0 }
    }

    /// True once at least one byte has been accepted by the inner stream.
    pub fn started(&self) -> bool {
        self.written > 0
    }

    pub fn bytes_written(&self) -> u64 {
        self.written
    }
}

impl AsyncRead for TrackedStream<'_> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut *self.get_mut().inner).poll_read(cx, buf)
    }
}

impl AsyncWrite for TrackedStream<'_> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        let poll = Pin::new(&mut *this.inner).poll_write(cx, buf);
        if let Poll::Ready(Ok(n)) = &poll {
            this.written += *n as u64;
        }
        poll
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut *self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut *self.get_mut().inner).poll_shutdown(cx)
    }
}
