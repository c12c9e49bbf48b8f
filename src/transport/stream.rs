//! Duplex stream capabilities.
//!
//! [`HalfClose`] marks streams whose `poll_shutdown` closes only the write
//! direction: the peer sees end-of-stream while reads keep working. The
//! pump requires it statically instead of probing at runtime.
//!
//! [`HijackedStream`] is what a handshake hands back: the raw connection plus
//! whatever bytes the HTTP layer had already read past the response head.
//! Those bytes are replayed before any further read reaches the connection.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::{Buf, Bytes};
use hyper::upgrade::Upgraded;
use hyper_util::rt::TokioIo;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

/// A duplex byte stream that supports half-close through `shutdown`.
///
/// Implementors guarantee that after `AsyncWriteExt::shutdown` completes
/// the stream is still readable until the peer closes its side.
pub trait HalfClose: AsyncRead + AsyncWrite + Unpin + Send {}

impl HalfClose for tokio::net::TcpStream {}

#[cfg(unix)]
impl HalfClose for tokio::net::UnixStream {}

impl HalfClose for tokio::io::DuplexStream {}

impl<S: HalfClose> HalfClose for tokio_rustls::client::TlsStream<S> {}

impl<S: HalfClose> HalfClose for tokio_rustls::server::TlsStream<S> {}

// Upgraded forwards shutdown to the connection it was taken from.
impl HalfClose for TokioIo<Upgraded> {}

impl<S: HalfClose + ?Sized> HalfClose for &mut S {}

impl<S: HalfClose + ?Sized> HalfClose for Box<S> {}

/// A connection taken over from an HTTP exchange.
#[derive(Debug)]
pub struct HijackedStream<S> {
    /// Bytes read by the HTTP layer but not yet delivered.
    buffered: Bytes,
    inner: S,
}

impl<S> HijackedStream<S> {
    /// Wrap a raw connection with bytes that arrived ahead of it.
    pub fn new(inner: S, buffered: Bytes) -> Self {
        Self { buffered, inner }
    }

    /// Bytes still waiting to be replayed.
    pub fn buffered(&self) -> &[u8] {
        &self.buffered
    }

    /// Get a reference to the underlying connection.
    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Get a mutable reference to the underlying connection.
    ///
    /// Reading from it directly skips the replay buffer.
    pub fn inner_mut(&mut self) -> &mut S {
        &mut self.inner
    }

    /// Split into the underlying connection and the unread buffered bytes.
    pub fn into_parts(self) -> (S, Bytes) {
        (self.inner, self.buffered)
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for HijackedStream<S> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if !self.buffered.is_empty() {
            let n = self.buffered.len().min(buf.remaining());
            buf.put_slice(&self.buffered[..n]);
            self.buffered.advance(n);
            return Poll::Ready(Ok(()));
        }
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for HijackedStream<S> {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }

    fn poll_write_vectored(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        bufs: &[io::IoSlice<'_>],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write_vectored(cx, bufs)
    }

    fn is_write_vectored(&self) -> bool {
        self.inner.is_write_vectored()
    }
}

impl<S: HalfClose> HalfClose for HijackedStream<S> {}
