//! Flush-on-write decorator
//!
//! HTTP/2 response bodies are buffered until a size threshold is reached, so a
//! peer that writes one short line per second would otherwise see nothing
//! arrive. [`FlushWriter`] forces every write out immediately when the wrapped
//! sink advertises the [`Flushable`] capability.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll, ready};

use tokio::io::{AsyncWrite, BufWriter, DuplexStream};

/// A sink that holds written bytes back until explicitly flushed
pub trait Flushable {
    /// Push every buffered byte toward the peer
    fn poll_flush_buffered(&mut self, cx: &mut Context<'_>) -> Poll<io::Result<()>>;
}

/// An outbound byte sink that may or may not support explicit flushing
///
/// Sinks that buffer internally override [`OutboundSink::as_flushable`];
/// sinks that transmit on every write keep the default.
pub trait OutboundSink: AsyncWrite + Unpin {
    /// Query the flush capability of this sink
    fn as_flushable(&mut self) -> Option<&mut dyn Flushable> {
        None
    }
}

impl OutboundSink for Vec<u8> {}

impl OutboundSink for DuplexStream {}

impl<W: AsyncWrite + Unpin> Flushable for BufWriter<W> {
    fn poll_flush_buffered(&mut self, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(self).poll_flush(cx)
    }
}

impl<W: AsyncWrite + Unpin> OutboundSink for BufWriter<W> {
    fn as_flushable(&mut self) -> Option<&mut dyn Flushable> {
        Some(self)
    }
}

/// Writer that flushes the wrapped sink after every write
///
/// A write reports its bytes as soon as the sink accepts them. If the flush
/// that follows cannot complete yet, it is finished by the next `poll_write`
/// before any new bytes are accepted, or by `poll_flush`/`poll_shutdown`.
#[derive(Debug)]
pub struct FlushWriter<W> {
    inner: W,
    /// Accepted bytes may still sit in `inner`
    needs_flush: bool,
}

impl<W: OutboundSink> FlushWriter<W> {
    /// Wrap a sink
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            needs_flush: false,
        }
    }

    /// Get a reference to the wrapped sink
    pub fn get_ref(&self) -> &W {
        &self.inner
    }

    /// Get a mutable reference to the wrapped sink
    pub fn get_mut(&mut self) -> &mut W {
        &mut self.inner
    }

    /// Unwrap the sink
    pub fn into_inner(self) -> W {
        self.inner
    }

    fn poll_flush_if_capable(&mut self, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.inner.as_flushable() {
            Some(flushable) => flushable.poll_flush_buffered(cx),
            None => Poll::Ready(Ok(())),
        }
    }

    /// Finish the flush left over from an earlier write, if any
    fn poll_flush_pending(&mut self, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        if self.needs_flush {
            ready!(self.poll_flush_if_capable(cx))?;
            self.needs_flush = false;
        }
        Poll::Ready(Ok(()))
    }
}

impl<W: OutboundSink> AsyncWrite for FlushWriter<W> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();

        ready!(this.poll_flush_pending(cx))?;

        let n = ready!(Pin::new(&mut this.inner).poll_write(cx, buf))?;
        this.needs_flush = true;

        // The bytes belong to the sink now; a flush error or backpressure is
        // reported by the next call instead of hiding them
        if let Poll::Ready(Ok(())) = this.poll_flush_if_capable(cx) {
            this.needs_flush = false;
        }
        Poll::Ready(Ok(n))
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        ready!(this.poll_flush_if_capable(cx))?;
        this.needs_flush = false;
        Pin::new(&mut this.inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        ready!(this.poll_flush_if_capable(cx))?;
        this.needs_flush = false;
        Pin::new(&mut this.inner).poll_shutdown(cx)
    }
}
