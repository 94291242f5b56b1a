//! HTTP/2 body halves implementing AsyncRead / AsyncWrite
//!
//! A tunnel uses the two bodies of one HTTP/2 exchange as the two directions
//! of a byte pipe. [`RecvHalf`] wraps h2's `RecvStream` (the body arriving from
//! the peer) and [`SendHalf`] wraps h2's `SendStream` (the body going out).
//!
//! `SendHalf` buffers written bytes the way a response writer does, and only
//! hands them to h2 when flushed or when its buffer fills up. Wrap it in a
//! [`FlushWriter`](crate::flush::FlushWriter) to get interactive latency.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::{Buf, Bytes, BytesMut};
use h2::{RecvStream, SendStream};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

use crate::flush::{Flushable, OutboundSink};

/// Inbound direction of a tunnel
pub struct RecvHalf {
    recv: RecvStream,
    recv_buf: BytesMut,
    /// Track if we've received END_STREAM
    recv_eof: bool,
}

impl RecvHalf {
    /// Create a new RecvHalf from an h2 receive stream
    pub fn new(recv: RecvStream) -> Self {
        Self {
            recv,
            recv_buf: BytesMut::new(),
            recv_eof: false,
        }
    }

    /// Get a reference to the underlying receive stream
    pub fn recv_stream(&self) -> &RecvStream {
        &self.recv
    }

    /// Number of bytes received from the peer but not yet read
    pub fn buffered(&self) -> usize {
        self.recv_buf.len()
    }
}

impl AsyncRead for RecvHalf {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if buf.remaining() == 0 {
            return Poll::Ready(Ok(()));
        }

        // First, try to satisfy from the internal buffer
        if !self.recv_buf.is_empty() {
            let to_copy = std::cmp::min(buf.remaining(), self.recv_buf.len());
            buf.put_slice(&self.recv_buf.split_to(to_copy));
            return Poll::Ready(Ok(()));
        }

        if self.recv_eof {
            return Poll::Ready(Ok(()));
        }

        loop {
            match Pin::new(&mut self.recv).poll_data(cx) {
                Poll::Ready(Some(Ok(mut data))) => {
                    // Release flow control capacity back to sender
                    let len = data.len();
                    let _ = self.recv.flow_control().release_capacity(len);

                    // Empty DATA frames carry no bytes; returning one would look like EOF
                    if len == 0 {
                        continue;
                    }

                    let to_copy = std::cmp::min(buf.remaining(), data.len());
                    buf.put_slice(&data.split_to(to_copy));

                    if data.has_remaining() {
                        self.recv_buf.extend_from_slice(data.chunk());
                    }

                    return Poll::Ready(Ok(()));
                }
                Poll::Ready(Some(Err(e))) => return Poll::Ready(Err(h2_to_io(e))),
                Poll::Ready(None) => {
                    self.recv_eof = true;
                    return Poll::Ready(Ok(()));
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

impl std::fmt::Debug for RecvHalf {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecvHalf")
            .field("recv_buf_len", &self.recv_buf.len())
            .field("recv_eof", &self.recv_eof)
            .finish()
    }
}

/// Outbound direction of a tunnel
pub struct SendHalf {
    send: SendStream<Bytes>,
    /// Bytes written but not yet handed to h2
    pending: BytesMut,
    max_pending: usize,
    /// END_STREAM has been sent
    finished: bool,
}

impl SendHalf {
    /// Create a new SendHalf buffering up to `max_pending` bytes before
    /// forcing them out
    pub fn new(send: SendStream<Bytes>, max_pending: usize) -> Self {
        Self {
            send,
            pending: BytesMut::with_capacity(max_pending),
            max_pending: max_pending.max(1),
            finished: false,
        }
    }

    /// Get a mutable reference to the underlying send stream
    pub fn send_stream_mut(&mut self) -> &mut SendStream<Bytes> {
        &mut self.send
    }

    /// Number of bytes written but not yet flushed
    pub fn buffered(&self) -> usize {
        self.pending.len()
    }

    /// Hand buffered bytes to h2, waiting for flow-control capacity
    fn poll_drain(&mut self, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        while !self.pending.is_empty() {
            if self.send.capacity() == 0 {
                self.send.reserve_capacity(self.pending.len());
                match self.send.poll_capacity(cx) {
                    Poll::Ready(Some(Ok(_))) => continue,
                    Poll::Ready(Some(Err(e))) => return Poll::Ready(Err(h2_to_io(e))),
                    Poll::Ready(None) => return Poll::Ready(Err(stream_closed())),
                    Poll::Pending => return Poll::Pending,
                }
            }

            let to_send = std::cmp::min(self.send.capacity(), self.pending.len());
            let data = self.pending.split_to(to_send).freeze();
            self.send.send_data(data, false).map_err(h2_to_io)?;
        }
        Poll::Ready(Ok(()))
    }
}

impl AsyncWrite for SendHalf {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        if buf.is_empty() {
            return Poll::Ready(Ok(0));
        }
        if self.finished {
            return Poll::Ready(Err(stream_closed()));
        }

        if self.pending.len() >= self.max_pending {
            match self.poll_drain(cx) {
                Poll::Ready(Ok(())) => {}
                Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
                Poll::Pending => return Poll::Pending,
            }
        }

        let room = self.max_pending - self.pending.len();
        let n = std::cmp::min(room, buf.len());
        self.pending.extend_from_slice(&buf[..n]);
        Poll::Ready(Ok(n))
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.poll_drain(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        if self.finished {
            return Poll::Ready(Ok(()));
        }
        match self.poll_drain(cx) {
            Poll::Ready(Ok(())) => {}
            other => return other,
        }
        // Send empty DATA frame with END_STREAM flag
        self.send
            .send_data(Bytes::new(), true)
            .map_err(h2_to_io)?;
        self.finished = true;
        Poll::Ready(Ok(()))
    }
}

impl Flushable for SendHalf {
    fn poll_flush_buffered(&mut self, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.poll_drain(cx)
    }
}

impl OutboundSink for SendHalf {
    fn as_flushable(&mut self) -> Option<&mut dyn Flushable> {
        Some(self)
    }
}

impl std::fmt::Debug for SendHalf {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SendHalf")
            .field("pending", &self.pending.len())
            .field("capacity", &self.send.capacity())
            .field("finished", &self.finished)
            .finish()
    }
}

fn stream_closed() -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, "HTTP/2 stream closed")
}

pub(crate) fn h2_to_io(e: h2::Error) -> io::Error {
    if e.is_io() {
        return e
            .into_io()
            .unwrap_or_else(|| io::Error::other("HTTP/2 I/O error"));
    }
    if e.is_reset() || e.is_go_away() {
        return io::Error::new(io::ErrorKind::ConnectionReset, e);
    }
    io::Error::other(e)
}
