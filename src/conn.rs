//! Tunnel connections
//!
//! [`TunnelConn`] joins the inbound body and the outbound body of one HTTP/2
//! exchange into a single duplex byte stream. It implements [`Conn`], the
//! generic connection capability shared by both ends of a tunnel.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Instant;

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::sync::oneshot;

use crate::addr::EndpointAddr;
use crate::flush::FlushWriter;
use crate::stream::{RecvHalf, SendHalf};

/// Generic network connection capability
///
/// Deadline setters exist so tunnels can stand in for sockets, but they have
/// no effect: tunneled streams do not support timeouts.
pub trait Conn: AsyncRead + AsyncWrite + Unpin + Send {
    /// Address of this end
    fn local_addr(&self) -> EndpointAddr;

    /// Address of the other end
    fn remote_addr(&self) -> EndpointAddr;

    /// Set read and write deadlines
    fn set_deadline(&mut self, deadline: Option<Instant>) -> io::Result<()>;

    /// Set the read deadline
    fn set_read_deadline(&mut self, deadline: Option<Instant>) -> io::Result<()>;

    /// Set the write deadline
    fn set_write_deadline(&mut self, deadline: Option<Instant>) -> io::Result<()>;

    /// Close the inbound direction
    fn close(&mut self) -> io::Result<()>;
}

/// Which end of the tunnel a connection belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    /// Created by [`Dialer`](crate::Dialer); reads the response body
    Initiator,
    /// Returned by [`Listener::accept`](crate::Listener::accept); reads the request body
    Acceptor,
}

/// One end of an HTTP/2 tunnel
///
/// `close()` only closes the inbound stream. The outbound stream lives as long
/// as the connection object; use `shutdown()` to half-close it explicitly.
pub struct TunnelConn {
    side: Side,
    inbound: Option<RecvHalf>,
    outbound: FlushWriter<SendHalf>,
    /// Keeps the acceptor's request handler parked until closed or dropped
    release: Option<oneshot::Sender<()>>,
}

impl TunnelConn {
    pub(crate) fn initiator(inbound: RecvHalf, outbound: SendHalf) -> Self {
        Self {
            side: Side::Initiator,
            inbound: Some(inbound),
            outbound: FlushWriter::new(outbound),
            release: None,
        }
    }

    pub(crate) fn acceptor(
        inbound: RecvHalf,
        outbound: SendHalf,
        release: oneshot::Sender<()>,
    ) -> Self {
        Self {
            side: Side::Acceptor,
            inbound: Some(inbound),
            outbound: FlushWriter::new(outbound),
            release: Some(release),
        }
    }

    /// Which end of the tunnel this is
    pub fn side(&self) -> Side {
        self.side
    }

    /// Returns true once `close()` has been called
    pub fn is_closed(&self) -> bool {
        self.inbound.is_none()
    }
}

impl Conn for TunnelConn {
    fn local_addr(&self) -> EndpointAddr {
        EndpointAddr
    }

    fn remote_addr(&self) -> EndpointAddr {
        EndpointAddr
    }

    fn set_deadline(&mut self, _deadline: Option<Instant>) -> io::Result<()> {
        Ok(())
    }

    fn set_read_deadline(&mut self, _deadline: Option<Instant>) -> io::Result<()> {
        Ok(())
    }

    fn set_write_deadline(&mut self, _deadline: Option<Instant>) -> io::Result<()> {
        Ok(())
    }

    fn close(&mut self) -> io::Result<()> {
        if let Some(inbound) = self.inbound.take() {
            tracing::debug!(side = ?self.side, unread = inbound.buffered(), "closing tunnel inbound stream");
        }
        if let Some(release) = self.release.take() {
            let _ = release.send(());
        }
        Ok(())
    }
}

impl AsyncRead for TunnelConn {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.inbound.as_mut() {
            Some(inbound) => Pin::new(inbound).poll_read(cx, buf),
            None => Poll::Ready(Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "use of closed tunnel connection",
            ))),
        }
    }
}

impl AsyncWrite for TunnelConn {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.outbound).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.outbound).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.outbound).poll_shutdown(cx)
    }
}

impl std::fmt::Debug for TunnelConn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TunnelConn")
            .field("side", &self.side)
            .field("inbound", &self.inbound)
            .field("outbound", self.outbound.get_ref())
            .finish()
    }
}
