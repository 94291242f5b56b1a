//! Tunnel dialer
//!
//! [`Dialer::dial`] opens one HTTP/2 connection, issues the initiation request
//! and returns the initiator end of the tunnel as soon as the response headers
//! arrive. The request body stays open for writing and the response body
//! stays open for reading.

use bytes::{Bytes, BytesMut};
use h2::RecvStream;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

use crate::Config;
use crate::conn::TunnelConn;
use crate::error::{Error, Result};
use crate::handshake;
use crate::stream::{RecvHalf, SendHalf};

/// Longest rejection body kept in [`Error::DialRejected`]
const MAX_REASON_LEN: usize = 1024;

/// Options for outgoing tunnels
#[derive(Debug, Clone, Default)]
pub struct DialerConfig {
    /// Skip certificate validation of the remote (test/demo use only)
    pub insecure_skip_verify: bool,
    /// Speak HTTP/2 over TLS; plaintext HTTP/2 with prior knowledge otherwise
    pub tls: bool,
    /// Tunnel parameters (path, method, HTTP/2 settings)
    pub tunnel: Config,
}

/// Creates initiator-side tunnel connections
#[derive(Debug, Clone, Default)]
pub struct Dialer {
    config: DialerConfig,
}

impl Dialer {
    /// Create a dialer with the given configuration
    pub fn new(config: DialerConfig) -> Self {
        Self { config }
    }

    /// Create a dialer that speaks TLS, optionally without verifying the
    /// remote certificate
    pub fn tls(insecure_skip_verify: bool) -> Self {
        Self::new(DialerConfig {
            insecure_skip_verify,
            tls: true,
            ..Default::default()
        })
    }

    /// Get the dialer configuration
    pub fn config(&self) -> &DialerConfig {
        &self.config
    }

    /// Open a tunnel to `target` (`host:port`)
    ///
    /// Fails with [`Error::Dial`] if the remote is unreachable or the
    /// transport handshake fails, and with [`Error::DialRejected`] if the
    /// remote answers the initiation request with a non-2xx status.
    pub async fn dial(&self, target: &str) -> Result<TunnelConn> {
        let stream = TcpStream::connect(target)
            .await
            .map_err(|e| Error::dial(target, e))?;
        stream.set_nodelay(true).map_err(|e| Error::dial(target, e))?;

        if self.config.tls {
            return self.dial_tls(stream, target).await;
        }

        self.dial_io(stream, target).await
    }

    #[cfg(feature = "tls")]
    async fn dial_tls(&self, stream: TcpStream, target: &str) -> Result<TunnelConn> {
        let stream = crate::tls::connect(stream, target, self.config.insecure_skip_verify)
            .await
            .map_err(|e| Error::dial(target, e))?;
        self.dial_io(stream, target).await
    }

    #[cfg(not(feature = "tls"))]
    async fn dial_tls(&self, _stream: TcpStream, target: &str) -> Result<TunnelConn> {
        Err(Error::dial(target, "TLS support is not compiled in (enable the `tls` feature)"))
    }

    /// Open a tunnel over a caller-supplied transport
    ///
    /// `authority` becomes the `:authority` of the initiation request.
    pub async fn dial_io<S>(&self, io: S, authority: &str) -> Result<TunnelConn>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let tunnel = &self.config.tunnel;
        let scheme = if self.config.tls { "https" } else { "http" };
        let request =
            handshake::build_initiation_request(&tunnel.method, scheme, authority, &tunnel.path)?;

        let (send_request, h2_conn) = tunnel
            .http2
            .client_builder()
            .handshake::<_, Bytes>(io)
            .await
            .map_err(|e| Error::dial(authority, e))?;

        // Spawn connection driver
        let target = authority.to_string();
        tokio::spawn(async move {
            if let Err(e) = h2_conn.await {
                tracing::debug!(remote = %target, error = %e, "HTTP/2 connection ended with error");
            }
        });

        let mut send_request = send_request
            .ready()
            .await
            .map_err(|e| Error::dial(authority, e))?;

        let (response_future, mut send_stream) = send_request
            .send_request(request, false)
            .map_err(|e| Error::dial(authority, e))?;

        handshake::send_token(&mut send_stream).map_err(|e| Error::dial(authority, e))?;

        let response = response_future
            .await
            .map_err(|e| Error::dial(authority, e))?;

        let status = response.status();
        if !status.is_success() {
            let reason = read_reason(response.into_body()).await;
            tracing::warn!(remote = %authority, %status, "tunnel initiation rejected");
            return Err(Error::DialRejected { status, reason });
        }

        tracing::debug!(remote = %authority, "tunnel established");
        Ok(TunnelConn::initiator(
            RecvHalf::new(response.into_body()),
            SendHalf::new(send_stream, tunnel.write_buffer_size),
        ))
    }
}

/// Collect the short text body of a rejection response
async fn read_reason(mut body: RecvStream) -> Option<String> {
    let mut reason = BytesMut::new();
    while let Some(chunk) = body.data().await {
        let Ok(chunk) = chunk else { break };
        let _ = body.flow_control().release_capacity(chunk.len());
        reason.extend_from_slice(&chunk);
        if reason.len() >= MAX_REASON_LEN {
            reason.truncate(MAX_REASON_LEN);
            break;
        }
    }

    let reason = String::from_utf8_lossy(&reason).trim().to_string();
    if reason.is_empty() { None } else { Some(reason) }
}
