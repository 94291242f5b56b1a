//! Tunnel listener
//!
//! The HTTP/2 server hands requests to a per-request handler task, while
//! callers want a blocking `accept()`. [`Listener`] bridges the two: each
//! handler that receives a valid initiation request builds an acceptor-side
//! [`TunnelConn`], pushes it onto an unbounded rendezvous channel, and parks
//! until the connection is closed or dropped. `accept()` pops connections off
//! the channel and completes the handshake before returning them.
//!
//! # Example
//!
//! ```ignore
//! use h2conn::{Listener, ListenerConfig};
//!
//! let listener = Listener::listen(ListenerConfig::new("127.0.0.1:4430")).await?;
//! loop {
//!     let conn = listener.accept().await?;
//!     tokio::spawn(async move {
//!         let (mut rd, mut wr) = tokio::io::split(conn);
//!         tokio::io::copy(&mut rd, &mut wr).await.ok();
//!     });
//! }
//! ```

use std::future::Future;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex as StdMutex, Once};

use bytes::Bytes;
use h2::RecvStream;
use h2::server::SendResponse;
use http::{Request, Response, StatusCode};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Mutex, mpsc, oneshot, watch};

use crate::addr::EndpointAddr;
use crate::conn::TunnelConn;
use crate::error::{Error, Result};
use crate::handshake::{self, Initiation};
use crate::stream::{RecvHalf, SendHalf};
use crate::Config;

/// Where and how a [`Listener`] serves tunnels
#[derive(Debug, Clone)]
pub struct ListenerConfig {
    /// Address to bind, `host:port`
    pub address: String,
    /// Tunnel parameters (path, method, HTTP/2 settings)
    pub tunnel: Config,
    /// Server TLS configuration; plaintext HTTP/2 when `None`
    #[cfg(feature = "tls")]
    pub tls: Option<Arc<rustls::ServerConfig>>,
}

impl ListenerConfig {
    /// Listen on `address` with default tunnel parameters
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            tunnel: Config::default(),
            #[cfg(feature = "tls")]
            tls: None,
        }
    }

    /// Use the given tunnel parameters
    pub fn with_tunnel(mut self, tunnel: Config) -> Self {
        self.tunnel = tunnel;
        self
    }

    /// Serve HTTP/2 over TLS with the given server configuration
    #[cfg(feature = "tls")]
    pub fn with_tls(mut self, tls: Arc<rustls::ServerConfig>) -> Self {
        self.tls = Some(tls);
        self
    }
}

#[cfg(feature = "tls")]
type ServerTls = Option<tokio_rustls::TlsAcceptor>;

#[cfg(not(feature = "tls"))]
type ServerTls = ();

/// State shared between the listener handle and its handler tasks
struct Shared {
    config: Config,
    tx: mpsc::UnboundedSender<TunnelConn>,
    closed: watch::Sender<bool>,
    close_once: Once,
    /// Held while a handler answers 200 and hands off, and while closing
    handoff: StdMutex<()>,
    #[cfg_attr(not(feature = "tls"), allow(dead_code))]
    tls: ServerTls,
}

impl Shared {
    fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    fn lock_handoff(&self) -> std::sync::MutexGuard<'_, ()> {
        self.handoff.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Accepts tunnels initiated by remote [`Dialer`](crate::Dialer)s
///
/// States are `Open` and `Closed`; closing is one-way and idempotent.
pub struct Listener {
    shared: Arc<Shared>,
    rx: Mutex<mpsc::UnboundedReceiver<TunnelConn>>,
    local_addr: Option<SocketAddr>,
}

impl Listener {
    /// Create a listener that is not bound to any socket
    ///
    /// Feed it HTTP/2 transports with [`Listener::serve_connection`].
    pub fn new(config: Config) -> Self {
        Self::with_parts(config, ServerTls::default(), None)
    }

    fn with_parts(config: Config, tls: ServerTls, local_addr: Option<SocketAddr>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let (closed, _) = watch::channel(false);
        Self {
            shared: Arc::new(Shared {
                config,
                tx,
                closed,
                close_once: Once::new(),
                handoff: StdMutex::new(()),
                tls,
            }),
            rx: Mutex::new(rx),
            local_addr,
        }
    }

    /// Bind `config.address` and start serving tunnel initiation requests
    ///
    /// Returns once the socket is bound; connections are served by a
    /// background task until the listener is closed.
    pub async fn listen(config: ListenerConfig) -> Result<Self> {
        let tcp = TcpListener::bind(&config.address).await?;
        let local_addr = tcp.local_addr()?;

        #[cfg(feature = "tls")]
        let tls = config.tls.map(crate::tls::acceptor);
        #[cfg(not(feature = "tls"))]
        let tls = ();

        let listener = Self::with_parts(config.tunnel, tls, Some(local_addr));

        tracing::info!(
            addr = %local_addr,
            path = %listener.shared.config.path,
            method = %listener.shared.config.method,
            "tunnel listener bound"
        );

        tokio::spawn(accept_loop(tcp, listener.shared.clone()));
        Ok(listener)
    }

    /// Serve one HTTP/2 connection over a caller-supplied transport
    ///
    /// The returned future resolves when the HTTP/2 connection ends.
    pub fn serve_connection<S>(&self, io: S) -> impl Future<Output = Result<()>> + Send + use<S>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        serve_h2(self.shared.clone(), io)
    }

    /// Wait for the next tunnel and complete its handshake
    ///
    /// Fails with [`Error::ListenerClosed`] once the listener is closed, and
    /// with a handshake error if the peer goes away before sending the token.
    pub async fn accept(&self) -> Result<TunnelConn> {
        let mut conn = {
            if self.shared.is_closed() {
                return Err(Error::ListenerClosed);
            }
            let mut rx = self.rx.lock().await;
            let next = tokio::select! {
                biased;
                _ = wait_closed(self.shared.closed.subscribe()) => None,
                conn = rx.recv() => conn,
            };
            match next {
                Some(conn) if !self.shared.is_closed() => conn,
                _ => {
                    drain(&mut rx);
                    return Err(Error::ListenerClosed);
                }
            }
        };

        if let Err(e) = handshake::read_token(&mut conn).await {
            tracing::warn!(error = %e, "tunnel handshake failed");
            return Err(e);
        }
        tracing::debug!("tunnel accepted");
        Ok(conn)
    }

    /// Close the listener
    ///
    /// Blocked and future `accept()` calls fail with
    /// [`Error::ListenerClosed`], the bound socket stops accepting, and new
    /// initiation requests are refused. Tunnels already accepted stay open.
    pub fn close(&self) -> Result<()> {
        self.shared.close_once.call_once(|| {
            let _handoff = self.shared.lock_handoff();
            self.shared.closed.send_replace(true);
            if let Ok(mut rx) = self.rx.try_lock() {
                drain(&mut rx);
            }
            tracing::info!("tunnel listener closed");
        });
        Ok(())
    }

    /// Returns true once `close()` has been called
    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    /// Placeholder address of the listener
    pub fn addr(&self) -> EndpointAddr {
        EndpointAddr
    }

    /// Socket address actually bound by [`Listener::listen`]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Tunnel parameters this listener serves
    pub fn config(&self) -> &Config {
        &self.shared.config
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

impl std::fmt::Debug for Listener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Listener")
            .field("config", &self.shared.config)
            .field("local_addr", &self.local_addr)
            .field("closed", &self.shared.is_closed())
            .finish()
    }
}

/// Drop tunnels that were handed off but never accepted
fn drain(rx: &mut mpsc::UnboundedReceiver<TunnelConn>) {
    rx.close();
    while rx.try_recv().is_ok() {}
}

async fn wait_closed(mut closed: watch::Receiver<bool>) {
    while !*closed.borrow_and_update() {
        if closed.changed().await.is_err() {
            return;
        }
    }
}

async fn accept_loop(tcp: TcpListener, shared: Arc<Shared>) {
    loop {
        let (stream, peer) = tokio::select! {
            biased;
            _ = wait_closed(shared.closed.subscribe()) => break,
            accepted = tcp.accept() => match accepted {
                Ok(accepted) => accepted,
                Err(e) => {
                    tracing::warn!(error = %e, "failed to accept TCP connection");
                    continue;
                }
            },
        };

        tracing::debug!(%peer, "accepted TCP connection");
        let shared = shared.clone();
        tokio::spawn(async move {
            if let Err(e) = serve_tcp(shared, stream).await {
                tracing::warn!(%peer, error = %e, "HTTP/2 connection failed");
            }
        });
    }
    tracing::debug!("tunnel accept loop stopped");
}

async fn serve_tcp(shared: Arc<Shared>, stream: TcpStream) -> Result<()> {
    stream.set_nodelay(true)?;

    #[cfg(feature = "tls")]
    if let Some(acceptor) = shared.tls.clone() {
        let stream = acceptor
            .accept(stream)
            .await
            .map_err(|e| Error::Tls(e.to_string()))?;
        return serve_h2(shared, stream).await;
    }

    serve_h2(shared, stream).await
}

async fn serve_h2<S>(shared: Arc<Shared>, io: S) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let mut h2_conn = shared
        .config
        .http2
        .server_builder()
        .handshake::<_, Bytes>(io)
        .await?;

    // Accept and handle streams
    while let Some(result) = h2_conn.accept().await {
        let (request, respond) = result?;
        let shared = shared.clone();

        tokio::spawn(async move {
            if let Err(e) = handle_request(request, respond, shared).await {
                tracing::warn!(error = %e, "tunnel initiation failed");
            }
        });
    }

    tracing::debug!("HTTP/2 connection closed");
    Ok(())
}

/// Handle one incoming request, turning it into a tunnel if it qualifies
///
/// For an accepted tunnel this does not return until the connection is
/// closed or dropped by its owner.
async fn handle_request(
    request: Request<RecvStream>,
    mut respond: SendResponse<Bytes>,
    shared: Arc<Shared>,
) -> Result<()> {
    let config = &shared.config;

    let initiation = Initiation::check(&request, &config.path, &config.method);
    if initiation != Initiation::Accept {
        tracing::debug!(
            method = %request.method(),
            path = %request.uri().path(),
            "rejecting non-tunnel request"
        );
        let (response, body) = handshake::build_reject_response(&initiation, &config.method);
        if let Some(err) = initiation.into_error() {
            tracing::info!(error = %err, "tunnel initiation refused");
        }
        return reply(&mut respond, response, body);
    }

    let (release, released) = oneshot::channel();
    {
        // Closing waits for this block, so a 200 is only sent for a tunnel
        // that reaches the channel
        let _handoff = shared.lock_handoff();
        if shared.is_closed() || shared.tx.is_closed() {
            let mut response = Response::new(());
            *response.status_mut() = StatusCode::SERVICE_UNAVAILABLE;
            return reply(&mut respond, response, Some(Bytes::from_static(b"listener closed\n")));
        }

        let send_stream = respond.send_response(handshake::build_accept_response(), false)?;
        let conn = TunnelConn::acceptor(
            RecvHalf::new(request.into_body()),
            SendHalf::new(send_stream, config.write_buffer_size),
            release,
        );

        if shared.tx.send(conn).is_err() {
            tracing::debug!("listener dropped before tunnel could be handed off");
            return Ok(());
        }
    }
    tracing::debug!("tunnel handed off to accept");

    // Parked until the owner closes or drops the connection
    let _ = released.await;
    tracing::debug!("tunnel released");
    Ok(())
}

fn reply(
    respond: &mut SendResponse<Bytes>,
    response: Response<()>,
    body: Option<Bytes>,
) -> Result<()> {
    match body {
        Some(body) => {
            let mut send = respond.send_response(response, false)?;
            send.send_data(body, true)?;
        }
        None => {
            respond.send_response(response, true)?;
        }
    }
    Ok(())
}
