//! # h2conn: duplex byte tunnels over HTTP/2
//!
//! A tunnel is one long-lived HTTP/2 request/response exchange used as a
//! socket: the request body carries bytes from the dialing side, the response
//! body carries bytes back. Both ends get a [`TunnelConn`] implementing
//! `AsyncRead + AsyncWrite`.
//!
//! - [`Dialer`] issues the initiation request and returns as soon as the
//!   response headers arrive, with both bodies still streaming.
//! - [`Listener`] serves initiation requests and hands each one to
//!   [`Listener::accept`] through a rendezvous channel.
//! - Every outbound path goes through a [`FlushWriter`], so small interactive
//!   writes reach the peer immediately instead of waiting for a buffer to fill.
//!
//! ## Example
//!
//! ```ignore
//! use h2conn::{Dialer, Listener, ListenerConfig};
//! use tokio::io::{AsyncReadExt, AsyncWriteExt};
//!
//! let listener = Listener::listen(ListenerConfig::new("127.0.0.1:4430")).await?;
//!
//! tokio::spawn(async move {
//!     let mut conn = listener.accept().await?;
//!     let (mut rd, mut wr) = tokio::io::split(conn);
//!     tokio::io::copy(&mut rd, &mut wr).await
//! });
//!
//! let mut conn = Dialer::default().dial("127.0.0.1:4430").await?;
//! conn.write_all(b"ping").await?;
//! ```
//!
//! One tunnel uses one HTTP/2 connection. Deadlines are accepted but ignored,
//! and the handshake contributes no bytes to the application stream.

pub mod addr;
pub mod conn;
pub mod dialer;
pub mod error;
pub mod flush;
pub mod handshake;
pub mod listener;
pub mod stream;

#[cfg(feature = "tls")]
pub mod tls;

use std::sync::LazyLock;

use http::Method;

pub use addr::EndpointAddr;
pub use conn::{Conn, Side, TunnelConn};
pub use dialer::{Dialer, DialerConfig};
pub use error::{Error, Result};
pub use flush::{FlushWriter, Flushable, OutboundSink};
pub use handshake::{HANDSHAKE_LEN, HANDSHAKE_TOKEN};
pub use listener::{Listener, ListenerConfig};

/// Path reserved for tunnel initiation requests
pub const DEFAULT_PATH: &str = "/ECHO";

/// Request method reserved for tunnel initiation
pub const DEFAULT_METHOD: &str = "MAGIC";

/// Outbound bytes buffered per tunnel before a write forces them out (16KB)
pub const WRITE_BUFFER_SIZE: usize = 16 * 1024;

/// HTTP/2 settings applied to both ends of a tunnel
#[derive(Debug, Clone)]
pub struct Http2Config {
    /// Initial stream-level flow control window size (default: 1MB)
    pub initial_stream_window_size: u32,
    /// Initial connection-level flow control window size (default: 2MB)
    pub initial_connection_window_size: u32,
    /// Maximum concurrent streams per connection, server side (default: 100)
    pub max_concurrent_streams: u32,
}

impl Default for Http2Config {
    fn default() -> Self {
        Self {
            initial_stream_window_size: 1024 * 1024,         // 1MB
            initial_connection_window_size: 2 * 1024 * 1024, // 2MB
            max_concurrent_streams: 100,
        }
    }
}

impl Http2Config {
    pub(crate) fn server_builder(&self) -> h2::server::Builder {
        let mut builder = h2::server::Builder::new();
        builder
            .initial_window_size(self.initial_stream_window_size)
            .initial_connection_window_size(self.initial_connection_window_size)
            .max_concurrent_streams(self.max_concurrent_streams);
        builder
    }

    pub(crate) fn client_builder(&self) -> h2::client::Builder {
        let mut builder = h2::client::Builder::new();
        builder
            .initial_window_size(self.initial_stream_window_size)
            .initial_connection_window_size(self.initial_connection_window_size);
        builder
    }
}

/// Tunnel parameters shared by dialers and listeners
///
/// Both ends must agree on `path` and `method`.
///
/// # Example
///
/// ```
/// use h2conn::Config;
///
/// let config = Config::builder()
///     .path("/tunnel")
///     .method_str("TUNNEL")
///     .unwrap()
///     .write_buffer_size(4 * 1024)
///     .build();
/// assert_eq!(config.method.as_str(), "TUNNEL");
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    /// Path of the initiation request (default: "/ECHO")
    pub path: String,
    /// Method of the initiation request (default: "MAGIC")
    pub method: Method,
    /// Outbound buffer per tunnel (default: 16KB)
    pub write_buffer_size: usize,
    /// HTTP/2 settings
    pub http2: Http2Config,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            path: DEFAULT_PATH.to_string(),
            method: MAGIC_METHOD.clone(),
            write_buffer_size: WRITE_BUFFER_SIZE,
            http2: Http2Config::default(),
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::new()
    }
}

/// `DEFAULT_METHOD` parsed once; an all-uppercase ASCII token always parses
static MAGIC_METHOD: LazyLock<Method> = LazyLock::new(|| {
    Method::from_bytes(DEFAULT_METHOD.as_bytes()).expect("valid method token")
});

/// Builder for tunnel configuration
#[derive(Debug, Clone)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Create a new builder with default values
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    /// Set the initiation path
    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.config.path = path.into();
        self
    }

    /// Set the initiation method
    pub fn method(mut self, method: Method) -> Self {
        self.config.method = method;
        self
    }

    /// Set the initiation method from its name
    pub fn method_str(self, method: &str) -> std::result::Result<Self, http::method::InvalidMethod> {
        let method = Method::from_bytes(method.as_bytes())?;
        Ok(self.method(method))
    }

    /// Set the outbound buffer size per tunnel
    pub fn write_buffer_size(mut self, size: usize) -> Self {
        self.config.write_buffer_size = size;
        self
    }

    /// Set HTTP/2 initial stream window size
    pub fn http2_stream_window_size(mut self, size: u32) -> Self {
        self.config.http2.initial_stream_window_size = size;
        self
    }

    /// Set HTTP/2 initial connection window size
    pub fn http2_connection_window_size(mut self, size: u32) -> Self {
        self.config.http2.initial_connection_window_size = size;
        self
    }

    /// Set HTTP/2 maximum concurrent streams
    pub fn http2_max_streams(mut self, count: u32) -> Self {
        self.config.http2.max_concurrent_streams = count;
        self
    }

    /// Build the configuration
    pub fn build(self) -> Config {
        self.config
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::Config;
    pub use crate::conn::{Conn, TunnelConn};
    pub use crate::dialer::Dialer;
    pub use crate::error::{Error, Result};
    pub use crate::listener::{Listener, ListenerConfig};
}
