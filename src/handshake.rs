//! Tunnel initiation and handshake
//!
//! A tunnel starts with one HTTP/2 request using a reserved, non-standard
//! method against a fixed path. The request stays open: its body becomes the
//! initiator-to-acceptor direction and the response body becomes the
//! acceptor-to-initiator direction.
//!
//! # Handshake token
//!
//! The initiator writes [`HANDSHAKE_TOKEN`] first on the request body. The
//! acceptor consumes exactly that many bytes and checks them before handing
//! the connection out, so the token never leaks into application data.

use bytes::Bytes;
use h2::SendStream;
use http::{Method, Request, Response, StatusCode};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::{Error, Result};

/// Bytes sent once by the initiator at the start of every tunnel
pub const HANDSHAKE_TOKEN: &[u8; 10] = b"H2CONNECT\n";

/// Length of [`HANDSHAKE_TOKEN`]
pub const HANDSHAKE_LEN: usize = HANDSHAKE_TOKEN.len();

/// Outcome of checking an incoming request against the initiation contract
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Initiation {
    /// Reserved path and initiation method; becomes a tunnel
    Accept,
    /// Request is for some other path
    NotFound,
    /// Reserved path, wrong method
    WrongMethod(Method),
}

impl Initiation {
    /// Classify a request for the given path and initiation method
    pub fn check<B>(req: &Request<B>, path: &str, method: &Method) -> Self {
        if req.uri().path() != path {
            return Initiation::NotFound;
        }
        if req.method() != method {
            return Initiation::WrongMethod(req.method().clone());
        }
        Initiation::Accept
    }

    /// Error describing a rejected request, if any
    pub fn into_error(self) -> Option<Error> {
        match self {
            Initiation::WrongMethod(m) => Some(Error::InvalidMethod(m)),
            _ => None,
        }
    }
}

/// Build the initiation request for `authority`
pub fn build_initiation_request(
    method: &Method,
    scheme: &str,
    authority: &str,
    path: &str,
) -> Result<Request<()>> {
    if authority.is_empty() {
        return Err(Error::InvalidTarget("missing host"));
    }
    if !path.starts_with('/') {
        return Err(Error::InvalidTarget("path must start with '/'"));
    }

    let uri = format!("{}://{}{}", scheme, authority, path);
    Request::builder()
        .method(method.clone())
        .uri(uri)
        .body(())
        .map_err(|_| Error::InvalidTarget("cannot build request URI"))
}

/// Build the 200 response that keeps the tunnel's response body open
pub fn build_accept_response() -> Response<()> {
    let mut response = Response::new(());
    *response.status_mut() = StatusCode::OK;
    response
}

/// Build a rejection response and its short text body
pub fn build_reject_response(
    initiation: &Initiation,
    expected: &Method,
) -> (Response<()>, Option<Bytes>) {
    let (status, body) = match initiation {
        Initiation::Accept => (StatusCode::OK, None),
        Initiation::NotFound => (StatusCode::NOT_FOUND, Some("404 page not found\n".to_string())),
        Initiation::WrongMethod(got) => (
            StatusCode::BAD_REQUEST,
            Some(format!("{} required. Not {}\n", expected, got)),
        ),
    };

    let mut response = Response::new(());
    *response.status_mut() = status;
    if body.is_some() {
        response.headers_mut().insert(
            http::header::CONTENT_TYPE,
            http::HeaderValue::from_static("text/plain; charset=utf-8"),
        );
    }
    (response, body.map(Bytes::from))
}

/// Queue the handshake token on the initiator's request body
///
/// h2 buffers DATA frames that do not fit the current flow-control window, so
/// this never waits on the peer. The connection driver transmits the bytes.
pub fn send_token(send: &mut SendStream<Bytes>) -> Result<()> {
    send.send_data(Bytes::from_static(HANDSHAKE_TOKEN), false)
        .map_err(Error::from)
}

/// Consume exactly [`HANDSHAKE_LEN`] bytes from the acceptor's inbound body
pub async fn read_token<R>(reader: &mut R) -> Result<()>
where
    R: AsyncRead + Unpin,
{
    let mut token = [0u8; HANDSHAKE_LEN];
    reader
        .read_exact(&mut token)
        .await
        .map_err(Error::Handshake)?;

    if &token != HANDSHAKE_TOKEN {
        return Err(Error::HandshakeMismatch);
    }
    Ok(())
}
