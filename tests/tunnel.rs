//! End-to-end tunnels over loopback TCP

use std::sync::Arc;
use std::time::Duration;

use h2conn::{Config, Conn, Dialer, DialerConfig, EndpointAddr, Error, Listener, ListenerConfig, Side};
use http::StatusCode;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

async fn bind() -> (Arc<Listener>, String) {
    let listener = Listener::listen(ListenerConfig::new("127.0.0.1:0"))
        .await
        .expect("bind listener");
    let addr = listener.local_addr().expect("bound address").to_string();
    (Arc::new(listener), addr)
}

#[tokio::test]
async fn ping_pong() {
    let (listener, addr) = bind().await;

    let dialer = Dialer::default();
    let (client, server) = tokio::join!(dialer.dial(&addr), listener.accept());
    let mut client = client.unwrap();
    let mut server = server.unwrap();

    assert_eq!(client.side(), Side::Initiator);
    assert_eq!(server.side(), Side::Acceptor);

    client.write_all(b"ping").await.unwrap();
    let mut buf = [0u8; 4];
    server.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"ping");

    server.write_all(b"pong").await.unwrap();
    client.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"pong");
}

#[tokio::test]
async fn accept_blocks_until_dial() {
    let (listener, addr) = bind().await;

    let accepting = {
        let listener = listener.clone();
        tokio::spawn(async move { listener.accept().await })
    };

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!accepting.is_finished(), "accept returned before any dial");

    let mut client = Dialer::default().dial(&addr).await.unwrap();
    let mut server = tokio::time::timeout(Duration::from_secs(5), accepting)
        .await
        .expect("accept should unblock after dial")
        .unwrap()
        .unwrap();

    client.write_all(b"usable").await.unwrap();
    let mut buf = [0u8; 6];
    server.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"usable");
}

#[tokio::test]
async fn payload_arrives_byte_for_byte() {
    let (listener, addr) = bind().await;

    // Larger than the default HTTP/2 stream window and the write buffer
    let payload: Vec<u8> = (0..3 * 1024 * 1024).map(|i| (i % 251) as u8).collect();

    let server = {
        let listener = listener.clone();
        tokio::spawn(async move {
            let mut conn = listener.accept().await.unwrap();
            let mut received = Vec::new();
            conn.read_to_end(&mut received).await.unwrap();
            received
        })
    };

    let mut client = Dialer::default().dial(&addr).await.unwrap();
    client.write_all(&payload).await.unwrap();
    client.shutdown().await.unwrap();

    let received = tokio::time::timeout(Duration::from_secs(30), server)
        .await
        .expect("transfer should finish")
        .unwrap();
    assert_eq!(received.len(), payload.len());
    assert!(received == payload, "payload corrupted in transit");
}

#[tokio::test]
async fn echo_loop() {
    let (listener, addr) = bind().await;

    tokio::spawn({
        let listener = listener.clone();
        async move {
            let conn = listener.accept().await.unwrap();
            let (mut rd, mut wr) = tokio::io::split(conn);
            tokio::io::copy(&mut rd, &mut wr).await.ok();
        }
    });

    let mut client = Dialer::default().dial(&addr).await.unwrap();
    for line in ["one\n", "two\n", "three\n"] {
        client.write_all(line.as_bytes()).await.unwrap();
        let mut buf = vec![0u8; line.len()];
        tokio::time::timeout(Duration::from_secs(5), client.read_exact(&mut buf))
            .await
            .expect("small writes must be flushed immediately")
            .unwrap();
        assert_eq!(buf, line.as_bytes());
    }
}

#[tokio::test]
async fn concurrent_tunnels_are_isolated() {
    let (listener, addr) = bind().await;

    let dial_a = {
        let addr = addr.clone();
        tokio::spawn(async move { Dialer::default().dial(&addr).await })
    };
    let dial_b = {
        let addr = addr.clone();
        tokio::spawn(async move { Dialer::default().dial(&addr).await })
    };

    let first = listener.accept().await.unwrap();
    let second = listener.accept().await.unwrap();
    let mut a = dial_a.await.unwrap().unwrap();
    let mut b = dial_b.await.unwrap().unwrap();

    a.write_all(b"from-a").await.unwrap();
    b.write_all(b"from-b").await.unwrap();

    let mut accepted = [first, second];
    let mut seen = Vec::new();
    for conn in accepted.iter_mut() {
        let mut buf = [0u8; 6];
        conn.read_exact(&mut buf).await.unwrap();
        seen.push(buf.to_vec());
        conn.write_all(&buf).await.unwrap();
    }
    seen.sort();
    assert_eq!(seen, vec![b"from-a".to_vec(), b"from-b".to_vec()]);

    let mut buf = [0u8; 6];
    a.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"from-a");
    b.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"from-b");
}

#[tokio::test]
async fn close_listener_twice_then_accept_fails() {
    let (listener, _addr) = bind().await;

    assert!(listener.close().is_ok());
    assert!(listener.close().is_ok());

    let result = tokio::time::timeout(Duration::from_secs(1), listener.accept())
        .await
        .expect("accept must not block after close");
    assert!(matches!(result, Err(Error::ListenerClosed)));
}

#[tokio::test]
async fn close_does_not_break_accepted_tunnels() {
    let (listener, addr) = bind().await;

    let dialer = Dialer::default();
    let (client, server) = tokio::join!(dialer.dial(&addr), listener.accept());
    let mut client = client.unwrap();
    let mut server = server.unwrap();

    listener.close().unwrap();

    client.write_all(b"still here").await.unwrap();
    let mut buf = [0u8; 10];
    server.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"still here");
}

#[tokio::test]
async fn wrong_method_is_rejected() {
    let (listener, addr) = bind().await;

    let dialer = Dialer::new(DialerConfig {
        tunnel: Config::builder().method(http::Method::GET).build(),
        ..Default::default()
    });
    let err = dialer.dial(&addr).await.unwrap_err();
    assert!(err.is_dial());
    match err {
        Error::DialRejected { status, reason } => {
            assert!(status.is_client_error());
            assert_eq!(status, StatusCode::BAD_REQUEST);
            assert_eq!(reason.as_deref(), Some("MAGIC required. Not GET"));
        }
        other => panic!("unexpected error: {}", other),
    }

    let pending = tokio::time::timeout(Duration::from_millis(200), listener.accept()).await;
    assert!(pending.is_err(), "a rejected request must not reach accept");
}

#[tokio::test]
async fn wrong_path_is_not_found() {
    let (_listener, addr) = bind().await;

    let dialer = Dialer::new(DialerConfig {
        tunnel: Config::builder().path("/elsewhere").build(),
        ..Default::default()
    });
    let err = dialer.dial(&addr).await.unwrap_err();
    assert!(matches!(
        err,
        Error::DialRejected {
            status: StatusCode::NOT_FOUND,
            ..
        }
    ));
}

#[tokio::test]
async fn custom_route_and_method() {
    let tunnel = Config::builder()
        .path("/tunnel")
        .method_str("TUNNEL")
        .unwrap()
        .build();
    let listener = Listener::listen(ListenerConfig::new("127.0.0.1:0").with_tunnel(tunnel.clone()))
        .await
        .unwrap();
    let addr = listener.local_addr().unwrap().to_string();

    let dialer = Dialer::new(DialerConfig {
        tunnel,
        ..Default::default()
    });
    let (client, server) = tokio::join!(dialer.dial(&addr), listener.accept());
    let mut client = client.unwrap();
    let mut server = server.unwrap();

    client.write_all(b"x").await.unwrap();
    let mut buf = [0u8; 1];
    server.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"x");
}

#[tokio::test]
async fn half_close_delivers_eof_both_ways() {
    let (listener, addr) = bind().await;

    let dialer = Dialer::default();
    let (client, server) = tokio::join!(dialer.dial(&addr), listener.accept());
    let mut client = client.unwrap();
    let mut server = server.unwrap();

    client.write_all(b"request").await.unwrap();
    client.shutdown().await.unwrap();

    let mut request = Vec::new();
    server.read_to_end(&mut request).await.unwrap();
    assert_eq!(request, b"request");

    server.write_all(b"response").await.unwrap();
    server.shutdown().await.unwrap();

    let mut response = Vec::new();
    client.read_to_end(&mut response).await.unwrap();
    assert_eq!(response, b"response");
}

#[tokio::test]
async fn connection_capability_surface() {
    let (listener, addr) = bind().await;
    assert_eq!(listener.addr(), EndpointAddr);

    let dialer = Dialer::default();
    let (client, server) = tokio::join!(dialer.dial(&addr), listener.accept());
    let mut client = client.unwrap();
    let mut server = server.unwrap();

    assert_eq!(client.local_addr(), EndpointAddr);
    assert_eq!(client.remote_addr(), EndpointAddr);
    assert_eq!(server.local_addr(), server.remote_addr());

    let soon = std::time::Instant::now() + Duration::from_millis(1);
    assert!(client.set_deadline(Some(soon)).is_ok());
    assert!(client.set_read_deadline(None).is_ok());
    assert!(server.set_write_deadline(Some(soon)).is_ok());

    assert!(server.close().is_ok());
    assert!(server.close().is_ok());
    assert!(server.is_closed());

    let mut buf = [0u8; 1];
    let err = server.read(&mut buf).await.unwrap_err();
    assert_eq!(err.kind(), std::io::ErrorKind::NotConnected);
}

#[tokio::test]
async fn dial_unreachable_fails_fast() {
    let addr = {
        let socket = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        socket.local_addr().unwrap()
    };

    let result = tokio::time::timeout(
        Duration::from_secs(5),
        Dialer::default().dial(&addr.to_string()),
    )
    .await
    .expect("dial must not hang");
    assert!(matches!(result, Err(Error::Dial { .. })));
}

#[cfg(feature = "tls")]
#[tokio::test]
async fn tls_tunnel_with_insecure_skip_verify() {
    use rustls::pki_types::{PrivateKeyDer, PrivatePkcs8KeyDer};

    let certified = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
    let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(certified.key_pair.serialize_der()));
    let server_config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(vec![certified.cert.der().clone()], key)
        .unwrap();

    let listener = Listener::listen(
        ListenerConfig::new("127.0.0.1:0").with_tls(Arc::new(server_config)),
    )
    .await
    .unwrap();
    let addr = format!("localhost:{}", listener.local_addr().unwrap().port());

    // Self-signed certificate is refused unless verification is skipped
    let err = Dialer::tls(false).dial(&addr).await.unwrap_err();
    assert!(matches!(err, Error::Dial { .. }));

    let dialer = Dialer::tls(true);
    let (client, server) = tokio::join!(dialer.dial(&addr), listener.accept());
    let mut client = client.unwrap();
    let mut server = server.unwrap();

    client.write_all(b"secret").await.unwrap();
    let mut buf = [0u8; 6];
    server.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"secret");
}
