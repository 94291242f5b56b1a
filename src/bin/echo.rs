//! Tunnel echo demo
//!
//! Serves or dials tunnels over plaintext HTTP/2. Built with the `demo`
//! feature: `cargo run --features demo --bin h2conn-echo -- server ...`.
//!
//! ```text
//! h2conn-echo server 127.0.0.1:4430 [--capitalize]
//! h2conn-echo client 127.0.0.1:4430
//! ```

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWriteExt, BufReader};
use tracing_subscriber::EnvFilter;

use h2conn::{Dialer, Listener, ListenerConfig, TunnelConn};

const USAGE: &str = "usage: h2conn-echo <server|client> <host:port> [--capitalize]";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args: Vec<String> = std::env::args().collect();
    let mode = args.get(1).map(|s| s.as_str());
    let addr = args.get(2).map(|s| s.as_str()).unwrap_or("127.0.0.1:4430");
    let capitalize = args.iter().any(|a| a == "--capitalize");

    match mode {
        Some("server") => serve(addr, capitalize).await,
        Some("client") => client(addr).await,
        _ => {
            eprintln!("{}", USAGE);
            std::process::exit(2);
        }
    }
}

async fn serve(addr: &str, capitalize: bool) -> Result<(), Box<dyn std::error::Error>> {
    let listener = Listener::listen(ListenerConfig::new(addr)).await?;
    println!("Listening on: {}", listener.local_addr().map_or(addr.to_string(), |a| a.to_string()));

    loop {
        let conn = match listener.accept().await {
            Ok(conn) => conn,
            Err(e) if e.is_handshake() => {
                eprintln!("Handshake error: {}", e);
                continue;
            }
            Err(e) => return Err(e.into()),
        };

        tokio::spawn(async move {
            match echo(conn, capitalize).await {
                Ok(n) => println!("Tunnel closed after {} bytes", n),
                Err(e) => eprintln!("Tunnel error: {}", e),
            }
        });
    }
}

async fn echo(conn: TunnelConn, capitalize: bool) -> std::io::Result<u64> {
    let (rd, mut wr) = tokio::io::split(conn);
    let mut rd = Capitalize {
        inner: rd,
        enabled: capitalize,
    };
    let mut buf = [0u8; 4096];
    let mut total = 0u64;
    loop {
        let n = rd.read(&mut buf).await?;
        if n == 0 {
            wr.shutdown().await?;
            return Ok(total);
        }
        wr.write_all(&buf[..n]).await?;
        total += n as u64;
    }
}

/// Upper-cases ASCII letters as they are read
struct Capitalize<R> {
    inner: R,
    enabled: bool,
}

impl<R: AsyncRead + Unpin> AsyncRead for Capitalize<R> {
    fn poll_read(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
        buf: &mut tokio::io::ReadBuf<'_>,
    ) -> std::task::Poll<std::io::Result<()>> {
        let start = buf.filled().len();
        let enabled = self.enabled;
        let polled = std::pin::Pin::new(&mut self.inner).poll_read(cx, buf);
        if enabled {
            buf.filled_mut()[start..].make_ascii_uppercase();
        }
        polled
    }
}

async fn client(addr: &str) -> Result<(), Box<dyn std::error::Error>> {
    let conn = Dialer::default().dial(addr).await?;
    println!("Connected to: {}", addr);

    let (mut rd, mut wr) = tokio::io::split(conn);

    let printer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        let copied = tokio::io::copy(&mut rd, &mut stdout).await;
        if let Err(e) = copied {
            eprintln!("Read error: {}", e);
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        wr.write_all(line.as_bytes()).await?;
        wr.write_all(b"\n").await?;
    }
    wr.shutdown().await?;

    printer.await?;
    Ok(())
}
