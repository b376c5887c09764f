//! End-to-end tests: local SOCKS5 ingress, remote egress, decoy fallback
//! and cover traffic wired together over real loopback sockets.

use shroud::crypto::Cipher;
use shroud::inbound::{Socks5Listener, TunnelListener};
use shroud::outbound::{ActiveRequests, CoverTicker, TunnelClient};
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;

/// Echo server on an ephemeral port
async fn spawn_echo() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let (mut stream, _) = match listener.accept().await {
                Ok(conn) => conn,
                Err(_) => break,
            };
            tokio::spawn(async move {
                let mut buf = [0u8; 1024];
                loop {
                    match stream.read(&mut buf).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => {
                            if stream.write_all(&buf[..n]).await.is_err() {
                                break;
                            }
                        }
                    }
                }
            });
        }
    });
    addr
}

/// Server that greets every connection with `banner`, then drains and
/// closes. Returns the address and a counter of accepted connections.
async fn spawn_decoy(banner: &'static [u8]) -> (SocketAddr, Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let hits = Arc::new(AtomicUsize::new(0));
    let hits_clone = hits.clone();
    tokio::spawn(async move {
        loop {
            let (mut stream, _) = match listener.accept().await {
                Ok(conn) => conn,
                Err(_) => break,
            };
            hits_clone.fetch_add(1, Ordering::SeqCst);
            tokio::spawn(async move {
                let _ = stream.write_all(banner).await;
                let _ = stream.shutdown().await;
            });
        }
    });
    (addr, hits)
}

async fn start_remote(
    method: &str,
    password: &str,
    decoy: SocketAddr,
    idle: Duration,
) -> SocketAddr {
    let cipher = Cipher::new(method, password).unwrap();
    let listener = TunnelListener::bind("127.0.0.1:0", cipher, decoy.to_string(), idle)
        .await
        .unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(listener.run());
    addr
}

async fn start_local(
    method: &str,
    password: &str,
    remote: SocketAddr,
    idle: Duration,
) -> SocketAddr {
    let cipher = Cipher::new(method, password).unwrap();
    let client = Arc::new(TunnelClient::new(remote.to_string(), cipher));
    let active = ActiveRequests::new(16);
    let listener = Socks5Listener::bind("127.0.0.1:0", client, active, idle)
        .await
        .unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(listener.run());
    addr
}

/// Run the SOCKS5 handshake and CONNECT against the local endpoint
async fn socks_connect_ipv4(local: SocketAddr, dest: SocketAddr) -> TcpStream {
    let mut stream = TcpStream::connect(local).await.unwrap();

    stream.write_all(&[0x05, 0x01, 0x00]).await.unwrap();
    let mut reply = [0u8; 2];
    stream.read_exact(&mut reply).await.unwrap();
    assert_eq!(reply, [0x05, 0x00]);

    let mut request = vec![0x05, 0x01, 0x00, 0x01];
    match dest.ip() {
        IpAddr::V4(ip) => request.extend_from_slice(&ip.octets()),
        IpAddr::V6(_) => unreachable!("tests use IPv4 loopback"),
    }
    request.extend_from_slice(&dest.port().to_be_bytes());
    stream.write_all(&request).await.unwrap();

    let mut reply = [0u8; 10];
    stream.read_exact(&mut reply).await.unwrap();
    assert_eq!(reply[0], 0x05);
    assert_eq!(reply[1], 0x00);
    assert_eq!(&reply[8..], &[0x80, 0x88]);

    stream
}

#[tokio::test]
async fn test_connect_roundtrip_chacha20() {
    let echo = spawn_echo().await;
    let (decoy, _) = spawn_decoy(b"OK1").await;
    let remote = start_remote("chacha20", "pw", decoy, Duration::from_secs(30)).await;
    let local = start_local("chacha20", "pw", remote, Duration::from_secs(30)).await;

    let mut stream = socks_connect_ipv4(local, echo).await;
    stream.write_all(b"hello").await.unwrap();

    let mut got = [0u8; 5];
    timeout(Duration::from_secs(5), stream.read_exact(&mut got))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(&got, b"hello");
}

#[tokio::test]
async fn test_garbage_to_remote_gets_decoy_response() {
    let (decoy, hits) = spawn_decoy(b"OK1").await;
    let remote = start_remote("chacha20", "pw", decoy, Duration::from_secs(1)).await;

    // One random byte instead of SOCKS5-via-local: the IV never completes,
    // the handshake deadline fires, and the remote bridges to the decoy.
    let mut prober = TcpStream::connect(remote).await.unwrap();
    prober.write_all(&[0xA7]).await.unwrap();

    let mut got = [0u8; 3];
    timeout(Duration::from_secs(5), prober.read_exact(&mut got))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(&got, b"OK1");
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_parallel_sessions_stay_isolated() {
    let echo_a = spawn_echo().await;
    let echo_b = spawn_echo().await;
    let (decoy, _) = spawn_decoy(b"OK1").await;
    let remote = start_remote("aes-256-cfb", "secret", decoy, Duration::from_secs(30)).await;
    let local = start_local("aes-256-cfb", "secret", remote, Duration::from_secs(30)).await;

    let mut first = socks_connect_ipv4(local, echo_a).await;
    let mut second = socks_connect_ipv4(local, echo_b).await;

    for round in 0..3u8 {
        let msg_a = format!("session-a round {}", round);
        let msg_b = format!("SESSION-B ROUND {}", round);
        first.write_all(msg_a.as_bytes()).await.unwrap();
        second.write_all(msg_b.as_bytes()).await.unwrap();

        let mut got_a = vec![0u8; msg_a.len()];
        let mut got_b = vec![0u8; msg_b.len()];
        timeout(Duration::from_secs(5), first.read_exact(&mut got_a))
            .await
            .unwrap()
            .unwrap();
        timeout(Duration::from_secs(5), second.read_exact(&mut got_b))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(got_a, msg_a.as_bytes());
        assert_eq!(got_b, msg_b.as_bytes());
    }
}

#[tokio::test]
async fn test_idle_tunnel_closes_within_window() {
    let echo = spawn_echo().await;
    let (decoy, _) = spawn_decoy(b"OK1").await;
    let remote = start_remote("chacha20", "pw", decoy, Duration::from_secs(2)).await;
    let local = start_local("chacha20", "pw", remote, Duration::from_secs(2)).await;

    let mut stream = socks_connect_ipv4(local, echo).await;
    stream.write_all(b"hi").await.unwrap();

    let mut got = [0u8; 2];
    timeout(Duration::from_secs(5), stream.read_exact(&mut got))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(&got, b"hi");

    // Stay silent; the idle deadline must tear the tunnel down and the
    // client must observe end-of-stream within roughly a second of slack.
    let mut sink = [0u8; 16];
    let result = timeout(Duration::from_secs(4), stream.read(&mut sink)).await;
    match result {
        Ok(Ok(0)) => {}
        Ok(Ok(n)) => panic!("unexpected {} bytes after idle window", n),
        Ok(Err(_)) => {}
        Err(_) => panic!("connection still open past the idle window"),
    }
}

#[tokio::test]
async fn test_domain_atyp_destination() {
    let echo = spawn_echo().await;
    let (decoy, _) = spawn_decoy(b"OK1").await;
    let remote = start_remote("chacha20-ietf", "pw", decoy, Duration::from_secs(30)).await;
    let local = start_local("chacha20-ietf", "pw", remote, Duration::from_secs(30)).await;

    let mut stream = TcpStream::connect(local).await.unwrap();
    stream.write_all(&[0x05, 0x01, 0x00]).await.unwrap();
    let mut reply = [0u8; 2];
    stream.read_exact(&mut reply).await.unwrap();
    assert_eq!(reply, [0x05, 0x00]);

    // CONNECT with ATYP=domain: "localhost" resolves back to loopback, so
    // the remote's dial lands on the echo server.
    let domain = b"localhost";
    let mut request = vec![0x05, 0x01, 0x00, 0x03, domain.len() as u8];
    request.extend_from_slice(domain);
    request.extend_from_slice(&echo.port().to_be_bytes());
    stream.write_all(&request).await.unwrap();

    let mut reply = [0u8; 10];
    stream.read_exact(&mut reply).await.unwrap();
    assert_eq!(reply[1], 0x00);

    stream.write_all(b"via domain").await.unwrap();
    let mut got = [0u8; 10];
    timeout(Duration::from_secs(5), stream.read_exact(&mut got))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(&got, b"via domain");
}

#[tokio::test]
async fn test_socks5_rejects_wrong_version() {
    let (decoy, _) = spawn_decoy(b"OK1").await;
    let remote = start_remote("chacha20", "pw", decoy, Duration::from_secs(5)).await;
    let local = start_local("chacha20", "pw", remote, Duration::from_secs(5)).await;

    // SOCKS4 greeting: the listener must close without replying.
    let mut stream = TcpStream::connect(local).await.unwrap();
    stream.write_all(&[0x04, 0x01, 0x00]).await.unwrap();

    let mut sink = [0u8; 8];
    let n = timeout(Duration::from_secs(3), stream.read(&mut sink))
        .await
        .expect("connection should close promptly")
        .unwrap_or(0);
    assert_eq!(n, 0, "no reply expected for a non-SOCKS5 greeting");
}

#[tokio::test]
async fn test_cover_ticker_emits_while_idle() {
    let (decoy, hits) = spawn_decoy(b"HTTP/1.1 200 OK\r\n\r\nOK1").await;
    let remote = start_remote("chacha20", "pw", decoy, Duration::from_secs(5)).await;

    let cipher = Cipher::new("chacha20", "pw").unwrap();
    let client = Arc::new(TunnelClient::new(remote.to_string(), cipher));
    let active = ActiveRequests::new(16);
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    // The cover target is the decoy itself, as in a production deployment.
    let ticker = CoverTicker::new(
        client,
        active,
        decoy.ip().to_string(),
        decoy.port(),
        shutdown_rx,
    );
    let handle = tokio::spawn(ticker.run());

    tokio::time::sleep(Duration::from_millis(2500)).await;
    let _ = shutdown_tx.send(true);
    let _ = handle.await;

    // Ticks at 0s, 1s and 2s while fully idle: at least two exchanges must
    // have reached the decoy.
    assert!(
        hits.load(Ordering::SeqCst) >= 2,
        "expected >=2 cover hits, saw {}",
        hits.load(Ordering::SeqCst)
    );
}

#[tokio::test]
async fn test_inline_payload_reaches_destination() {
    use shroud::common::net::Address;
    use shroud::tunnel::Traffic;

    let echo = spawn_echo().await;
    let (decoy, _) = spawn_decoy(b"OK1").await;
    let remote = start_remote("aes-128-ctr", "pw", decoy, Duration::from_secs(5)).await;

    // Drive the tunnel protocol directly: a REQUEST whose payload carries
    // application bytes must have them forwarded before piping begins.
    let cipher = Cipher::new("aes-128-ctr", "pw").unwrap();
    let client = TunnelClient::new(remote.to_string(), cipher);
    let addr = Address::from(echo.ip().to_string()).to_bytes(echo.port());
    let record = Traffic::request(addr, b"inline!".to_vec());

    let mut conn = client.open(&record).await.unwrap();
    let mut got = [0u8; 7];
    timeout(Duration::from_secs(5), conn.read_exact(&mut got))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(&got, b"inline!");
}
