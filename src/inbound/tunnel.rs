//! Tunnel inbound (remote endpoint) with decoy fallback
//!
//! Each accepted connection is wrapped in the encrypted stream and expected
//! to open with one framed record naming the destination. Anything that
//! fails to decode (garbage from a prober, a stalled handshake, an unknown
//! address encoding) is bridged to the decoy origin instead, so the endpoint
//! answers probes like a plain reverse proxy. Nothing is ever surfaced to
//! the peer.

use crate::common::net::{configure_tcp_stream, Address};
use crate::common::pipe::pipe_duplex;
use crate::crypto::Cipher;
use crate::tunnel::{Traffic, TunnelStream};
use crate::Result;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tracing::{debug, error, info};

/// Tunnel listener driving one handler task per accepted connection
pub struct TunnelListener {
    listener: TcpListener,
    cipher: Cipher,
    decoy_addr: String,
    idle: Duration,
}

impl TunnelListener {
    pub async fn bind(
        listen: &str,
        cipher: Cipher,
        decoy_addr: String,
        idle: Duration,
    ) -> Result<Self> {
        let listener = TcpListener::bind(listen).await?;
        Ok(TunnelListener {
            listener,
            cipher,
            decoy_addr,
            idle,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub async fn run(self) {
        match self.listener.local_addr() {
            Ok(addr) => info!("tunnel endpoint listening on {}", addr),
            Err(_) => info!("tunnel endpoint listening"),
        }

        loop {
            match self.listener.accept().await {
                Ok((stream, peer_addr)) => {
                    let cipher = self.cipher.clone();
                    let decoy_addr = self.decoy_addr.clone();
                    let idle = self.idle;
                    tokio::spawn(async move {
                        handle_tunnel(stream, peer_addr, cipher, decoy_addr, idle).await;
                    });
                }
                Err(e) => {
                    error!("tunnel accept error: {}", e);
                }
            }
        }
    }
}

async fn handle_tunnel(
    stream: TcpStream,
    peer_addr: SocketAddr,
    cipher: Cipher,
    decoy_addr: String,
    idle: Duration,
) {
    configure_tcp_stream(&stream);
    let mut tunnel = TunnelStream::new(stream, cipher);

    let record = match timeout(idle, Traffic::read_from(&mut tunnel)).await {
        Ok(Ok(record)) => record,
        Ok(Err(e)) => {
            debug!("tunnel decode failed from {}: {}", peer_addr, e);
            return fall_back_to_decoy(tunnel, &decoy_addr, idle).await;
        }
        Err(_) => {
            debug!("tunnel handshake from {} timed out", peer_addr);
            return fall_back_to_decoy(tunnel, &decoy_addr, idle).await;
        }
    };

    let destination = match Address::read_from(&mut &record.addr[..]).await {
        Ok((addr, port)) => addr.to_string_with_port(port),
        Err(e) => {
            debug!("bad destination from {}: {}", peer_addr, e);
            return fall_back_to_decoy(tunnel, &decoy_addr, idle).await;
        }
    };

    debug!(kind = ?record.kind, %destination, "tunnel request from {}", peer_addr);

    let mut target = match TcpStream::connect(&destination).await {
        Ok(stream) => stream,
        Err(e) => {
            debug!("dial {} failed: {}", destination, e);
            return fall_back_to_decoy(tunnel, &decoy_addr, idle).await;
        }
    };
    configure_tcp_stream(&target);

    // Application bytes inlined with the first record go out ahead of the
    // pipe. The current ingress sends an empty payload, but the protocol
    // allows one.
    if !record.payload.is_empty() {
        if let Err(e) = target.write_all(&record.payload).await {
            debug!("forwarding inline payload to {} failed: {}", destination, e);
            return;
        }
    }

    pipe_duplex(tunnel, target, idle).await;
}

/// Camouflage path: bridge the raw connection to the decoy origin without
/// decrypting anything further. Raw bytes that arrived before the fallback
/// decision are forwarded first.
async fn fall_back_to_decoy(tunnel: TunnelStream<TcpStream>, decoy_addr: &str, idle: Duration) {
    let (stream, residue) = tunnel.into_parts();

    let mut decoy = match TcpStream::connect(decoy_addr).await {
        Ok(stream) => stream,
        Err(e) => {
            debug!("decoy {} unreachable: {}", decoy_addr, e);
            return;
        }
    };
    configure_tcp_stream(&decoy);

    if !residue.is_empty() {
        if let Err(e) = decoy.write_all(&residue).await {
            debug!("decoy write failed: {}", e);
            return;
        }
    }

    pipe_duplex(stream, decoy, idle).await;
}
