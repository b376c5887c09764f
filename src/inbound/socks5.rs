//! SOCKS5 proxy inbound (local endpoint)
//!
//! Per-client state machine: greeting, CONNECT request, canned reply, then
//! upgrade to an encrypted tunnel session and pipe. Protocol violations
//! close the client without a SOCKS5 error reply.

use crate::common::net::configure_tcp_stream;
use crate::common::pipe::pipe_duplex;
use crate::common::socks::{self, ConnectRequest, Greeting};
use crate::outbound::{ActiveRequests, TunnelClient};
use crate::tunnel::Traffic;
use crate::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info};

/// SOCKS5 listener driving one handler task per accepted client
pub struct Socks5Listener {
    listener: TcpListener,
    client: Arc<TunnelClient>,
    active: Arc<ActiveRequests>,
    idle: Duration,
}

impl Socks5Listener {
    pub async fn bind(
        listen: &str,
        client: Arc<TunnelClient>,
        active: Arc<ActiveRequests>,
        idle: Duration,
    ) -> Result<Self> {
        let listener = TcpListener::bind(listen).await?;
        Ok(Socks5Listener {
            listener,
            client,
            active,
            idle,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub async fn run(self) {
        match self.listener.local_addr() {
            Ok(addr) => info!("SOCKS5 proxy listening on {}", addr),
            Err(_) => info!("SOCKS5 proxy listening"),
        }

        loop {
            match self.listener.accept().await {
                Ok((stream, peer_addr)) => {
                    let client = self.client.clone();
                    let active = self.active.clone();
                    let idle = self.idle;
                    tokio::spawn(async move {
                        if let Err(e) =
                            handle_connection(stream, peer_addr, client, active, idle).await
                        {
                            debug!("SOCKS5 connection error from {}: {}", peer_addr, e);
                        }
                    });
                }
                Err(e) => {
                    error!("SOCKS5 accept error: {}", e);
                }
            }
        }
    }
}

async fn handle_connection(
    mut stream: TcpStream,
    peer_addr: SocketAddr,
    client: Arc<TunnelClient>,
    active: Arc<ActiveRequests>,
    idle: Duration,
) -> Result<()> {
    configure_tcp_stream(&stream);

    let greeting = Greeting::read_from(&mut stream).await?;
    debug!("{}", greeting);
    socks::reply_no_auth(&mut stream).await?;

    let request = ConnectRequest::read_from(&mut stream).await?;
    debug!("SOCKS5 {} {}", peer_addr, request);
    socks::reply_success(&mut stream).await?;

    // A full tracker just means this session goes uncounted.
    let _guard = active.begin().ok();

    // The destination header travels inside the first framed record; the
    // application bytes follow through the pipe.
    let record = Traffic::request(request.raw_addr, Vec::new());
    let remote = client.open(&record).await?;

    pipe_duplex(stream, remote, idle).await;
    Ok(())
}
