//! Tunnel client: dials the remote endpoint and opens encrypted sessions

use crate::common::net::configure_tcp_stream;
use crate::crypto::Cipher;
use crate::tunnel::{Traffic, TunnelStream};
use crate::{Error, Result};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::debug;

/// Dials the remote endpoint, wrapping every connection with a fresh copy of
/// the shared cipher so each session derives its own IVs.
pub struct TunnelClient {
    server: String,
    cipher: Cipher,
}

impl TunnelClient {
    pub fn new(server: String, cipher: Cipher) -> Self {
        TunnelClient { server, cipher }
    }

    pub fn server(&self) -> &str {
        &self.server
    }

    /// Dial the remote endpoint and wrap the stream. Nothing is sent yet;
    /// the IV travels with the first write.
    pub async fn connect(&self) -> Result<TunnelStream<TcpStream>> {
        let stream = TcpStream::connect(&self.server).await.map_err(|e| {
            Error::connection(format!("Failed to connect to {}: {}", self.server, e))
        })?;
        configure_tcp_stream(&stream);
        Ok(TunnelStream::new(stream, self.cipher.clone()))
    }

    /// Dial and transmit `record` in the same call. The lazy write-side IV
    /// makes the first wire segment a single `[IV || ciphertext(record)]`.
    pub async fn open(&self, record: &Traffic) -> Result<TunnelStream<TcpStream>> {
        let mut conn = self.connect().await?;
        conn.write_all(&record.to_bytes()).await?;
        conn.flush().await?;
        debug!(server = %self.server, kind = ?record.kind, "tunnel session opened");
        Ok(conn)
    }
}
