//! Encrypted connection wrapper
//!
//! Wraps a duplex byte stream and applies a keyed XOR stream per direction.
//! Each direction is a two-state machine: uninitialized until its IV has
//! been produced (write side) or fully consumed (read side), initialized
//! afterwards. The write-side IV travels as the prefix of the first
//! transport write, so the first segment on the wire is
//! `[IV || ciphertext]`; the read side never decrypts a byte before the
//! peer's IV has arrived in full.

use crate::crypto::{Cipher, StreamCrypter};
use bytes::{Buf, BytesMut};
use std::cmp;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;

const READ_CHUNK: usize = 4096;

/// A stream-cipher encrypted connection over `S`
pub struct TunnelStream<S> {
    inner: S,
    cipher: Cipher,
    enc: Option<StreamCrypter>,
    dec: Option<StreamCrypter>,
    iv_sent: Option<Vec<u8>>,
    /// Raw bytes received while the peer IV is still incomplete
    iv_buf: BytesMut,
    /// Decrypted bytes not yet handed to the caller
    pending_plain: BytesMut,
    /// Ciphertext staged but not yet accepted by the transport
    write_buf: BytesMut,
}

impl<S> TunnelStream<S> {
    pub fn new(inner: S, cipher: Cipher) -> Self {
        TunnelStream {
            inner,
            cipher,
            enc: None,
            dec: None,
            iv_sent: None,
            iv_buf: BytesMut::new(),
            pending_plain: BytesMut::new(),
            write_buf: BytesMut::new(),
        }
    }

    /// The IV this side emitted, once the first write has happened
    pub fn iv_sent(&self) -> Option<&[u8]> {
        self.iv_sent.as_deref()
    }

    pub fn get_ref(&self) -> &S {
        &self.inner
    }

    /// Tear down the wrapper, recovering the inner stream together with any
    /// raw bytes that were read off the wire but never decrypted. The decoy
    /// fallback pipes these onward untouched.
    pub fn into_parts(self) -> (S, BytesMut) {
        (self.inner, self.iv_buf)
    }
}

impl TunnelStream<TcpStream> {
    /// Probe whether the underlying connection is still usable without
    /// consuming data: an immediate deadline plus a peek. Timing out means
    /// the peer simply has nothing to say yet.
    pub async fn ping(&self) -> bool {
        let mut probe = [0u8; 1];
        match tokio::time::timeout(Duration::from_millis(1), self.inner.peek(&mut probe)).await {
            Err(_) => true,
            Ok(Ok(0)) => false,
            Ok(Ok(_)) => true,
            Ok(Err(e)) => e.kind() == io::ErrorKind::WouldBlock,
        }
    }
}

fn crypto_error(e: crate::Error) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, e.to_string())
}

impl<S: AsyncRead + Unpin> AsyncRead for TunnelStream<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();

        loop {
            if !this.pending_plain.is_empty() {
                let n = cmp::min(buf.remaining(), this.pending_plain.len());
                buf.put_slice(&this.pending_plain.split_to(n));
                return Poll::Ready(Ok(()));
            }

            let mut chunk = [0u8; READ_CHUNK];
            let mut chunk_buf = ReadBuf::new(&mut chunk);
            match Pin::new(&mut this.inner).poll_read(cx, &mut chunk_buf) {
                Poll::Pending => return Poll::Pending,
                Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
                Poll::Ready(Ok(())) => {}
            }

            let filled = chunk_buf.filled();
            if filled.is_empty() {
                // A short read during IV consumption is fatal.
                if this.dec.is_none() && !this.iv_buf.is_empty() {
                    return Poll::Ready(Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "connection closed during IV exchange",
                    )));
                }
                return Poll::Ready(Ok(()));
            }

            match this.dec.as_mut() {
                Some(dec) => {
                    let start = this.pending_plain.len();
                    this.pending_plain.extend_from_slice(filled);
                    dec.apply(&mut this.pending_plain[start..]);
                }
                None => {
                    this.iv_buf.extend_from_slice(filled);
                    let iv_len = this.cipher.kind().iv_len();
                    if this.iv_buf.len() < iv_len {
                        continue;
                    }
                    let iv = this.iv_buf.split_to(iv_len);
                    let mut dec = match this.cipher.decryptor(&iv) {
                        Ok(dec) => dec,
                        Err(e) => return Poll::Ready(Err(crypto_error(e))),
                    };
                    if !this.iv_buf.is_empty() {
                        let mut rest = this.iv_buf.split();
                        dec.apply(&mut rest[..]);
                        this.pending_plain.extend_from_slice(&rest);
                    }
                    this.dec = Some(dec);
                }
            }
        }
    }
}

impl<S: AsyncWrite + Unpin> TunnelStream<S> {
    /// Push staged ciphertext into the transport until it is gone or the
    /// transport pushes back.
    fn poll_drain(&mut self, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        while !self.write_buf.is_empty() {
            match Pin::new(&mut self.inner).poll_write(cx, &self.write_buf) {
                Poll::Pending => return Poll::Pending,
                Poll::Ready(Ok(0)) => {
                    return Poll::Ready(Err(io::ErrorKind::WriteZero.into()));
                }
                Poll::Ready(Ok(n)) => self.write_buf.advance(n),
                Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
            }
        }
        Poll::Ready(Ok(()))
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for TunnelStream<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();

        // Leftovers from an earlier write must reach the transport before
        // more plaintext is accepted.
        match this.poll_drain(cx) {
            Poll::Pending => return Poll::Pending,
            Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
            Poll::Ready(Ok(())) => {}
        }

        if buf.is_empty() {
            return Poll::Ready(Ok(0));
        }

        if this.enc.is_none() {
            let mut iv = vec![0u8; this.cipher.kind().iv_len()];
            if let Err(e) = getrandom::getrandom(&mut iv) {
                return Poll::Ready(Err(io::Error::new(io::ErrorKind::Other, e.to_string())));
            }
            let enc = match this.cipher.encryptor(&iv) {
                Ok(enc) => enc,
                Err(e) => return Poll::Ready(Err(crypto_error(e))),
            };
            this.write_buf.extend_from_slice(&iv);
            this.iv_sent = Some(iv);
            this.enc = Some(enc);
        }

        let start = this.write_buf.len();
        this.write_buf.extend_from_slice(buf);
        if let Some(enc) = this.enc.as_mut() {
            enc.apply(&mut this.write_buf[start..]);
        }

        // Best effort push; anything left drains on the next write or flush.
        if let Poll::Ready(Err(e)) = this.poll_drain(cx) {
            return Poll::Ready(Err(e));
        }

        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        match this.poll_drain(cx) {
            Poll::Ready(Ok(())) => Pin::new(&mut this.inner).poll_flush(cx),
            other => other,
        }
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.as_mut().poll_flush(cx) {
            Poll::Ready(Ok(())) => Pin::new(&mut self.get_mut().inner).poll_shutdown(cx),
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::METHODS;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn cipher(method: &str) -> Cipher {
        Cipher::new(method, "pw").unwrap()
    }

    #[tokio::test]
    async fn test_paired_streams_all_methods() {
        for kind in METHODS {
            let (a, b) = tokio::io::duplex(4096);
            let mut client = TunnelStream::new(a, cipher(kind.name()));
            let mut server = TunnelStream::new(b, cipher(kind.name()));

            client.write_all(b"hello").await.unwrap();
            client.flush().await.unwrap();

            let mut got = [0u8; 5];
            server.read_exact(&mut got).await.unwrap();
            assert_eq!(&got, b"hello", "{} upstream", kind.name());

            server.write_all(b"world!").await.unwrap();
            server.flush().await.unwrap();

            let mut got = [0u8; 6];
            client.read_exact(&mut got).await.unwrap();
            assert_eq!(&got, b"world!", "{} downstream", kind.name());
        }
    }

    #[tokio::test]
    async fn test_first_write_carries_iv_prefix() {
        let (a, mut b) = tokio::io::duplex(4096);
        let c = cipher("chacha20");
        let mut client = TunnelStream::new(a, c.clone());

        client.write_all(b"first").await.unwrap();
        client.flush().await.unwrap();
        client.write_all(b"second").await.unwrap();
        client.flush().await.unwrap();

        let iv_len = c.kind().iv_len();
        let mut wire = vec![0u8; iv_len + 5 + 6];
        b.read_exact(&mut wire).await.unwrap();

        // The transmitted prefix is exactly the encryptor's IV.
        let iv = client.iv_sent().unwrap().to_vec();
        assert_eq!(&wire[..iv_len], &iv[..]);

        // Decrypting the remainder with that IV restores both writes, so no
        // second IV was embedded.
        let mut rest = wire[iv_len..].to_vec();
        c.decryptor(&iv).unwrap().apply(&mut rest);
        assert_eq!(&rest, b"firstsecond");
    }

    #[tokio::test]
    async fn test_reencrypting_plaintext_reproduces_ciphertext() {
        let (a, mut b) = tokio::io::duplex(4096);
        let c = cipher("aes-256-cfb");
        let mut client = TunnelStream::new(a, c.clone());

        client.write_all(b"echo payload").await.unwrap();
        client.flush().await.unwrap();

        let iv_len = c.kind().iv_len();
        let mut wire = vec![0u8; iv_len + 12];
        b.read_exact(&mut wire).await.unwrap();
        let (iv, ciphertext) = wire.split_at(iv_len);

        let mut plain = ciphertext.to_vec();
        c.decryptor(iv).unwrap().apply(&mut plain);
        assert_eq!(&plain, b"echo payload");

        // Re-encrypting the recovered plaintext under the same IV must
        // reproduce the ciphertext exactly as it appeared on the wire.
        let mut recon = plain.clone();
        c.encryptor(iv).unwrap().apply(&mut recon);
        assert_eq!(recon, ciphertext);
    }

    #[tokio::test]
    async fn test_eof_during_iv_is_fatal() {
        let (a, b) = tokio::io::duplex(4096);
        let mut server = TunnelStream::new(b, cipher("chacha20"));

        let (_unused, mut raw_client) = tokio::io::split(a);
        raw_client.write_all(&[0xAB, 0xCD, 0xEF]).await.unwrap();
        raw_client.shutdown().await.unwrap();

        let mut sink = [0u8; 16];
        let err = server.read_exact(&mut sink).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[tokio::test]
    async fn test_ping_reports_liveness() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).await.unwrap();
        let (server, _) = listener.accept().await.unwrap();

        let conn = TunnelStream::new(client, cipher("chacha20"));
        // Idle but alive: the probe deadline passes without data.
        assert!(conn.ping().await);

        drop(server);
        tokio::time::sleep(Duration::from_millis(50)).await;
        // Peer gone: the peek observes end-of-stream.
        assert!(!conn.ping().await);
    }

    #[tokio::test]
    async fn test_into_parts_returns_undecrypted_residue() {
        let (a, b) = tokio::io::duplex(4096);
        let mut server = TunnelStream::new(b, cipher("chacha20"));

        let (_unused, mut raw_client) = tokio::io::split(a);
        raw_client.write_all(&[1, 2, 3]).await.unwrap();

        // Three bytes cannot complete an 8-byte IV; the read stalls.
        let mut sink = [0u8; 4];
        let pending =
            tokio::time::timeout(Duration::from_millis(50), server.read(&mut sink)).await;
        assert!(pending.is_err());

        let (_inner, residue) = server.into_parts();
        assert_eq!(&residue[..], &[1, 2, 3]);
    }
}
