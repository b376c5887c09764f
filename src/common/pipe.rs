//! Timed byte piping between connection legs
//!
//! Errors terminate a pipe and are logged at the boundary; they are never
//! surfaced to the peer or the caller.

use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;
use tracing::debug;

/// Scratch buffer size for pipe copies
pub const PIPE_BUF: usize = 2048;

/// Copy from `src` to `dst` until EOF, an I/O error, or no data arriving
/// within `idle`. The deadline re-arms before every read. Returns the number
/// of bytes copied.
pub async fn copy_with_idle<R, W>(mut src: R, mut dst: W, idle: Duration) -> u64
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = [0u8; PIPE_BUF];
    let mut copied = 0u64;

    loop {
        let n = match timeout(idle, src.read(&mut buf)).await {
            Err(_) => {
                debug!("pipe idle for {:?}, closing", idle);
                break;
            }
            Ok(Err(e)) => {
                debug!("pipe read error: {}", e);
                break;
            }
            Ok(Ok(0)) => break,
            Ok(Ok(n)) => n,
        };

        if let Err(e) = dst.write_all(&buf[..n]).await {
            debug!("pipe write error: {}", e);
            break;
        }
        if let Err(e) = dst.flush().await {
            debug!("pipe flush error: {}", e);
            break;
        }
        copied += n as u64;
    }

    let _ = dst.shutdown().await;
    copied
}

/// Pipe both directions between `a` and `b`, one task per direction. The
/// legs terminate jointly: when either direction ends, the other is aborted
/// and the dropped halves close the connection pair.
pub async fn pipe_duplex<A, B>(a: A, b: B, idle: Duration)
where
    A: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    B: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (a_read, a_write) = tokio::io::split(a);
    let (b_read, b_write) = tokio::io::split(b);

    let mut up = tokio::spawn(copy_with_idle(a_read, b_write, idle));
    let mut down = tokio::spawn(copy_with_idle(b_read, a_write, idle));

    tokio::select! {
        r = &mut up => {
            down.abort();
            if let Ok(n) = r {
                debug!(bytes = n, "uplink finished");
            }
        }
        r = &mut down => {
            up.abort();
            if let Ok(n) = r {
                debug!(bytes = n, "downlink finished");
            }
        }
    }
}

/// Drain `src` to completion under the same idle-deadline discipline,
/// collecting whatever arrives. Used by the cover-traffic path.
pub async fn read_all<R: AsyncRead + Unpin>(mut src: R, idle: Duration) -> Vec<u8> {
    let mut out = Vec::new();
    let mut buf = [0u8; PIPE_BUF];

    loop {
        match timeout(idle, src.read(&mut buf)).await {
            Err(_) | Ok(Err(_)) | Ok(Ok(0)) => break,
            Ok(Ok(n)) => out.extend_from_slice(&buf[..n]),
        }
    }
    out
}
