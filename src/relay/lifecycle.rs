//! Graceful connection teardown.

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;
use tracing::{debug, trace};

/// How long a half-closed connection may keep draining before it is
/// dropped outright.
pub const DEFAULT_GRACE_TIMEOUT: Duration = Duration::from_secs(3);

/// Close `stream` in an orderly way: half-close the write side so buffered
/// data flushes, then drain whatever the peer still sends until it closes
/// in turn. A peer that has not closed after `grace` gets cut off.
///
/// The stream is consumed, so a second shutdown of the same connection
/// cannot be expressed.
pub async fn end_connection<S>(mut stream: S, grace: Duration)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    if let Err(e) = stream.shutdown().await {
        trace!("write half already gone during shutdown: {}", e);
        return;
    }

    let drained = timeout(grace, async {
        let mut sink = [0u8; 1024];
        loop {
            match stream.read(&mut sink).await {
                Ok(0) | Err(_) => break,
                Ok(_) => {}
            }
        }
    })
    .await;

    if drained.is_err() {
        debug!("peer did not close within {:?}, dropping connection", grace);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;
    use tokio::time::Instant;

    #[tokio::test]
    async fn test_returns_once_peer_closes() {
        let (local, mut peer) = duplex(64);

        let closer = tokio::spawn(end_connection(local, DEFAULT_GRACE_TIMEOUT));

        // peer sees the half-close, sends a straggler, then closes
        let mut buf = [0u8; 16];
        assert_eq!(peer.read(&mut buf).await.unwrap(), 0);
        peer.write_all(b"straggler").await.unwrap();
        peer.shutdown().await.unwrap();

        closer.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_peer_is_cut_off_at_grace() {
        let (local, peer) = duplex(64);
        let started = Instant::now();

        end_connection(local, DEFAULT_GRACE_TIMEOUT).await;

        assert_eq!(started.elapsed(), DEFAULT_GRACE_TIMEOUT);
        drop(peer);
    }

    #[tokio::test(start_paused = true)]
    async fn test_prompt_close_skips_grace_wait() {
        let (local, mut peer) = duplex(64);
        peer.shutdown().await.unwrap();
        let started = Instant::now();

        end_connection(local, DEFAULT_GRACE_TIMEOUT).await;

        assert!(started.elapsed() < DEFAULT_GRACE_TIMEOUT);
    }
}
