//! Relay Engine

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;
use tracing::{debug, info};

use super::lifecycle::DEFAULT_GRACE_TIMEOUT;
use crate::transform::{Transform, XorTransform};

pub const DEFAULT_BUFFER_SIZE: usize = 8192;

/// Which end of a cooperating proxy pair this process plays. The role
/// decides the direction a configured transform encrypts: the entry proxy
/// encrypts what it sends upstream, the exit proxy encrypts what it sends
/// back down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelayRole {
    Entry,
    Exit,
}

impl RelayRole {
    fn outbound_op(self) -> TransformOp {
        match self {
            RelayRole::Entry => TransformOp::Encrypt,
            RelayRole::Exit => TransformOp::Decrypt,
        }
    }

    fn inbound_op(self) -> TransformOp {
        match self {
            RelayRole::Entry => TransformOp::Decrypt,
            RelayRole::Exit => TransformOp::Encrypt,
        }
    }
}

impl fmt::Display for RelayRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RelayRole::Entry => write!(f, "entry"),
            RelayRole::Exit => write!(f, "exit"),
        }
    }
}

#[derive(Clone, Copy)]
enum TransformOp {
    Encrypt,
    Decrypt,
}

/// Byte counters for one finished relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayStats {
    pub bytes_to_upstream: u64,
    pub bytes_to_downstream: u64,
}

impl RelayStats {
    pub fn total_bytes(&self) -> u64 {
        self.bytes_to_upstream + self.bytes_to_downstream
    }
}

/// Moves bytes between an accepted connection and its upstream until both
/// directions have ended.
pub struct RelayEngine {
    buffer_size: usize,
    grace_timeout: Duration,
    transform: Option<Arc<dyn Transform>>,
}

impl RelayEngine {
    pub fn new() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
            grace_timeout: DEFAULT_GRACE_TIMEOUT,
            transform: None,
        }
    }

    pub fn with_transform(transform: Arc<dyn Transform>) -> Self {
        Self {
            transform: Some(transform),
            ..Self::new()
        }
    }

    /// Create a relay engine from configuration.
    pub fn from_config(config: &crate::config::Config) -> Self {
        let transform: Option<Arc<dyn Transform>> = if config.transform.enabled {
            Some(Arc::new(XorTransform::new(config.transform.key.as_bytes())))
        } else {
            None
        };
        Self {
            buffer_size: config.server.buffer_size,
            grace_timeout: config.server.grace_timeout,
            transform,
        }
    }

    /// Relay until both directions have ended.
    ///
    /// The two directions are forwarded independently; bytes within each
    /// keep their order. Whichever direction ends first half-closes its
    /// destination, and the opposite direction then has the grace period
    /// to finish draining before the connections are dropped.
    pub async fn run<D, U>(&self, downstream: D, upstream: U, role: RelayRole) -> RelayStats
    where
        D: AsyncRead + AsyncWrite + Send + Unpin,
        U: AsyncRead + AsyncWrite + Send + Unpin,
    {
        let started = Instant::now();
        let to_upstream = AtomicU64::new(0);
        let to_downstream = AtomicU64::new(0);

        let (down_read, down_write) = tokio::io::split(downstream);
        let (up_read, up_write) = tokio::io::split(upstream);

        debug!("starting bidirectional relay as {} proxy", role);
        let outbound = forward(
            down_read,
            up_write,
            self.transform_for(role.outbound_op()),
            self.buffer_size,
            &to_upstream,
            "downstream->upstream",
        );
        let inbound = forward(
            up_read,
            down_write,
            self.transform_for(role.inbound_op()),
            self.buffer_size,
            &to_downstream,
            "upstream->downstream",
        );
        tokio::pin!(outbound);
        tokio::pin!(inbound);

        let mut outbound_ended_first = false;
        let first = tokio::select! {
            res = &mut outbound => {
                outbound_ended_first = true;
                res
            }
            res = &mut inbound => res,
        };
        if let Err(e) = first {
            debug!("relay direction failed: {}", e);
        }

        let second = if outbound_ended_first {
            timeout(self.grace_timeout, &mut inbound).await
        } else {
            timeout(self.grace_timeout, &mut outbound).await
        };
        match second {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!("relay direction failed: {}", e),
            Err(_) => debug!(
                "opposite direction still open after {:?}, forcing connections shut",
                self.grace_timeout
            ),
        }

        let stats = RelayStats {
            bytes_to_upstream: to_upstream.load(Ordering::Relaxed),
            bytes_to_downstream: to_downstream.load(Ordering::Relaxed),
        };
        info!(
            bytes_to_upstream = stats.bytes_to_upstream,
            bytes_to_downstream = stats.bytes_to_downstream,
            duration_ms = started.elapsed().as_millis() as u64,
            "relay finished"
        );
        stats
    }

    fn transform_for(&self, op: TransformOp) -> Option<(&dyn Transform, TransformOp)> {
        self.transform.as_deref().map(|t| (t, op))
    }
}

impl Default for RelayEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// Forward one direction until the source reports end of stream, then
/// half-close the destination so its buffered data flushes.
async fn forward<R, W>(
    mut from: R,
    mut to: W,
    transform: Option<(&dyn Transform, TransformOp)>,
    buffer_size: usize,
    carried: &AtomicU64,
    direction: &'static str,
) -> std::io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; buffer_size];
    loop {
        let n = from.read(&mut buf).await?;
        if n == 0 {
            debug!("{} ended, half-closing destination", direction);
            if let Err(e) = to.shutdown().await {
                debug!("{} destination already gone: {}", direction, e);
            }
            return Ok(());
        }
        match transform {
            Some((t, TransformOp::Encrypt)) => to.write_all(&t.encrypt(&buf[..n])).await?,
            Some((t, TransformOp::Decrypt)) => to.write_all(&t.decrypt(&buf[..n])).await?,
            None => to.write_all(&buf[..n]).await?,
        }
        carried.fetch_add(n as u64, Ordering::Relaxed);
    }
}
