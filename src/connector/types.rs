//! Connector seam shared by direct dialing, SOCKS clients and chains.

use std::io;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::protocol::types::Destination;

/// Byte stream a connector hands back. Plain TCP, unix sockets and nested
/// SOCKS tunnels all come through the same object.
pub trait AsyncStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> AsyncStream for T {}

impl std::fmt::Debug for dyn AsyncStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("AsyncStream")
    }
}

pub type ProxyStream = Box<dyn AsyncStream>;

/// Capability that opens the outbound leg of a session.
///
/// Dropping the returned future cancels the attempt; implementations must
/// not leave a live connection behind once the future is gone.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, dest: &Destination) -> io::Result<ProxyStream>;
}
