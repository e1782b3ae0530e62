//! Proxy chain composition.

use std::io;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use super::types::{Connector, ProxyStream};
use super::uri::ProxyUri;
use crate::client::SocksClient;
use crate::protocol::types::Destination;

/// Stacks SOCKS client hops over a base connector. Asking the result to
/// connect to a target tunnels through every configured proxy in order:
/// the base connector dials the first hop, each later hop is reached by a
/// CONNECT issued through the tunnel so far, and the last hop's CONNECT
/// names the real destination.
pub struct ChainConnector {
    inner: Arc<dyn Connector>,
    hops: usize,
}

impl ChainConnector {
    pub fn new(base: Arc<dyn Connector>, path: &[ProxyUri]) -> Self {
        let hops = path.len();
        let mut connector = base;
        for proxy in path {
            connector = Arc::new(SocksClient::new(proxy.clone(), connector));
        }
        Self {
            inner: connector,
            hops,
        }
    }

    pub fn hop_count(&self) -> usize {
        self.hops
    }
}

#[async_trait]
impl Connector for ChainConnector {
    async fn connect(&self, dest: &Destination) -> io::Result<ProxyStream> {
        debug!("connecting to {} through {} proxy hops", dest, self.hops);
        self.inner.connect(dest).await
    }
}
