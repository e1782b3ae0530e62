//! Plain TCP dialer.

use std::io;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::{lookup_host, TcpStream};
use tokio::time::timeout;
use tracing::{debug, warn};

use super::types::{Connector, ProxyStream};
use crate::protocol::types::{Destination, TargetAddr};

/// Opens direct TCP connections, resolving domain targets through the
/// system resolver. The configured timeout covers the DNS lookup and each
/// connect attempt individually.
#[derive(Debug, Clone)]
pub struct DirectConnector {
    connect_timeout: Duration,
}

impl DirectConnector {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }

    /// Resolve the destination to socket addresses
    async fn resolve(&self, dest: &Destination) -> io::Result<Vec<SocketAddr>> {
        match &dest.host {
            TargetAddr::Ipv4(ip) => Ok(vec![SocketAddr::new(IpAddr::V4(*ip), dest.port)]),
            TargetAddr::Ipv6(ip) => Ok(vec![SocketAddr::new(IpAddr::V6(*ip), dest.port)]),
            TargetAddr::Domain(domain) => {
                debug!("resolving domain: {}:{}", domain, dest.port);
                let lookup = lookup_host((domain.as_str(), dest.port));
                let addrs: Vec<SocketAddr> = match timeout(self.connect_timeout, lookup).await {
                    Ok(Ok(addrs)) => addrs.collect(),
                    Ok(Err(e)) => return Err(e),
                    Err(_) => {
                        return Err(io::Error::new(
                            io::ErrorKind::TimedOut,
                            format!("DNS resolution timed out for {}", domain),
                        ))
                    }
                };
                if addrs.is_empty() {
                    return Err(io::Error::new(
                        io::ErrorKind::HostUnreachable,
                        format!("DNS resolution returned no addresses for {}", domain),
                    ));
                }
                Ok(addrs)
            }
        }
    }
}

impl Default for DirectConnector {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

#[async_trait]
impl Connector for DirectConnector {
    async fn connect(&self, dest: &Destination) -> io::Result<ProxyStream> {
        let addrs = self.resolve(dest).await?;

        // Try each resolved address, remembering the last failure
        let mut last_error = None;
        for addr in addrs {
            match timeout(self.connect_timeout, TcpStream::connect(addr)).await {
                Ok(Ok(stream)) => {
                    debug!("connected to {} ({})", dest, addr);
                    return Ok(Box::new(stream));
                }
                Ok(Err(e)) => {
                    warn!("failed to connect to {}: {}", addr, e);
                    last_error = Some(e);
                }
                Err(_) => {
                    warn!("connect to {} timed out", addr);
                    last_error = Some(io::Error::new(
                        io::ErrorKind::TimedOut,
                        format!("connect to {} timed out", addr),
                    ));
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            io::Error::new(io::ErrorKind::HostUnreachable, "no addresses resolved")
        }))
    }
}
