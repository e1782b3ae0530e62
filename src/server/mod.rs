//! SOCKS Server
//!
//! Owns the listener, accepts connections and drives each one through a
//! version-dispatched handshake, the upstream connect, and finally the
//! relay. One task per connection; a broadcast channel fans the shutdown
//! signal out to all of them.

mod socks4;
mod socks5;

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::auth::{Authenticator, StaticAuthenticator};
use crate::config::Config;
use crate::connector::{ChainConnector, Connector, DirectConnector, ProxyUri};
use crate::error::HandshakeError;
use crate::protocol::constants::{SOCKS4_VERSION, SOCKS5_VERSION};
use crate::protocol::reader::StreamReader;
use crate::protocol::types::ReplyCode;
use crate::relay::{end_connection, RelayEngine};
use crate::Result;

pub struct Server {
    config: Arc<Config>,
    authenticator: Option<Arc<dyn Authenticator>>,
    connector: Arc<dyn Connector>,
    relay: Arc<RelayEngine>,
    active_connections: Arc<AtomicUsize>,
    shutdown_tx: broadcast::Sender<()>,
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server").finish_non_exhaustive()
    }
}

impl Server {
    /// Assemble a server from its configuration: credential store, the
    /// connector stack (direct or chained through upstream proxies) and the
    /// relay engine.
    pub fn new(config: Arc<Config>) -> Result<Self> {
        let authenticator: Option<Arc<dyn Authenticator>> = if config.auth.enabled {
            let store = StaticAuthenticator::from_users(&config.auth.users);
            info!("authentication enabled with {} user(s)", store.user_count());
            Some(Arc::new(store))
        } else {
            None
        };

        let direct: Arc<dyn Connector> =
            Arc::new(DirectConnector::new(config.server.connect_timeout));
        let connector: Arc<dyn Connector> = if config.chain.proxies.is_empty() {
            direct
        } else {
            let mut hops = Vec::with_capacity(config.chain.proxies.len());
            for uri in &config.chain.proxies {
                let parsed: ProxyUri = uri
                    .parse()
                    .with_context(|| format!("invalid chain proxy URI: {}", uri))?;
                hops.push(parsed);
            }
            info!("upstream traffic routed through {} proxy hop(s)", hops.len());
            Arc::new(ChainConnector::new(direct, &hops))
        };

        let (shutdown_tx, _) = broadcast::channel(1);

        Ok(Self {
            relay: Arc::new(RelayEngine::from_config(&config)),
            config,
            authenticator,
            connector,
            active_connections: Arc::new(AtomicUsize::new(0)),
            shutdown_tx,
        })
    }

    /// Number of connections currently being handled.
    pub fn active_connections(&self) -> usize {
        self.active_connections.load(Ordering::Relaxed)
    }

    /// Sender half of the shutdown broadcast, for the coordinator.
    pub fn shutdown_handle(&self) -> broadcast::Sender<()> {
        self.shutdown_tx.clone()
    }

    /// Stop accepting and interrupt every in-flight connection.
    pub fn trigger_shutdown(&self) {
        info!("initiating server shutdown");
        if self.shutdown_tx.send(()).is_err() {
            debug!("no active listeners for the shutdown signal");
        }
    }

    /// Bind the configured address and serve until shutdown.
    pub async fn run(self: Arc<Self>) -> Result<()> {
        let bind_addr = self.config.server.bind_addr;
        let listener = TcpListener::bind(bind_addr)
            .await
            .with_context(|| format!("failed to bind {}", bind_addr))?;
        self.serve(listener).await
    }

    /// Accept connections from an already-bound listener until the shutdown
    /// signal arrives.
    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> Result<()> {
        let local_addr = listener.local_addr()?;
        info!("listening on {}", local_addr);

        let mut shutdown_rx = self.shutdown_tx.subscribe();
        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, peer_addr)) => {
                            debug!("accepted connection from {}", peer_addr);
                            Arc::clone(&self).spawn_connection(stream, peer_addr);
                        }
                        Err(e) => {
                            error!("failed to accept connection: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("shutdown signal received, no longer accepting connections");
                    break;
                }
            }
        }
        Ok(())
    }

    fn spawn_connection(self: Arc<Self>, stream: TcpStream, peer_addr: SocketAddr) {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        tokio::spawn(async move {
            let connection_id = Uuid::new_v4();
            let started = Instant::now();
            self.active_connections.fetch_add(1, Ordering::Relaxed);

            let result = tokio::select! {
                res = self.handle_connection(stream, peer_addr, connection_id) => res,
                _ = shutdown_rx.recv() => {
                    info!(connection_id = %connection_id, "connection interrupted by shutdown");
                    Ok(())
                }
            };

            match result {
                Ok(()) => {
                    debug!(
                        connection_id = %connection_id,
                        "connection from {} closed after {:?}",
                        peer_addr,
                        started.elapsed()
                    );
                }
                Err(e) => {
                    error!(connection_id = %connection_id, "connection from {} failed: {:#}", peer_addr, e);
                }
            }

            self.active_connections.fetch_sub(1, Ordering::Relaxed);
        });
    }

    /// Drive one connection end to end: handshake, upstream connect, reply,
    /// relay. Errors returned here are protocol violations or upstream
    /// failures worth logging; a peer that simply goes away resolves to Ok.
    #[instrument(skip(self, stream), fields(connection_id = %connection_id, peer = %peer_addr))]
    async fn handle_connection(
        &self,
        stream: TcpStream,
        peer_addr: SocketAddr,
        connection_id: Uuid,
    ) -> Result<()> {
        let mut reader = StreamReader::new(stream);

        let version = match reader.read_byte().await {
            Ok(version) => version,
            Err(_) => {
                debug!("peer closed before sending a version byte");
                return Ok(());
            }
        };

        let handshake = match version {
            // SOCKS4 has no credential exchange, so it cannot be served
            // while authentication is required
            SOCKS4_VERSION if self.authenticator.is_some() => {
                Err(HandshakeError::NoAcceptableAuthMethod)
            }
            SOCKS4_VERSION => socks4::handshake(&mut reader)
                .await
                .map(|dest| (dest, format!("socks4://{}", peer_addr))),
            SOCKS5_VERSION => {
                socks5::handshake(
                    &mut reader,
                    self.authenticator.as_deref(),
                    format!("socks://{}", peer_addr),
                )
                .await
            }
            _ => Err(HandshakeError::VersionMismatch {
                expected: SOCKS5_VERSION,
                actual: version,
            }),
        };

        let (dest, peer) = match handshake {
            Ok(parts) => parts,
            Err(err) if err.is_disconnect() => {
                debug!("peer disconnected during handshake: {}", err);
                return Ok(());
            }
            Err(err) => {
                warn!("handshake failed: {}", err);
                end_connection(reader.into_stream(), self.config.server.grace_timeout).await;
                return Err(err.into());
            }
        };

        debug!("{} requested connection to {}", peer, dest);

        // dropping the connect future on client close cancels the attempt
        let connect = tokio::select! {
            res = self.connector.connect(&dest) => res.map_err(|e| {
                warn!("connection to {} failed: {}", dest, e);
                HandshakeError::upstream(e)
            }),
            _ = reader.wait_closed() => Err(HandshakeError::Cancelled),
        };

        match connect {
            Ok(upstream) => {
                match version {
                    SOCKS4_VERSION => socks4::send_reply(reader.get_mut(), true).await?,
                    _ => socks5::send_reply(reader.get_mut(), ReplyCode::Succeeded).await?,
                }
                info!("{} connected to {}", peer, dest);

                let stats = self
                    .relay
                    .run(reader.into_stream(), upstream, self.config.server.role)
                    .await;
                debug!("session with {} carried {} bytes", peer, stats.total_bytes());
                Ok(())
            }
            Err(err) if err.is_disconnect() => {
                debug!("{} closed before {} answered", peer, dest);
                Ok(())
            }
            Err(err) => {
                let owed = match version {
                    SOCKS4_VERSION => socks4::send_reply(reader.get_mut(), false).await,
                    _ => socks5::send_reply(reader.get_mut(), err.reply_code()).await,
                };
                if owed.is_err() {
                    debug!("peer went away before the failure reply could be sent");
                }
                end_connection(reader.into_stream(), self.config.server.grace_timeout).await;
                Err(err.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::UserConfig;

    #[test]
    fn test_invalid_chain_uri_rejected_at_construction() {
        let mut config = Config::default();
        config.chain.proxies = vec!["ftp://not-a-socks-proxy".to_string()];

        let err = Server::new(Arc::new(config)).unwrap_err();
        assert!(err.to_string().contains("invalid chain proxy URI"));
    }

    #[test]
    fn test_authenticator_follows_config() {
        let mut config = Config::default();
        config.auth.enabled = true;
        config.auth.users.push(UserConfig {
            username: "alice".to_string(),
            password: "wonderland".to_string(),
            enabled: true,
        });

        let server = Server::new(Arc::new(config)).unwrap();
        assert!(server.authenticator.is_some());

        let server = Server::new(Arc::new(Config::default())).unwrap();
        assert!(server.authenticator.is_none());
    }
}
