//! Outbound Connector Module
//!
//! Everything that opens the upstream leg of a session: the connector
//! capability itself, the plain TCP dialer, proxy URI parsing, and the
//! chain composition that stacks SOCKS client hops on top of each other.

pub mod chain;
pub mod direct;
pub mod types;
pub mod uri;

pub use chain::ChainConnector;
pub use direct::DirectConnector;
pub use types::{AsyncStream, Connector, ProxyStream};
pub use uri::{InvalidProxyUri, ProxyAuth, ProxyTransport, ProxyUri, SocksVersion};
