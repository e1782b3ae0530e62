//! SocksBridge Library
//!
//! A SOCKS4/SOCKS5 proxy engine: incremental wire parsing, server and
//! client handshakes, upstream proxy chaining and a pluggable payload
//! transform applied while relaying.

pub mod auth;
pub mod client;
pub mod config;
pub mod connector;
pub mod error;
pub mod protocol;
pub mod relay;
pub mod server;
pub mod shutdown;
pub mod transform;

pub use client::SocksClient;
pub use config::Config;
pub use server::Server;
pub use shutdown::ShutdownCoordinator;

/// Common error type for the proxy
pub type Result<T> = anyhow::Result<T>;
