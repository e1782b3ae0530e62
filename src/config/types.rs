//! Configuration Types

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

use crate::relay::{RelayRole, DEFAULT_GRACE_TIMEOUT};

/// Main configuration structure
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub server: ServerConfig,
    pub auth: AuthConfig,
    pub chain: ChainConfig,
    pub transform: TransformConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    /// Which side of a chained deployment this instance plays. Entry
    /// obfuscates traffic towards the upstream, exit restores it.
    pub role: RelayRole,
    pub buffer_size: usize,
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,
    /// How long a closing connection may keep draining before it is
    /// forcibly dropped.
    #[serde(with = "humantime_serde")]
    pub grace_timeout: Duration,
    /// How long shutdown waits for in-flight connections to finish.
    #[serde(with = "humantime_serde")]
    pub shutdown_timeout: Duration,
    pub log_level: String,
}

/// Authentication configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AuthConfig {
    pub enabled: bool,
    pub users: Vec<UserConfig>,
}

/// User configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UserConfig {
    pub username: String,
    pub password: String,
    pub enabled: bool,
}

/// Upstream proxy chain configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChainConfig {
    /// Proxy URIs in connection order; the first entry is dialed directly.
    pub proxies: Vec<String>,
}

/// Payload transform configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TransformConfig {
    pub enabled: bool,
    pub key: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                bind_addr: "127.0.0.1:1080".parse().unwrap(),
                role: RelayRole::Entry,
                buffer_size: crate::relay::engine::DEFAULT_BUFFER_SIZE,
                connect_timeout: Duration::from_secs(30),
                grace_timeout: DEFAULT_GRACE_TIMEOUT,
                shutdown_timeout: Duration::from_secs(30),
                log_level: "info".to_string(),
            },
            auth: AuthConfig {
                enabled: false,
                users: vec![],
            },
            chain: ChainConfig { proxies: vec![] },
            transform: TransformConfig {
                enabled: false,
                key: String::new(),
            },
        }
    }
}
