//! Configuration Manager

use super::Config;
use crate::connector::{ProxyTransport, ProxyUri};
use crate::protocol::constants::MAX_FIELD_LEN;
use crate::relay::RelayRole;
use crate::Result;
use anyhow::{bail, Context};
use std::net::SocketAddr;
use std::path::Path;

/// Manages configuration loading and validation
pub struct ConfigManager;

impl ConfigManager {
    /// Load configuration from file
    pub fn load_from_file(path: &Path) -> Result<Config> {
        if path.exists() {
            tracing::info!("Loading configuration from: {}", path.display());
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;

            let config: Config = toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

            config
                .validate()
                .with_context(|| "Configuration validation failed")?;

            tracing::info!("Configuration loaded and validated successfully");
            Ok(config)
        } else {
            tracing::warn!(
                "Configuration file not found at {}, using defaults",
                path.display()
            );
            let config = Config::default();
            config.validate()?;
            Ok(config)
        }
    }

    /// Load configuration from environment variables
    pub fn load_from_env() -> Result<Config> {
        let mut config = Config::default();

        if let Ok(bind_addr) = std::env::var("SOCKSBRIDGE_BIND_ADDR") {
            config.server.bind_addr = bind_addr
                .parse::<SocketAddr>()
                .with_context(|| format!("Invalid SOCKSBRIDGE_BIND_ADDR: {}", bind_addr))?;
        }

        if let Ok(role) = std::env::var("SOCKSBRIDGE_ROLE") {
            config.server.role = parse_role(&role)
                .with_context(|| format!("Invalid SOCKSBRIDGE_ROLE: {}", role))?;
        }

        if let Ok(buffer_size) = std::env::var("SOCKSBRIDGE_BUFFER_SIZE") {
            config.server.buffer_size = buffer_size
                .parse::<usize>()
                .with_context(|| format!("Invalid SOCKSBRIDGE_BUFFER_SIZE: {}", buffer_size))?;
        }

        if let Ok(timeout) = std::env::var("SOCKSBRIDGE_CONNECT_TIMEOUT") {
            config.server.connect_timeout = humantime::parse_duration(&timeout)
                .with_context(|| format!("Invalid SOCKSBRIDGE_CONNECT_TIMEOUT: {}", timeout))?;
        }

        if let Ok(grace) = std::env::var("SOCKSBRIDGE_GRACE_TIMEOUT") {
            config.server.grace_timeout = humantime::parse_duration(&grace)
                .with_context(|| format!("Invalid SOCKSBRIDGE_GRACE_TIMEOUT: {}", grace))?;
        }

        if let Ok(auth_enabled) = std::env::var("SOCKSBRIDGE_AUTH_ENABLED") {
            config.auth.enabled = auth_enabled
                .parse::<bool>()
                .with_context(|| format!("Invalid SOCKSBRIDGE_AUTH_ENABLED: {}", auth_enabled))?;
        }

        if let Ok(chain) = std::env::var("SOCKSBRIDGE_CHAIN") {
            config.chain.proxies = chain
                .split(',')
                .map(|uri| uri.trim().to_string())
                .filter(|uri| !uri.is_empty())
                .collect();
        }

        if let Ok(key) = std::env::var("SOCKSBRIDGE_TRANSFORM_KEY") {
            config.transform.enabled = !key.is_empty();
            config.transform.key = key;
        }

        if let Ok(log_level) = std::env::var("SOCKSBRIDGE_LOG_LEVEL") {
            config.server.log_level = log_level;
        }

        config.validate()?;
        Ok(config)
    }
}

fn parse_role(raw: &str) -> Result<RelayRole> {
    match raw {
        "entry" => Ok(RelayRole::Entry),
        "exit" => Ok(RelayRole::Exit),
        other => bail!("unknown relay role: {} (expected 'entry' or 'exit')", other),
    }
}

impl Config {
    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        self.validate_server_config()
            .with_context(|| "Server configuration validation failed")?;

        self.validate_auth_config()
            .with_context(|| "Authentication configuration validation failed")?;

        self.validate_chain_config()
            .with_context(|| "Proxy chain configuration validation failed")?;

        self.validate_transform_config()
            .with_context(|| "Transform configuration validation failed")?;

        Ok(())
    }

    fn validate_server_config(&self) -> Result<()> {
        if self.server.buffer_size < 1024 {
            bail!("buffer_size must be at least 1024 bytes");
        }

        if self.server.buffer_size > 1048576 {
            bail!("buffer_size cannot exceed 1MB");
        }

        if self.server.connect_timeout.is_zero() {
            bail!("connect_timeout must be greater than 0");
        }

        if self.server.connect_timeout.as_secs() > 3600 {
            bail!("connect_timeout cannot exceed 1 hour");
        }

        if self.server.grace_timeout.is_zero() {
            bail!("grace_timeout must be greater than 0");
        }

        if self.server.grace_timeout.as_secs() > 300 {
            bail!("grace_timeout cannot exceed 5 minutes");
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.server.log_level.as_str()) {
            bail!(
                "log_level must be one of: {}",
                valid_log_levels.join(", ")
            );
        }

        Ok(())
    }

    fn validate_auth_config(&self) -> Result<()> {
        if self.auth.enabled && self.auth.users.is_empty() {
            bail!("When authentication is enabled, at least one user must be configured");
        }

        for (i, user) in self.auth.users.iter().enumerate() {
            if user.username.is_empty() {
                bail!("User {} has empty username", i);
            }

            if user.username.len() > MAX_FIELD_LEN {
                bail!("User {} username exceeds {} bytes", i, MAX_FIELD_LEN);
            }

            if user.password.is_empty() {
                bail!("User {} has empty password", i);
            }

            if user.password.len() > MAX_FIELD_LEN {
                bail!("User {} password exceeds {} bytes", i, MAX_FIELD_LEN);
            }
        }

        Ok(())
    }

    fn validate_chain_config(&self) -> Result<()> {
        for (i, uri) in self.chain.proxies.iter().enumerate() {
            let parsed: ProxyUri = uri
                .parse()
                .with_context(|| format!("Chain proxy {} is not a valid proxy URI", i))?;

            if matches!(parsed.transport, ProxyTransport::Tls { .. }) {
                bail!("Chain proxy {} uses TLS transport, which is not supported", i);
            }
        }

        Ok(())
    }

    fn validate_transform_config(&self) -> Result<()> {
        if self.transform.enabled && self.transform.key.is_empty() {
            bail!("transform.key must be set when the transform is enabled");
        }

        Ok(())
    }

    /// Merge with CLI arguments
    pub fn merge_with_cli_args(
        &mut self,
        bind: Option<&str>,
        port: Option<u16>,
        role: Option<&str>,
        chain: &[String],
        no_auth: bool,
        buffer_size: Option<usize>,
    ) {
        if let Some(bind_str) = bind {
            if let Ok(addr) = bind_str.parse::<SocketAddr>() {
                self.server.bind_addr = addr;
                tracing::info!("CLI override: bind address set to {}", addr);
            } else {
                tracing::warn!("Invalid bind address provided: {}", bind_str);
            }
        }

        if let Some(port) = port {
            self.server.bind_addr.set_port(port);
            tracing::info!("CLI override: port set to {}", port);
        }

        if let Some(role_str) = role {
            match parse_role(role_str) {
                Ok(role) => {
                    self.server.role = role;
                    tracing::info!("CLI override: relay role set to {}", role);
                }
                Err(_) => {
                    tracing::warn!("Invalid relay role provided: {}", role_str);
                }
            }
        }

        if !chain.is_empty() {
            self.chain.proxies = chain.to_vec();
            tracing::info!("CLI override: proxy chain set to {} hop(s)", chain.len());
        }

        if no_auth {
            self.auth.enabled = false;
            tracing::info!("CLI override: authentication disabled");
        }

        if let Some(buffer_size) = buffer_size {
            self.server.buffer_size = buffer_size;
            tracing::info!("CLI override: buffer size set to {} bytes", buffer_size);
        }
    }
}
