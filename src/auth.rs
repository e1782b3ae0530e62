//! Authentication Module
//!
//! The server never decides credentials itself; it asks an [`Authenticator`]
//! during the RFC 1929 subnegotiation. Implementations may hit a database or
//! an external service, which is why the check is async. A failure inside an
//! implementation counts as a rejection.

use std::collections::HashMap;

use async_trait::async_trait;
use tracing::debug;

use crate::config::UserConfig;

#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Decide whether these credentials may proxy through this server.
    /// `peer` is a descriptor such as `socks://alice@203.0.113.9:41302`
    /// naming where the client connected from.
    async fn authenticate(&self, username: &[u8], password: &[u8], peer: &str) -> bool;
}

/// Username/password table loaded from configuration.
pub struct StaticAuthenticator {
    users: HashMap<String, UserEntry>,
}

#[derive(Debug, Clone)]
struct UserEntry {
    password: String,
    enabled: bool,
}

impl StaticAuthenticator {
    pub fn new() -> Self {
        Self {
            users: HashMap::new(),
        }
    }

    pub fn add_user(
        &mut self,
        username: impl Into<String>,
        password: impl Into<String>,
        enabled: bool,
    ) {
        self.users.insert(
            username.into(),
            UserEntry {
                password: password.into(),
                enabled,
            },
        );
    }

    /// Load users from configuration
    pub fn from_users(users: &[UserConfig]) -> Self {
        let mut store = Self::new();
        for user in users {
            store.add_user(user.username.clone(), user.password.clone(), user.enabled);
        }
        store
    }

    pub fn user_count(&self) -> usize {
        self.users.len()
    }
}

impl Default for StaticAuthenticator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Authenticator for StaticAuthenticator {
    async fn authenticate(&self, username: &[u8], password: &[u8], peer: &str) -> bool {
        // credentials are raw bytes on the wire; ours are configured as text
        let (username, password) = match (
            std::str::from_utf8(username),
            std::str::from_utf8(password),
        ) {
            (Ok(u), Ok(p)) => (u, p),
            _ => {
                debug!(peer, "rejecting non-utf8 credentials");
                return false;
            }
        };

        match self.users.get(username) {
            Some(entry) if entry.enabled && entry.password == password => true,
            _ => {
                debug!(peer, username, "credentials rejected");
                false
            }
        }
    }
}
