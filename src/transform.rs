//! Payload transforms applied to relayed bytes.
//!
//! A [`Transform`] is the capability the relay routes traffic through when a
//! session runs between two cooperating proxies. Entry and exit sides hold
//! the same transform; which half applies on which direction is decided by
//! the relay role, not here. Implementations with block alignment needs
//! advertise that through [`Transform::requires_padding`] so a wrapping
//! collaborator can frame chunks accordingly; the relay itself forwards
//! chunks exactly as produced.

pub trait Transform: Send + Sync {
    fn encrypt(&self, data: &[u8]) -> Vec<u8>;
    fn decrypt(&self, data: &[u8]) -> Vec<u8>;
    fn requires_padding(&self) -> bool;
}

/// Passthrough transform, useful for wiring tests and as the configured
/// default when traffic should flow untouched.
#[derive(Debug, Clone, Default)]
pub struct IdentityTransform;

impl Transform for IdentityTransform {
    fn encrypt(&self, data: &[u8]) -> Vec<u8> {
        data.to_vec()
    }

    fn decrypt(&self, data: &[u8]) -> Vec<u8> {
        data.to_vec()
    }

    fn requires_padding(&self) -> bool {
        false
    }
}

/// Repeating-key XOR. Symmetric and stateless, which makes it the transform
/// configuration and tests exercise the relay routing with.
#[derive(Debug, Clone)]
pub struct XorTransform {
    key: Vec<u8>,
}

impl XorTransform {
    /// # Panics
    ///
    /// Panics on an empty key; configuration validation rejects those
    /// before construction.
    pub fn new(key: impl Into<Vec<u8>>) -> Self {
        let key = key.into();
        assert!(!key.is_empty(), "xor key must not be empty");
        Self { key }
    }

    fn apply(&self, data: &[u8]) -> Vec<u8> {
        data.iter()
            .zip(self.key.iter().cycle())
            .map(|(byte, key)| byte ^ key)
            .collect()
    }
}

impl Transform for XorTransform {
    fn encrypt(&self, data: &[u8]) -> Vec<u8> {
        self.apply(data)
    }

    fn decrypt(&self, data: &[u8]) -> Vec<u8> {
        self.apply(data)
    }

    fn requires_padding(&self) -> bool {
        false
    }
}
