//! Bidirectional data relay between an accepted connection and its upstream.

pub mod engine;
pub mod lifecycle;

pub use engine::{RelayEngine, RelayRole, RelayStats};
pub use lifecycle::{end_connection, DEFAULT_GRACE_TIMEOUT};
