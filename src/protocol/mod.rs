//! SOCKS Protocol Implementation
//!
//! Wire-level building blocks shared by the server and client sides: the
//! protocol constants, the incremental frame reader, and the address and
//! reply types.

pub mod constants;
pub mod reader;
pub mod types;

pub use constants::*;
pub use reader::{PrefixedStream, StreamReader};
pub use types::*;
