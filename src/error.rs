//! Error types for SOCKS handshakes.

use thiserror::Error;

use crate::protocol::types::ReplyCode;

/// Errors produced while negotiating a SOCKS session, on either side of the
/// connection. These never escape the per-connection task: the accept loop
/// logs them and ends the offending connection.
#[derive(Error, Debug)]
pub enum HandshakeError {
    /// Peer sent bytes that do not form a valid frame
    #[error("malformed frame: {0}")]
    MalformedFrame(&'static str),

    /// First byte was neither 0x04 nor 0x05, or a later version field lied
    #[error("protocol version mismatch: expected {expected:#04x}, got {actual:#04x}")]
    VersionMismatch { expected: u8, actual: u8 },

    /// Request carried a command other than CONNECT
    #[error("unsupported command {0:#04x}")]
    UnsupportedCommand(u8),

    /// SOCKS5 request carried an unknown address type
    #[error("unsupported address type {0:#04x}")]
    UnsupportedAddressType(u8),

    /// None of the methods the client offered is acceptable
    #[error("no acceptable authentication method")]
    NoAcceptableAuthMethod,

    /// Username/password subnegotiation ended in rejection
    #[error("authentication rejected")]
    AuthenticationRejected,

    /// SOCKS4 request named an invalid target (zero address or port)
    #[error("invalid target address")]
    InvalidAddress,

    /// The connector failed to reach the requested target
    #[error("upstream connect failed ({code:?})")]
    UpstreamConnectFailed {
        code: ReplyCode,
        #[source]
        source: std::io::Error,
    },

    /// Peer closed the connection before the handshake completed
    #[error("peer disconnected during handshake")]
    Disconnected,

    /// Peer closed the connection while its connect request was in flight
    #[error("connect attempt cancelled by peer close")]
    Cancelled,

    /// Underlying transport error
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl HandshakeError {
    pub fn upstream(source: std::io::Error) -> Self {
        HandshakeError::UpstreamConnectFailed {
            code: ReplyCode::from_io_error(&source),
            source,
        }
    }

    /// SOCKS5 reply code to put on the wire when this error aborts a
    /// server-side request that already passed method negotiation.
    pub fn reply_code(&self) -> ReplyCode {
        match self {
            HandshakeError::UnsupportedCommand(_) => ReplyCode::CommandNotSupported,
            HandshakeError::UnsupportedAddressType(_) => ReplyCode::AddressTypeNotSupported,
            HandshakeError::UpstreamConnectFailed { code, .. } => *code,
            _ => ReplyCode::GeneralFailure,
        }
    }

    /// True when the failure was the peer going away rather than misbehaving.
    pub fn is_disconnect(&self) -> bool {
        matches!(
            self,
            HandshakeError::Disconnected | HandshakeError::Cancelled
        )
    }
}
