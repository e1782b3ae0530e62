//! SOCKS Protocol Types

use std::fmt;
use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use crate::protocol::constants::*;

/// Target address carried in a SOCKS request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetAddr {
    Ipv4(Ipv4Addr),
    Ipv6(Ipv6Addr),
    Domain(String),
}

impl TargetAddr {
    /// Get the SOCKS5 address type code for this address
    pub fn address_type(&self) -> u8 {
        match self {
            TargetAddr::Ipv4(_) => SOCKS5_ADDR_IPV4,
            TargetAddr::Ipv6(_) => SOCKS5_ADDR_IPV6,
            TargetAddr::Domain(_) => SOCKS5_ADDR_DOMAIN,
        }
    }

    /// Create from socket address
    pub fn from_socket_addr(addr: &SocketAddr) -> Self {
        match addr {
            SocketAddr::V4(v4) => TargetAddr::Ipv4(*v4.ip()),
            SocketAddr::V6(v6) => TargetAddr::Ipv6(*v6.ip()),
        }
    }

    /// Parse a host string, preferring the literal IP forms the way a client
    /// encodes them: only unresolvable names become `Domain`.
    pub fn from_host(host: &str) -> Self {
        match host.parse::<IpAddr>() {
            Ok(IpAddr::V4(ip)) => TargetAddr::Ipv4(ip),
            Ok(IpAddr::V6(ip)) => TargetAddr::Ipv6(ip),
            Err(_) => TargetAddr::Domain(host.to_string()),
        }
    }

    /// Append the SOCKS5 wire encoding (ATYP followed by the address bytes).
    /// Domain names longer than 255 bytes cannot be encoded; callers validate
    /// before building a request frame.
    pub fn write_to(&self, buf: &mut Vec<u8>) {
        match self {
            TargetAddr::Ipv4(ip) => {
                buf.push(SOCKS5_ADDR_IPV4);
                buf.extend_from_slice(&ip.octets());
            }
            TargetAddr::Ipv6(ip) => {
                buf.push(SOCKS5_ADDR_IPV6);
                buf.extend_from_slice(&ip.octets());
            }
            TargetAddr::Domain(domain) => {
                debug_assert!(domain.len() <= MAX_FIELD_LEN);
                buf.push(SOCKS5_ADDR_DOMAIN);
                buf.push(domain.len() as u8);
                buf.extend_from_slice(domain.as_bytes());
            }
        }
    }
}

impl fmt::Display for TargetAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetAddr::Ipv4(ip) => write!(f, "{}", ip),
            TargetAddr::Ipv6(ip) => write!(f, "{}", ip),
            TargetAddr::Domain(domain) => write!(f, "{}", domain),
        }
    }
}

/// Where a SOCKS request wants to go
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Destination {
    pub host: TargetAddr,
    pub port: u16,
}

impl Destination {
    pub fn new(host: TargetAddr, port: u16) -> Self {
        Self { host, port }
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.host {
            TargetAddr::Ipv6(ip) => write!(f, "[{}]:{}", ip, self.port),
            host => write!(f, "{}:{}", host, self.port),
        }
    }
}

/// SOCKS5 reply codes (RFC 1928 section 6)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyCode {
    Succeeded,
    GeneralFailure,
    NotAllowed,
    NetworkUnreachable,
    HostUnreachable,
    ConnectionRefused,
    TtlExpired,
    CommandNotSupported,
    AddressTypeNotSupported,
}

impl ReplyCode {
    pub fn as_u8(self) -> u8 {
        match self {
            ReplyCode::Succeeded => SOCKS5_REPLY_SUCCESS,
            ReplyCode::GeneralFailure => SOCKS5_REPLY_GENERAL_FAILURE,
            ReplyCode::NotAllowed => SOCKS5_REPLY_NOT_ALLOWED,
            ReplyCode::NetworkUnreachable => SOCKS5_REPLY_NETWORK_UNREACHABLE,
            ReplyCode::HostUnreachable => SOCKS5_REPLY_HOST_UNREACHABLE,
            ReplyCode::ConnectionRefused => SOCKS5_REPLY_CONNECTION_REFUSED,
            ReplyCode::TtlExpired => SOCKS5_REPLY_TTL_EXPIRED,
            ReplyCode::CommandNotSupported => SOCKS5_REPLY_COMMAND_NOT_SUPPORTED,
            ReplyCode::AddressTypeNotSupported => SOCKS5_REPLY_ADDRESS_TYPE_NOT_SUPPORTED,
        }
    }

    pub fn from_u8(code: u8) -> Option<Self> {
        match code {
            SOCKS5_REPLY_SUCCESS => Some(ReplyCode::Succeeded),
            SOCKS5_REPLY_GENERAL_FAILURE => Some(ReplyCode::GeneralFailure),
            SOCKS5_REPLY_NOT_ALLOWED => Some(ReplyCode::NotAllowed),
            SOCKS5_REPLY_NETWORK_UNREACHABLE => Some(ReplyCode::NetworkUnreachable),
            SOCKS5_REPLY_HOST_UNREACHABLE => Some(ReplyCode::HostUnreachable),
            SOCKS5_REPLY_CONNECTION_REFUSED => Some(ReplyCode::ConnectionRefused),
            SOCKS5_REPLY_TTL_EXPIRED => Some(ReplyCode::TtlExpired),
            SOCKS5_REPLY_COMMAND_NOT_SUPPORTED => Some(ReplyCode::CommandNotSupported),
            SOCKS5_REPLY_ADDRESS_TYPE_NOT_SUPPORTED => Some(ReplyCode::AddressTypeNotSupported),
            _ => None,
        }
    }

    pub fn message(self) -> &'static str {
        match self {
            ReplyCode::Succeeded => "succeeded",
            ReplyCode::GeneralFailure => "general server failure",
            ReplyCode::NotAllowed => "connection not allowed by ruleset",
            ReplyCode::NetworkUnreachable => "network unreachable",
            ReplyCode::HostUnreachable => "host unreachable",
            ReplyCode::ConnectionRefused => "connection refused",
            ReplyCode::TtlExpired => "TTL expired",
            ReplyCode::CommandNotSupported => "command not supported",
            ReplyCode::AddressTypeNotSupported => "address type not supported",
        }
    }

    /// Classify a connect failure for the reply a server sends back.
    /// Checks the error kind first, then falls back to the raw errno.
    pub fn from_io_error(e: &io::Error) -> ReplyCode {
        match e.kind() {
            io::ErrorKind::PermissionDenied => ReplyCode::NotAllowed,
            io::ErrorKind::NetworkUnreachable => ReplyCode::NetworkUnreachable,
            io::ErrorKind::HostUnreachable => ReplyCode::HostUnreachable,
            io::ErrorKind::ConnectionRefused => ReplyCode::ConnectionRefused,
            io::ErrorKind::TimedOut => ReplyCode::TtlExpired,
            _ => match e.raw_os_error() {
                Some(13) => ReplyCode::NotAllowed,          // EACCES
                Some(101) => ReplyCode::NetworkUnreachable, // ENETUNREACH
                Some(110) => ReplyCode::TtlExpired,         // ETIMEDOUT
                Some(111) => ReplyCode::ConnectionRefused,  // ECONNREFUSED
                Some(113) => ReplyCode::HostUnreachable,    // EHOSTUNREACH
                _ => ReplyCode::GeneralFailure,
            },
        }
    }

    /// Surface a non-zero reply as the socket error a direct connection
    /// would have produced. Unsupported command and address type have no
    /// direct counterpart and come back as `Unsupported`.
    pub fn into_io_error(self, dest: &Destination) -> io::Error {
        let kind = match self {
            ReplyCode::Succeeded => unreachable!("success is not an error"),
            ReplyCode::GeneralFailure => io::ErrorKind::ConnectionRefused,
            ReplyCode::NotAllowed => io::ErrorKind::PermissionDenied,
            ReplyCode::NetworkUnreachable => io::ErrorKind::NetworkUnreachable,
            ReplyCode::HostUnreachable => io::ErrorKind::HostUnreachable,
            ReplyCode::ConnectionRefused => io::ErrorKind::ConnectionRefused,
            ReplyCode::TtlExpired => io::ErrorKind::TimedOut,
            ReplyCode::CommandNotSupported => io::ErrorKind::Unsupported,
            ReplyCode::AddressTypeNotSupported => io::ErrorKind::Unsupported,
        };
        io::Error::new(
            kind,
            format!("proxy refused connection to {}: {}", dest, self.message()),
        )
    }
}
