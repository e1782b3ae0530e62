//! SOCKS4 negotiation, server side.

use std::io;
use std::net::Ipv4Addr;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

use crate::error::HandshakeError;
use crate::protocol::constants::*;
use crate::protocol::reader::StreamReader;
use crate::protocol::types::{Destination, TargetAddr};

/// Negotiate a SOCKS4 CONNECT after the caller has consumed the version
/// byte. Only requests with an empty ident field parse; a non-null byte
/// where the terminator belongs fails the frame. An address below 256 marks
/// a SOCKS4a request and the real hostname follows as a null-terminated
/// string.
pub(super) async fn handshake<S>(
    reader: &mut StreamReader<S>,
) -> Result<Destination, HandshakeError>
where
    S: AsyncRead + Unpin,
{
    let command = reader.read_byte().await?;
    if command != SOCKS_CMD_CONNECT {
        return Err(HandshakeError::UnsupportedCommand(command));
    }

    let request = reader
        .read_struct(&[("port", 2), ("ip", 4), ("null", 1)])
        .await?;
    if request.get("null") != 0 {
        return Err(HandshakeError::MalformedFrame("ident field is not empty"));
    }
    let ip = request.get("ip") as u32;
    let port = request.get("port") as u16;
    if ip == 0 || port == 0 {
        return Err(HandshakeError::InvalidAddress);
    }

    let host = if ip < 256 {
        let raw = reader.read_null_terminated_string().await?;
        if raw.is_empty() {
            return Err(HandshakeError::MalformedFrame("empty hostname"));
        }
        let domain = String::from_utf8(raw)
            .map_err(|_| HandshakeError::MalformedFrame("hostname is not valid utf-8"))?;
        TargetAddr::Domain(domain)
    } else {
        TargetAddr::Ipv4(Ipv4Addr::from(ip))
    };

    Ok(Destination::new(host, port))
}

/// Final SOCKS4 reply: 0x5A grants the request, 0x5B rejects it. The port
/// and address fields carry no meaning and are zero-filled.
pub(super) async fn send_reply<W>(writer: &mut W, granted: bool) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let status = if granted {
        SOCKS4_REQUEST_GRANTED
    } else {
        SOCKS4_REQUEST_REJECTED
    };
    writer
        .write_all(&[SOCKS4_REPLY_VERSION, status, 0, 0, 0, 0, 0, 0])
        .await
}
