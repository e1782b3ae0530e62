//! SOCKS5 negotiation, server side.

use std::io;
use std::net::{Ipv4Addr, Ipv6Addr};

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

use crate::auth::Authenticator;
use crate::connector::uri::encode_component;
use crate::error::HandshakeError;
use crate::protocol::constants::*;
use crate::protocol::reader::StreamReader;
use crate::protocol::types::{Destination, ReplyCode, TargetAddr};

/// Negotiate a SOCKS5 CONNECT after the caller has consumed the version
/// byte: method selection, the RFC 1929 subnegotiation when an
/// authenticator is configured, then the request itself. Replies owed at
/// each stage go out on the same stream; the final reply belongs to the
/// caller, sent once its connect attempt resolves.
///
/// Returns the destination and the peer descriptor, with the authenticated
/// username folded in when the subnegotiation ran.
pub(super) async fn handshake<S>(
    reader: &mut StreamReader<S>,
    authenticator: Option<&dyn Authenticator>,
    peer: String,
) -> Result<(Destination, String), HandshakeError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let peer = negotiate_method(reader, authenticator, peer).await?;

    match read_request(reader).await {
        Ok(dest) => Ok((dest, peer)),
        Err(err) => {
            // request-stage failures still owe the client a coded reply
            if !err.is_disconnect() {
                let _ = send_reply(reader.get_mut(), err.reply_code()).await;
            }
            Err(err)
        }
    }
}

async fn negotiate_method<S>(
    reader: &mut StreamReader<S>,
    authenticator: Option<&dyn Authenticator>,
    peer: String,
) -> Result<String, HandshakeError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    // an empty method list matches nothing and falls through to 0xFF;
    // read_exact_length requires a non-zero count
    let count = reader.read_byte().await?;
    let methods = if count == 0 {
        Bytes::new()
    } else {
        reader.read_exact_length(count as usize).await?
    };

    match authenticator {
        None if methods.contains(&SOCKS5_AUTH_NONE) => {
            reader
                .get_mut()
                .write_all(&[SOCKS5_VERSION, SOCKS5_AUTH_NONE])
                .await?;
            Ok(peer)
        }
        Some(auth) if methods.contains(&SOCKS5_AUTH_USERPASS) => {
            reader
                .get_mut()
                .write_all(&[SOCKS5_VERSION, SOCKS5_AUTH_USERPASS])
                .await?;
            subnegotiate(reader, auth, peer).await
        }
        _ => {
            reader
                .get_mut()
                .write_all(&[SOCKS5_VERSION, SOCKS5_AUTH_UNACCEPTABLE])
                .await?;
            Err(HandshakeError::NoAcceptableAuthMethod)
        }
    }
}

async fn subnegotiate<S>(
    reader: &mut StreamReader<S>,
    authenticator: &dyn Authenticator,
    peer: String,
) -> Result<String, HandshakeError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    reader.read_byte_assert(SOCKS5_USERPASS_VERSION).await?;
    let username = read_credential(reader).await?;
    let password = read_credential(reader).await?;

    // fold the claimed username into the descriptor before asking, so the
    // authenticator sees who the connection claims to be
    let claimed = String::from_utf8_lossy(&username);
    let peer = peer.replacen("://", &format!("://{}@", encode_component(&claimed)), 1);

    if authenticator.authenticate(&username, &password, &peer).await {
        reader
            .get_mut()
            .write_all(&[SOCKS5_USERPASS_VERSION, SOCKS5_USERPASS_SUCCESS])
            .await?;
        Ok(peer)
    } else {
        reader
            .get_mut()
            .write_all(&[SOCKS5_USERPASS_VERSION, SOCKS5_USERPASS_FAILURE])
            .await?;
        Err(HandshakeError::AuthenticationRejected)
    }
}

async fn read_credential<S>(reader: &mut StreamReader<S>) -> Result<Vec<u8>, HandshakeError>
where
    S: AsyncRead + Unpin,
{
    let len = reader.read_byte().await? as usize;
    if len == 0 {
        return Ok(Vec::new());
    }
    Ok(reader.read_exact_length(len).await?.to_vec())
}

async fn read_request<S>(reader: &mut StreamReader<S>) -> Result<Destination, HandshakeError>
where
    S: AsyncRead + Unpin,
{
    let header = reader
        .read_struct(&[("version", 1), ("command", 1), ("reserved", 1), ("type", 1)])
        .await?;
    if header.get("version") != u64::from(SOCKS5_VERSION) {
        return Err(HandshakeError::VersionMismatch {
            expected: SOCKS5_VERSION,
            actual: header.get("version") as u8,
        });
    }
    let command = header.get("command") as u8;
    if command != SOCKS_CMD_CONNECT {
        return Err(HandshakeError::UnsupportedCommand(command));
    }

    let host = match header.get("type") as u8 {
        SOCKS5_ADDR_IPV4 => {
            let raw = reader.read_exact_length(4).await?;
            TargetAddr::Ipv4(Ipv4Addr::new(raw[0], raw[1], raw[2], raw[3]))
        }
        SOCKS5_ADDR_DOMAIN => {
            let len = reader.read_byte().await? as usize;
            if len == 0 {
                return Err(HandshakeError::MalformedFrame("empty domain name"));
            }
            let raw = reader.read_exact_length(len).await?;
            let domain = String::from_utf8(raw.to_vec())
                .map_err(|_| HandshakeError::MalformedFrame("domain name is not valid utf-8"))?;
            TargetAddr::Domain(domain)
        }
        SOCKS5_ADDR_IPV6 => {
            let raw = reader.read_exact_length(16).await?;
            let mut octets = [0u8; 16];
            octets.copy_from_slice(&raw);
            TargetAddr::Ipv6(Ipv6Addr::from(octets))
        }
        other => return Err(HandshakeError::UnsupportedAddressType(other)),
    };

    let port = reader.read_struct(&[("port", 2)]).await?.get("port") as u16;
    Ok(Destination::new(host, port))
}

/// Write the final CONNECT reply. The bound-address field carries no
/// meaning here and is always a zero-filled IPv4 address and port.
pub(super) async fn send_reply<W>(writer: &mut W, code: ReplyCode) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut reply = [0u8; 10];
    reply[0] = SOCKS5_VERSION;
    reply[1] = code.as_u8();
    reply[2] = SOCKS5_RESERVED;
    reply[3] = SOCKS5_ADDR_IPV4;
    writer.write_all(&reply).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::StaticAuthenticator;
    use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

    async fn scripted(frames: &[u8]) -> (StreamReader<DuplexStream>, DuplexStream) {
        let (mut tx, rx) = tokio::io::duplex(256);
        tx.write_all(frames).await.unwrap();
        (StreamReader::new(rx), tx)
    }

    fn auth_store() -> StaticAuthenticator {
        let mut auth = StaticAuthenticator::new();
        auth.add_user("alice", "wonderland", true);
        auth
    }

    #[tokio::test]
    async fn test_no_auth_connect_flow() {
        let mut frames = vec![0x01, 0x00]; // one method, no-auth
        frames.extend_from_slice(&[0x05, 0x01, 0x00, 0x01, 127, 0, 0, 1, 0x00, 0x50]);
        let (mut reader, mut client) = scripted(&frames).await;

        let (dest, peer) = handshake(&mut reader, None, "socks://10.0.0.2:4000".to_string())
            .await
            .unwrap();
        assert_eq!(dest.to_string(), "127.0.0.1:80");
        assert_eq!(peer, "socks://10.0.0.2:4000");

        let mut reply = [0u8; 2];
        client.read_exact(&mut reply).await.unwrap();
        assert_eq!(reply, [0x05, 0x00]);
    }

    #[tokio::test]
    async fn test_userpass_flow_builds_descriptor() {
        let mut frames = vec![0x02, 0x00, 0x02]; // offers no-auth and userpass
        frames.extend_from_slice(&[0x01, 5]);
        frames.extend_from_slice(b"alice");
        frames.push(10);
        frames.extend_from_slice(b"wonderland");
        frames.extend_from_slice(&[0x05, 0x01, 0x00, 0x03, 7]);
        frames.extend_from_slice(b"example");
        frames.extend_from_slice(&[0x01, 0xBB]);
        let (mut reader, mut client) = scripted(&frames).await;

        let auth = auth_store();
        let (dest, peer) = handshake(
            &mut reader,
            Some(&auth),
            "socks://10.0.0.2:4000".to_string(),
        )
        .await
        .unwrap();
        assert_eq!(dest.to_string(), "example:443");
        assert_eq!(peer, "socks://alice@10.0.0.2:4000");

        let mut replies = [0u8; 4];
        client.read_exact(&mut replies).await.unwrap();
        assert_eq!(replies, [0x05, 0x02, 0x01, 0x00]);
    }

    #[tokio::test]
    async fn test_bad_credentials_rejected_on_wire() {
        let mut frames = vec![0x01, 0x02];
        frames.extend_from_slice(&[0x01, 5]);
        frames.extend_from_slice(b"alice");
        frames.push(6);
        frames.extend_from_slice(b"hatter");
        let (mut reader, mut client) = scripted(&frames).await;

        let auth = auth_store();
        let err = handshake(&mut reader, Some(&auth), "socks://10.0.0.2:1".to_string())
            .await
            .unwrap_err();
        assert!(matches!(err, HandshakeError::AuthenticationRejected));

        let mut replies = [0u8; 4];
        client.read_exact(&mut replies).await.unwrap();
        assert_eq!(replies, [0x05, 0x02, 0x01, 0xFF]);
    }

    #[tokio::test]
    async fn test_methods_without_match_are_unacceptable() {
        // authenticator configured but the client only offers no-auth
        let (mut reader, mut client) = scripted(&[0x01, 0x00]).await;

        let auth = auth_store();
        let err = handshake(&mut reader, Some(&auth), "socks://10.0.0.2:1".to_string())
            .await
            .unwrap_err();
        assert!(matches!(err, HandshakeError::NoAcceptableAuthMethod));

        let mut reply = [0u8; 2];
        client.read_exact(&mut reply).await.unwrap();
        assert_eq!(reply, [0x05, 0xFF]);

        // an empty method list matches nothing either, auth or not
        let (mut reader, mut client) = scripted(&[0x00]).await;

        let err = handshake(&mut reader, None, "socks://10.0.0.2:1".to_string())
            .await
            .unwrap_err();
        assert!(matches!(err, HandshakeError::NoAcceptableAuthMethod));

        let mut reply = [0u8; 2];
        client.read_exact(&mut reply).await.unwrap();
        assert_eq!(reply, [0x05, 0xFF]);
    }

    #[tokio::test]
    async fn test_bind_command_gets_coded_reply() {
        let mut frames = vec![0x01, 0x00];
        frames.extend_from_slice(&[0x05, 0x02, 0x00, 0x01, 127, 0, 0, 1, 0x00, 0x50]);
        let (mut reader, mut client) = scripted(&frames).await;

        let err = handshake(&mut reader, None, "socks://10.0.0.2:1".to_string())
            .await
            .unwrap_err();
        assert!(matches!(err, HandshakeError::UnsupportedCommand(0x02)));

        let mut out = [0u8; 12];
        client.read_exact(&mut out).await.unwrap();
        assert_eq!(out[..2], [0x05, 0x00]);
        assert_eq!(
            out[2..],
            [0x05, 0x07, 0x00, 0x01, 0, 0, 0, 0, 0, 0]
        );
    }

    #[tokio::test]
    async fn test_unknown_address_type_gets_coded_reply() {
        let mut frames = vec![0x01, 0x00];
        frames.extend_from_slice(&[0x05, 0x01, 0x00, 0x05]);
        let (mut reader, mut client) = scripted(&frames).await;

        let err = handshake(&mut reader, None, "socks://10.0.0.2:1".to_string())
            .await
            .unwrap_err();
        assert!(matches!(err, HandshakeError::UnsupportedAddressType(0x05)));

        let mut out = [0u8; 12];
        client.read_exact(&mut out).await.unwrap();
        assert_eq!(out[3], 0x08);
    }

    #[tokio::test]
    async fn test_ipv6_request_parses() {
        let mut frames = vec![0x01, 0x00];
        frames.extend_from_slice(&[0x05, 0x01, 0x00, 0x04]);
        frames.extend_from_slice(&Ipv6Addr::LOCALHOST.octets());
        frames.extend_from_slice(&[0x1F, 0x90]);
        let (mut reader, _client) = scripted(&frames).await;

        let (dest, _) = handshake(&mut reader, None, "socks://10.0.0.2:1".to_string())
            .await
            .unwrap();
        assert_eq!(dest.to_string(), "[::1]:8080");
    }
}
