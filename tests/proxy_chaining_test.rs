//! Tests for chained deployments: client handshakes against live servers,
//! multi-hop chains, and the entry/exit transform pairing.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use socksbridge::config::{Config, UserConfig};
use socksbridge::connector::{ChainConnector, Connector, DirectConnector, ProxyUri};
use socksbridge::protocol::types::{Destination, TargetAddr};
use socksbridge::relay::RelayRole;
use socksbridge::{Server, SocksClient};

async fn spawn_echo_listener() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let (mut read_half, mut write_half) = stream.split();
                let _ = tokio::io::copy(&mut read_half, &mut write_half).await;
            });
        }
    });
    addr
}

async fn spawn_server(config: Config) -> (Arc<Server>, SocketAddr) {
    let server = Arc::new(Server::new(Arc::new(config)).unwrap());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(Arc::clone(&server).serve(listener));
    (server, addr)
}

/// Accept one connection and report every byte it carried once it closes.
async fn spawn_recording_sink() -> (SocketAddr, tokio::sync::oneshot::Receiver<Vec<u8>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = tokio::sync::oneshot::channel();
    tokio::spawn(async move {
        if let Ok((mut stream, _)) = listener.accept().await {
            let mut seen = Vec::new();
            let _ = stream.read_to_end(&mut seen).await;
            let _ = tx.send(seen);
        }
    });
    (addr, rx)
}

fn destination(addr: SocketAddr) -> Destination {
    Destination::new(TargetAddr::from_socket_addr(&addr), addr.port())
}

/// Raw no-auth SOCKS5 CONNECT through `proxy`, returning the stream after a
/// successful reply.
async fn socks5_connect(proxy: SocketAddr, dest: SocketAddr) -> TcpStream {
    let mut stream = TcpStream::connect(proxy).await.unwrap();
    stream.write_all(&[0x05, 0x01, 0x00]).await.unwrap();
    let mut method = [0u8; 2];
    stream.read_exact(&mut method).await.unwrap();
    assert_eq!(method, [0x05, 0x00]);

    let octets = match dest.ip() {
        IpAddr::V4(ip) => ip.octets(),
        IpAddr::V6(_) => panic!("test destinations are IPv4"),
    };
    let mut request = vec![0x05, 0x01, 0x00, 0x01];
    request.extend_from_slice(&octets);
    request.extend_from_slice(&dest.port().to_be_bytes());
    stream.write_all(&request).await.unwrap();

    let mut reply = [0u8; 10];
    stream.read_exact(&mut reply).await.unwrap();
    assert_eq!(reply[1], 0x00, "proxy refused the connect");
    stream
}

#[tokio::test]
async fn test_socks_client_handshake_against_live_server() {
    let echo = spawn_echo_listener().await;
    let (_server, proxy) = spawn_server(Config::default()).await;

    let uri: ProxyUri = format!("socks5://{}", proxy).parse().unwrap();
    let client = SocksClient::new(uri, Arc::new(DirectConnector::default()));

    let mut stream = client.connect(&destination(echo)).await.unwrap();
    stream.write_all(b"end to end").await.unwrap();
    let mut buf = [0u8; 10];
    stream.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"end to end");
}

#[tokio::test]
async fn test_socks4_client_against_live_server() {
    let echo = spawn_echo_listener().await;
    let (_server, proxy) = spawn_server(Config::default()).await;

    let uri: ProxyUri = format!("socks4://{}", proxy).parse().unwrap();
    let client = SocksClient::new(uri, Arc::new(DirectConnector::default()));

    let mut stream = client.connect(&destination(echo)).await.unwrap();
    stream.write_all(b"legacy hop").await.unwrap();
    let mut buf = [0u8; 10];
    stream.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"legacy hop");
}

#[tokio::test]
async fn test_chain_connector_stacks_two_live_hops() {
    let echo = spawn_echo_listener().await;
    let (_first, first_addr) = spawn_server(Config::default()).await;
    let (_second, second_addr) = spawn_server(Config::default()).await;

    let path: Vec<ProxyUri> = [first_addr, second_addr]
        .iter()
        .map(|addr| format!("socks5://{}", addr).parse().unwrap())
        .collect();
    let chain = ChainConnector::new(Arc::new(DirectConnector::default()), &path);
    assert_eq!(chain.hop_count(), 2);

    let mut stream = chain.connect(&destination(echo)).await.unwrap();
    stream.write_all(b"two hops out").await.unwrap();
    let mut buf = [0u8; 12];
    stream.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"two hops out");
}

#[tokio::test]
async fn test_server_with_configured_chain_tunnels_through_upstream() {
    let echo = spawn_echo_listener().await;

    let (_back, back_addr) = spawn_server(Config::default()).await;

    let mut front = Config::default();
    front.chain.proxies = vec![format!("socks5://{}", back_addr)];
    let (_front, front_addr) = spawn_server(front).await;

    let mut stream = socks5_connect(front_addr, echo).await;
    stream.write_all(b"chained").await.unwrap();
    let mut buf = [0u8; 7];
    stream.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"chained");
}

#[tokio::test]
async fn test_chain_hop_with_credentials() {
    let echo = spawn_echo_listener().await;

    let mut back = Config::default();
    back.auth.enabled = true;
    back.auth.users.push(UserConfig {
        username: "alice".to_string(),
        // the space forces percent-encoding in the chain URI
        password: "wonder land".to_string(),
        enabled: true,
    });
    let (_back, back_addr) = spawn_server(back).await;

    let mut front = Config::default();
    front.chain.proxies = vec![format!("socks5://alice:wonder%20land@{}", back_addr)];
    let (_front, front_addr) = spawn_server(front).await;

    let mut stream = socks5_connect(front_addr, echo).await;
    stream.write_all(b"authed hop").await.unwrap();
    let mut buf = [0u8; 10];
    stream.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"authed hop");
}

#[tokio::test]
async fn test_entry_exit_transform_pair_is_transparent() {
    let echo = spawn_echo_listener().await;

    let mut back = Config::default();
    back.server.role = RelayRole::Exit;
    back.transform.enabled = true;
    back.transform.key = "super secret".to_string();
    let (_back, back_addr) = spawn_server(back).await;

    let mut front = Config::default();
    front.chain.proxies = vec![format!("socks5://{}", back_addr)];
    front.transform.enabled = true;
    front.transform.key = "super secret".to_string();
    let (_front, front_addr) = spawn_server(front).await;

    // payload is scrambled on the middle leg but arrives intact
    let mut stream = socks5_connect(front_addr, echo).await;
    stream.write_all(b"invisible in transit").await.unwrap();
    let mut buf = [0u8; 20];
    stream.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"invisible in transit");
}

#[tokio::test]
async fn test_entry_transform_scrambles_the_upstream_leg() {
    let (sink_addr, recorded) = spawn_recording_sink().await;

    let mut front = Config::default();
    front.transform.enabled = true;
    front.transform.key = "super secret".to_string();
    let (_front, front_addr) = spawn_server(front).await;

    let mut stream = socks5_connect(front_addr, sink_addr).await;
    stream.write_all(b"invisible in transit").await.unwrap();
    stream.shutdown().await.unwrap();

    let seen = recorded.await.unwrap();
    let expected: Vec<u8> = b"invisible in transit"
        .iter()
        .zip(b"super secret".iter().cycle())
        .map(|(byte, key)| byte ^ key)
        .collect();
    assert_eq!(seen, expected);
    assert_ne!(seen, b"invisible in transit");
}
