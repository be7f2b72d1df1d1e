//! End-to-end tests for CONNECT tunnels over loopback TCP

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{timeout, Duration};
use tunnelproxy::config::{AccessControlConfig, AccessRule};
use tunnelproxy::connection::{DirectConnector, ProxyContext};
use tunnelproxy::metrics::Metrics;
use tunnelproxy::protocol::StatusCode;
use tunnelproxy::relay::{RelayEngine, RelaySession};
use tunnelproxy::{Config, ConnectionManager, TunnelHandler, TunnelOutcome};

const ESTABLISHED: &str = "HTTP/1.1 200 Connection established! Go ahead!\r\n\r\n";

fn test_config() -> Config {
    let mut config = Config::default();
    config.server.bind_addr = "127.0.0.1:0".parse().unwrap();
    config.server.connect_timeout = Duration::from_secs(2);
    config
}

fn deny_loopback() -> AccessControlConfig {
    AccessControlConfig {
        enabled: true,
        default_policy: "allow".to_string(),
        rules: vec![
            AccessRule {
                pattern: "127.0.0.0/8".to_string(),
                action: "block".to_string(),
                ports: None,
            },
            AccessRule {
                pattern: "::1".to_string(),
                action: "block".to_string(),
                ports: None,
            },
        ],
    }
}

async fn start_proxy(config: Config) -> SocketAddr {
    let mut manager = ConnectionManager::new(Arc::new(config), None);
    let addr = manager.bind().await.unwrap();
    tokio::spawn(async move { manager.start().await });
    addr
}

async fn start_echo_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let (mut reader, mut writer) = stream.split();
                let _ = tokio::io::copy(&mut reader, &mut writer).await;
            });
        }
    });
    addr
}

async fn closed_port() -> SocketAddr {
    TcpListener::bind("127.0.0.1:0").await.unwrap().local_addr().unwrap()
}

/// Send a CONNECT request and read the reply head
async fn connect_through(proxy: SocketAddr, authority: &str) -> (TcpStream, String) {
    let mut stream = TcpStream::connect(proxy).await.unwrap();
    let request = format!("CONNECT {0} HTTP/1.1\r\nHost: {0}\r\n\r\n", authority);
    stream.write_all(request.as_bytes()).await.unwrap();

    let mut head = Vec::new();
    while !head.ends_with(b"\r\n\r\n") {
        match stream.read_u8().await {
            Ok(byte) => head.push(byte),
            Err(_) => break,
        }
    }
    (stream, String::from_utf8(head).unwrap())
}

#[tokio::test]
async fn test_tunnel_to_echo_server() {
    let echo = start_echo_server().await;
    let proxy = start_proxy(test_config()).await;

    let (mut stream, reply) = connect_through(proxy, &echo.to_string()).await;
    assert_eq!(reply, ESTABLISHED);

    stream.write_all(b"hello through the tunnel").await.unwrap();
    let mut echoed = [0u8; 24];
    stream.read_exact(&mut echoed).await.unwrap();
    assert_eq!(&echoed, b"hello through the tunnel");
}

#[tokio::test]
async fn test_denied_target_gets_one_403_and_no_connection() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let target = listener.local_addr().unwrap();

    let mut config = test_config();
    config.access_control = deny_loopback();
    let proxy = start_proxy(config).await;

    let (mut stream, reply) = connect_through(proxy, &target.to_string()).await;
    assert!(reply.starts_with("HTTP/1.1 403 Forbidden\r\n"));

    let mut rest = String::new();
    stream.read_to_string(&mut rest).await.unwrap();
    assert!(!rest.contains("HTTP/1.1"));

    // The remote never saw a connection attempt
    assert!(timeout(Duration::from_millis(200), listener.accept()).await.is_err());
}

#[tokio::test]
async fn test_loopback_by_name_gets_403() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let mut config = test_config();
    config.access_control = deny_loopback();
    let proxy = start_proxy(config).await;

    let (_stream, reply) = connect_through(proxy, &format!("localhost:{}", port)).await;
    assert!(reply.starts_with("HTTP/1.1 403 Forbidden\r\n"));
    assert!(timeout(Duration::from_millis(200), listener.accept()).await.is_err());
}

#[tokio::test]
async fn test_refused_target_closes_without_reply() {
    let target = closed_port().await;
    let proxy = start_proxy(test_config()).await;

    let (_stream, reply) = connect_through(proxy, &target.to_string()).await;
    assert!(reply.is_empty());
}

#[tokio::test]
async fn test_refused_target_with_reply_enabled() {
    let target = closed_port().await;
    let mut config = test_config();
    config.server.reply_on_unreachable = true;
    let proxy = start_proxy(config).await;

    let (_stream, reply) = connect_through(proxy, &target.to_string()).await;
    assert!(reply.starts_with("HTTP/1.1 502 Bad Gateway\r\n"));
}

#[tokio::test]
async fn test_invalid_target_gets_400() {
    let proxy = start_proxy(test_config()).await;

    let (_stream, reply) = connect_through(proxy, "not-a-valid-target").await;
    assert!(reply.starts_with("HTTP/1.1 400 Bad Request\r\n"));
}

#[tokio::test]
async fn test_handler_records_exact_totals() {
    const UPLOAD: usize = 4096;
    const DOWNLOAD: usize = 1000;

    // Remote reads the whole upload, answers with a fixed-size download, then closes
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let target = listener.local_addr().unwrap();
    let remote = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut upload = Vec::new();
        stream.read_to_end(&mut upload).await.unwrap();
        stream.write_all(&vec![7u8; DOWNLOAD]).await.unwrap();
        upload.len()
    });

    let config = test_config();
    let metrics = Arc::new(Metrics::new().unwrap());
    let handler = TunnelHandler::new(DirectConnector::from_config(&config), RelayEngine::from_config(&config))
        .with_metrics(Arc::clone(&metrics));

    let (client, mut client_peer) = duplex(64 * 1024);
    let ctx = ProxyContext::new("conn_totals", "127.0.0.1:40000".parse().unwrap());
    let session = RelaySession::with_id(ctx.connection_id.clone(), ctx.client_addr);

    let peer = tokio::spawn(async move {
        let mut reply = vec![0u8; ESTABLISHED.len()];
        client_peer.read_exact(&mut reply).await.unwrap();
        assert_eq!(reply, ESTABLISHED.as_bytes());

        client_peer.write_all(&vec![1u8; UPLOAD]).await.unwrap();
        client_peer.shutdown().await.unwrap();

        let mut download = Vec::new();
        client_peer.read_to_end(&mut download).await.unwrap();
        download.len()
    });

    let outcome = handler
        .handle(client, &target.to_string(), &ctx, &session)
        .await
        .unwrap();

    let stats = match outcome {
        TunnelOutcome::Completed(stats) => stats,
        other => panic!("expected a completed tunnel, got {:?}", other),
    };
    assert_eq!(stats.bytes_read, UPLOAD as u64);
    assert_eq!(stats.bytes_written, DOWNLOAD as u64);
    assert_eq!(session.bytes_read(), UPLOAD as u64);
    assert_eq!(session.bytes_written(), DOWNLOAD as u64);

    assert_eq!(remote.await.unwrap(), UPLOAD);
    assert_eq!(peer.await.unwrap(), DOWNLOAD);

    assert_eq!(metrics.get_total_tunnels(), 1);
    assert_eq!(metrics.get_active_tunnels(), 0);
    assert_eq!(metrics.get_bytes_transferred(), (UPLOAD as u64, DOWNLOAD as u64));
}

#[tokio::test]
async fn test_handler_denial_counts_rejection() {
    let mut config = test_config();
    config.access_control = deny_loopback();
    let metrics = Arc::new(Metrics::new().unwrap());
    let handler = TunnelHandler::new(DirectConnector::from_config(&config), RelayEngine::from_config(&config))
        .with_metrics(Arc::clone(&metrics));

    let (client, mut client_peer) = duplex(1024);
    let ctx = ProxyContext::new("conn_denied", "127.0.0.1:40001".parse().unwrap());
    let session = RelaySession::new(ctx.client_addr);

    let outcome = handler.handle(client, "127.0.0.1:443", &ctx, &session).await.unwrap();
    assert!(matches!(outcome, TunnelOutcome::Rejected(StatusCode::Forbidden)));

    let mut reply = String::new();
    client_peer.read_to_string(&mut reply).await.unwrap();
    assert_eq!(reply.matches("HTTP/1.1 ").count(), 1);
    assert_eq!(session.total_bytes(), 0);
    assert_eq!(metrics.get_rejected_requests(StatusCode::Forbidden), 1);
}
