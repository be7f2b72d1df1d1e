//! Integration tests for the relay engine

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll, Waker};

use tokio::io::{duplex, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{timeout, Duration};
use tunnelproxy::relay::{Direction, RelayEngine, RelaySession, SessionAccounting};

/// Remote stream that yields `data` once, then fails reads as soon as
/// `fail_after` bytes have been written to it. Until then reads stay pending.
struct FailingStream {
    data: Option<Vec<u8>>,
    fail_after: usize,
    received: usize,
    read_waker: Option<Waker>,
}

impl FailingStream {
    fn new(data: &[u8], fail_after: usize) -> Self {
        Self {
            data: Some(data.to_vec()),
            fail_after,
            received: 0,
            read_waker: None,
        }
    }
}

impl AsyncRead for FailingStream {
    fn poll_read(mut self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        if let Some(data) = self.data.take() {
            buf.put_slice(&data);
            return Poll::Ready(Ok(()));
        }

        if self.received >= self.fail_after {
            return Poll::Ready(Err(io::Error::from(io::ErrorKind::ConnectionReset)));
        }

        self.read_waker = Some(cx.waker().clone());
        Poll::Pending
    }
}

impl AsyncWrite for FailingStream {
    fn poll_write(mut self: Pin<&mut Self>, _cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        self.received += buf.len();
        if self.received >= self.fail_after {
            if let Some(waker) = self.read_waker.take() {
                waker.wake();
            }
        }
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

async fn tcp_pair() -> (TcpStream, TcpStream) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (connected, accepted) = tokio::join!(TcpStream::connect(addr), listener.accept());
    (connected.unwrap(), accepted.unwrap().0)
}

#[tokio::test]
async fn test_exact_byte_counts_over_tcp() {
    // client_app <-> client (relay) ... remote (relay) <-> remote_app
    let (mut client_app, client) = tcp_pair().await;
    let (remote, mut remote_app) = tcp_pair().await;

    let engine = RelayEngine::with_settings(1024, Duration::from_secs(10));
    let relay = tokio::spawn(async move { engine.relay(client, remote).await });

    let upload = vec![0x5a_u8; 10_000];
    let download = vec![0xa5_u8; 2_500];

    client_app.write_all(&upload).await.unwrap();
    client_app.shutdown().await.unwrap();

    let mut received = Vec::new();
    remote_app.read_to_end(&mut received).await.unwrap();
    assert_eq!(received.len(), upload.len());

    remote_app.write_all(&download).await.unwrap();
    drop(remote_app);

    let mut echoed = Vec::new();
    client_app.read_to_end(&mut echoed).await.unwrap();
    assert_eq!(echoed, download);

    let stats = relay.await.unwrap();
    assert!(stats.is_clean());
    assert_eq!(stats.bytes_read, 10_000);
    assert_eq!(stats.bytes_written, 2_500);
}

#[tokio::test]
async fn test_half_close_keeps_other_direction() {
    let (client, mut client_peer) = duplex(1024);
    let (remote, mut remote_peer) = duplex(1024);

    let engine = RelayEngine::with_settings(64, Duration::from_secs(10));
    let relay = tokio::spawn(async move { engine.relay(client, remote).await });

    // Client finishes sending first
    client_peer.write_all(b"request").await.unwrap();
    client_peer.shutdown().await.unwrap();

    let mut request = Vec::new();
    remote_peer.read_to_end(&mut request).await.unwrap();
    assert_eq!(request, b"request");

    // Remote can still answer after the client half-closed
    remote_peer.write_all(b"late response").await.unwrap();
    drop(remote_peer);

    let mut response = Vec::new();
    client_peer.read_to_end(&mut response).await.unwrap();
    assert_eq!(response, b"late response");

    let stats = relay.await.unwrap();
    assert_eq!(stats.bytes_read, 7);
    assert_eq!(stats.bytes_written, 13);
}

#[tokio::test]
async fn test_remote_failure_terminates_both_directions() {
    const UPLOAD: usize = 100;

    // The remote fails once the upload reached it. The client keeps its side
    // open, so only the abort signal can stop the client->remote direction.
    let (client, mut client_peer) = duplex(1024);
    let remote = FailingStream::new(b"partial", UPLOAD);
    client_peer.write_all(&[9u8; UPLOAD]).await.unwrap();

    let engine = RelayEngine::with_settings(64, Duration::from_secs(3600));
    let stats = timeout(Duration::from_secs(5), engine.relay(client, remote))
        .await
        .expect("relay must end once one direction fails");

    assert!(!stats.timed_out);
    // The aborted direction still reports what it forwarded
    assert_eq!(stats.bytes_read, UPLOAD as u64);
    assert_eq!(stats.bytes_written, 7);
    assert_eq!(stats.failures.len(), 1);
    assert_eq!(stats.failures[0].direction, Direction::RemoteToClient);
    assert_eq!(stats.failures[0].source.kind(), io::ErrorKind::ConnectionReset);

    // Bytes relayed before the failure reached the client, then the stream closed
    let mut delivered = Vec::new();
    client_peer.read_to_end(&mut delivered).await.unwrap();
    assert_eq!(delivered, b"partial");
}

#[tokio::test]
async fn test_session_accounting_records_totals() {
    let (client, mut client_peer) = duplex(1024);
    let (remote, mut remote_peer) = duplex(1024);

    let engine = RelayEngine::new();
    let relay = tokio::spawn(async move { engine.relay(client, remote).await });

    client_peer.write_all(b"abc").await.unwrap();
    client_peer.shutdown().await.unwrap();
    remote_peer.write_all(b"defgh").await.unwrap();
    remote_peer.shutdown().await.unwrap();

    let mut sink = Vec::new();
    remote_peer.read_to_end(&mut sink).await.unwrap();
    client_peer.read_to_end(&mut sink).await.unwrap();

    let stats = relay.await.unwrap();
    let session = RelaySession::new("127.0.0.1:1234".parse().unwrap());
    session.add_bytes_read(stats.bytes_read);
    session.add_bytes_written(stats.bytes_written);

    assert_eq!(session.bytes_read(), 3);
    assert_eq!(session.bytes_written(), 5);

    let exported = session.to_stats(Some("example.com:443".to_string()));
    assert_eq!(exported.total_bytes, 8);
    assert_eq!(exported.target.as_deref(), Some("example.com:443"));
}
