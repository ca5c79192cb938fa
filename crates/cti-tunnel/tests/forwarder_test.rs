//! Forwarder tests against a local echo server
//!
//! `DirectTransport` stands in for the SSH gateway so the pairing logic can be
//! exercised without a real sshd.

use async_trait::async_trait;
use cti_core::{AppError, AppResult};
use cti_tunnel::{DirectTransport, Tunnel, TunnelForwarder, TunnelTransport};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

async fn spawn_echo_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                break;
            };
            tokio::spawn(async move {
                let (mut rd, mut wr) = socket.split();
                let _ = tokio::io::copy(&mut rd, &mut wr).await;
            });
        }
    });
    addr
}

fn forwarder_to(addr: SocketAddr) -> TunnelForwarder<DirectTransport> {
    TunnelForwarder::new(
        DirectTransport::new(addr.ip().to_string(), addr.port()),
        Duration::from_secs(2),
    )
}

async fn echo_round_trip(local: SocketAddr, payload: &[u8]) -> Vec<u8> {
    let mut client = TcpStream::connect(local).await.unwrap();
    client.write_all(payload).await.unwrap();
    let mut buf = vec![0u8; payload.len()];
    client.read_exact(&mut buf).await.unwrap();
    buf
}

#[tokio::test]
async fn test_forwards_bytes_both_ways() {
    let echo = spawn_echo_server().await;
    let tunnel = forwarder_to(echo);

    let local = tunnel.start().await.unwrap();
    assert!(local.ip().is_loopback());
    assert_ne!(local.port(), 0);

    let reply = echo_round_trip(local, b"auth ClueCon\n\n").await;
    assert_eq!(reply, b"auth ClueCon\n\n");

    tunnel.stop().await;
}

#[tokio::test]
async fn test_start_is_idempotent() {
    let echo = spawn_echo_server().await;
    let tunnel = forwarder_to(echo);

    let first = tunnel.start().await.unwrap();
    let second = tunnel.start().await.unwrap();
    assert_eq!(first, second);
    assert_eq!(tunnel.local_addr(), Some(first));

    tunnel.stop().await;
    assert_eq!(tunnel.local_addr(), None);
    // stopping twice is harmless
    tunnel.stop().await;
}

#[tokio::test]
async fn test_concurrent_connections_are_independent() {
    let echo = spawn_echo_server().await;
    let tunnel = forwarder_to(echo);
    let local = tunnel.start().await.unwrap();

    let mut tasks = Vec::new();
    for i in 0..8 {
        tasks.push(tokio::spawn(async move {
            let payload = format!("connection-{}", i).into_bytes();
            let reply = echo_round_trip(local, &payload).await;
            assert_eq!(reply, payload);
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    tunnel.stop().await;
}

#[tokio::test]
async fn test_stop_closes_listener_and_pairings() {
    let echo = spawn_echo_server().await;
    let tunnel = forwarder_to(echo);
    let local = tunnel.start().await.unwrap();

    let mut client = TcpStream::connect(local).await.unwrap();
    client.write_all(b"ping").await.unwrap();
    let mut buf = [0u8; 4];
    client.read_exact(&mut buf).await.unwrap();
    assert_eq!(tunnel.active_forwards(), 1);

    tunnel.stop().await;

    let mut rest = Vec::new();
    let n = tokio::time::timeout(Duration::from_secs(2), client.read_to_end(&mut rest))
        .await
        .expect("pairing should be closed by stop")
        .unwrap_or(0);
    assert_eq!(n, 0);
    assert_eq!(tunnel.active_forwards(), 0);

    assert!(TcpStream::connect(local).await.is_err());
}

#[tokio::test]
async fn test_unreachable_target_drops_local_connection() {
    // bind then drop to get a port nothing listens on
    let dead = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap()
    };
    let tunnel = forwarder_to(dead);
    let local = tunnel.start().await.unwrap();

    let mut client = TcpStream::connect(local).await.unwrap();
    let mut buf = Vec::new();
    let n = tokio::time::timeout(Duration::from_secs(2), client.read_to_end(&mut buf))
        .await
        .unwrap()
        .unwrap_or(0);
    assert_eq!(n, 0);

    tunnel.stop().await;
}

struct RejectingTransport;

#[async_trait]
impl TunnelTransport for RejectingTransport {
    type Session = DirectTransport;

    async fn establish(&self) -> AppResult<DirectTransport> {
        Err(AppError::Auth("publickey denied".to_string()))
    }

    fn describe(&self) -> String {
        "rejecting".to_string()
    }
}

#[tokio::test]
async fn test_establish_failure_leaves_tunnel_stopped() {
    let tunnel = TunnelForwarder::new(RejectingTransport, Duration::from_secs(1));
    let err = tunnel.start().await.unwrap_err();
    assert!(matches!(err, AppError::Auth(_)));
    assert!(tunnel.local_addr().is_none());
    assert!(!tunnel.is_running().await);
}

